//! Analysis module contracts.
//!
//! Modules are created per job from a factory, started once, invoked once per
//! task and shut down when their pipeline stage ends. They report results
//! through the [`IngestJobContext`] they receive at start-up rather than
//! through return values, and are expected to poll its cancellation queries.

use caseflow_core::{DataSource, FileEntry};

use crate::context::IngestJobContext;

/// Per-module options. The engine passes them through untouched.
pub type ModuleOptions = serde_json::Value;

/// A module that runs once per data source.
pub trait DataSourceIngestModule: Send {
    fn start_up(&mut self, _context: &IngestJobContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn process(&mut self, data_source: &dyn DataSource) -> anyhow::Result<()>;

    fn shut_down(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A module that runs once per file.
pub trait FileIngestModule: Send {
    fn start_up(&mut self, _context: &IngestJobContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn process(&mut self, file: &FileEntry) -> anyhow::Result<()>;

    fn shut_down(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Creates module instances. A factory may provide a data-source module, a
/// file module, or both; returning `None` means "not provided".
pub trait IngestModuleFactory: Send + Sync {
    fn module_display_name(&self) -> &str;

    fn module_description(&self) -> &str {
        ""
    }

    fn create_data_source_module(&self, _options: &ModuleOptions) -> Option<Box<dyn DataSourceIngestModule>> {
        None
    }

    fn create_file_module(&self, _options: &ModuleOptions) -> Option<Box<dyn FileIngestModule>> {
        None
    }
}
