//! Module pipelines.
//!
//! A pipeline is an ordered list of module instances of one kind. Every call
//! into a module goes through [`guarded`], so an error or a panic becomes an
//! [`IngestModuleError`] for that module and never escapes the pipeline.

mod data_source;
mod file;

use std::panic::{catch_unwind, AssertUnwindSafe};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{panic_message, IngestError, IngestModuleError};

pub(crate) use data_source::DataSourceIngestPipeline;
pub(crate) use file::{FileIngestPipeline, FilePipelinePool};

/// One invocation of one module. Compared by identity (`Arc::ptr_eq`) to tell
/// whether a handle still refers to the module that is running now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleRun {
    display_name: String,
    started_at: DateTime<Utc>,
}

impl ModuleRun {
    pub(crate) fn new(display_name: &str) -> Self {
        Self {
            display_name: display_name.to_string(),
            started_at: Utc::now(),
        }
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

/// A module instance plus the name it is reported under.
pub(crate) struct PipelineModule<M: ?Sized> {
    display_name: String,
    started: bool,
    module: Box<M>,
}

impl<M: ?Sized> PipelineModule<M> {
    pub(crate) fn new(display_name: &str, module: Box<M>) -> Self {
        Self {
            display_name: display_name.to_string(),
            started: false,
            module,
        }
    }

    pub(crate) fn display_name(&self) -> &str {
        &self.display_name
    }
}

/// Run one module call, converting errors and panics into a module error.
pub(crate) fn guarded(
    display_name: &str,
    on_error: fn(String) -> IngestError,
    call: impl FnOnce() -> anyhow::Result<()>,
) -> Result<(), IngestModuleError> {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(IngestModuleError::new(display_name, on_error(format!("{e:#}")))),
        Err(payload) => Err(IngestModuleError::new(
            display_name,
            IngestError::ModulePanicked(panic_message(payload.as_ref())),
        )),
    }
}
