//! Per data source file count and byte total.

use std::sync::{Arc, Mutex, PoisonError};

use caseflow_core::DataSource;
use caseflow_ingest::{
    DataSourceIngestModule, IngestJobContext, IngestMessage, IngestModuleFactory, ModuleDataEvent, ModuleOptions,
};
use serde::Serialize;
use tracing::info;

pub const MODULE_NAME: &str = "File Statistics";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataSourceStats {
    pub data_source: String,
    pub files: u64,
    pub bytes: u64,
    /// False when the count was cut short by a cancel.
    pub complete: bool,
}

#[derive(Debug, Default)]
pub struct FileStatsFactory {
    results: Arc<Mutex<Vec<DataSourceStats>>>,
}

impl FileStatsFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> Vec<DataSourceStats> {
        self.results.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl IngestModuleFactory for FileStatsFactory {
    fn module_display_name(&self) -> &str {
        MODULE_NAME
    }

    fn module_description(&self) -> &str {
        "Counts files and bytes in each data source"
    }

    fn create_data_source_module(&self, _options: &ModuleOptions) -> Option<Box<dyn DataSourceIngestModule>> {
        Some(Box::new(FileStatsModule {
            results: Arc::clone(&self.results),
            context: None,
        }))
    }
}

pub struct FileStatsModule {
    results: Arc<Mutex<Vec<DataSourceStats>>>,
    context: Option<IngestJobContext>,
}

impl DataSourceIngestModule for FileStatsModule {
    fn start_up(&mut self, context: &IngestJobContext) -> anyhow::Result<()> {
        self.context = Some(context.clone());
        Ok(())
    }

    fn process(&mut self, data_source: &dyn DataSource) -> anyhow::Result<()> {
        let files = data_source.files()?;
        let mut stats = DataSourceStats {
            data_source: data_source.name().to_string(),
            files: 0,
            bytes: 0,
            complete: true,
        };
        for file in &files {
            if self.context.as_ref().is_some_and(|c| c.data_source_ingest_is_cancelled()) {
                stats.complete = false;
                break;
            }
            stats.files += 1;
            stats.bytes += file.size;
        }

        info!(
            data_source = %stats.data_source,
            files = stats.files,
            bytes = stats.bytes,
            complete = stats.complete,
            "Data source statistics"
        );
        if let Some(context) = &self.context {
            context.post_message(
                IngestMessage::info(MODULE_NAME, format!("Statistics for {}", stats.data_source))
                    .with_details(format!("{} files, {} bytes", stats.files, stats.bytes)),
            );
            context.fire_data_added(ModuleDataEvent {
                module_name: MODULE_NAME.to_string(),
                artifact_type: "data_source_stats".to_string(),
                artifact_count: 1,
            });
        }
        self.results.lock().unwrap_or_else(PoisonError::into_inner).push(stats);
        Ok(())
    }
}
