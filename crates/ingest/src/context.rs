use std::sync::{Arc, Weak};

use caseflow_core::FileEntry;

use crate::data_source_job::DataSourceIngestJob;
use crate::events::{IngestModuleEvent, ModuleContentEvent, ModuleDataEvent};
use crate::message::IngestMessage;

/// Handle given to modules at start-up. Gives access to the owning job's
/// cancellation state and to the message and event facilities.
///
/// Holds only a weak reference, so a module that keeps its context after the
/// job is gone sees the job as cancelled and every other call as a no-op.
#[derive(Debug, Clone)]
pub struct IngestJobContext {
    job: Weak<DataSourceIngestJob>,
    job_id: u64,
    data_source_job_id: u64,
    data_source_name: String,
    execution_context: String,
}

impl IngestJobContext {
    pub(crate) fn new(job: &Arc<DataSourceIngestJob>, execution_context: &str) -> Self {
        Self {
            job: Arc::downgrade(job),
            job_id: job.job_id(),
            data_source_job_id: job.id(),
            data_source_name: job.data_source_name().to_string(),
            execution_context: execution_context.to_string(),
        }
    }

    pub fn job_id(&self) -> u64 {
        self.job_id
    }

    pub fn data_source_job_id(&self) -> u64 {
        self.data_source_job_id
    }

    pub fn data_source_name(&self) -> &str {
        &self.data_source_name
    }

    pub fn execution_context(&self) -> &str {
        &self.execution_context
    }

    /// True once the data-source job (or its parent job) is cancelled.
    pub fn is_job_cancelled(&self) -> bool {
        self.job.upgrade().map_or(true, |job| job.is_cancelled())
    }

    /// Data-source modules poll this: it is also true when only the
    /// currently running data-source module was cancelled.
    pub fn data_source_ingest_is_cancelled(&self) -> bool {
        self.job
            .upgrade()
            .map_or(true, |job| job.data_source_ingest_is_cancelled())
    }

    pub fn file_ingest_is_cancelled(&self) -> bool {
        self.is_job_cancelled()
    }

    pub fn post_message(&self, message: IngestMessage) {
        if let Some(job) = self.job.upgrade() {
            job.post_message(message);
        }
    }

    pub fn fire_data_added(&self, event: ModuleDataEvent) {
        if let Some(job) = self.job.upgrade() {
            job.fire_module_event(IngestModuleEvent::DataAdded(event));
        }
    }

    pub fn fire_content_changed(&self, event: ModuleContentEvent) {
        if let Some(job) = self.job.upgrade() {
            job.fire_module_event(IngestModuleEvent::ContentChanged(event));
        }
    }

    /// Schedule newly discovered files (e.g. extracted from an archive) as
    /// file tasks of this data-source job. Only accepted while the first
    /// stage is running and the job is not cancelled.
    pub fn add_files_to_job(&self, files: Vec<FileEntry>) -> bool {
        match self.job.upgrade() {
            Some(job) => job.add_files(files),
            None => false,
        }
    }
}
