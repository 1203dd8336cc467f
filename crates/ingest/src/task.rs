use std::sync::Arc;

use caseflow_core::FileEntry;

use crate::data_source_job::DataSourceIngestJob;

/// Key of one data-source job: (ingest job id, data-source job id).
pub(crate) type ChildKey = (u64, u64);

/// A unit of work owned by a queue until a worker dequeues it.
pub(crate) enum IngestTask {
    /// Run the current data-source pipeline stage of a job.
    DataSource { job: Arc<DataSourceIngestJob> },
    /// Run the file pipeline over one file of a job.
    File { job: Arc<DataSourceIngestJob>, file: FileEntry },
}

impl IngestTask {
    pub(crate) fn job(&self) -> &Arc<DataSourceIngestJob> {
        match self {
            IngestTask::DataSource { job } | IngestTask::File { job, .. } => job,
        }
    }

    pub(crate) fn key(&self) -> ChildKey {
        let job = self.job();
        (job.job_id(), job.id())
    }

    pub(crate) fn kind(&self) -> TaskKind {
        match self {
            IngestTask::DataSource { .. } => TaskKind::DataSource,
            IngestTask::File { .. } => TaskKind::File,
        }
    }

    pub(crate) fn execute(&self, thread_id: u64) {
        match self {
            IngestTask::DataSource { job } => job.process_data_source(thread_id),
            IngestTask::File { job, file } => job.process_file(thread_id, file),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskKind {
    DataSource,
    File,
}
