use caseflow_core::FileEntry;

use super::core::{IngestManager, ManagerShared};
use crate::events::{IngestJobEvent, IngestModuleEvent, Listener, ListenerId, ModuleContentEvent, ModuleDataEvent};

impl ManagerShared {
    pub(crate) fn fire_job_started(&self, job_id: u64) {
        self.events.publish_job_event(IngestJobEvent::Started { job_id });
    }

    pub(crate) fn fire_job_completed(&self, job_id: u64) {
        self.events.publish_job_event(IngestJobEvent::Completed { job_id });
    }

    pub(crate) fn fire_job_cancelled(&self, job_id: u64) {
        self.events.publish_job_event(IngestJobEvent::Cancelled { job_id });
    }

    pub(crate) fn fire_data_source_analysis_started(&self, job_id: u64, data_source_job_id: u64, data_source: &str) {
        self.events.publish_job_event(IngestJobEvent::DataSourceAnalysisStarted {
            job_id,
            data_source_job_id,
            data_source: data_source.to_string(),
        });
    }

    pub(crate) fn fire_data_source_analysis_completed(&self, job_id: u64, data_source_job_id: u64, data_source: &str) {
        self.events.publish_job_event(IngestJobEvent::DataSourceAnalysisCompleted {
            job_id,
            data_source_job_id,
            data_source: data_source.to_string(),
        });
    }

    pub(crate) fn fire_data_source_analysis_cancelled(&self, job_id: u64, data_source_job_id: u64, data_source: &str) {
        self.events.publish_job_event(IngestJobEvent::DataSourceAnalysisCancelled {
            job_id,
            data_source_job_id,
            data_source: data_source.to_string(),
        });
    }

    pub(crate) fn fire_file_ingest_done(&self, file: FileEntry) {
        self.events.publish_module_event(IngestModuleEvent::FileDone { file });
    }
}

impl IngestManager {
    pub fn add_ingest_job_event_listener(&self, listener: Listener<IngestJobEvent>) -> ListenerId {
        self.shared.events.add_job_listener(listener)
    }

    pub fn remove_ingest_job_event_listener(&self, id: ListenerId) -> bool {
        self.shared.events.remove_job_listener(id)
    }

    pub fn add_ingest_module_event_listener(&self, listener: Listener<IngestModuleEvent>) -> ListenerId {
        self.shared.events.add_module_listener(listener)
    }

    pub fn remove_ingest_module_event_listener(&self, id: ListenerId) -> bool {
        self.shared.events.remove_module_listener(id)
    }

    /// Publish a module data event on behalf of a caller outside a module.
    pub fn fire_ingest_module_data_event(&self, event: ModuleDataEvent) {
        self.shared.events.publish_module_event(IngestModuleEvent::DataAdded(event));
    }

    pub fn fire_ingest_module_content_event(&self, event: ModuleContentEvent) {
        self.shared.events.publish_module_event(IngestModuleEvent::ContentChanged(event));
    }
}
