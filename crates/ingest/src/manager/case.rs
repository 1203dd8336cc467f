//! Case lifecycle: job creation is only allowed while a case is open.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Receiver;
use tracing::{debug, info};

use super::core::{IngestManager, ManagerShared};
use crate::error::IngestError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseEvent {
    Opened { name: String },
    Closed,
}

impl ManagerShared {
    fn handle_case_opened(&self) {
        self.job_creation_enabled.store(true, Ordering::Release);
        self.messages.clear();
    }

    /// Disable creation first so nothing new starts while jobs are cancelled.
    fn handle_case_closed(&self) {
        self.job_creation_enabled.store(false, Ordering::Release);
        self.cancel_all_ingest_jobs();
        self.messages.clear();
    }

    fn handle_case_event(&self, event: &CaseEvent) {
        match event {
            CaseEvent::Opened { name } => {
                info!(case = %name, "Case opened, ingest job creation enabled");
                self.handle_case_opened();
            }
            CaseEvent::Closed => {
                info!("Case closed, cancelling ingest jobs");
                self.handle_case_closed();
            }
        }
    }
}

impl IngestManager {
    pub fn on_case_opened(&self) {
        self.shared.handle_case_opened();
    }

    pub fn on_case_closed(&self) {
        self.shared.handle_case_closed();
    }

    pub fn on_case_event(&self, event: &CaseEvent) {
        self.shared.handle_case_event(event);
    }

    pub fn is_job_creation_enabled(&self) -> bool {
        self.shared.job_creation_enabled.load(Ordering::Acquire)
    }

    /// Follow case events from a channel on a background thread. The thread
    /// ends when every sender is dropped or the manager goes away.
    pub fn subscribe_to_case_events(&self, events: Receiver<CaseEvent>) -> Result<JoinHandle<()>, IngestError> {
        let shared = Arc::downgrade(&self.shared);
        thread::Builder::new()
            .name("ingest-case-events".into())
            .spawn(move || {
                for event in events.iter() {
                    let Some(shared) = shared.upgrade() else { break };
                    shared.handle_case_event(&event);
                }
                debug!("Case event subscription ended");
            })
            .map_err(|e| IngestError::ThreadSpawn(format!("ingest-case-events: {e}")))
    }
}
