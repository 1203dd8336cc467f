//! Job starting, finishing and cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};

use caseflow_core::DataSource;
use tracing::{debug, info, warn};

use super::core::{IngestManager, ManagerShared};
use crate::error::IngestModuleError;
use crate::job::IngestJob;
use crate::message::IngestMessage;
use crate::monitor::MonitoredIngest;
use crate::settings::IngestJobSettings;

/// Removes a job starter's cancel flag when the starter ends, however it ends.
struct StarterGuard<'a> {
    shared: &'a ManagerShared,
    task_id: u64,
}

impl Drop for StarterGuard<'_> {
    fn drop(&mut self) {
        self.shared
            .starters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.task_id);
    }
}

impl ManagerShared {
    /// Body of one job starter, run on the job starter thread.
    fn run_job_starter(
        self: &Arc<Self>,
        task_id: u64,
        cancelled: &AtomicBool,
        data_sources: Vec<Arc<dyn DataSource>>,
        settings: IngestJobSettings,
        interactive: bool,
    ) {
        let _guard = StarterGuard { shared: self, task_id };
        if cancelled.load(Ordering::Acquire) {
            debug!(task_id, "Job starter cancelled before it ran");
            return;
        }
        if data_sources.is_empty() {
            return;
        }

        let errors = self.start_job(data_sources, &settings, Some(cancelled));
        if !errors.is_empty() && interactive {
            self.report_startup_errors(&errors);
        }
    }

    /// Build, register and start a job. Registration happens before start so
    /// a concurrent cancel-all can find it.
    pub(crate) fn start_job(
        self: &Arc<Self>,
        data_sources: Vec<Arc<dyn DataSource>>,
        settings: &IngestJobSettings,
        starter_cancelled: Option<&AtomicBool>,
    ) -> Vec<IngestModuleError> {
        if !self.job_creation_enabled.load(Ordering::Acquire) {
            debug!("Ingest job creation disabled, ignoring start request");
            return Vec::new();
        }

        let job = IngestJob::new(self.job_ids.next(), data_sources, settings, Arc::clone(self));
        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job.id(), Arc::clone(&job));

        // A cancel-all that ran before registration only reached the starter.
        if starter_cancelled.is_some_and(|c| c.load(Ordering::Acquire)) {
            job.cancel();
        }

        let errors = job.start();
        if errors.is_empty() && job.has_ingest_pipeline() {
            info!(
                job_id = job.id(),
                data_sources = job.data_source_jobs().len(),
                modules = ?settings.enabled_module_names(),
                "Ingest job started"
            );
            self.fire_job_started(job.id());
            job.release();
        } else {
            self.jobs
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&job.id());
            job.abandon();
            for error in &errors {
                warn!(
                    job_id = job.id(),
                    module = %error.module_display_name,
                    error = %error.error,
                    "Ingest module failed to start"
                );
            }
            if errors.is_empty() {
                info!(job_id = job.id(), "Ingest job has no enabled modules, not started");
            }
        }
        errors
    }

    /// Called when the last child of `job` finishes. Fires exactly one
    /// terminal event, and only for a job still in the table.
    pub(crate) fn finish_job(&self, job: &IngestJob) {
        let removed = self
            .jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&job.id())
            .is_some();
        if !removed {
            return;
        }
        if job.is_cancelled() {
            info!(job_id = job.id(), "Ingest job cancelled");
            self.fire_job_cancelled(job.id());
        } else {
            info!(job_id = job.id(), "Ingest job completed");
            self.fire_job_completed(job.id());
        }
    }

    /// Flag every pending starter, then cancel every live job.
    pub(crate) fn cancel_all_ingest_jobs(&self) {
        let starters: Vec<_> = self
            .starters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for cancelled in starters {
            cancelled.store(true, Ordering::Release);
        }
        for job in self.live_jobs() {
            job.cancel();
        }
    }

    fn report_startup_errors(&self, errors: &[IngestModuleError]) {
        let details = errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("\n");
        self.messages.post(
            IngestMessage::error("Ingest Manager", "Failed to start ingest job").with_details(format!(
                "The following ingest modules failed to start:\n{details}"
            )),
        );
    }
}

impl IngestManager {
    /// Queue a job start on the job starter thread and return immediately.
    /// Starting the first job of an idle period begins a new message epoch.
    pub fn start_jobs(&self, data_sources: Vec<Arc<dyn DataSource>>, settings: IngestJobSettings, interactive: bool) {
        if self.shut_down.load(Ordering::Acquire) {
            warn!("Ingest manager shut down, start request dropped");
            return;
        }
        if !self.shared.is_ingest_running() {
            self.shared.messages.clear();
        }
        let target: Arc<dyn MonitoredIngest> = self.shared.clone();
        if let Err(e) = self.monitor.start(Arc::downgrade(&target)) {
            warn!(error = %e, "Failed to start ingest monitor");
        }

        let task_id = self.shared.task_ids.next();
        let cancelled = Arc::new(AtomicBool::new(false));
        self.shared
            .starters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task_id, Arc::clone(&cancelled));

        let shared = Arc::clone(&self.shared);
        let submitted = self.job_starter.submit(move || {
            shared.run_job_starter(task_id, &cancelled, data_sources, settings, interactive);
        });
        if !submitted {
            warn!(task_id, "Job starter unavailable, start request dropped");
            self.shared
                .starters
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&task_id);
        }
    }

    /// Start a job on the calling thread. Returns the start-up errors; an
    /// empty list with no job created if job creation is disabled.
    pub fn start_job(&self, data_sources: Vec<Arc<dyn DataSource>>, settings: &IngestJobSettings) -> Vec<IngestModuleError> {
        self.shared.start_job(data_sources, settings, None)
    }

    /// Cancel pending job starters and every live job. Safe to call at any
    /// time from any thread.
    pub fn cancel_all_ingest_jobs(&self) {
        self.shared.cancel_all_ingest_jobs();
    }

    pub fn pending_job_starters(&self) -> usize {
        self.shared.starters.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
