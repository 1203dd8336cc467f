//! A submitted ingest job: one [`DataSourceIngestJob`] per data source.
//!
//! A job is finished when its last child finishes; an atomic count of
//! incomplete children is the only join point. Children that finish while
//! the job is still starting are held back until the manager has announced
//! the job, so `STARTED` always precedes the terminal event.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use caseflow_core::DataSource;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::data_source_job::{DataSourceIngestJob, DataSourceJobSnapshot};
use crate::error::{IngestError, IngestModuleError};
use crate::ids::IdGenerator;
use crate::manager::ManagerShared;
use crate::pipeline::ModuleRun;
use crate::settings::IngestJobSettings;

enum StartGate {
    Unstarted,
    /// `start` is running or the manager has not announced the job yet.
    /// `started` counts children whose first stage has begun.
    Starting { deferred: Vec<Arc<DataSourceIngestJob>>, started: usize },
    Running,
    /// Start-up failed or there was nothing to run. Never reported finished.
    /// `outstanding` started children have not finished yet.
    Abandoned { outstanding: usize },
}

pub struct IngestJob {
    id: u64,
    children: Vec<Arc<DataSourceIngestJob>>,
    shared: Arc<ManagerShared>,
    gate: Mutex<StartGate>,
    cancelled: AtomicBool,
    incomplete_children: AtomicUsize,
}

impl IngestJob {
    pub(crate) fn new(
        id: u64,
        data_sources: Vec<Arc<dyn DataSource>>,
        settings: &IngestJobSettings,
        shared: Arc<ManagerShared>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|parent| {
            let child_ids = IdGenerator::starting_at(1);
            let children: Vec<_> = data_sources
                .into_iter()
                .map(|data_source| {
                    Arc::new(DataSourceIngestJob::new(
                        parent.clone(),
                        child_ids.next(),
                        id,
                        data_source,
                        settings,
                        Arc::clone(&shared),
                    ))
                })
                .collect();
            Self {
                id,
                incomplete_children: AtomicUsize::new(children.len()),
                children,
                shared,
                gate: Mutex::new(StartGate::Unstarted),
                cancelled: AtomicBool::new(false),
            }
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Children in data-source submission order.
    pub fn data_source_jobs(&self) -> &[Arc<DataSourceIngestJob>] {
        &self.children
    }

    pub fn data_source_job(&self, data_source_job_id: u64) -> Option<&Arc<DataSourceIngestJob>> {
        self.children.iter().find(|c| c.id() == data_source_job_id)
    }

    /// True if any child has at least one module configured.
    pub fn has_ingest_pipeline(&self) -> bool {
        self.children.iter().any(|c| c.has_ingest_pipeline())
    }

    fn gate(&self) -> MutexGuard<'_, StartGate> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start every child in order. Runs at most once; later calls return a
    /// single "already started" error.
    ///
    /// The first child that fails stops the loop: children already started
    /// are cancelled, later children are never attempted, and only the
    /// failing child's errors are returned.
    pub(crate) fn start(&self) -> Vec<IngestModuleError> {
        {
            let mut gate = self.gate();
            if !matches!(*gate, StartGate::Unstarted) {
                return vec![IngestModuleError::new("IngestJob", IngestError::AlreadyStarted)];
            }
            *gate = StartGate::Starting { deferred: Vec::new(), started: 0 };
        }

        if !self.has_ingest_pipeline() {
            debug!(job_id = self.id, "No enabled modules, nothing to start");
            return Vec::new();
        }

        let mut started: Vec<&Arc<DataSourceIngestJob>> = Vec::new();
        for child in &self.children {
            let errors = child.start_up();
            if !errors.is_empty() {
                for started_child in &started {
                    started_child.cancel();
                }
                return errors;
            }
            self.shared
                .fire_data_source_analysis_started(self.id, child.id(), child.data_source_name());
            if let StartGate::Starting { started, .. } = &mut *self.gate() {
                *started += 1;
            }
            child.begin_first_stage();
            started.push(child);
        }
        Vec::new()
    }

    /// Mark the job announced and process children that finished early.
    pub(crate) fn release(&self) {
        let deferred = {
            let mut gate = self.gate();
            match std::mem::replace(&mut *gate, StartGate::Running) {
                StartGate::Starting { deferred, .. } => deferred,
                other => {
                    *gate = other;
                    return;
                }
            }
        };
        for child in deferred {
            self.complete_child(&child);
        }
    }

    /// Mark the job as never started. Children still finish normally but the
    /// job itself is never reported completed or cancelled.
    ///
    /// While started children are still running the manager holds the job,
    /// so each of them still reports its data-source terminal event.
    pub(crate) fn abandon(self: &Arc<Self>) {
        let (deferred, outstanding) = {
            let mut gate = self.gate();
            let previous = std::mem::replace(&mut *gate, StartGate::Abandoned { outstanding: 0 });
            let (deferred, outstanding) = match previous {
                StartGate::Starting { deferred, started } => {
                    let outstanding = started.saturating_sub(deferred.len());
                    (deferred, outstanding)
                }
                _ => (Vec::new(), 0),
            };
            if outstanding > 0 {
                // Registered under the gate so the last child cannot miss it.
                self.shared
                    .abandoned_jobs
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(self.id, Arc::clone(self));
            }
            *gate = StartGate::Abandoned { outstanding };
            (deferred, outstanding)
        };
        debug!(job_id = self.id, outstanding, "Ingest job abandoned");
        for child in deferred {
            self.fire_data_source_finished(&child);
        }
    }

    /// Cancel the job and every child. Only the first call has any effect.
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(job_id = self.id, data_sources = self.children.len(), "Cancelling ingest job");
        for child in &self.children {
            child.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn data_source_job_finished(&self, child: &Arc<DataSourceIngestJob>) {
        let (abandoned, last) = {
            let mut gate = self.gate();
            match &mut *gate {
                StartGate::Starting { deferred, .. } => {
                    deferred.push(Arc::clone(child));
                    return;
                }
                StartGate::Abandoned { outstanding } => {
                    *outstanding = outstanding.saturating_sub(1);
                    (true, *outstanding == 0)
                }
                StartGate::Unstarted | StartGate::Running => (false, false),
            }
        };
        if abandoned {
            self.fire_data_source_finished(child);
            if last {
                let released = self
                    .shared
                    .abandoned_jobs
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&self.id);
                drop(released);
            }
        } else {
            self.complete_child(child);
        }
    }

    fn complete_child(&self, child: &Arc<DataSourceIngestJob>) {
        self.fire_data_source_finished(child);
        if self.incomplete_children.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.shared.finish_job(self);
        }
    }

    fn fire_data_source_finished(&self, child: &DataSourceIngestJob) {
        if child.is_cancelled() {
            self.shared
                .fire_data_source_analysis_cancelled(self.id, child.id(), child.data_source_name());
        } else {
            self.shared
                .fire_data_source_analysis_completed(self.id, child.id(), child.data_source_name());
        }
    }

    /// Best-effort progress view. Children are visited one at a time and may
    /// change state in between.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let mut running_module = None;
        let mut file_ingest_running = false;
        let mut file_ingest_start_time: Option<DateTime<Utc>> = None;
        let mut data_source_snapshots = Vec::with_capacity(self.children.len());

        for child in &self.children {
            let snapshot = child.snapshot();
            if running_module.is_none() {
                if let Some(run) = child.current_module() {
                    running_module = Some(DataSourceIngestModuleHandle {
                        job: Arc::clone(child),
                        cancelled: child.current_module_is_cancelled(),
                        run,
                    });
                }
            }
            if snapshot.file_ingest_running {
                file_ingest_running = true;
                if let Some(start) = snapshot.file_ingest_start_time {
                    file_ingest_start_time = Some(file_ingest_start_time.map_or(start, |t| t.min(start)));
                }
            }
            data_source_snapshots.push(snapshot);
        }

        ProgressSnapshot {
            job_id: self.id,
            data_source_snapshots,
            running_module,
            file_ingest_running,
            file_ingest_start_time,
            cancelled: self.is_cancelled(),
        }
    }
}

impl fmt::Debug for IngestJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestJob")
            .field("id", &self.id)
            .field("data_sources", &self.children.len())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub job_id: u64,
    pub data_source_snapshots: Vec<DataSourceJobSnapshot>,
    /// First running data-source module found across the children.
    pub running_module: Option<DataSourceIngestModuleHandle>,
    pub file_ingest_running: bool,
    /// Earliest start among children with file ingest running; `None` if
    /// no child is running file ingest.
    pub file_ingest_start_time: Option<DateTime<Utc>>,
    pub cancelled: bool,
}

/// Reference to the data-source module that was running when a snapshot was
/// taken.
#[derive(Clone)]
pub struct DataSourceIngestModuleHandle {
    job: Arc<DataSourceIngestJob>,
    run: Arc<ModuleRun>,
    cancelled: bool,
}

impl DataSourceIngestModuleHandle {
    pub fn display_name(&self) -> &str {
        self.run.display_name()
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.run.started_at()
    }

    pub fn data_source_job_id(&self) -> u64 {
        self.job.id()
    }

    /// Whether the module had been cancelled when the snapshot was taken.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Cancel the module if it is still the one running. A handle to a
    /// module that has since finished does nothing and returns `false`.
    /// A module that starts concurrently with this call may still be missed.
    pub fn cancel(&self) -> bool {
        self.job.cancel_module_if_current(&self.run)
    }
}

impl fmt::Debug for DataSourceIngestModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSourceIngestModuleHandle")
            .field("module", &self.run.display_name())
            .field("data_source_job_id", &self.job.id())
            .field("start_time", &self.run.started_at())
            .field("cancelled", &self.cancelled)
            .finish()
    }
}
