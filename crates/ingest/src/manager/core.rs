use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use caseflow_core::config::DEFAULT_MAX_ERROR_MESSAGE_POSTS;
use caseflow_core::preferences::{
    DEFAULT_NUMBER_OF_FILE_INGEST_THREADS, MAX_NUMBER_OF_FILE_INGEST_THREADS, MIN_NUMBER_OF_FILE_INGEST_THREADS,
};
use caseflow_core::{IngestConfig, MonitorConfig, UserPreferences};
use tracing::{info, warn};

use super::workers;
use crate::activity::{ActivityTracker, ThreadActivitySnapshot};
use crate::data_source_job::DataSourceJobSnapshot;
use crate::error::IngestError;
use crate::events::EventPublisher;
use crate::executor::SingleThreadExecutor;
use crate::ids::IdGenerator;
use crate::job::{IngestJob, ProgressSnapshot};
use crate::message::{MessagePoster, MessageSink};
use crate::monitor::{IngestMonitor, ResourceProbe};
use crate::scheduler::{IngestTasksScheduler, PendingTasks};

/// State shared by the manager, its worker threads and every live job.
pub(crate) struct ManagerShared {
    pub(crate) jobs: RwLock<BTreeMap<u64, Arc<IngestJob>>>,
    /// Jobs that failed to start but still have started children running.
    /// Children only hold a weak parent, so these entries keep the job alive
    /// until its last started child reports in.
    pub(crate) abandoned_jobs: Mutex<BTreeMap<u64, Arc<IngestJob>>>,
    pub(crate) job_ids: IdGenerator,
    /// Worker thread ids and job starter task ids.
    pub(crate) task_ids: IdGenerator,
    /// Cancel flags of job starters that have not finished yet.
    pub(crate) starters: Mutex<HashMap<u64, Arc<AtomicBool>>>,
    pub(crate) job_creation_enabled: AtomicBool,
    pub(crate) activity: ActivityTracker,
    pub(crate) events: EventPublisher,
    pub(crate) messages: Arc<MessagePoster>,
    pub(crate) scheduler: IngestTasksScheduler,
    pub(crate) file_ingest_threads: usize,
}

impl ManagerShared {
    pub(crate) fn is_ingest_running(&self) -> bool {
        !self.jobs.read().unwrap_or_else(PoisonError::into_inner).is_empty()
    }

    pub(crate) fn live_jobs(&self) -> Vec<Arc<IngestJob>> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

/// Process-wide ingest coordinator.
///
/// Owns the live-job table, one data-source worker thread, a fixed pool of
/// file worker threads, the job starter thread, the event publisher thread
/// and the resource monitor. Construct one per process and share it; tests
/// may build as many as they like.
///
/// Job creation is disabled until [`IngestManager::on_case_opened`] is called.
pub struct IngestManager {
    pub(super) shared: Arc<ManagerShared>,
    pub(super) workers: Mutex<Vec<JoinHandle<()>>>,
    pub(super) job_starter: SingleThreadExecutor,
    pub(super) monitor: IngestMonitor,
    pub(super) shut_down: AtomicBool,
}

impl IngestManager {
    pub fn builder() -> IngestManagerBuilder {
        IngestManagerBuilder::default()
    }

    /// Build from environment configuration and persisted preferences. The
    /// file thread count is read (and corrected if out of range) here only.
    pub fn from_config(config: &IngestConfig, preferences: &mut UserPreferences) -> Result<Self, IngestError> {
        Self::builder()
            .file_ingest_threads(preferences.resolved_file_ingest_threads())
            .max_error_message_posts(config.max_error_message_posts)
            .monitor_config(config.monitor.clone())
            .build()
    }

    pub fn number_of_file_ingest_threads(&self) -> usize {
        self.shared.file_ingest_threads
    }

    pub fn is_ingest_running(&self) -> bool {
        self.shared.is_ingest_running()
    }

    pub fn jobs(&self) -> Vec<Arc<IngestJob>> {
        self.shared.live_jobs()
    }

    pub fn job(&self, job_id: u64) -> Option<Arc<IngestJob>> {
        self.shared
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&job_id)
            .cloned()
    }

    pub fn job_snapshots(&self) -> Vec<ProgressSnapshot> {
        self.shared.live_jobs().iter().map(|job| job.snapshot()).collect()
    }

    /// Snapshots of every data-source job of every live job.
    pub fn ingest_job_snapshots(&self) -> Vec<DataSourceJobSnapshot> {
        self.shared
            .live_jobs()
            .iter()
            .flat_map(|job| job.data_source_jobs().iter().map(|child| child.snapshot()))
            .collect()
    }

    pub fn thread_activity_snapshots(&self) -> Vec<ThreadActivitySnapshot> {
        self.shared.activity.snapshots()
    }

    /// Cumulative milliseconds spent per module since the manager started.
    pub fn module_run_times(&self) -> BTreeMap<String, u64> {
        self.shared.activity.module_run_times()
    }

    /// Tasks queued and not yet picked up, per queue.
    pub fn queued_tasks(&self) -> PendingTasks {
        self.shared.scheduler.queued()
    }

    /// Free bytes on the monitored volume, `None` if it cannot be read.
    pub fn free_disk_space(&self) -> Option<u64> {
        self.monitor.free_disk_space()
    }

    pub fn set_message_sink(&self, sink: Option<Arc<dyn MessageSink>>) {
        self.shared.messages.set_sink(sink);
    }

    /// Stop the monitor, cancel everything, interrupt the workers and join
    /// every thread. Events already queued are still delivered. Idempotent;
    /// also runs on drop.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Shutting down ingest manager");
        self.monitor.stop();
        self.shared.job_creation_enabled.store(false, Ordering::Release);
        self.shared.cancel_all_ingest_jobs();
        self.job_starter.shutdown();
        self.shared.scheduler.interrupt();

        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        for worker in workers {
            if worker.join().is_err() {
                warn!("Ingest worker thread panicked");
            }
        }

        let discarded = self.shared.scheduler.discard_queued();
        self.shared.jobs.write().unwrap_or_else(PoisonError::into_inner).clear();
        self.shared
            .abandoned_jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.shared.events.shutdown();
        info!(discarded_tasks = discarded, "Ingest manager shut down");
    }
}

impl Drop for IngestManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub struct IngestManagerBuilder {
    file_ingest_threads: usize,
    max_error_message_posts: u64,
    monitor_config: MonitorConfig,
    monitor_interval: Option<Duration>,
    resource_probe: Option<Arc<dyn ResourceProbe>>,
    message_sink: Option<Arc<dyn MessageSink>>,
}

impl Default for IngestManagerBuilder {
    fn default() -> Self {
        Self {
            file_ingest_threads: DEFAULT_NUMBER_OF_FILE_INGEST_THREADS,
            max_error_message_posts: DEFAULT_MAX_ERROR_MESSAGE_POSTS,
            monitor_config: MonitorConfig::default(),
            monitor_interval: None,
            resource_probe: None,
            message_sink: None,
        }
    }
}

impl IngestManagerBuilder {
    /// Clamped to [1, 16].
    pub fn file_ingest_threads(mut self, threads: usize) -> Self {
        self.file_ingest_threads = threads;
        self
    }

    pub fn max_error_message_posts(mut self, max: u64) -> Self {
        self.max_error_message_posts = max;
        self
    }

    pub fn monitor_config(mut self, config: MonitorConfig) -> Self {
        self.monitor_config = config;
        self
    }

    /// Poll interval override, finer than the config's whole seconds.
    pub fn monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = Some(interval);
        self
    }

    pub fn resource_probe(mut self, probe: Arc<dyn ResourceProbe>) -> Self {
        self.resource_probe = Some(probe);
        self
    }

    pub fn message_sink(mut self, sink: Arc<dyn MessageSink>) -> Self {
        self.message_sink = Some(sink);
        self
    }

    pub fn build(self) -> Result<IngestManager, IngestError> {
        let file_ingest_threads = self
            .file_ingest_threads
            .clamp(MIN_NUMBER_OF_FILE_INGEST_THREADS, MAX_NUMBER_OF_FILE_INGEST_THREADS);
        if file_ingest_threads != self.file_ingest_threads {
            warn!(
                requested = self.file_ingest_threads,
                using = file_ingest_threads,
                "File ingest thread count clamped"
            );
        }

        let messages = Arc::new(MessagePoster::new(self.max_error_message_posts));
        messages.set_sink(self.message_sink);

        let shared = Arc::new(ManagerShared {
            jobs: RwLock::new(BTreeMap::new()),
            abandoned_jobs: Mutex::new(BTreeMap::new()),
            job_ids: IdGenerator::starting_at(0),
            task_ids: IdGenerator::starting_at(1),
            starters: Mutex::new(HashMap::new()),
            job_creation_enabled: AtomicBool::new(false),
            activity: ActivityTracker::new(),
            events: EventPublisher::new(Arc::clone(&messages))?,
            messages,
            scheduler: IngestTasksScheduler::new(),
            file_ingest_threads,
        });

        let mut monitor = IngestMonitor::from_config(&self.monitor_config);
        if let Some(interval) = self.monitor_interval {
            monitor = monitor.with_interval(interval);
        }
        if let Some(probe) = self.resource_probe {
            monitor = monitor.with_probe(probe);
        }

        let job_starter = SingleThreadExecutor::new("ingest-job-starter")?;
        let workers = match workers::spawn_workers(&shared) {
            Ok(workers) => workers,
            Err(e) => {
                shared.scheduler.interrupt();
                shared.events.shutdown();
                return Err(e);
            }
        };

        info!(
            data_source_threads = 1,
            file_ingest_threads,
            max_error_message_posts = self.max_error_message_posts,
            "Ingest manager started"
        );
        Ok(IngestManager {
            shared,
            workers: Mutex::new(workers),
            job_starter,
            monitor,
            shut_down: AtomicBool::new(false),
        })
    }
}
