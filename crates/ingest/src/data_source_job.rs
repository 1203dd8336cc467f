//! Ingest of one data source within a job.
//!
//! Lifecycle: `Initialization -> FirstStage -> [SecondStage] -> Finalization`.
//! The first stage runs the first data-source pipeline and every file task
//! concurrently. When the last first-stage task finishes, the file pipelines
//! and the first data-source pipeline are shut down and the second
//! data-source pipeline (if any, and unless cancelled) gets its own task.
//! When the final stage ends the parent job is told.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use caseflow_core::{DataSource, FileEntry};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::activity::ActivityTracker;
use crate::cancel::{CancellationState, CancellationToken};
use crate::context::IngestJobContext;
use crate::error::{IngestError, IngestModuleError};
use crate::events::IngestModuleEvent;
use crate::job::IngestJob;
use crate::manager::ManagerShared;
use crate::message::IngestMessage;
use crate::pipeline::{DataSourceIngestPipeline, FileIngestPipeline, FilePipelinePool, ModuleRun};
use crate::scheduler::PendingTasks;
use crate::settings::{DataSourceStage, IngestJobSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IngestStage {
    Initialization,
    FirstStage,
    SecondStage,
    Finalization,
}

#[derive(Debug, Default)]
struct CurrentModule {
    run: Option<Arc<ModuleRun>>,
    cancelled: bool,
}

pub struct DataSourceIngestJob {
    id: u64,
    job_id: u64,
    parent: Weak<IngestJob>,
    shared: Arc<ManagerShared>,
    data_source: Arc<dyn DataSource>,
    execution_context: String,
    stage: Mutex<IngestStage>,
    first_stage_pipeline: Mutex<DataSourceIngestPipeline>,
    second_stage_pipeline: Mutex<DataSourceIngestPipeline>,
    file_pipelines: FilePipelinePool,
    has_first_stage_pipeline: bool,
    has_second_stage_pipeline: bool,
    has_file_pipeline: bool,
    /// Files enumerated at start-up, handed to the scheduler when the first
    /// stage begins.
    pending_files: Mutex<Vec<FileEntry>>,
    current_module: Mutex<CurrentModule>,
    cancellation: CancellationToken,
    cancelled_modules: Mutex<Vec<String>>,
    processed_files: AtomicU64,
    estimated_files: AtomicU64,
    file_ingest_running: AtomicBool,
    file_ingest_start_time: Mutex<Option<DateTime<Utc>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DataSourceIngestJob {
    pub(crate) fn new(
        parent: Weak<IngestJob>,
        id: u64,
        job_id: u64,
        data_source: Arc<dyn DataSource>,
        settings: &IngestJobSettings,
        shared: Arc<ManagerShared>,
    ) -> Self {
        let templates = settings.templates();
        let first = DataSourceIngestPipeline::new(DataSourceStage::First, templates);
        let second = DataSourceIngestPipeline::new(DataSourceStage::Second, templates);
        let file_pipelines: Vec<FileIngestPipeline> = (0..shared.file_ingest_threads)
            .map(|_| FileIngestPipeline::new(templates))
            .filter(|p| !p.is_empty())
            .collect();
        let file_pipelines = FilePipelinePool::new(file_pipelines);

        Self {
            id,
            job_id,
            parent,
            data_source,
            execution_context: settings.context().to_string(),
            stage: Mutex::new(IngestStage::Initialization),
            has_first_stage_pipeline: !first.is_empty(),
            has_second_stage_pipeline: !second.is_empty(),
            has_file_pipeline: !file_pipelines.is_empty(),
            first_stage_pipeline: Mutex::new(first),
            second_stage_pipeline: Mutex::new(second),
            file_pipelines,
            pending_files: Mutex::new(Vec::new()),
            current_module: Mutex::new(CurrentModule::default()),
            cancellation: CancellationToken::new(),
            cancelled_modules: Mutex::new(Vec::new()),
            processed_files: AtomicU64::new(0),
            estimated_files: AtomicU64::new(0),
            file_ingest_running: AtomicBool::new(false),
            file_ingest_start_time: Mutex::new(None),
            shared,
        }
    }

    /// Identifier unique within the parent job.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn job_id(&self) -> u64 {
        self.job_id
    }

    pub fn data_source(&self) -> &Arc<dyn DataSource> {
        &self.data_source
    }

    pub fn data_source_name(&self) -> &str {
        self.data_source.name()
    }

    pub fn stage(&self) -> IngestStage {
        *lock(&self.stage)
    }

    fn set_stage(&self, stage: IngestStage) {
        *lock(&self.stage) = stage;
        debug!(job_id = self.job_id, data_source_job_id = self.id, ?stage, "Stage changed");
    }

    pub fn has_first_stage_data_source_pipeline(&self) -> bool {
        self.has_first_stage_pipeline
    }

    pub fn has_second_stage_data_source_pipeline(&self) -> bool {
        self.has_second_stage_pipeline
    }

    pub fn has_file_ingest_pipeline(&self) -> bool {
        self.has_file_pipeline
    }

    pub fn has_ingest_pipeline(&self) -> bool {
        self.has_first_stage_pipeline || self.has_second_stage_pipeline || self.has_file_pipeline
    }

    // ── Start-up ───────────────────────────────────────────────

    /// Start every pipeline and enumerate the data source's files. On any
    /// error the modules already started are shut down again and nothing is
    /// scheduled.
    pub(crate) fn start_up(self: &Arc<Self>) -> Vec<IngestModuleError> {
        let context = IngestJobContext::new(self, &self.execution_context);

        let mut errors = lock(&self.first_stage_pipeline).start_up(&context);
        if errors.is_empty() {
            errors.extend(lock(&self.second_stage_pipeline).start_up(&context));
        }
        if errors.is_empty() {
            self.file_pipelines.for_each_idle(|pipeline| {
                if errors.is_empty() {
                    errors.extend(pipeline.start_up(&context));
                }
            });
        }

        if errors.is_empty() && self.has_file_pipeline {
            match self.data_source.files() {
                Ok(files) => *lock(&self.pending_files) = files,
                Err(e) => errors.push(IngestModuleError::new(
                    self.data_source_name(),
                    IngestError::Content(e.to_string()),
                )),
            }
        }

        if !errors.is_empty() {
            warn!(
                job_id = self.job_id,
                data_source = %self.data_source_name(),
                errors = errors.len(),
                "Data source ingest job failed to start"
            );
            let shutdown_errors = self.shut_down_all_pipelines();
            self.log_module_errors(shutdown_errors);
            self.set_stage(IngestStage::Finalization);
        }
        errors
    }

    /// Queue the first stage. A stage with no tasks completes immediately.
    pub(crate) fn begin_first_stage(self: &Arc<Self>) {
        self.set_stage(IngestStage::FirstStage);
        let files = std::mem::take(&mut *lock(&self.pending_files));
        self.estimated_files.store(files.len() as u64, Ordering::Release);
        if self.has_file_pipeline {
            *lock(&self.file_ingest_start_time) = Some(Utc::now());
            self.file_ingest_running.store(true, Ordering::Release);
        }

        info!(
            job_id = self.job_id,
            data_source_job_id = self.id,
            data_source = %self.data_source_name(),
            files = files.len(),
            "Starting first stage analysis"
        );
        let scheduled = self
            .shared
            .scheduler
            .schedule_first_stage(self, self.has_first_stage_pipeline, files);
        if scheduled == 0 {
            self.stage_completed();
        }
    }

    // ── Task execution ─────────────────────────────────────────

    pub(crate) fn process_data_source(&self, thread_id: u64) {
        if self.is_cancelled() {
            self.cancellation.acknowledge();
            return;
        }
        let errors = match self.stage() {
            IngestStage::FirstStage => lock(&self.first_stage_pipeline).process(self, thread_id),
            IngestStage::SecondStage => lock(&self.second_stage_pipeline).process(self, thread_id),
            stage => {
                warn!(job_id = self.job_id, ?stage, "Data source task outside an analysis stage");
                return;
            }
        };
        self.log_module_errors(errors);
    }

    pub(crate) fn process_file(&self, thread_id: u64, file: &FileEntry) {
        if self.is_cancelled() {
            self.cancellation.acknowledge();
            return;
        }
        let Some(mut pipeline) = self.file_pipelines.take() else {
            return;
        };
        let errors = pipeline.process(self, thread_id, file);
        self.file_pipelines.give_back(pipeline);
        self.processed_files.fetch_add(1, Ordering::AcqRel);
        self.log_module_errors(errors);
    }

    /// Called by the worker that finished the last task of the current stage.
    pub(crate) fn stage_completed(self: &Arc<Self>) {
        match self.stage() {
            IngestStage::FirstStage => self.finish_first_stage(),
            IngestStage::SecondStage => self.finish(),
            stage => warn!(job_id = self.job_id, data_source_job_id = self.id, ?stage, "Unexpected stage completion"),
        }
    }

    fn finish_first_stage(self: &Arc<Self>) {
        let mut errors = Vec::new();
        self.file_pipelines.for_each_idle(|pipeline| errors.extend(pipeline.shut_down()));
        self.file_ingest_running.store(false, Ordering::Release);
        {
            let mut first = lock(&self.first_stage_pipeline);
            debug!(job_id = self.job_id, stage = ?first.stage(), "Shutting down data source pipeline");
            errors.extend(first.shut_down());
        }
        self.log_module_errors(errors);

        if self.has_second_stage_pipeline && !self.is_cancelled() {
            info!(
                job_id = self.job_id,
                data_source_job_id = self.id,
                data_source = %self.data_source_name(),
                "Starting second stage analysis"
            );
            self.set_stage(IngestStage::SecondStage);
            self.shared.scheduler.schedule_data_source_task(self);
        } else {
            self.finish();
        }
    }

    fn finish(self: &Arc<Self>) {
        self.set_stage(IngestStage::Finalization);
        let errors = lock(&self.second_stage_pipeline).shut_down();
        self.log_module_errors(errors);
        info!(
            job_id = self.job_id,
            data_source_job_id = self.id,
            data_source = %self.data_source_name(),
            cancelled = self.is_cancelled(),
            processed_files = self.processed_files.load(Ordering::Acquire),
            "Data source ingest job finished"
        );
        if let Some(parent) = self.parent.upgrade() {
            parent.data_source_job_finished(self);
        }
    }

    fn shut_down_all_pipelines(&self) -> Vec<IngestModuleError> {
        let mut errors = lock(&self.first_stage_pipeline).shut_down();
        errors.extend(lock(&self.second_stage_pipeline).shut_down());
        self.file_pipelines.for_each_idle(|pipeline| errors.extend(pipeline.shut_down()));
        errors
    }

    // ── Derived files ──────────────────────────────────────────

    pub(crate) fn add_files(self: &Arc<Self>, files: Vec<FileEntry>) -> bool {
        if files.is_empty() {
            return true;
        }
        if self.stage() != IngestStage::FirstStage || !self.has_file_pipeline || self.is_cancelled() {
            warn!(
                job_id = self.job_id,
                data_source = %self.data_source_name(),
                files = files.len(),
                "Files added outside the first stage were ignored"
            );
            return false;
        }
        self.estimated_files.fetch_add(files.len() as u64, Ordering::AcqRel);
        self.shared.scheduler.schedule_file_tasks(self, files);
        true
    }

    // ── Cancellation ───────────────────────────────────────────

    /// Request cancellation of this data source only. Tasks that have not
    /// started will not invoke any module; running modules see the flag.
    pub fn cancel(&self) {
        if self.cancellation.request() {
            info!(
                job_id = self.job_id,
                data_source_job_id = self.id,
                data_source = %self.data_source_name(),
                "Data source ingest job cancelled"
            );
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_requested() || self.parent.upgrade().is_some_and(|p| p.is_cancelled())
    }

    pub fn cancellation_state(&self) -> CancellationState {
        self.cancellation.state()
    }

    pub(crate) fn data_source_ingest_is_cancelled(&self) -> bool {
        self.is_cancelled() || self.current_module_is_cancelled()
    }

    pub(crate) fn set_current_module(&self, run: Option<Arc<ModuleRun>>) {
        let mut current = lock(&self.current_module);
        current.run = run;
        current.cancelled = false;
    }

    /// The data-source module running right now, if any.
    pub fn current_module(&self) -> Option<Arc<ModuleRun>> {
        lock(&self.current_module).run.clone()
    }

    pub(crate) fn current_module_is_cancelled(&self) -> bool {
        lock(&self.current_module).cancelled
    }

    /// Record that the cancelled module has returned. The flag stays set
    /// until the next module becomes current, so a handle can't cancel the
    /// same invocation twice.
    pub(crate) fn current_module_cancellation_completed(&self, display_name: &str) {
        lock(&self.cancelled_modules).push(display_name.to_string());
    }

    /// Cancel the running module only if it is still the same invocation as
    /// `run`. The comparison and the flag update share one lock.
    pub(crate) fn cancel_module_if_current(&self, run: &Arc<ModuleRun>) -> bool {
        let mut current = lock(&self.current_module);
        match &current.run {
            Some(active) if Arc::ptr_eq(active, run) && !current.cancelled => {
                current.cancelled = true;
                info!(
                    job_id = self.job_id,
                    module = %run.display_name(),
                    data_source = %self.data_source_name(),
                    "Data source module cancelled"
                );
                true
            }
            _ => false,
        }
    }

    pub fn cancelled_modules(&self) -> Vec<String> {
        lock(&self.cancelled_modules).clone()
    }

    // ── Progress ───────────────────────────────────────────────

    pub fn file_ingest_running(&self) -> bool {
        self.file_ingest_running.load(Ordering::Acquire)
    }

    pub fn file_ingest_start_time(&self) -> Option<DateTime<Utc>> {
        *lock(&self.file_ingest_start_time)
    }

    pub fn processed_files(&self) -> u64 {
        self.processed_files.load(Ordering::Acquire)
    }

    pub fn estimated_files(&self) -> u64 {
        self.estimated_files.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> DataSourceJobSnapshot {
        DataSourceJobSnapshot {
            job_id: self.job_id,
            data_source_job_id: self.id,
            data_source: self.data_source_name().to_string(),
            stage: self.stage(),
            cancelled: self.is_cancelled(),
            cancelled_modules: self.cancelled_modules(),
            running_module: self.current_module().map(|run| (*run).clone()),
            file_ingest_running: self.file_ingest_running(),
            file_ingest_start_time: self.file_ingest_start_time(),
            processed_files: self.processed_files(),
            estimated_files: self.estimated_files(),
            pending_tasks: self.shared.scheduler.pending_tasks(self.job_id, self.id),
            snapshot_time: Utc::now(),
        }
    }

    // ── Collaborators ──────────────────────────────────────────

    pub(crate) fn activity(&self) -> &ActivityTracker {
        &self.shared.activity
    }

    pub(crate) fn post_message(&self, message: IngestMessage) {
        self.shared.messages.post(message);
    }

    pub(crate) fn fire_module_event(&self, event: IngestModuleEvent) {
        self.shared.events.publish_module_event(event);
    }

    pub(crate) fn fire_file_done(&self, file: &FileEntry) {
        self.shared.fire_file_ingest_done(file.clone());
    }

    fn log_module_errors(&self, errors: Vec<IngestModuleError>) {
        for e in errors {
            warn!(
                job_id = self.job_id,
                data_source = %self.data_source_name(),
                module = %e.module_display_name,
                error = %e.error,
                "Ingest module error"
            );
            self.post_message(
                IngestMessage::error(
                    &e.module_display_name,
                    format!(
                        "Module {} experienced an error analyzing {}",
                        e.module_display_name,
                        self.data_source_name()
                    ),
                )
                .with_details(e.error.to_string()),
            );
        }
    }
}

impl std::fmt::Debug for DataSourceIngestJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSourceIngestJob")
            .field("id", &self.id)
            .field("job_id", &self.job_id)
            .field("data_source", &self.data_source_name())
            .field("stage", &self.stage())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Point-in-time view of one data-source job.
#[derive(Debug, Clone, Serialize)]
pub struct DataSourceJobSnapshot {
    pub job_id: u64,
    pub data_source_job_id: u64,
    pub data_source: String,
    pub stage: IngestStage,
    pub cancelled: bool,
    pub cancelled_modules: Vec<String>,
    pub running_module: Option<ModuleRun>,
    pub file_ingest_running: bool,
    pub file_ingest_start_time: Option<DateTime<Utc>>,
    pub processed_files: u64,
    pub estimated_files: u64,
    pub pending_tasks: PendingTasks,
    pub snapshot_time: DateTime<Utc>,
}

impl DataSourceJobSnapshot {
    /// Files processed per second since file ingest began.
    pub fn files_per_second(&self) -> Option<f64> {
        let start = self.file_ingest_start_time?;
        let elapsed_ms = (self.snapshot_time - start).num_milliseconds();
        if elapsed_ms <= 0 {
            return None;
        }
        Some(self.processed_files as f64 / (elapsed_ms as f64 / 1000.0))
    }
}
