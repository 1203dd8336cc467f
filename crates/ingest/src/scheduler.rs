//! Decomposes data-source jobs into tasks and tracks when a stage is done.
//!
//! There are two shared FIFO queues, one for data-source tasks and one for
//! file tasks. Tasks from all jobs interleave by arrival order only.
//!
//! Each data-source job has a pending-task count covering queued and running
//! tasks. A batch is counted in full before any of its tasks is queued, and a
//! task's count is released only after it finishes, so the count reaches zero
//! exactly once per stage: when the last task of that stage completes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use caseflow_core::FileEntry;
use serde::Serialize;
use tracing::{debug, warn};

use crate::data_source_job::DataSourceIngestJob;
use crate::queue::{NextTask, TaskQueue};
use crate::task::{ChildKey, IngestTask, TaskKind};

/// Outstanding (queued or running) tasks of one data-source job.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PendingTasks {
    pub data_source: usize,
    pub file: usize,
}

impl PendingTasks {
    pub fn total(&self) -> usize {
        self.data_source + self.file
    }
}

/// Per-child pending counts. Split out of the scheduler so the stage
/// accounting can be exercised without queues or jobs.
#[derive(Debug, Default)]
pub(crate) struct PendingTaskTracker {
    pending: Mutex<HashMap<ChildKey, PendingTasks>>,
}

impl PendingTaskTracker {
    pub(crate) fn reserve(&self, key: ChildKey, data_source: usize, file: usize) {
        if data_source + file == 0 {
            return;
        }
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = pending.entry(key).or_default();
        entry.data_source += data_source;
        entry.file += file;
    }

    /// Release one task. Returns `true` when it was the last outstanding task
    /// for the child.
    pub(crate) fn complete(&self, key: ChildKey, kind: TaskKind) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = pending.get_mut(&key) else {
            warn!(job_id = key.0, data_source_job_id = key.1, "Completion for a job with no pending tasks");
            return false;
        };
        let slot = match kind {
            TaskKind::DataSource => &mut entry.data_source,
            TaskKind::File => &mut entry.file,
        };
        *slot = slot.saturating_sub(1);
        if entry.total() == 0 {
            pending.remove(&key);
            true
        } else {
            false
        }
    }

    pub(crate) fn get(&self, key: ChildKey) -> PendingTasks {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .copied()
            .unwrap_or_default()
    }
}

pub(crate) struct IngestTasksScheduler {
    data_source_tasks: TaskQueue<IngestTask>,
    file_tasks: TaskQueue<IngestTask>,
    tracker: PendingTaskTracker,
}

impl IngestTasksScheduler {
    pub(crate) fn new() -> Self {
        Self {
            data_source_tasks: TaskQueue::new("data-source"),
            file_tasks: TaskQueue::new("file"),
            tracker: PendingTaskTracker::default(),
        }
    }

    /// Queue the first stage of a job: an optional data-source task plus one
    /// file task per file. Returns the number of tasks queued; zero means the
    /// stage has nothing to do and the caller must complete it itself.
    pub(crate) fn schedule_first_stage(
        &self,
        job: &Arc<DataSourceIngestJob>,
        include_data_source_task: bool,
        files: Vec<FileEntry>,
    ) -> usize {
        let data_source = usize::from(include_data_source_task);
        let key = (job.job_id(), job.id());
        self.tracker.reserve(key, data_source, files.len());
        debug!(
            job_id = key.0,
            data_source_job_id = key.1,
            data_source_tasks = data_source,
            file_tasks = files.len(),
            "Scheduling first stage"
        );

        let total = data_source + files.len();
        if include_data_source_task {
            self.put(&self.data_source_tasks, IngestTask::DataSource { job: Arc::clone(job) });
        }
        for file in files {
            self.put(&self.file_tasks, IngestTask::File { job: Arc::clone(job), file });
        }
        total
    }

    pub(crate) fn schedule_data_source_task(&self, job: &Arc<DataSourceIngestJob>) {
        self.tracker.reserve((job.job_id(), job.id()), 1, 0);
        self.put(&self.data_source_tasks, IngestTask::DataSource { job: Arc::clone(job) });
    }

    /// Queue extra file tasks for a job whose first stage is still running.
    pub(crate) fn schedule_file_tasks(&self, job: &Arc<DataSourceIngestJob>, files: Vec<FileEntry>) -> usize {
        let count = files.len();
        self.tracker.reserve((job.job_id(), job.id()), 0, count);
        for file in files {
            self.put(&self.file_tasks, IngestTask::File { job: Arc::clone(job), file });
        }
        count
    }

    fn put(&self, queue: &TaskQueue<IngestTask>, task: IngestTask) {
        if !queue.put(task) {
            debug!(queue = queue.name(), "Queue interrupted, task discarded");
        }
    }

    pub(crate) fn next_data_source_task(&self) -> NextTask<IngestTask> {
        self.data_source_tasks.get_next_task()
    }

    pub(crate) fn next_file_task(&self) -> NextTask<IngestTask> {
        self.file_tasks.get_next_task()
    }

    /// Returns `true` when `task` was the last outstanding task of its stage.
    pub(crate) fn notify_task_completed(&self, task: &IngestTask) -> bool {
        self.tracker.complete(task.key(), task.kind())
    }

    pub(crate) fn pending_tasks(&self, job_id: u64, data_source_job_id: u64) -> PendingTasks {
        self.tracker.get((job_id, data_source_job_id))
    }

    /// Tasks waiting in each queue, not yet picked up by a worker.
    pub(crate) fn queued(&self) -> PendingTasks {
        PendingTasks {
            data_source: self.data_source_tasks.len(),
            file: self.file_tasks.len(),
        }
    }

    /// Wake every worker blocked on either queue.
    pub(crate) fn interrupt(&self) {
        self.data_source_tasks.interrupt();
        self.file_tasks.interrupt();
    }

    /// Drop tasks no worker will ever pick up. Used after the workers exit.
    pub(crate) fn discard_queued(&self) -> usize {
        self.data_source_tasks.drain() + self.file_tasks.drain()
    }
}
