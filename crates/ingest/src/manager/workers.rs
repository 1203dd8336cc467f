//! Worker thread pools.
//!
//! One thread consumes the data-source queue and `file_ingest_threads`
//! threads consume the file queue. Each loops until its queue is interrupted.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error};

use super::core::ManagerShared;
use crate::error::{panic_message, IngestError};
use crate::queue::NextTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerKind {
    DataSource,
    File,
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerKind::DataSource => write!(f, "data-source"),
            WorkerKind::File => write!(f, "file"),
        }
    }
}

pub(super) fn spawn_workers(shared: &Arc<ManagerShared>) -> Result<Vec<JoinHandle<()>>, IngestError> {
    let mut handles = Vec::with_capacity(1 + shared.file_ingest_threads);
    handles.push(spawn_worker(shared, WorkerKind::DataSource)?);
    for _ in 0..shared.file_ingest_threads {
        handles.push(spawn_worker(shared, WorkerKind::File)?);
    }
    Ok(handles)
}

fn spawn_worker(shared: &Arc<ManagerShared>, kind: WorkerKind) -> Result<JoinHandle<()>, IngestError> {
    let thread_id = shared.task_ids.next();
    shared.activity.register_thread(thread_id);
    let shared = Arc::clone(shared);
    thread::Builder::new()
        .name(format!("ingest-{kind}-{thread_id}"))
        .spawn(move || run_worker(&shared, kind, thread_id))
        .map_err(|e| IngestError::ThreadSpawn(format!("ingest-{kind}-{thread_id}: {e}")))
}

fn run_worker(shared: &ManagerShared, kind: WorkerKind, thread_id: u64) {
    debug!(thread_id, %kind, "Ingest worker started");
    loop {
        let next = match kind {
            WorkerKind::DataSource => shared.scheduler.next_data_source_task(),
            WorkerKind::File => shared.scheduler.next_file_task(),
        };
        let task = match next {
            NextTask::Task(task) => task,
            NextTask::Interrupted => break,
        };

        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| task.execute(thread_id))) {
            error!(
                thread_id,
                job_id = task.job().job_id(),
                panic = %panic_message(payload.as_ref()),
                "Ingest task panicked"
            );
            shared.activity.set_task_progress_completed(thread_id);
        }

        if shared.scheduler.notify_task_completed(&task) {
            let job = Arc::clone(task.job());
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| job.stage_completed())) {
                error!(thread_id, job_id = job.job_id(), panic = %panic_message(payload.as_ref()), "Stage completion panicked");
            }
        }
    }
    debug!(thread_id, %kind, "Ingest worker interrupted");
}
