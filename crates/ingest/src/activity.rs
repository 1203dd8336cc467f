//! Per-thread activity snapshots and cumulative module run times.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// What a worker thread is doing right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ThreadActivity {
    Idle,
    DataSourceTask {
        job_id: u64,
        module: String,
        data_source: String,
    },
    FileTask {
        job_id: u64,
        module: String,
        data_source: String,
        file: String,
    },
}

impl ThreadActivity {
    pub fn idle() -> Self {
        ThreadActivity::Idle
    }

    pub fn data_source_task(job_id: u64, module: impl Into<String>, data_source: impl Into<String>) -> Self {
        ThreadActivity::DataSourceTask {
            job_id,
            module: module.into(),
            data_source: data_source.into(),
        }
    }

    pub fn file_task(
        job_id: u64,
        module: impl Into<String>,
        data_source: impl Into<String>,
        file: impl Into<String>,
    ) -> Self {
        ThreadActivity::FileTask {
            job_id,
            module: module.into(),
            data_source: data_source.into(),
            file: file.into(),
        }
    }

    /// Module name for accounting; `None` when idle.
    pub fn module(&self) -> Option<&str> {
        match self {
            ThreadActivity::Idle => None,
            ThreadActivity::DataSourceTask { module, .. } | ThreadActivity::FileTask { module, .. } => Some(module),
        }
    }

    pub fn job_id(&self) -> Option<u64> {
        match self {
            ThreadActivity::Idle => None,
            ThreadActivity::DataSourceTask { job_id, .. } | ThreadActivity::FileTask { job_id, .. } => Some(*job_id),
        }
    }

    /// Display label, `"IDLE"` for an idle thread.
    pub fn label(&self) -> &str {
        self.module().unwrap_or("IDLE")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadActivitySnapshot {
    pub thread_id: u64,
    pub activity: ThreadActivity,
    pub started_at: DateTime<Utc>,
}

/// Thread-id keyed snapshot table plus the module run-time accumulator.
#[derive(Debug, Default)]
pub struct ActivityTracker {
    snapshots: RwLock<HashMap<u64, ThreadActivitySnapshot>>,
    /// Module display name -> cumulative milliseconds.
    run_times: Mutex<HashMap<String, u64>>,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a worker thread with an idle snapshot.
    pub fn register_thread(&self, thread_id: u64) {
        self.register_thread_at(thread_id, Utc::now());
    }

    pub fn register_thread_at(&self, thread_id: u64, now: DateTime<Utc>) {
        self.snapshots.write().unwrap_or_else(PoisonError::into_inner).insert(
            thread_id,
            ThreadActivitySnapshot {
                thread_id,
                activity: ThreadActivity::Idle,
                started_at: now,
            },
        );
    }

    /// Replace the thread's snapshot with a new activity.
    pub fn set_task_progress(&self, thread_id: u64, activity: ThreadActivity) {
        self.set_task_progress_at(thread_id, activity, Utc::now());
    }

    /// Mark the thread idle again.
    pub fn set_task_progress_completed(&self, thread_id: u64) {
        self.set_task_progress_at(thread_id, ThreadActivity::Idle, Utc::now());
    }

    /// Swap in the new snapshot and charge the time spent in the outgoing
    /// activity to its module. Idle time is never charged.
    pub fn set_task_progress_at(&self, thread_id: u64, activity: ThreadActivity, now: DateTime<Utc>) {
        let previous = self.snapshots.write().unwrap_or_else(PoisonError::into_inner).insert(
            thread_id,
            ThreadActivitySnapshot {
                thread_id,
                activity,
                started_at: now,
            },
        );

        let Some(previous) = previous else {
            return;
        };
        let Some(module) = previous.activity.module() else {
            return;
        };
        let elapsed = (now - previous.started_at).num_milliseconds().max(0) as u64;
        let mut run_times = self.run_times.lock().unwrap_or_else(PoisonError::into_inner);
        *run_times.entry(module.to_string()).or_insert(0) += elapsed;
    }

    /// All thread snapshots, ordered by thread id.
    pub fn snapshots(&self) -> Vec<ThreadActivitySnapshot> {
        let mut snapshots: Vec<_> = self
            .snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        snapshots.sort_by_key(|s| s.thread_id);
        snapshots
    }

    pub fn snapshot(&self, thread_id: u64) -> Option<ThreadActivitySnapshot> {
        self.snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&thread_id)
            .cloned()
    }

    /// Cumulative run time per module in milliseconds.
    pub fn module_run_times(&self) -> BTreeMap<String, u64> {
        self.run_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }
}
