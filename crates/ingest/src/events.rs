//! Job and module lifecycle events.
//!
//! Two independent channels: job events and module events. Publishing is
//! fire-and-forget on a dedicated single thread, so listeners never run on
//! the thread driving the job. A listener that errors or panics is logged,
//! a notice is raised once for that failure, and delivery continues.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use caseflow_core::FileEntry;
use serde::Serialize;
use tracing::{debug, error};

use crate::error::{panic_message, IngestError};
use crate::executor::SingleThreadExecutor;
use crate::message::{MessagePoster, Notice};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum IngestJobEvent {
    Started { job_id: u64 },
    Completed { job_id: u64 },
    Cancelled { job_id: u64 },
    DataSourceAnalysisStarted { job_id: u64, data_source_job_id: u64, data_source: String },
    DataSourceAnalysisCompleted { job_id: u64, data_source_job_id: u64, data_source: String },
    DataSourceAnalysisCancelled { job_id: u64, data_source_job_id: u64, data_source: String },
}

impl IngestJobEvent {
    pub fn job_id(&self) -> u64 {
        match self {
            IngestJobEvent::Started { job_id }
            | IngestJobEvent::Completed { job_id }
            | IngestJobEvent::Cancelled { job_id }
            | IngestJobEvent::DataSourceAnalysisStarted { job_id, .. }
            | IngestJobEvent::DataSourceAnalysisCompleted { job_id, .. }
            | IngestJobEvent::DataSourceAnalysisCancelled { job_id, .. } => *job_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            IngestJobEvent::Started { .. } => "STARTED",
            IngestJobEvent::Completed { .. } => "COMPLETED",
            IngestJobEvent::Cancelled { .. } => "CANCELLED",
            IngestJobEvent::DataSourceAnalysisStarted { .. } => "DATA_SOURCE_ANALYSIS_STARTED",
            IngestJobEvent::DataSourceAnalysisCompleted { .. } => "DATA_SOURCE_ANALYSIS_COMPLETED",
            IngestJobEvent::DataSourceAnalysisCancelled { .. } => "DATA_SOURCE_ANALYSIS_CANCELLED",
        }
    }

    /// Whether this is one of the job-level terminal events.
    pub fn is_terminal(&self) -> bool {
        matches!(self, IngestJobEvent::Completed { .. } | IngestJobEvent::Cancelled { .. })
    }
}

/// New analysis results were produced by a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleDataEvent {
    pub module_name: String,
    pub artifact_type: String,
    pub artifact_count: usize,
}

/// A module created or changed content (e.g. extracted a derived file).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleContentEvent {
    pub module_name: String,
    pub file: FileEntry,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum IngestModuleEvent {
    DataAdded(ModuleDataEvent),
    ContentChanged(ModuleContentEvent),
    FileDone { file: FileEntry },
}

impl IngestModuleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            IngestModuleEvent::DataAdded(_) => "DATA_ADDED",
            IngestModuleEvent::ContentChanged(_) => "CONTENT_CHANGED",
            IngestModuleEvent::FileDone { .. } => "FILE_DONE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub type Listener<E> = Arc<dyn Fn(&E) -> anyhow::Result<()> + Send + Sync>;

/// Listeners for one channel. Delivery iterates a copy of the list, so
/// listeners may add or remove listeners (including themselves) mid-delivery.
pub struct ListenerRegistry<E> {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(ListenerId, Listener<E>)>>,
}

impl<E> Default for ListenerRegistry<E> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: RwLock::new(Vec::new()),
        }
    }
}

impl<E> ListenerRegistry<E> {
    pub fn add(&self, listener: Listener<E>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Listener<E>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, f)| Arc::clone(f))
            .collect()
    }

    /// Deliver to every listener on the current thread. Each failure is
    /// reported through `on_failure` and does not stop delivery.
    pub fn deliver(&self, event: &E, event_name: &str, on_failure: &dyn Fn(String)) {
        for listener in self.snapshot() {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener(event)));
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => format!("{e:#}"),
                Err(payload) => format!("panic: {}", panic_message(payload.as_ref())),
            };
            error!(event = event_name, error = %failure, "Ingest manager listener threw exception");
            on_failure(failure);
        }
    }
}

/// Owns both listener channels and the publisher thread.
pub struct EventPublisher {
    job_listeners: Arc<ListenerRegistry<IngestJobEvent>>,
    module_listeners: Arc<ListenerRegistry<IngestModuleEvent>>,
    messages: Arc<MessagePoster>,
    executor: SingleThreadExecutor,
}

impl EventPublisher {
    pub(crate) fn new(messages: Arc<MessagePoster>) -> Result<Self, IngestError> {
        Ok(Self {
            job_listeners: Arc::new(ListenerRegistry::default()),
            module_listeners: Arc::new(ListenerRegistry::default()),
            messages,
            executor: SingleThreadExecutor::new("ingest-events")?,
        })
    }

    pub fn add_job_listener(&self, listener: Listener<IngestJobEvent>) -> ListenerId {
        self.job_listeners.add(listener)
    }

    pub fn remove_job_listener(&self, id: ListenerId) -> bool {
        self.job_listeners.remove(id)
    }

    pub fn add_module_listener(&self, listener: Listener<IngestModuleEvent>) -> ListenerId {
        self.module_listeners.add(listener)
    }

    pub fn remove_module_listener(&self, id: ListenerId) -> bool {
        self.module_listeners.remove(id)
    }

    pub(crate) fn publish_job_event(&self, event: IngestJobEvent) {
        debug!(event = event.name(), job_id = event.job_id(), "Queueing job event");
        let listeners = Arc::clone(&self.job_listeners);
        let messages = Arc::clone(&self.messages);
        self.executor.submit(move || {
            listeners.deliver(&event, event.name(), &|failure: String| notify_listener_failure(&messages, failure));
        });
    }

    pub(crate) fn publish_module_event(&self, event: IngestModuleEvent) {
        let listeners = Arc::clone(&self.module_listeners);
        let messages = Arc::clone(&self.messages);
        self.executor.submit(move || {
            listeners.deliver(&event, event.name(), &|failure: String| notify_listener_failure(&messages, failure));
        });
    }

    /// Deliver everything already queued, then stop the publisher thread.
    pub(crate) fn shutdown(&self) {
        self.executor.shutdown();
    }
}

fn notify_listener_failure(messages: &MessagePoster, failure: String) {
    messages.notify(Notice {
        title: "Ingest module error".to_string(),
        message: format!("A listener for ingest updates failed: {failure}. See the log for details."),
    });
}
