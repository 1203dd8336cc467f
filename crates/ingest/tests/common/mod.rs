//! Shared fixtures for the ingest integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use caseflow_core::{DataSource, FileEntry, MemoryDataSource};
use caseflow_ingest::{
    FileIngestModule, IngestJobContext, IngestJobEvent, IngestManager, IngestMessage, IngestModuleFactory, MessageSink,
    ModuleOptions, Notice,
};
use crossbeam_channel::{Receiver, Sender};

pub const TIMEOUT: Duration = Duration::from_secs(10);

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// A manager with a case open and `threads` file workers.
pub fn open_manager(threads: usize) -> IngestManager {
    let manager = IngestManager::builder()
        .file_ingest_threads(threads)
        .build()
        .expect("manager builds");
    manager.on_case_opened();
    manager
}

pub fn sources(n: usize, files: usize) -> Vec<Arc<dyn DataSource>> {
    (1..=n as u64)
        .map(|id| Arc::new(MemoryDataSource::with_file_count(id, format!("image-{id}"), files)) as Arc<dyn DataSource>)
        .collect()
}

// ── Event and message recording ───────────────────────────────

#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<IngestJobEvent>>>,
}

impl EventLog {
    pub fn attach(manager: &IngestManager) -> Self {
        let log = Self::default();
        let events = Arc::clone(&log.events);
        manager.add_ingest_job_event_listener(Arc::new(move |event: &IngestJobEvent| {
            events.lock().unwrap().push(event.clone());
            Ok(())
        }));
        log
    }

    pub fn all(&self) -> Vec<IngestJobEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn for_job(&self, job_id: u64) -> Vec<IngestJobEvent> {
        self.all().into_iter().filter(|e| e.job_id() == job_id).collect()
    }

    pub fn terminal(&self) -> Vec<IngestJobEvent> {
        self.all().into_iter().filter(|e| e.is_terminal()).collect()
    }

    pub fn wait_for_terminal(&self, count: usize) -> bool {
        wait_until(TIMEOUT, || self.terminal().len() >= count)
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub messages: Mutex<Vec<IngestMessage>>,
    pub notices: Mutex<Vec<Notice>>,
    pub clears: AtomicUsize,
}

impl RecordingSink {
    pub fn subjects(&self) -> Vec<String> {
        self.messages.lock().unwrap().iter().map(|m| m.subject.clone()).collect()
    }
}

impl MessageSink for RecordingSink {
    fn display_message(&self, message: &IngestMessage) {
        self.messages.lock().unwrap().push(message.clone());
    }

    fn clear_messages(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.messages.lock().unwrap().clear();
    }

    fn notify(&self, notice: &Notice) {
        self.notices.lock().unwrap().push(notice.clone());
    }
}

// ── Modules ───────────────────────────────────────────────────

/// File module that counts calls and fails (or panics) on named files.
pub struct CountingFactory {
    pub calls: Arc<AtomicUsize>,
    pub fail_on: Option<String>,
    pub panic_on: Option<String>,
}

impl CountingFactory {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            fail_on: None,
            panic_on: None,
        }
    }

    pub fn failing_on(name: &str) -> Self {
        Self {
            fail_on: Some(name.to_string()),
            ..Self::new()
        }
    }

    pub fn panicking_on(name: &str) -> Self {
        Self {
            panic_on: Some(name.to_string()),
            ..Self::new()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

struct CountingModule {
    calls: Arc<AtomicUsize>,
    fail_on: Option<String>,
    panic_on: Option<String>,
}

impl FileIngestModule for CountingModule {
    fn process(&mut self, file: &FileEntry) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panic_on.as_deref() == Some(file.name.as_str()) {
            panic!("corrupt header in {}", file.name);
        }
        if self.fail_on.as_deref() == Some(file.name.as_str()) {
            anyhow::bail!("unreadable sector in {}", file.name);
        }
        Ok(())
    }
}

impl IngestModuleFactory for CountingFactory {
    fn module_display_name(&self) -> &str {
        "Counter"
    }

    fn create_file_module(&self, _options: &ModuleOptions) -> Option<Box<dyn FileIngestModule>> {
        Some(Box::new(CountingModule {
            calls: Arc::clone(&self.calls),
            fail_on: self.fail_on.clone(),
            panic_on: self.panic_on.clone(),
        }))
    }
}

/// File module that reports entry and then waits until the job is cancelled
/// or the release channel closes.
pub struct BlockingFactory {
    pub calls: Arc<AtomicUsize>,
    entered: Sender<String>,
    release: Receiver<()>,
}

impl BlockingFactory {
    pub fn new(entered: Sender<String>, release: Receiver<()>) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            entered,
            release,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

struct BlockingModule {
    calls: Arc<AtomicUsize>,
    entered: Sender<String>,
    release: Receiver<()>,
    context: Option<IngestJobContext>,
}

impl FileIngestModule for BlockingModule {
    fn start_up(&mut self, context: &IngestJobContext) -> anyhow::Result<()> {
        self.context = Some(context.clone());
        Ok(())
    }

    fn process(&mut self, file: &FileEntry) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _ = self.entered.send(file.name.clone());
        let deadline = Instant::now() + TIMEOUT;
        while Instant::now() < deadline {
            if self.context.as_ref().is_some_and(|c| c.file_ingest_is_cancelled()) {
                return Ok(());
            }
            match self.release.recv_timeout(Duration::from_millis(5)) {
                Ok(()) | Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return Ok(()),
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            }
        }
        Ok(())
    }
}

impl IngestModuleFactory for BlockingFactory {
    fn module_display_name(&self) -> &str {
        "Blocker"
    }

    fn create_file_module(&self, _options: &ModuleOptions) -> Option<Box<dyn FileIngestModule>> {
        Some(Box::new(BlockingModule {
            calls: Arc::clone(&self.calls),
            entered: self.entered.clone(),
            release: self.release.clone(),
            context: None,
        }))
    }
}
