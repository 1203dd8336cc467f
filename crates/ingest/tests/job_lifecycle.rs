//! End-to-end job lifecycle: start, stages, derived files, completion.

mod common;

use std::sync::{Arc, Mutex};

use caseflow_core::{DataSource, FileEntry, MemoryDataSource};
use caseflow_ingest::{
    DataSourceIngestModule, DataSourceStage, FileIngestModule, IngestJobContext, IngestJobEvent, IngestJobSettings,
    IngestModuleEvent, IngestModuleFactory, IngestModuleTemplate, IngestStage, ModuleContentEvent, ModuleOptions,
};
use common::{open_manager, sources, wait_until, BlockingFactory, CountingFactory, EventLog, TIMEOUT};
use crossbeam_channel::unbounded;

#[test]
fn every_file_of_every_data_source_is_processed_once() {
    let manager = open_manager(4);
    let events = EventLog::attach(&manager);
    let factory = Arc::new(CountingFactory::new());
    let settings = IngestJobSettings::new("lifecycle").with_module(IngestModuleTemplate::new(factory.clone()));

    assert!(manager.start_job(sources(3, 20), &settings).is_empty());
    assert!(events.wait_for_terminal(1));

    assert_eq!(factory.calls(), 60);
    assert!(!manager.is_ingest_running());

    let job_events = events.for_job(0);
    assert!(job_events.contains(&IngestJobEvent::Started { job_id: 0 }));
    assert_eq!(job_events.last(), Some(&IngestJobEvent::Completed { job_id: 0 }));
    let analysed = job_events
        .iter()
        .filter(|e| matches!(e, IngestJobEvent::DataSourceAnalysisCompleted { .. }))
        .count();
    assert_eq!(analysed, 3);
}

#[test]
fn ingest_is_running_until_the_last_job_finishes() {
    let manager = open_manager(1);
    let events = EventLog::attach(&manager);
    let (entered_tx, _entered_rx) = unbounded();
    let (release_tx, release_rx) = unbounded::<()>();
    let factory = Arc::new(BlockingFactory::new(entered_tx, release_rx));
    let settings = IngestJobSettings::new("lifecycle").with_module(IngestModuleTemplate::new(factory));

    assert!(!manager.is_ingest_running());
    for _ in 0..3 {
        assert!(manager.start_job(sources(1, 1), &settings).is_empty());
    }
    assert!(manager.is_ingest_running());
    assert_eq!(manager.jobs().len(), 3);

    drop(release_tx);
    assert!(events.wait_for_terminal(3));
    assert!(wait_until(TIMEOUT, || !manager.is_ingest_running()));
    assert!(manager.jobs().is_empty());

    let mut completed: Vec<u64> = events.terminal().iter().map(|e| e.job_id()).collect();
    completed.sort_unstable();
    assert_eq!(completed, vec![0, 1, 2]);
}

#[test]
fn queued_start_requests_run_on_the_starter_thread() {
    let manager = open_manager(2);
    let events = EventLog::attach(&manager);
    let factory = Arc::new(CountingFactory::new());
    let settings = IngestJobSettings::new("lifecycle").with_module(IngestModuleTemplate::new(factory.clone()));

    manager.start_jobs(sources(2, 5), settings.clone(), false);
    manager.start_jobs(sources(1, 5), settings, false);

    assert!(events.wait_for_terminal(2));
    assert_eq!(factory.calls(), 15);
    assert!(wait_until(TIMEOUT, || manager.pending_job_starters() == 0));
}

// ── Stages ────────────────────────────────────────────────────

type Trace = Arc<Mutex<Vec<String>>>;

struct TracingFileModule {
    trace: Trace,
}

impl FileIngestModule for TracingFileModule {
    fn process(&mut self, file: &FileEntry) -> anyhow::Result<()> {
        self.trace.lock().unwrap().push(format!("file:{}", file.name));
        Ok(())
    }
}

struct TracingFileFactory {
    trace: Trace,
}

impl IngestModuleFactory for TracingFileFactory {
    fn module_display_name(&self) -> &str {
        "File Tracer"
    }

    fn create_file_module(&self, _options: &ModuleOptions) -> Option<Box<dyn FileIngestModule>> {
        Some(Box::new(TracingFileModule {
            trace: Arc::clone(&self.trace),
        }))
    }
}

/// Data-source module that records its run and whether late files were
/// accepted.
struct TracingDataSourceModule {
    label: &'static str,
    trace: Trace,
    context: Option<IngestJobContext>,
}

impl DataSourceIngestModule for TracingDataSourceModule {
    fn start_up(&mut self, context: &IngestJobContext) -> anyhow::Result<()> {
        self.context = Some(context.clone());
        Ok(())
    }

    fn process(&mut self, data_source: &dyn DataSource) -> anyhow::Result<()> {
        let mut entry = format!("{}:{}", self.label, data_source.name());
        if let Some(context) = &self.context {
            let late = FileEntry::new(data_source.id(), 999, "late.bin", 1);
            entry.push_str(&format!(":accepted={}", context.add_files_to_job(vec![late])));
        }
        self.trace.lock().unwrap().push(entry);
        Ok(())
    }
}

struct TracingDataSourceFactory {
    name: &'static str,
    label: &'static str,
    trace: Trace,
}

impl IngestModuleFactory for TracingDataSourceFactory {
    fn module_display_name(&self) -> &str {
        self.name
    }

    fn create_data_source_module(&self, _options: &ModuleOptions) -> Option<Box<dyn DataSourceIngestModule>> {
        Some(Box::new(TracingDataSourceModule {
            label: self.label,
            trace: Arc::clone(&self.trace),
            context: None,
        }))
    }
}

#[test]
fn second_stage_runs_after_every_file_task() {
    let manager = open_manager(3);
    let events = EventLog::attach(&manager);
    let trace: Trace = Arc::default();
    let settings = IngestJobSettings::new("stages")
        .with_module(
            IngestModuleTemplate::new(Arc::new(TracingDataSourceFactory {
                name: "Summary",
                label: "ds2",
                trace: Arc::clone(&trace),
            }))
            .with_stage(DataSourceStage::Second),
        )
        .with_module(IngestModuleTemplate::new(Arc::new(TracingFileFactory {
            trace: Arc::clone(&trace),
        })));

    assert!(manager.start_job(sources(1, 8), &settings).is_empty());
    assert!(events.wait_for_terminal(1));

    let trace = trace.lock().unwrap();
    assert_eq!(trace.len(), 9);
    assert_eq!(trace.iter().filter(|t| t.starts_with("file:")).count(), 8);
    // Files can no longer be added once the first stage is over.
    assert_eq!(trace.last().map(String::as_str), Some("ds2:image-1:accepted=false"));
}

#[test]
fn first_stage_data_source_module_runs_alongside_files() {
    let manager = open_manager(2);
    let events = EventLog::attach(&manager);
    let trace: Trace = Arc::default();
    let settings = IngestJobSettings::new("stages")
        .with_module(IngestModuleTemplate::new(Arc::new(TracingDataSourceFactory {
            name: "Indexer",
            label: "ds1",
            trace: Arc::clone(&trace),
        })))
        .with_module(IngestModuleTemplate::new(Arc::new(TracingFileFactory {
            trace: Arc::clone(&trace),
        })));

    assert!(manager.start_job(sources(1, 4), &settings).is_empty());
    assert!(events.wait_for_terminal(1));

    let trace = trace.lock().unwrap();
    assert!(trace.contains(&"ds1:image-1:accepted=true".to_string()));
    assert!(trace.contains(&"file:late.bin".to_string()));
    assert_eq!(trace.iter().filter(|t| t.starts_with("file:")).count(), 5);
}

#[test]
fn data_source_job_reaches_finalization() {
    let manager = open_manager(1);
    let (entered_tx, entered_rx) = unbounded();
    let (release_tx, release_rx) = unbounded::<()>();
    let settings = IngestJobSettings::new("stages")
        .with_module(IngestModuleTemplate::new(Arc::new(BlockingFactory::new(entered_tx, release_rx))));

    assert!(manager.start_job(sources(1, 2), &settings).is_empty());
    let job = manager.job(0).expect("job registered");
    let child = Arc::clone(&job.data_source_jobs()[0]);

    entered_rx.recv_timeout(TIMEOUT).expect("first file entered");
    assert_eq!(child.stage(), IngestStage::FirstStage);
    let snapshot = job.snapshot();
    assert!(snapshot.file_ingest_running);
    assert!(snapshot.file_ingest_start_time.is_some());
    assert_eq!(snapshot.data_source_snapshots[0].estimated_files, 2);

    drop(release_tx);
    assert!(wait_until(TIMEOUT, || child.stage() == IngestStage::Finalization));
    assert_eq!(child.processed_files(), 2);
    assert!(!child.file_ingest_running());
}

// ── Derived files ─────────────────────────────────────────────

struct ArchiveModule {
    trace: Trace,
    context: Option<IngestJobContext>,
}

impl FileIngestModule for ArchiveModule {
    fn start_up(&mut self, context: &IngestJobContext) -> anyhow::Result<()> {
        self.context = Some(context.clone());
        Ok(())
    }

    fn process(&mut self, file: &FileEntry) -> anyhow::Result<()> {
        self.trace.lock().unwrap().push(file.name.clone());
        if file.name == "bundle.zip" {
            let context = self.context.as_ref().ok_or_else(|| anyhow::anyhow!("not started"))?;
            let derived = vec![
                FileEntry::new(file.data_source_id, 100, "bundle.zip/a.txt", 10),
                FileEntry::new(file.data_source_id, 101, "bundle.zip/b.txt", 12),
            ];
            for entry in &derived {
                context.fire_content_changed(ModuleContentEvent {
                    module_name: "Archive Extractor".into(),
                    file: entry.clone(),
                });
            }
            anyhow::ensure!(context.add_files_to_job(derived), "derived files rejected");
        }
        Ok(())
    }
}

struct ArchiveFactory {
    trace: Trace,
}

impl IngestModuleFactory for ArchiveFactory {
    fn module_display_name(&self) -> &str {
        "Archive Extractor"
    }

    fn create_file_module(&self, _options: &ModuleOptions) -> Option<Box<dyn FileIngestModule>> {
        Some(Box::new(ArchiveModule {
            trace: Arc::clone(&self.trace),
            context: None,
        }))
    }
}

#[test]
fn derived_files_are_processed_before_the_job_completes() {
    let manager = open_manager(2);
    let events = EventLog::attach(&manager);
    let changed = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&changed);
    manager.add_ingest_module_event_listener(Arc::new(move |event: &IngestModuleEvent| {
        if let IngestModuleEvent::ContentChanged(e) = event {
            sink.lock().unwrap().push(e.file.name.clone());
        }
        Ok(())
    }));

    let trace: Trace = Arc::default();
    let settings = IngestJobSettings::new("derived").with_module(IngestModuleTemplate::new(Arc::new(ArchiveFactory {
        trace: Arc::clone(&trace),
    })));
    let source: Arc<dyn DataSource> = Arc::new(
        MemoryDataSource::new(1, "phone")
            .with_file("notes.txt", 5)
            .with_file("bundle.zip", 22),
    );

    assert!(manager.start_job(vec![source], &settings).is_empty());
    assert!(events.wait_for_terminal(1));
    assert_eq!(events.terminal(), vec![IngestJobEvent::Completed { job_id: 0 }]);

    let mut processed = trace.lock().unwrap().clone();
    processed.sort();
    assert_eq!(processed, vec!["a.txt", "b.txt", "bundle.zip", "notes.txt"]);

    manager.shutdown();
    let mut changed = changed.lock().unwrap().clone();
    changed.sort();
    assert_eq!(changed, vec!["a.txt", "b.txt"]);
}
