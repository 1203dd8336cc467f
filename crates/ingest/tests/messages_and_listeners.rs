//! Error message capping, module errors and listener failures.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use caseflow_ingest::{
    IngestJobEvent, IngestJobSettings, IngestManager, IngestMessage, IngestModuleEvent, IngestModuleTemplate,
    ListenerId, MessageType, ModuleDataEvent,
};
use common::{open_manager, sources, wait_until, CountingFactory, EventLog, RecordingSink, TIMEOUT};

const LIMIT_REACHED: &str = "Error message limit reached";

fn manager_with_sink(threads: usize, max_error_posts: u64) -> (IngestManager, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let manager = IngestManager::builder()
        .file_ingest_threads(threads)
        .max_error_message_posts(max_error_posts)
        .message_sink(sink.clone())
        .build()
        .expect("manager builds");
    manager.on_case_opened();
    (manager, sink)
}

#[test]
fn module_error_is_reported_and_processing_continues() {
    let (manager, sink) = manager_with_sink(2, 10);
    let events = EventLog::attach(&manager);
    let factory = Arc::new(CountingFactory::failing_on("file-3"));
    let settings = IngestJobSettings::new("errors").with_module(IngestModuleTemplate::new(factory.clone()));

    assert!(manager.start_job(sources(1, 5), &settings).is_empty());
    assert!(events.wait_for_terminal(1));

    assert_eq!(factory.calls(), 5);
    assert_eq!(events.terminal(), vec![IngestJobEvent::Completed { job_id: 0 }]);
    let messages = sink.messages.lock().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].message_type, MessageType::Error);
    assert_eq!(messages[0].subject, "Module Counter experienced an error analyzing image-1");
    assert!(messages[0]
        .details
        .as_deref()
        .is_some_and(|d| d.contains("unreadable sector in file-3")));
}

#[test]
fn module_panic_is_contained() {
    let (manager, sink) = manager_with_sink(1, 10);
    let events = EventLog::attach(&manager);
    let factory = Arc::new(CountingFactory::panicking_on("file-2"));
    let settings = IngestJobSettings::new("errors").with_module(IngestModuleTemplate::new(factory.clone()));

    assert!(manager.start_job(sources(1, 4), &settings).is_empty());
    assert!(events.wait_for_terminal(1));

    assert_eq!(factory.calls(), 4);
    assert_eq!(manager.thread_activity_snapshots().len(), 2);
    let details: Vec<String> = sink
        .messages
        .lock()
        .unwrap()
        .iter()
        .filter_map(|m| m.details.clone())
        .collect();
    assert_eq!(details.len(), 1);
    assert!(details[0].contains("corrupt header in file-2"));
}

#[test]
fn error_cap_resets_with_each_ingest_epoch() {
    let max = 3;
    let (manager, sink) = manager_with_sink(1, max);
    let events = EventLog::attach(&manager);
    let factory = Arc::new(CountingFactory::failing_on("file-1"));
    let settings = IngestJobSettings::new("cap").with_module(IngestModuleTemplate::new(factory));

    // Ten data sources, each failing once: ten errors in one epoch.
    manager.start_jobs(sources(10, 1), settings.clone(), false);
    assert!(events.wait_for_terminal(1));
    assert!(wait_until(TIMEOUT, || !manager.is_ingest_running()));

    let subjects = sink.subjects();
    assert_eq!(subjects.len() as u64, max + 1);
    assert_eq!(subjects.last().map(String::as_str), Some(LIMIT_REACHED));
    assert_eq!(manager.error_messages_posted(), 10);

    // Starting from idle clears the sink and the counter.
    let clears_before = sink.clears.load(Ordering::SeqCst);
    manager.start_jobs(sources(2, 1), settings, false);
    assert!(events.wait_for_terminal(2));
    assert!(sink.clears.load(Ordering::SeqCst) > clears_before);
    assert_eq!(sink.subjects().len(), 2);
    assert_eq!(manager.error_messages_posted(), 2);
}

#[test]
fn direct_posts_share_the_cap() {
    let (manager, sink) = manager_with_sink(1, 2);
    for i in 0..5 {
        manager.post_ingest_message(IngestMessage::warning("Test", format!("warning {i}")));
    }
    manager.post_ingest_message(IngestMessage::info("Test", "still shown"));

    assert_eq!(sink.subjects(), vec!["warning 0", "warning 1", LIMIT_REACHED, "still shown"]);

    manager.clear_ingest_messages();
    assert_eq!(manager.error_messages_posted(), 0);
    assert!(sink.subjects().is_empty());
}

// ── Listeners ─────────────────────────────────────────────────

#[test]
fn failing_listeners_do_not_block_delivery() {
    let (manager, sink) = manager_with_sink(1, 10);
    manager.add_ingest_job_event_listener(Arc::new(|event: &IngestJobEvent| {
        if event.is_terminal() {
            panic!("listener bug");
        }
        Ok(())
    }));
    manager.add_ingest_job_event_listener(Arc::new(|_event: &IngestJobEvent| anyhow::bail!("listener offline")));
    let events = EventLog::attach(&manager);
    let settings = IngestJobSettings::new("listeners").with_module(IngestModuleTemplate::new(Arc::new(CountingFactory::new())));

    assert!(manager.start_job(sources(1, 2), &settings).is_empty());
    assert!(events.wait_for_terminal(1));
    manager.shutdown();

    assert!(events.all().contains(&IngestJobEvent::Started { job_id: 0 }));
    let notices = sink.notices.lock().unwrap();
    assert!(notices.iter().any(|n| n.message.contains("listener bug")));
    assert!(notices.iter().any(|n| n.message.contains("listener offline")));
}

#[test]
fn listener_can_remove_itself_during_delivery() {
    let manager = Arc::new(open_manager(1));
    let calls = Arc::new(AtomicUsize::new(0));
    let id: Arc<Mutex<Option<ListenerId>>> = Arc::default();

    let weak = Arc::downgrade(&manager);
    let (c, own_id) = (Arc::clone(&calls), Arc::clone(&id));
    let listener_id = manager.add_ingest_job_event_listener(Arc::new(move |_event: &IngestJobEvent| {
        c.fetch_add(1, Ordering::SeqCst);
        if let (Some(manager), Some(id)) = (weak.upgrade(), *own_id.lock().unwrap()) {
            manager.remove_ingest_job_event_listener(id);
        }
        Ok(())
    }));
    *id.lock().unwrap() = Some(listener_id);

    let events = EventLog::attach(&manager);
    let settings = IngestJobSettings::new("listeners").with_module(IngestModuleTemplate::new(Arc::new(CountingFactory::new())));
    assert!(manager.start_job(sources(2, 2), &settings).is_empty());
    assert!(events.wait_for_terminal(1));
    manager.shutdown();

    assert!(events.all().len() > 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!manager.remove_ingest_job_event_listener(listener_id));
}

#[test]
fn module_events_reach_module_listeners() {
    let manager = open_manager(2);
    let received = Arc::new(Mutex::new(Vec::new()));
    let r = Arc::clone(&received);
    manager.add_ingest_module_event_listener(Arc::new(move |event: &IngestModuleEvent| {
        r.lock().unwrap().push(event.name());
        Ok(())
    }));
    let events = EventLog::attach(&manager);

    manager.fire_ingest_module_data_event(ModuleDataEvent {
        module_name: "Hash Lookup".into(),
        artifact_type: "hashset_hit".into(),
        artifact_count: 2,
    });
    let settings = IngestJobSettings::new("modules").with_module(IngestModuleTemplate::new(Arc::new(CountingFactory::new())));
    assert!(manager.start_job(sources(1, 3), &settings).is_empty());
    assert!(events.wait_for_terminal(1));
    manager.shutdown();

    let received = received.lock().unwrap();
    assert_eq!(received.first(), Some(&"DATA_ADDED"));
    assert_eq!(received.iter().filter(|n| **n == "FILE_DONE").count(), 3);
}
