//! Terminal output: the message inbox, progress lines and the final report.

use std::collections::BTreeMap;

use caseflow_ingest::{IngestMessage, MessageSink, MessageType, Notice, ProgressSnapshot, ThreadActivitySnapshot};

/// Prints posted messages to stderr as they arrive.
#[derive(Debug, Default)]
pub struct ConsoleSink;

fn tag(message_type: MessageType) -> &'static str {
    match message_type {
        MessageType::Data => "data",
        MessageType::Info => "info",
        MessageType::Warning => "warn",
        MessageType::Error => "error",
    }
}

pub fn format_message(message: &IngestMessage) -> String {
    let mut line = format!("[{}] {}: {}", tag(message.message_type), message.source, message.subject);
    if let Some(details) = &message.details {
        for detail in details.lines() {
            line.push_str("\n    ");
            line.push_str(detail);
        }
    }
    line
}

impl MessageSink for ConsoleSink {
    fn display_message(&self, message: &IngestMessage) {
        eprintln!("{}", format_message(message));
    }

    fn notify(&self, notice: &Notice) {
        eprintln!("[notice] {}: {}", notice.title, notice.message);
    }
}

pub fn format_progress(snapshot: &ProgressSnapshot) -> String {
    let mut line = format!("job {}", snapshot.job_id);
    for ds in &snapshot.data_source_snapshots {
        line.push_str(&format!(
            " | {} {:?} {}/{} files",
            ds.data_source, ds.stage, ds.processed_files, ds.estimated_files
        ));
        if let Some(rate) = ds.files_per_second() {
            line.push_str(&format!(" ({rate:.1}/s)"));
        }
    }
    if let Some(module) = &snapshot.running_module {
        line.push_str(&format!(" | running {}", module.display_name()));
    }
    if snapshot.cancelled {
        line.push_str(" | cancelling");
    }
    line
}

pub fn print_report(threads: &[ThreadActivitySnapshot], run_times: &BTreeMap<String, u64>) {
    println!("Threads:");
    for thread in threads {
        println!("  {:>3}  {}  since {}", thread.thread_id, thread.activity.label(), thread.started_at.format("%H:%M:%S"));
    }
    println!("Module run times:");
    for (module, ms) in run_times {
        println!("  {module:<24} {ms} ms");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_details_are_indented() {
        let message = IngestMessage::error("Ingest Manager", "Failed to start ingest job")
            .with_details("The following ingest modules failed to start:\nHash: missing db");
        assert_eq!(
            format_message(&message),
            "[error] Ingest Manager: Failed to start ingest job\n    The following ingest modules failed to start:\n    Hash: missing db"
        );
    }
}
