//! User-facing ingest messages and the capped posting facility.
//!
//! Error and warning messages are counted per ingest epoch. The first
//! `max_error_posts` go through, the next one is replaced by a single
//! "limit reached" notice, and everything after that is dropped until the
//! counter is cleared.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MessageType {
    Data,
    Info,
    Warning,
    Error,
}

impl MessageType {
    /// Whether this type counts against the error post cap.
    pub fn is_capped(self) -> bool {
        matches!(self, MessageType::Warning | MessageType::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestMessage {
    pub message_type: MessageType,
    /// Module or subsystem that produced the message.
    pub source: String,
    pub subject: String,
    pub details: Option<String>,
    pub posted_at: DateTime<Utc>,
}

impl IngestMessage {
    fn new(message_type: MessageType, source: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            message_type,
            source: source.into(),
            subject: subject.into(),
            details: None,
            posted_at: Utc::now(),
        }
    }

    pub fn info(source: impl Into<String>, subject: impl Into<String>) -> Self {
        Self::new(MessageType::Info, source, subject)
    }

    pub fn data(source: impl Into<String>, subject: impl Into<String>) -> Self {
        Self::new(MessageType::Data, source, subject)
    }

    pub fn warning(source: impl Into<String>, subject: impl Into<String>) -> Self {
        Self::new(MessageType::Warning, source, subject)
    }

    pub fn error(source: impl Into<String>, subject: impl Into<String>) -> Self {
        Self::new(MessageType::Error, source, subject)
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// A one-shot notification surfaced outside the message list
/// (the equivalent of a desktop balloon).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub title: String,
    pub message: String,
}

/// Receiver for posted messages, typically a UI inbox. Absent in headless runs.
pub trait MessageSink: Send + Sync {
    fn display_message(&self, message: &IngestMessage);

    fn clear_messages(&self) {}

    fn notify(&self, notice: &Notice) {
        warn!(title = %notice.title, "{}", notice.message);
    }
}

pub(crate) const LIMIT_REACHED_SUBJECT: &str = "Error message limit reached";

/// Forwards messages to the registered sink, enforcing the error cap.
pub struct MessagePoster {
    sink: RwLock<Option<Arc<dyn MessageSink>>>,
    error_posts: AtomicU64,
    max_error_posts: u64,
}

impl MessagePoster {
    pub fn new(max_error_posts: u64) -> Self {
        Self {
            sink: RwLock::new(None),
            error_posts: AtomicU64::new(0),
            max_error_posts,
        }
    }

    pub fn max_error_posts(&self) -> u64 {
        self.max_error_posts
    }

    pub fn set_sink(&self, sink: Option<Arc<dyn MessageSink>>) {
        *self.sink.write().unwrap_or_else(PoisonError::into_inner) = sink;
    }

    fn current_sink(&self) -> Option<Arc<dyn MessageSink>> {
        self.sink.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn post(&self, message: IngestMessage) {
        let Some(sink) = self.current_sink() else {
            debug!(source = %message.source, subject = %message.subject, "No message sink, dropping message");
            return;
        };

        if !message.message_type.is_capped() {
            sink.display_message(&message);
            return;
        }

        let posts = self.error_posts.fetch_add(1, Ordering::AcqRel) + 1;
        if posts <= self.max_error_posts {
            sink.display_message(&message);
        } else if posts == self.max_error_posts + 1 {
            let limit = IngestMessage::error("Ingest Manager", LIMIT_REACHED_SUBJECT).with_details(format!(
                "Error and warning messages are limited to {}. Check the log for further errors.",
                self.max_error_posts
            ));
            sink.display_message(&limit);
        }
    }

    /// Clear the sink's messages and reset the error counter.
    pub fn clear(&self) {
        if let Some(sink) = self.current_sink() {
            sink.clear_messages();
        }
        self.error_posts.store(0, Ordering::Release);
    }

    pub fn notify(&self, notice: Notice) {
        match self.current_sink() {
            Some(sink) => sink.notify(&notice),
            None => warn!(title = %notice.title, "{}", notice.message),
        }
    }

    pub fn error_posts(&self) -> u64 {
        self.error_posts.load(Ordering::Acquire)
    }
}
