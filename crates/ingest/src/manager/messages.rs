use tracing::error;

use super::core::{IngestManager, ManagerShared};
use crate::message::IngestMessage;
use crate::monitor::MonitoredIngest;

impl IngestManager {
    /// Post a message to the sink. Errors and warnings count against the
    /// per-epoch cap; see [`crate::message::MessagePoster`].
    pub fn post_ingest_message(&self, message: IngestMessage) {
        self.shared.messages.post(message);
    }

    /// Clear the sink and reset the error message counter.
    pub fn clear_ingest_messages(&self) {
        self.shared.messages.clear();
    }

    pub fn error_messages_posted(&self) -> u64 {
        self.shared.messages.error_posts()
    }
}

impl MonitoredIngest for ManagerShared {
    fn is_ingest_running(&self) -> bool {
        ManagerShared::is_ingest_running(self)
    }

    fn on_low_disk_space(&self, location: &str, free_bytes: u64, min_bytes: u64) {
        error!(location, free_bytes, min_bytes, "Free disk space below minimum, cancelling all ingest jobs");
        self.messages.post(
            IngestMessage::error("Ingest Monitor", "Ingest cancelled: low disk space").with_details(format!(
                "Free space on {location} is {} MB, below the {} MB minimum.",
                free_bytes / (1024 * 1024),
                min_bytes / (1024 * 1024)
            )),
        );
        self.cancel_all_ingest_jobs();
    }
}
