//! Free disk space monitor.
//!
//! While ingest is running, a background thread polls free space on the
//! watched volume. Dropping below the minimum cancels every job through the
//! same path as a user cancel.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use caseflow_core::MonitorConfig;
use crossbeam_channel::{select, unbounded, Sender};
use tracing::{debug, info, warn};

use crate::error::IngestError;

/// Source of the free space reading.
pub trait ResourceProbe: Send + Sync {
    /// Free bytes, or `None` if the reading failed.
    fn free_space(&self) -> Option<u64>;

    fn describe(&self) -> String;
}

/// Reads free space on the volume holding `path`.
#[derive(Debug, Clone)]
pub struct DiskSpaceProbe {
    path: PathBuf,
}

impl DiskSpaceProbe {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ResourceProbe for DiskSpaceProbe {
    fn free_space(&self) -> Option<u64> {
        match fs2::available_space(&self.path) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Unable to read free disk space");
                None
            }
        }
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// What the monitor watches and acts on.
pub(crate) trait MonitoredIngest: Send + Sync {
    fn is_ingest_running(&self) -> bool;

    fn on_low_disk_space(&self, location: &str, free_bytes: u64, min_bytes: u64);
}

pub(crate) struct IngestMonitor {
    probe: Arc<dyn ResourceProbe>,
    min_free_bytes: u64,
    interval: Duration,
    running: Mutex<Option<(Sender<()>, JoinHandle<()>)>>,
}

impl IngestMonitor {
    pub(crate) fn new(probe: Arc<dyn ResourceProbe>, min_free_bytes: u64, interval: Duration) -> Self {
        Self {
            probe,
            min_free_bytes,
            interval,
            running: Mutex::new(None),
        }
    }

    pub(crate) fn from_config(config: &MonitorConfig) -> Self {
        Self::new(
            Arc::new(DiskSpaceProbe::new(config.path.clone())),
            config.min_free_space_bytes(),
            config.interval(),
        )
    }

    pub(crate) fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub(crate) fn with_probe(mut self, probe: Arc<dyn ResourceProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Start polling if not already running.
    pub(crate) fn start(&self, target: Weak<dyn MonitoredIngest>) -> Result<(), IngestError> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.is_some() {
            return Ok(());
        }

        let (stop_tx, stop_rx) = unbounded::<()>();
        let probe = Arc::clone(&self.probe);
        let min_free_bytes = self.min_free_bytes;
        let interval = self.interval;
        let handle = thread::Builder::new()
            .name("ingest-monitor".into())
            .spawn(move || {
                info!(location = %probe.describe(), min_free_bytes, ?interval, "Ingest monitor started");
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        default(interval) => {
                            let Some(target) = target.upgrade() else { break };
                            check(probe.as_ref(), target.as_ref(), min_free_bytes);
                        }
                    }
                }
                debug!("Ingest monitor stopped");
            })
            .map_err(|e| IngestError::ThreadSpawn(format!("ingest-monitor: {e}")))?;

        *running = Some((stop_tx, handle));
        Ok(())
    }

    pub(crate) fn stop(&self) {
        let running = self.running.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some((stop_tx, handle)) = running {
            drop(stop_tx);
            if handle.join().is_err() {
                warn!("Ingest monitor thread panicked");
            }
        }
    }

    #[cfg(test)]
    fn is_running(&self) -> bool {
        self.running.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    pub(crate) fn free_disk_space(&self) -> Option<u64> {
        self.probe.free_space()
    }
}

impl Drop for IngestMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn check(probe: &dyn ResourceProbe, target: &dyn MonitoredIngest, min_free_bytes: u64) {
    if !target.is_ingest_running() {
        return;
    }
    match probe.free_space() {
        Some(free) if free < min_free_bytes => target.on_low_disk_space(&probe.describe(), free, min_free_bytes),
        Some(free) => debug!(free, "Free disk space ok"),
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

    use super::*;

    struct FixedProbe(AtomicU64);

    impl ResourceProbe for FixedProbe {
        fn free_space(&self) -> Option<u64> {
            Some(self.0.load(Ordering::SeqCst))
        }

        fn describe(&self) -> String {
            "fixed".into()
        }
    }

    struct FailingProbe;

    impl ResourceProbe for FailingProbe {
        fn free_space(&self) -> Option<u64> {
            None
        }

        fn describe(&self) -> String {
            "failing".into()
        }
    }

    #[derive(Default)]
    struct MockIngest {
        running: AtomicBool,
        low_space_calls: AtomicUsize,
    }

    impl MonitoredIngest for MockIngest {
        fn is_ingest_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }

        fn on_low_disk_space(&self, _location: &str, _free: u64, _min: u64) {
            self.low_space_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn low_space_while_running_triggers_callback() {
        let probe = FixedProbe(AtomicU64::new(10));
        let ingest = MockIngest::default();
        ingest.running.store(true, Ordering::SeqCst);
        check(&probe, &ingest, 100);
        assert_eq!(ingest.low_space_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn idle_ingest_is_not_checked() {
        let probe = FixedProbe(AtomicU64::new(10));
        let ingest = MockIngest::default();
        check(&probe, &ingest, 100);
        assert_eq!(ingest.low_space_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unknown_free_space_is_ignored() {
        let ingest = MockIngest::default();
        ingest.running.store(true, Ordering::SeqCst);
        check(&FailingProbe, &ingest, 100);
        assert_eq!(ingest.low_space_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn monitor_thread_polls_and_stops() {
        let ingest = Arc::new(MockIngest::default());
        ingest.running.store(true, Ordering::SeqCst);
        let monitor = IngestMonitor::new(Arc::new(FixedProbe(AtomicU64::new(1))), 100, Duration::from_millis(5));

        let target: Arc<dyn MonitoredIngest> = ingest.clone();
        monitor.start(Arc::downgrade(&target)).unwrap();
        monitor.start(Arc::downgrade(&target)).unwrap();
        assert!(monitor.is_running());

        thread::sleep(Duration::from_millis(100));
        monitor.stop();
        assert!(!monitor.is_running());
        assert!(ingest.low_space_calls.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn disk_probe_reads_temp_dir() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = IngestMonitor::from_config(&MonitorConfig {
            path: dir.path().to_path_buf(),
            min_free_space_mb: 1,
            interval_secs: 60,
        });
        assert!(monitor.free_disk_space().is_some());
    }

    #[test]
    fn missing_path_yields_none() {
        let probe = DiskSpaceProbe::new("/definitely/not/a/real/path");
        assert_eq!(probe.free_space(), None);
    }
}
