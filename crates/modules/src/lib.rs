//! Stock ingest modules.

pub mod file_hash;
pub mod file_stats;

use std::sync::Arc;

use caseflow_ingest::IngestModuleFactory;

pub use file_hash::{FileHashFactory, FileHashModule, HashStore};
pub use file_stats::{DataSourceStats, FileStatsFactory, FileStatsModule};

/// Short names accepted on the command line, in pipeline order.
pub const MODULE_NAMES: &[&str] = &["hash", "stats"];

/// Look up a stock module factory by its short name.
pub fn factory_by_name(name: &str) -> Option<Arc<dyn IngestModuleFactory>> {
    match name.trim().to_ascii_lowercase().as_str() {
        "hash" => Some(Arc::new(FileHashFactory::new())),
        "stats" => Some(Arc::new(FileStatsFactory::new())),
        _ => None,
    }
}
