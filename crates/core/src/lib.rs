pub mod config;
pub mod content;
pub mod error;
pub mod preferences;

pub use config::{IngestConfig, MonitorConfig};
pub use content::*;
pub use error::*;
pub use preferences::UserPreferences;
