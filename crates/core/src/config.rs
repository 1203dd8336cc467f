use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Defaults ──────────────────────────────────────────────────

/// Error/warning messages forwarded per ingest epoch before the cap kicks in.
pub const DEFAULT_MAX_ERROR_MESSAGE_POSTS: u64 = 200;
pub const DEFAULT_MIN_FREE_SPACE_MB: u64 = 100;
pub const DEFAULT_MONITOR_INTERVAL_SECS: u64 = 60;

// ── Top-level config ──────────────────────────────────────────

/// Process-level ingest configuration, read from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Active profile name (empty = default).
    pub profile: String,
    /// Override for the persisted preferences file location.
    pub preferences_path: Option<PathBuf>,
    pub monitor: MonitorConfig,
    pub max_error_message_posts: u64,
}

impl IngestConfig {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `CASEFLOW_PROFILE`. When set (e.g. `LAB`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("CASEFLOW_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            preferences_path: profiled_env_opt(p, "PREFERENCES_PATH").map(PathBuf::from),
            monitor: MonitorConfig::from_env_profiled(p),
            max_error_message_posts: profiled_env_u64(
                p,
                "MAX_ERROR_MESSAGE_POSTS",
                DEFAULT_MAX_ERROR_MESSAGE_POSTS,
            ),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  preferences: {}",
            self.preferences_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(default)".to_string())
        );
        tracing::info!(
            "  monitor:     path={}, min_free={}MB, interval={}s",
            self.monitor.path.display(),
            self.monitor.min_free_space_mb,
            self.monitor.interval_secs
        );
        tracing::info!("  messages:    max_error_posts={}", self.max_error_message_posts);
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            profile: String::new(),
            preferences_path: None,
            monitor: MonitorConfig::default(),
            max_error_message_posts: DEFAULT_MAX_ERROR_MESSAGE_POSTS,
        }
    }
}

// ── Resource monitor ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Directory whose volume is watched for free space.
    pub path: PathBuf,
    pub min_free_space_mb: u64,
    pub interval_secs: u64,
}

impl MonitorConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            path: PathBuf::from(profiled_env_opt(p, "MONITOR_PATH").unwrap_or_else(|| ".".into())),
            min_free_space_mb: profiled_env_u64(p, "MIN_FREE_SPACE_MB", DEFAULT_MIN_FREE_SPACE_MB),
            interval_secs: profiled_env_u64(p, "MONITOR_INTERVAL_SECS", DEFAULT_MONITOR_INTERVAL_SECS),
        }
    }

    pub fn min_free_space_bytes(&self) -> u64 {
        self.min_free_space_mb.saturating_mul(1024 * 1024)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("."),
            min_free_space_mb: DEFAULT_MIN_FREE_SPACE_MB,
            interval_secs: DEFAULT_MONITOR_INTERVAL_SECS,
        }
    }
}
