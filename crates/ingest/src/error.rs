use thiserror::Error;

/// Errors raised by the ingest engine and by modules at its boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestError {
    #[error("Job already started")]
    AlreadyStarted,

    #[error("Job creation is disabled (no case open)")]
    JobCreationDisabled,

    #[error("Start up failed: {0}")]
    StartUpFailed(String),

    #[error("Processing failed: {0}")]
    ProcessingFailed(String),

    #[error("Module panicked: {0}")]
    ModulePanicked(String),

    #[error("Content enumeration failed: {0}")]
    Content(String),

    #[error("Thread spawn failed: {0}")]
    ThreadSpawn(String),
}

/// A start-up or execution failure attributed to one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestModuleError {
    pub module_display_name: String,
    pub error: IngestError,
}

impl IngestModuleError {
    pub fn new(module_display_name: impl Into<String>, error: IngestError) -> Self {
        Self {
            module_display_name: module_display_name.into(),
            error,
        }
    }
}

impl std::fmt::Display for IngestModuleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.module_display_name, self.error)
    }
}

/// Render a panic payload as text.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
