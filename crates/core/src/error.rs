use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaseflowError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Preferences parse error: {0}")]
    PreferencesParse(#[from] toml::de::Error),

    #[error("Preferences serialize error: {0}")]
    PreferencesSerialize(#[from] toml::ser::Error),

    #[error("Content enumeration failed for {source_name}: {reason}")]
    Enumeration { source_name: String, reason: String },

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, CaseflowError>;
