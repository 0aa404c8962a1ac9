use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Failed to launch Chrome: {0}")]
    LaunchFailed(String),

    #[error("Rendering engine error: {0}")]
    Engine(String),

    #[error("Rendering engine disconnected")]
    EngineClosed,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to load cookies: {0}")]
    CookieError(String),

    #[error("Failed to write scan log {path}: {source}")]
    LogWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("File I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDeError(#[from] toml::de::Error),
}

impl ScanError {
    pub fn suggestions(&self) -> Vec<String> {
        match self {
            Self::LaunchFailed(_) => vec![
                "Ensure Chrome/Chromium is installed".into(),
                "Try specifying Chrome path with --chrome-path".into(),
            ],
            Self::EngineClosed => vec![
                "Check if Chrome crashed or was killed during the scan".into(),
                "Run with --verbose to see the browser event log".into(),
            ],
            Self::ConfigError(_) => vec![
                "Check configuration file syntax".into(),
                "Run with --verbose to see detailed error".into(),
                "Use --config to specify a different config file".into(),
            ],
            Self::InvalidUrl(_) => vec![
                "Ensure URL includes protocol (http:// or https://)".into(),
                "Check for typos in the URL".into(),
            ],
            Self::CookieError(_) => vec![
                "Each cookie file must be named <domain>.txt".into(),
                "Use --use-cookie false to scan without cookies".into(),
            ],
            Self::LogWrite { .. } => vec![
                "Ensure the log directory exists and is writable".into(),
                "Use --log-file to choose a different destination".into(),
            ],
            _ => vec!["Run with --verbose for more details".into()],
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::LaunchFailed(_) | Self::EngineClosed | Self::Engine(_) => 3,
            Self::IoError(_) | Self::LogWrite { .. } => 6,
            Self::ConfigError(_) | Self::TomlDeError(_) => 7,
            Self::InvalidUrl(_) => 2,
            _ => 1,
        }
    }
}
