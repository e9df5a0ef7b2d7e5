//! Error types for configuration loading and logging setup.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading configuration or installing the logging stack.
///
/// The failure paths themselves (panic hook, explicit-catch logging, stream
/// interception) never produce these; they degrade silently instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("config file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),

    #[error("config path is not a file: {}", .0.display())]
    NotAFile(PathBuf),

    #[error("unsupported config format for {} (expected .toml, .json, .yaml or .yml)", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("unknown log level '{0}'")]
    InvalidLevel(String),

    #[error("invalid filter directive '{directive}': {message}")]
    InvalidDirective { directive: String, message: String },

    #[error("failed to install global subscriber: {0}")]
    SubscriberInit(String),

    #[error("failed to redirect stdout: {0}")]
    Redirect(#[source] io::Error),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
