use std::path::PathBuf;
use thiserror::Error;

/// Run-level setup failures. These abort the run before any note is touched.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("source directory does not exist: {0}")]
    MissingSource(PathBuf),

    #[error("source path is not a directory: {0}")]
    SourceNotDirectory(PathBuf),

    #[error("destination directory must not be inside the source directory: {0}")]
    DestinationInsideSource(PathBuf),

    #[error("could not expand path {path:?}: {reason}")]
    Expansion { path: String, reason: String },

    #[error("vision analysis is enabled but no API key was provided (set OPENAI_API_KEY or use --skip-vision)")]
    MissingCredentials,

    #[error("failed to prepare directory {0}: {1}")]
    Directory(PathBuf, #[source] std::io::Error),
}

/// Failure of one external call while converting an attachment.
#[derive(Debug, Clone, Error)]
pub enum ConvertError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("conversion failed: {0}")]
    Conversion(String),

    #[error("service failure: {0}")]
    Service(String),

    #[error("converter unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl ConvertError {
    /// Short machine-friendly label used in placeholders and the summary.
    pub fn label(&self) -> &'static str {
        match self {
            ConvertError::UnsupportedFormat(_) => "unsupported_format",
            ConvertError::Conversion(_) => "conversion_error",
            ConvertError::Service(_) => "service_error",
            ConvertError::Unavailable(_) => "converter_unavailable",
            ConvertError::Io(_) => "io_error",
        }
    }
}

impl From<std::io::Error> for ConvertError {
    fn from(e: std::io::Error) -> Self {
        ConvertError::Io(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to create cache directory {0}: {1}")]
    CreateDir(PathBuf, #[source] std::io::Error),

    #[error("failed to write cache entry {0}: {1}")]
    Write(PathBuf, #[source] std::io::Error),

    #[error("failed to encode cache entry: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to remove {0}: {1}")]
    Remove(PathBuf, #[source] std::io::Error),
}
