//! Config error types.

/// Failures reading or writing the config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Filesystem failure.
    #[error("Config I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file exists but is not valid JSON for [`crate::Config`].
    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Convenience alias for config operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
