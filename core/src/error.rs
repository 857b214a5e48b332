use thiserror::Error;

/// chartscan error types
#[derive(Error, Debug)]
pub enum ScanError {
    /// Settings or filesystem layout problem
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Advisory lock on the repositories file could not be taken
    #[error("Lock error: {0}")]
    LockError(String),

    /// Repositories file problem (missing entry, empty file)
    #[error("Repository error: {name} - {message}")]
    RepositoryError { name: String, message: String },

    /// Repository index could not be fetched or parsed
    #[error("Index download failed: {url} - {message}")]
    IndexDownloadError { url: String, message: String },

    /// Chart not present in a repository index
    #[error("Chart not found: {0}")]
    ChartNotFound(String),

    /// `--set` expression could not be parsed
    #[error("Values error: {0}")]
    ValuesError(String),

    /// Chart archive could not be read
    #[error("Chart load error: {0}")]
    ChartLoadError(String),

    /// Chart type other than `application`
    #[error("{0} charts are not installable")]
    NotInstallable(String),

    /// Declared dependencies absent from `charts/`
    #[error("found in Chart.yaml, but missing in charts/ directory: {}", .0.join(", "))]
    MissingDependencies(Vec<String>),

    /// Release installation failed
    #[error("Install failed: {release} - {message}")]
    InstallError { release: String, message: String },

    /// Container engine error
    #[error("Engine error: {0}")]
    EngineError(String),

    /// Container registry error
    #[error("Registry error: {registry} - {message}")]
    RegistryError { registry: String, message: String },

    /// Timeout error
    #[error("Timeout: {0}")]
    TimeoutError(String),

    /// Operation cancelled before completion
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl ScanError {
    /// Prefix the error message with context, keeping the variant where it
    /// carries a free-form message.
    pub fn wrap(self, context: impl std::fmt::Display) -> Self {
        match self {
            ScanError::IndexDownloadError { url, message } => ScanError::IndexDownloadError {
                url,
                message: format!("{context}: {message}"),
            },
            ScanError::ValuesError(message) => ScanError::ValuesError(format!("{context}: {message}")),
            other => ScanError::Other(format!("{context}: {other}")),
        }
    }
}

impl From<serde_json::Error> for ScanError {
    fn from(err: serde_json::Error) -> Self {
        ScanError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ScanError {
    fn from(err: serde_yaml::Error) -> Self {
        ScanError::SerializationError(err.to_string())
    }
}

/// Result type alias for chartscan operations
pub type Result<T> = std::result::Result<T, ScanError>;
