use thiserror::Error;

/// Error taxonomy for the exporter.
///
/// `Configuration` is always fatal and raised before any I/O happens.
/// `Extraction` and `Load` are cycle-level failures whose propagation is
/// controlled by the `ignore_exceptions` policy. `Network` is the transient
/// class that the retry layer consumes before escalating to one of the above.
#[derive(Debug, Error)]
pub enum ExporterError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("load to storage failed: {0}")]
    Load(String),

    #[error("network error during {operation}: {source}")]
    Network {
        operation: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("watermark storage error: {0}")]
    Storage(String),

    #[error("invalid human-readable duration: {0}")]
    HumanTime(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ExporterError {
    /// Transient errors are worth retrying; everything else fails fast.
    pub fn is_transient(&self) -> bool {
        match self {
            ExporterError::Network { source, .. } => {
                source.is_timeout()
                    || source.is_connect()
                    || source
                        .status()
                        .map(|s| s.is_server_error())
                        .unwrap_or(false)
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ExporterError>;
