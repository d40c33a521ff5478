use thiserror::Error;

/// Unified application error type to simplify bubbling errors through async flows.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Embedding store unavailable ({adapter}). {reason}")]
    SourceUnavailable {
        adapter: &'static str,
        reason: String,
    },
    #[error("Document metadata unavailable. {0}")]
    MetadataUnavailable(String),
    #[error("Not enough records for {stage}: at least {required} required, got {actual}.")]
    InsufficientData {
        stage: &'static str,
        required: usize,
        actual: usize,
    },
    #[error(
        "Embedding vectors have inconsistent lengths: expected {expected}, found {found} (records: {})",
        record_ids.join(", ")
    )]
    DimensionMismatch {
        expected: usize,
        found: usize,
        record_ids: Vec<String>,
    },
    #[error("Embedding {record_id} contains a non-finite value.")]
    NonFiniteValue { record_id: String },
    #[error("Invalid parameter {name}: {message}")]
    InvalidParameter { name: &'static str, message: String },
    #[error("Errored while handling a file. {0}")]
    Io(#[from] std::io::Error),
    #[error("Error serializing json. {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("Error accessing the network. {0}")]
    Http(#[from] reqwest::Error),
    #[error("Runtime error. {0}")]
    TokioJoin(#[from] tokio::task::JoinError),
    #[error("Error parsing the duration string. {0}")]
    DurationParse(#[from] humantime::DurationError),
    #[error("Unable to locate the configuration directory. {0}")]
    Dirs(#[from] vecscope_dirs::DirError),
    #[error("Linear algebra backend failed. {0}")]
    Linalg(#[from] ndarray_linalg::error::LinalgError),
    #[error("{0}")]
    Other(String),
}

impl AppError {
    /// Whether the run may continue after this error.
    ///
    /// Only missing metadata is recoverable; everything else aborts the run before
    /// any report is written.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, AppError::MetadataUnavailable(_))
    }
}

/// Convenience alias for results that bubble `AppError`.
pub type AppResult<T> = Result<T, AppError>;
