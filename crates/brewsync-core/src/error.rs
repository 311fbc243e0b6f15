use thiserror::Error;

/// Errors that abort a sync run.
#[derive(Debug, Error)]
pub enum Error {
    #[error("fetch failed for '{source_name}': {message}")]
    Fetch {
        source_name: String,
        message: String,
    },

    #[error("sink error: {0}")]
    Sink(String),

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error("sync for '{0}' is already running")]
    AlreadyRunning(String),

    #[error("run lock for '{0}' was taken over by another run")]
    LockLost(String),

    #[error("page limit of {max_pages} reached for '{source_name}'")]
    PageLimitExceeded { source_name: String, max_pages: u64 },

    #[error("upstream returned the same cursor twice for '{source_name}': {cursor}")]
    StuckCursor { source_name: String, cursor: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn fetch(source_name: impl Into<String>, message: impl ToString) -> Self {
        Error::Fetch {
            source_name: source_name.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Why a single remote record could not be turned into a sink record.
///
/// These never abort a run; the engine counts the record as skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    #[error("record has no remote id")]
    MissingId,

    #[error("record is not a JSON object")]
    NotAnObject,
}

pub type TransformResult<T> = std::result::Result<T, TransformError>;
