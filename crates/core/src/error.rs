use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding provider rate limit exhausted: {0}")]
    RateLimited(String),

    #[error("transient embedding failure: {0}")]
    Transient(String),

    #[error("embedding provider rejected request: {0}")]
    Fatal(String),

    #[error("embedding dimension {actual} does not match expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding provider returned no vectors")]
    EmptyResponse,
}

impl EmbeddingError {
    /// Whether a later attempt with the same input could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::Transient(_))
    }

    pub(crate) fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let details = format!("{status}: {body}");
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Self::RateLimited(details)
        } else if status.is_server_error() {
            Self::Transient(details)
        } else {
            Self::Fatal(details)
        }
    }
}

impl From<reqwest::Error> for EmbeddingError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() || error.is_builder() {
            Self::Fatal(error.to_string())
        } else {
            Self::Transient(error.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("vector dimension {actual} does not match corpus dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid upload transition: {0}")]
    InvalidTransition(String),

    #[error("store backend failure: {0}")]
    Backend(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PersistenceError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("stored file not found: {0}")]
    NotFound(String),

    #[error("invalid storage reference: {0}")]
    InvalidReference(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("chunking failed: {0}")]
    Chunking(String),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("persistence failed: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("retrieval unavailable: {0}")]
    Unavailable(#[from] EmbeddingError),

    #[error("retrieval store failure: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("invalid query: {0}")]
    InvalidQuery(String),
}
