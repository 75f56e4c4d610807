use thiserror::Error;

/// Classification of an LLM call failure.
///
/// The pipeline itself never retries; it reports the class so the caller
/// can apply its own retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmFailure {
    /// Request exceeded the configured timeout.
    Timeout,
    /// Provider returned HTTP 429.
    RateLimited,
    /// Connection-level or non-429 HTTP failure.
    Transport,
    /// Response arrived but did not contain usable content.
    MalformedResponse,
}

impl std::fmt::Display for LlmFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LlmFailure::Timeout => "timeout",
            LlmFailure::RateLimited => "rate-limited",
            LlmFailure::Transport => "transport",
            LlmFailure::MalformedResponse => "malformed-response",
        };
        write!(f, "{}", s)
    }
}

#[derive(Error, Debug)]
pub enum SageError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("Vector store is disabled")]
    VectorStoreDisabled,

    #[error("LLM error ({kind}): {message}")]
    Llm { kind: LlmFailure, message: String },

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Feedback error: {0}")]
    Feedback(String),

    #[error("Deadline exceeded before stage '{0}'")]
    DeadlineExceeded(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Feedback store error: {0}")]
    Store(#[from] rusqlite::Error),
}

impl SageError {
    pub fn llm(kind: LlmFailure, message: impl Into<String>) -> Self {
        SageError::Llm {
            kind,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SageError>;
