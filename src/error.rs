use axum::http::StatusCode;
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure category, tagged where the failure happens and never inferred from message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing bearer credential.
    Configuration,
    /// Handle or account not found, or the account has no posts.
    Resolution,
    /// Retry budget exhausted on 429 responses.
    RateLimitExceeded,
    /// Any other transport or HTTP failure.
    Network,
    /// Scoring process exited nonzero (or could not run).
    ExternalProcess,
    /// Malformed staged or scored payload.
    Serialization,
    /// Local failures with no dedicated category.
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "ConfigurationError",
            ErrorKind::Resolution => "ResolutionError",
            ErrorKind::RateLimitExceeded => "RateLimitExceeded",
            ErrorKind::Network => "NetworkError",
            ErrorKind::ExternalProcess => "ExternalProcessError",
            ErrorKind::Serialization => "SerializationError",
            ErrorKind::Internal => "InternalError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct PipelineError {
    pub kind: ErrorKind,
    pub message: String,
    #[source]
    pub cause: Option<Cause>,
}

impl PipelineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl Into<Cause>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub fn resolution(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Resolution, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn external_process(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExternalProcess, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

/// Caller-facing outcome for a failed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub status: StatusCode,
    pub message: &'static str,
}

/// Map a pipeline failure to a status and a stable user message.
pub fn classify(err: &PipelineError) -> Classification {
    let (status, message) = match err.kind {
        ErrorKind::Configuration => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Twitter API token missing",
        ),
        ErrorKind::Resolution => (StatusCode::NOT_FOUND, "User not found or has no tweets"),
        ErrorKind::RateLimitExceeded => (
            StatusCode::TOO_MANY_REQUESTS,
            "Twitter API rate limit exceeded, try again later",
        ),
        ErrorKind::ExternalProcess => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Sentiment analysis process failed",
        ),
        ErrorKind::Serialization => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Sentiment analysis produced an unreadable result",
        ),
        ErrorKind::Network => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Error fetching Twitter data",
        ),
        ErrorKind::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
    };
    Classification { status, message }
}
