use rmcp::ErrorData as McpError;
use thiserror::Error;

/// Stable classification of a [`BirdingError`], used by callers to decide
/// whether to retry, ask the user to clarify, or report outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidParameter,
    LocationNotFound,
    UpstreamRejected,
    UpstreamTimeout,
    UpstreamUnavailable,
    Cancelled,
    Config,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BirdingError {
    #[error("Invalid parameter `{field}`: {reason}")]
    InvalidParameter { field: String, reason: String },

    #[error("Location not found: {query}")]
    LocationNotFound { query: String },

    #[error("Provider rejected the request (HTTP {status}): {detail}")]
    UpstreamRejected { status: u16, detail: String },

    #[error("Provider timed out: {detail}")]
    UpstreamTimeout { detail: String },

    #[error("Provider unavailable: {detail}")]
    UpstreamUnavailable { detail: String },

    #[error("Query cancelled")]
    Cancelled,

    #[error("Configuration error: {message}")]
    Config { message: String },
}

pub type Result<T> = std::result::Result<T, BirdingError>;

impl BirdingError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidParameter { .. } => ErrorKind::InvalidParameter,
            Self::LocationNotFound { .. } => ErrorKind::LocationNotFound,
            Self::UpstreamRejected { .. } => ErrorKind::UpstreamRejected,
            Self::UpstreamTimeout { .. } => ErrorKind::UpstreamTimeout,
            Self::UpstreamUnavailable { .. } => ErrorKind::UpstreamUnavailable,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Config { .. } => ErrorKind::Config,
        }
    }

    /// Timeouts and unavailability are the only kinds worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::UpstreamTimeout | ErrorKind::UpstreamUnavailable
        )
    }
}

impl From<reqwest::Error> for BirdingError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::UpstreamTimeout {
                detail: e.to_string(),
            }
        } else {
            Self::unavailable(e.to_string())
        }
    }
}

impl From<BirdingError> for McpError {
    fn from(e: BirdingError) -> Self {
        match e.kind() {
            ErrorKind::InvalidParameter
            | ErrorKind::LocationNotFound
            | ErrorKind::UpstreamRejected => McpError::invalid_params(e.to_string(), None),
            _ => McpError::internal_error(e.to_string(), None),
        }
    }
}
