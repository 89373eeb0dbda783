//! Error types for token acquisition
//!
//! The enum derives `Clone` because refresh results fan out to every caller
//! awaiting the same in-flight fetch.

/// Errors from Azure AD token operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token request rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("invalid token response: {0}")]
    Parse(String),
}

/// Result alias for token operations.
pub type Result<T> = std::result::Result<T, Error>;
