//! Error types for connection management

/// Errors from connection management and query execution.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to acquire access token: {0}")]
    Token(#[from] azsql_auth::Error),

    #[error("failed to open connection pool: {0}")]
    Connect(#[source] mssql_driver::DriverError),

    #[error("query failed after {attempts} attempt(s): {source}")]
    Query {
        attempts: u32,
        #[source]
        source: mssql_driver::DriverError,
    },
}

/// Result alias for connection management operations.
pub type Result<T> = std::result::Result<T, Error>;
