//! Driver seam for SQL Server access
//!
//! Defines the `SqlConnector`/`SqlPool` traits that decouple the connection
//! manager from the wire driver. The production implementation (`tds`) speaks
//! TDS through tiberius with Azure AD access-token authentication; tests
//! substitute in-memory fakes behind the same traits.
//!
//! Queries carry named parameters (`@offset`, `@rowsPerPage`, ...) the way the
//! SQL in the handlers is written; the tiberius binding rewrites them to the
//! positional placeholders the protocol wants.

pub mod tds;

pub use tds::TdsConnector;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// One result row: column name → JSON value, in SELECT order.
pub type SqlRow = serde_json::Map<String, serde_json::Value>;

/// A named bind parameter.
pub type SqlParam = (String, SqlValue);

/// Connection coordinates for one database target.
///
/// Azure SQL listens on 1433 and requires encrypted transport; the
/// constructor bakes both in so call sites only override deliberately.
#[derive(Debug, Clone)]
pub struct SqlTarget {
    pub host: String,
    pub database: String,
    pub port: u16,
    pub encrypt: bool,
    pub trust_server_certificate: bool,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Number of driver connections kept behind one pool handle.
    pub pool_size: usize,
}

impl SqlTarget {
    pub fn new(host: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            database: database.into(),
            port: 1433,
            encrypt: true,
            trust_server_certificate: false,
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            pool_size: 4,
        }
    }
}

/// Value bound to a named parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    DateTime(chrono::NaiveDateTime),
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(v as i64)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<chrono::NaiveDateTime> for SqlValue {
    fn from(v: chrono::NaiveDateTime) -> Self {
        SqlValue::DateTime(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => SqlValue::Null,
        }
    }
}

/// Shorthand for building a named bind parameter.
pub fn param(name: &str, value: impl Into<SqlValue>) -> SqlParam {
    (name.to_string(), value.into())
}

/// Broad failure class reported by the driver; recoverability decisions
/// downstream key off this plus the server error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// Socket-level failure on a connection that may still be half-open.
    Io,
    /// The connection (or the whole pool handle) is known to be closed.
    Closed,
    /// The connect or request deadline elapsed.
    Timeout,
    Tls,
    /// The TDS stream was malformed mid-conversation.
    Protocol,
    Encoding,
    /// Local value/row conversion failed.
    Conversion,
    /// The server rejected the request with an error token.
    Server,
}

impl DriverErrorKind {
    pub fn label(self) -> &'static str {
        match self {
            DriverErrorKind::Io => "io",
            DriverErrorKind::Closed => "connection closed",
            DriverErrorKind::Timeout => "timeout",
            DriverErrorKind::Tls => "tls",
            DriverErrorKind::Protocol => "protocol",
            DriverErrorKind::Encoding => "encoding",
            DriverErrorKind::Conversion => "conversion",
            DriverErrorKind::Server => "server",
        }
    }
}

/// Error surfaced by a `SqlPool`/`SqlConnector` operation.
///
/// `code` is the SQL Server error number when the server produced one
/// (e.g. 18456 for a failed login); locally-detected failures carry none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverError {
    pub kind: DriverErrorKind,
    pub code: Option<u32>,
    pub message: String,
}

impl DriverError {
    pub fn new(kind: DriverErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
        }
    }

    pub fn server(code: u32, message: impl Into<String>) -> Self {
        Self {
            kind: DriverErrorKind::Server,
            code: Some(code),
            message: message.into(),
        }
    }

    pub fn closed(message: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::Closed, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::Timeout, message)
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} error (code {}): {}", self.kind.label(), code, self.message),
            None => write!(f, "{} error: {}", self.kind.label(), self.message),
        }
    }
}

impl std::error::Error for DriverError {}

/// A live pool handle: a managed set of driver connections behind one object.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn SqlPool>` is what the connection manager stores and swaps).
pub trait SqlPool: Send + Sync {
    /// Driver's own view of liveness; no I/O. A `true` here does not prove the
    /// embedded credential is still accepted — callers ping for that.
    fn connected(&self) -> bool;

    /// Trivial round-trip used to validate the handle before reuse.
    fn ping(&self) -> Pin<Box<dyn Future<Output = Result<(), DriverError>> + Send + '_>>;

    /// Run a SELECT-shaped statement, binding `params` by name.
    fn query(
        &self,
        text: String,
        params: Vec<SqlParam>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SqlRow>, DriverError>> + Send + '_>>;

    /// Run a statement for its side effect; returns rows affected.
    fn execute(
        &self,
        text: String,
        params: Vec<SqlParam>,
    ) -> Pin<Box<dyn Future<Output = Result<u64, DriverError>> + Send + '_>>;

    /// Release underlying connections. Safe to call more than once.
    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), DriverError>> + Send + '_>>;
}

/// Opens pool handles against a target using a short-lived access token.
pub trait SqlConnector: Send + Sync {
    fn connect<'a>(
        &'a self,
        target: &'a SqlTarget,
        access_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn SqlPool>, DriverError>> + Send + 'a>>;
}
