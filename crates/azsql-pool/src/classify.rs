//! Failure classification for retry decisions
//!
//! Maps driver errors onto a closed set of recoverable causes. Anything
//! outside the set is fatal and surfaces immediately; in particular, ordinary
//! server errors (constraint violations, syntax errors, permission denials)
//! never retry.
//!
//! Mapping:
//! - message contains a token-expiry phrase → `TokenExpired` (checked first,
//!   regardless of the error's kind)
//! - server error with code 18456 or 18452 → `LoginFailed`
//! - I/O fault or torn-down connection → `ConnectionClosed`
//! - connect or request deadline elapsed → `Timeout`
//! - protocol or encoding fault on the stream → `MalformedRequest`
//! - everything else → fatal
//!
//! `TokenExpired` and `LoginFailed` additionally force reauthentication:
//! retrying them on the same credential would fail identically.

use mssql_driver::{DriverError, DriverErrorKind};

/// Token-expiry message fragments as Azure SQL phrases them. Expiry can
/// surface as a server error or as an I/O fault mid-handshake, so matching
/// is on the message, not the kind.
const AUTH_EXPIRY_PATTERNS: &[&str] = &[
    "token is expired",
    "access token has expired",
    "token used in the request is expired",
];

/// Server error codes meaning the login itself was rejected.
/// 18456 is the generic login failure, 18452 the untrusted-principal variant.
const LOGIN_FAILURE_CODES: &[u32] = &[18456, 18452];

/// The closed set of failures worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverableCause {
    /// Server rejected the login.
    LoginFailed,
    /// Connection torn down mid-conversation.
    ConnectionClosed,
    /// Connect or request deadline elapsed.
    Timeout,
    /// Protocol or encoding fault on the wire.
    MalformedRequest,
    /// The access token aged out.
    TokenExpired,
}

impl RecoverableCause {
    /// Cause label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            RecoverableCause::LoginFailed => "login_failed",
            RecoverableCause::ConnectionClosed => "connection_closed",
            RecoverableCause::Timeout => "timeout",
            RecoverableCause::MalformedRequest => "malformed_request",
            RecoverableCause::TokenExpired => "token_expired",
        }
    }

    /// Whether recovery needs a new credential, not just a new connection.
    pub fn requires_reauth(&self) -> bool {
        matches!(
            self,
            RecoverableCause::TokenExpired | RecoverableCause::LoginFailed
        )
    }
}

/// Classify a driver error for the retry loop. `None` means fatal.
pub fn classify_driver_error(err: &DriverError) -> Option<RecoverableCause> {
    let lower = err.message.to_lowercase();
    if AUTH_EXPIRY_PATTERNS.iter().any(|p| lower.contains(p)) {
        return Some(RecoverableCause::TokenExpired);
    }
    match err.kind {
        DriverErrorKind::Server => match err.code {
            Some(code) if LOGIN_FAILURE_CODES.contains(&code) => {
                Some(RecoverableCause::LoginFailed)
            }
            _ => None,
        },
        DriverErrorKind::Io | DriverErrorKind::Closed => Some(RecoverableCause::ConnectionClosed),
        DriverErrorKind::Timeout => Some(RecoverableCause::Timeout),
        DriverErrorKind::Protocol | DriverErrorKind::Encoding => {
            Some(RecoverableCause::MalformedRequest)
        }
        DriverErrorKind::Tls | DriverErrorKind::Conversion => None,
    }
}
