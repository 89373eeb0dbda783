//! Access credential and its validity arithmetic
//!
//! All timestamps are absolute unix milliseconds, computed at acquisition
//! time from the token endpoint's `expires_in` delta. Validity checks take
//! `now` as an argument so the math is testable without a clock.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// An acquired Azure AD access token with its lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessCredential {
    /// Bearer token presented to SQL Server during login
    pub token: String,
    /// Acquisition time as unix timestamp in milliseconds
    pub issued_at: i64,
    /// Expiration as unix timestamp in milliseconds
    pub expires_at: i64,
}

impl AccessCredential {
    /// Whether the token is still usable at `now_ms`, leaving `buffer` of
    /// remaining lifetime. A token inside the buffer is treated as due for
    /// refresh even though the server would still accept it.
    pub fn is_valid_at(&self, now_ms: i64, buffer: Duration) -> bool {
        now_ms + (buffer.as_millis() as i64) < self.expires_at
    }

    /// Whether the token's lifetime has fully elapsed at `now_ms`.
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at
    }

    /// Minutes until expiry, rounded to the nearest whole minute. Negative
    /// once the token is past its expiration.
    pub fn minutes_until_expiry_at(&self, now_ms: i64) -> i64 {
        ((self.expires_at - now_ms) as f64 / 60_000.0).round() as i64
    }
}

/// Current wall-clock time as unix milliseconds.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
