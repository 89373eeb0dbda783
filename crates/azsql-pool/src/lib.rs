//! Azure SQL connection lifecycle management
//!
//! Owns the one connection pool whose login credential (an Azure AD access
//! token) ages out roughly every hour. The manager rebuilds the pool when the
//! token expires, retries queries whose failures are recoverable, and keeps a
//! background task refreshing the token ahead of expiry so the request path
//! rarely pays for it.
//!
//! Connection lifecycle:
//! 1. `ConnectionManager::get_pool()` pings the cached pool and discards it
//!    on failure; an expired token also closes the pool and clears token state
//! 2. `TokenProvider::refresh_if_needed()` single-flights the token fetch on
//!    every acquisition, a no-op while the credential is fresh
//! 3. A still-live pool is reused; otherwise one is opened with the current
//!    token and cached
//! 4. `execute_query()` retries recoverable failures with doubling backoff,
//!    discarding credentials first when the failure is auth-shaped
//! 5. `spawn_refresh_task()` renews the token periodically; a failed cycle
//!    invalidates all state so the next request starts clean

pub mod classify;
pub mod error;
pub mod manager;
pub mod refresh;

pub use classify::{RecoverableCause, classify_driver_error};
pub use error::{Error, Result};
pub use manager::{ConnectionManager, Health, RetryPolicy};
pub use refresh::spawn_refresh_task;
