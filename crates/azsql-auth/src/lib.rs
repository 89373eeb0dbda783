//! Azure AD authentication for Azure SQL access
//!
//! Provides client-credential token acquisition against Azure AD and a
//! single-flight `TokenProvider` that caches the current access token for
//! the database scope. This crate is a standalone library with no dependency
//! on the API binary or the SQL driver — it can be tested and used
//! independently.
//!
//! Token flow:
//! 1. Service constructs a `source::ClientCredentials` from its Azure config
//! 2. `TokenProvider::refresh_if_needed()` returns the cached token while valid
//! 3. On expiry (or inside the refresh buffer) one fetch runs; concurrent
//!    callers await the same in-flight future instead of stampeding Azure AD
//! 4. `TokenProvider::force_refresh()` discards the cache before fetching
//! 5. `TokenProvider::reset()` clears all token state without network I/O

pub mod constants;
pub mod credential;
pub mod error;
pub mod provider;
pub mod source;

pub use constants::*;
pub use credential::AccessCredential;
pub use error::{Error, Result};
pub use provider::TokenProvider;
pub use source::{ClientCredentials, TokenResponse, TokenSource};
