//! Shared plumbing for the production-rates services

mod secret;
mod error;

pub use secret::Secret;
pub use error::{Error, Result};
