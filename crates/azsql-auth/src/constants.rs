//! Azure AD token endpoint constants
//!
//! Endpoint and scope configuration for the client-credentials grant. These
//! values are not secrets — they identify the directory and the resource the
//! token is minted for. The actual secret (the application client secret)
//! comes from service configuration.

/// Default Azure AD authority host. Sovereign clouds override this
/// through configuration.
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";

/// Default token scope for Azure SQL Database. The `/.default` suffix
/// requests all statically-granted application permissions for the resource.
pub const DEFAULT_SCOPE: &str = "https://database.windows.net/.default";

/// Seconds before expiry at which a cached token stops counting as valid.
/// Azure AD access tokens live roughly an hour; refreshing five minutes
/// early keeps connections from authenticating with a token that dies
/// mid-handshake.
pub const DEFAULT_REFRESH_BUFFER_SECS: u64 = 300;
