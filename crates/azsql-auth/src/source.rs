//! Token acquisition against the Azure AD token endpoint
//!
//! One grant type matters here: `client_credentials`, the non-interactive
//! flow for service principals. The request POSTs form fields to
//! `{authority}/{tenant}/oauth2/v2.0/token` and gets back a bearer token
//! scoped to Azure SQL.
//!
//! The `TokenSource` trait exists so the provider and pool tests can swap
//! in stub sources; production code always uses `ClientCredentials`.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_AUTHORITY, DEFAULT_SCOPE};
use crate::error::{Error, Result};

/// Response from the token endpoint.
///
/// `expires_in` is a delta in seconds from the response time. The provider
/// converts this to an absolute unix millisecond timestamp when caching the
/// credential. Azure AD sends additional fields (`token_type`,
/// `ext_expires_in`) which are ignored.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Seconds until the access token expires (delta, not absolute)
    pub expires_in: u64,
}

/// Anything that can mint a fresh access token.
///
/// Uses a `Pin<Box<dyn Future>>` return type for dyn-compatibility, matching
/// the other trait seams in this workspace.
pub trait TokenSource: Send + Sync {
    fn fetch(&self) -> Pin<Box<dyn Future<Output = Result<TokenResponse>> + Send + '_>>;
}

/// Client-credentials grant against Azure AD.
pub struct ClientCredentials {
    client: reqwest::Client,
    endpoint: String,
    client_id: String,
    client_secret: String,
    scope: String,
}

impl ClientCredentials {
    /// Build a source for the given tenant using the default authority and
    /// the Azure SQL scope.
    pub fn new(tenant_id: &str, client_id: String, client_secret: String) -> Self {
        Self::with_authority(
            DEFAULT_AUTHORITY,
            tenant_id,
            client_id,
            client_secret,
            DEFAULT_SCOPE.to_string(),
        )
    }

    /// Build a source against a non-default authority host (sovereign
    /// clouds) or with a non-default scope.
    pub fn with_authority(
        authority: &str,
        tenant_id: &str,
        client_id: String,
        client_secret: String,
        scope: String,
    ) -> Self {
        let endpoint = format!(
            "{}/{}/oauth2/v2.0/token",
            authority.trim_end_matches('/'),
            tenant_id
        );
        Self {
            client: reqwest::Client::new(),
            endpoint,
            client_id,
            client_secret,
            scope,
        }
    }

    /// The resolved token endpoint URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn request_token(&self) -> Result<TokenResponse> {
        let response = self
            .client
            .post(&self.endpoint)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", self.scope.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::Http(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(Error::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| Error::Parse(e.to_string()))
    }
}

impl TokenSource for ClientCredentials {
    fn fetch(&self) -> Pin<Box<dyn Future<Output = Result<TokenResponse>> + Send + '_>> {
        Box::pin(self.request_token())
    }
}
