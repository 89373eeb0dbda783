//! Bearer-token verification for the business routes.
//!
//! Every route except `/health` and `/metrics` sits behind this middleware.
//! Tokens are HS256-signed JWTs; `exp` is enforced when the claim is present
//! but tokens issued without one are accepted.

use axum::Json;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde_json::json;

use crate::AppState;

/// Claims of the verified token, available to handlers via request
/// extensions.
#[derive(Debug, Clone)]
pub struct ApiClaims(pub serde_json::Value);

pub async fn require_jwt(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let Some(token) = bearer_token(request.headers()) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "jwt token missing" })),
        )
            .into_response();
    };

    match verify(token, state.jwt_secret.expose()) {
        Ok(claims) => {
            let subject = claims.0.get("sub").and_then(|v| v.as_str()).unwrap_or("-");
            tracing::debug!(subject, "token verified");
            request.extensions_mut().insert(claims);
            next.run(request).await
        }
        Err(err) => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": format!("Unauthorized -{err}") })),
        )
            .into_response(),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

fn verify(token: &str, secret: &str) -> Result<ApiClaims, jsonwebtoken::errors::Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.required_spec_claims.clear();
    let data = jsonwebtoken::decode::<serde_json::Value>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;
    Ok(ApiClaims(data.claims))
}
