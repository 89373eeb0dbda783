//! HTTP error envelope shared by every route.
//!
//! All error responses serialize as `{"error": {...}}` with a machine
//! readable `type`, the HTTP status, detail text (or a `details` list for
//! validation failures), and the request path in `instance`.

use axum::Json;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};

/// Error a handler can bubble up with `?`; converts straight into the
/// JSON envelope response.
#[derive(Debug)]
pub struct ApiError {
    kind: Kind,
    instance: Option<String>,
}

#[derive(Debug)]
enum Kind {
    /// Bad input; carries every failure found, not just the first.
    Validation {
        details: Vec<String>,
        source: &'static str,
    },
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl ApiError {
    pub fn validation(details: Vec<String>, source: &'static str) -> Self {
        Self {
            kind: Kind::Validation { details, source },
            instance: None,
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            kind: Kind::BadRequest(detail.into()),
            instance: None,
        }
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self {
            kind: Kind::NotFound(detail.into()),
            instance: None,
        }
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self {
            kind: Kind::Internal(detail.into()),
            instance: None,
        }
    }

    /// Stamp the request path into the envelope's `instance` field.
    pub fn at(mut self, uri: &Uri) -> Self {
        self.instance = Some(uri.to_string());
        self
    }

    pub fn status(&self) -> StatusCode {
        match &self.kind {
            Kind::Validation { .. } | Kind::BadRequest(_) => StatusCode::BAD_REQUEST,
            Kind::NotFound(_) => StatusCode::NOT_FOUND,
            Kind::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> Value {
        let status = self.status().as_u16();
        let instance = self.instance.as_deref();
        match &self.kind {
            Kind::Validation { details, source } => json!({
                "error": {
                    "type": "ValidationError",
                    "status": status,
                    "details": details,
                    "source": source,
                    "instance": instance,
                }
            }),
            Kind::BadRequest(detail) => envelope("BadRequest", status, detail, instance),
            Kind::NotFound(detail) => envelope("NotFound", status, detail, instance),
            Kind::Internal(detail) => envelope("InternalServerError", status, detail, instance),
        }
    }
}

fn envelope(kind: &str, status: u16, detail: &str, instance: Option<&str>) -> Value {
    json!({
        "error": {
            "type": kind,
            "status": status,
            "detail": detail,
            "instance": instance,
        }
    })
}

impl From<azsql_pool::Error> for ApiError {
    fn from(err: azsql_pool::Error) -> Self {
        Self::internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), kind = ?self.kind, "request failed");
        }
        (status, Json(self.body())).into_response()
    }
}
