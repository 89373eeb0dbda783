//! Test doubles shared by the endpoint tests: a scripted pool that records
//! every statement it is handed, a fixed token source, and JWT helpers.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use azsql_auth::{TokenProvider, TokenResponse, TokenSource};
use azsql_pool::ConnectionManager;
use common::Secret;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use mssql_driver::{DriverError, SqlConnector, SqlParam, SqlPool, SqlRow, SqlTarget, SqlValue};
use serde_json::{Value, json};

pub const JWT_SECRET: &str = "router-test-secret";

/// Token source that always succeeds with a long-lived token.
pub struct StaticSource;

impl TokenSource for StaticSource {
    fn fetch(
        &self,
    ) -> Pin<Box<dyn Future<Output = azsql_auth::Result<TokenResponse>> + Send + '_>> {
        Box::pin(async {
            Ok(TokenResponse {
                access_token: "token-0".to_string(),
                expires_in: 3600,
            })
        })
    }
}

/// Pool double: pops scripted results per call and records every statement.
/// Unscripted calls succeed with an empty result set / one affected row.
#[derive(Default)]
pub struct ScriptedPool {
    queries: Mutex<VecDeque<Result<Vec<SqlRow>, DriverError>>>,
    execs: Mutex<VecDeque<Result<u64, DriverError>>>,
    seen: Mutex<Vec<(String, Vec<SqlParam>)>>,
}

impl ScriptedPool {
    pub fn push_query(&self, result: Result<Vec<SqlRow>, DriverError>) {
        self.queries.lock().unwrap().push_back(result);
    }

    pub fn push_exec(&self, result: Result<u64, DriverError>) {
        self.execs.lock().unwrap().push_back(result);
    }

    /// Statements seen so far, in call order, queries and executes together.
    pub fn captured(&self) -> Vec<(String, Vec<SqlParam>)> {
        self.seen.lock().unwrap().clone()
    }
}

impl SqlPool for ScriptedPool {
    fn connected(&self) -> bool {
        true
    }

    fn ping(&self) -> Pin<Box<dyn Future<Output = Result<(), DriverError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn query(
        &self,
        text: String,
        params: Vec<SqlParam>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SqlRow>, DriverError>> + Send + '_>> {
        self.seen.lock().unwrap().push((text, params));
        let next = self
            .queries
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(Vec::new()));
        Box::pin(async move { next })
    }

    fn execute(
        &self,
        text: String,
        params: Vec<SqlParam>,
    ) -> Pin<Box<dyn Future<Output = Result<u64, DriverError>> + Send + '_>> {
        self.seen.lock().unwrap().push((text, params));
        let next = self.execs.lock().unwrap().pop_front().unwrap_or(Ok(1));
        Box::pin(async move { next })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), DriverError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
}

/// Connector that hands out the same scripted pool on every connect.
pub struct ScriptedConnector(pub Arc<ScriptedPool>);

impl SqlConnector for ScriptedConnector {
    fn connect<'a>(
        &'a self,
        _target: &'a SqlTarget,
        _access_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn SqlPool>, DriverError>> + Send + 'a>> {
        let pool = self.0.clone() as Arc<dyn SqlPool>;
        Box::pin(async move { Ok(pool) })
    }
}

/// App state wired to the scripted pool, ready for `build_router`.
pub fn state(pool: Arc<ScriptedPool>) -> crate::AppState {
    let provider = Arc::new(TokenProvider::new(Arc::new(StaticSource)));
    let manager = ConnectionManager::new(
        provider,
        Arc::new(ScriptedConnector(pool)),
        SqlTarget::new("sql.test.internal", "prodrate_test"),
    );
    crate::AppState {
        manager: Arc::new(manager),
        jwt_secret: Arc::new(Secret::new(JWT_SECRET.to_string())),
        prometheus: test_prometheus_handle(),
    }
}

/// A render handle backed by its own recorder, not the global one.
pub fn test_prometheus_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

pub fn token(secret: &str, claims: &Value) -> String {
    jsonwebtoken::encode(
        &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
        claims,
        &jsonwebtoken::EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

/// Authorization header value for a token the middleware accepts.
pub fn bearer() -> String {
    let claims = json!({ "sub": "tester", "exp": 4_102_444_800u64 });
    format!("Bearer {}", token(JWT_SECRET, &claims))
}

pub fn row(fields: &[(&str, Value)]) -> SqlRow {
    fields
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

pub fn param_value(params: &[SqlParam], name: &str) -> SqlValue {
    params
        .iter()
        .find(|(bound, _)| bound == name)
        .map(|(_, value)| value.clone())
        .unwrap_or_else(|| panic!("missing bind parameter {name}"))
}
