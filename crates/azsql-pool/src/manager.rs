//! Connection manager: pool lifecycle and retrying query execution
//!
//! One manager owns one pool handle plus the token provider that
//! authenticates it. Pool acquisition is serialized by an async mutex so
//! concurrent callers cannot race a teardown against a rebuild; queries then
//! run on a clone of the handle outside the lock, and the token provider's
//! single-flight marker is the only cross-task refresh coordination.
//!
//! `get_pool()` decides in order:
//! 1. cached pool dead or failing its ping → close and discard it
//! 2. token expired → close the pool, clear token state
//! 3. refresh the token if it is inside the refresh buffer (single-flight)
//! 4. live pool still cached → reuse it, else open one with the current token

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use azsql_auth::TokenProvider;
use metrics::counter;
use mssql_driver::{DriverError, SqlConnector, SqlParam, SqlPool, SqlRow, SqlTarget};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::classify::classify_driver_error;
use crate::error::{Error, Result};

/// Retry policy for query execution.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first try; a statement runs at most
    /// `max_attempts + 1` times.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles after each attempt.
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::from_millis(500),
        }
    }
}

/// Health snapshot for the health endpoint.
///
/// `token_expires_in` is minutes until token expiry, -1 when no token is
/// cached. Status mapping: pool connected and token valid → healthy, one of
/// the two → degraded, neither → unhealthy.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub status: &'static str,
    pub token_expires_in: i64,
    pub pool_connected: bool,
}

/// Owns the pool handle and the credential that authenticates it.
pub struct ConnectionManager {
    provider: Arc<TokenProvider>,
    connector: Arc<dyn SqlConnector>,
    target: SqlTarget,
    retry: RetryPolicy,
    pool: RwLock<Option<Arc<dyn SqlPool>>>,
    acquire: Mutex<()>,
}

impl ConnectionManager {
    pub fn new(
        provider: Arc<TokenProvider>,
        connector: Arc<dyn SqlConnector>,
        target: SqlTarget,
    ) -> Self {
        Self::with_retry_policy(provider, connector, target, RetryPolicy::default())
    }

    pub fn with_retry_policy(
        provider: Arc<TokenProvider>,
        connector: Arc<dyn SqlConnector>,
        target: SqlTarget,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            connector,
            target,
            retry,
            pool: RwLock::new(None),
            acquire: Mutex::new(()),
        }
    }

    /// The token provider backing this manager.
    pub fn token_provider(&self) -> &Arc<TokenProvider> {
        &self.provider
    }

    /// The cached pool handle, if any. Never blocks on acquisition and never
    /// triggers a rebuild; health checks use this.
    pub async fn current_pool(&self) -> Option<Arc<dyn SqlPool>> {
        self.pool.read().await.clone()
    }

    /// Return a pool ready to run queries, rebuilding it if the cached one
    /// is dead or its token expired. The credential is revalidated on every
    /// acquisition: the token inside a live pool keeps working after expiry,
    /// but the next rebuild must not log in with it.
    pub async fn get_pool(&self) -> Result<Arc<dyn SqlPool>> {
        let _guard = self.acquire.lock().await;

        // A cached pool that reports dead or fails its round trip is
        // discarded up front.
        if let Some(pool) = self.current_pool().await {
            if !pool.connected() {
                debug!("cached pool reports disconnected, discarding");
                self.close_pool().await;
            } else if let Err(err) = pool.ping().await {
                debug!(error = %err, "cached pool failed ping, discarding");
                self.close_pool().await;
            }
        }

        if self.provider.is_expired().await {
            info!("access token expired, discarding pool and token state");
            self.close_pool().await;
            self.provider.reset().await;
        }

        // No-op while the cached credential is outside the refresh buffer.
        let credential = self.provider.refresh_if_needed().await?;

        if let Some(pool) = self.current_pool().await {
            debug!("reusing cached connection pool");
            return Ok(pool);
        }

        let pool = self
            .connector
            .connect(&self.target, &credential.token)
            .await
            .map_err(Error::Connect)?;
        counter!("sql_pool_builds_total").increment(1);
        info!(
            host = %self.target.host,
            database = %self.target.database,
            "connection pool ready"
        );
        *self.pool.write().await = Some(pool.clone());
        Ok(pool)
    }

    /// Close and clear the cached pool. Tolerates a missing pool; close
    /// errors are logged and swallowed, and the slot is cleared regardless.
    pub async fn close_pool(&self) {
        let pool = { self.pool.write().await.take() };
        if let Some(pool) = pool {
            if let Err(err) = pool.close().await {
                warn!(error = %err, "error closing connection pool");
            } else {
                info!("connection pool closed");
            }
        }
    }

    /// Drop all credential and pool state so the next caller rebuilds from
    /// scratch. Used when a background refresh fails.
    pub async fn invalidate(&self) {
        self.provider.reset().await;
        self.close_pool().await;
    }

    /// Run a row-returning statement with retry.
    pub async fn execute_query(
        &self,
        sql: impl Into<String>,
        params: Vec<SqlParam>,
    ) -> Result<Vec<SqlRow>> {
        let sql = sql.into();
        self.with_retry(|pool| {
            let sql = sql.clone();
            let params = params.clone();
            async move { pool.query(sql, params).await }
        })
        .await
    }

    /// Run a statement for its affected-row count with retry.
    pub async fn execute_non_query(
        &self,
        sql: impl Into<String>,
        params: Vec<SqlParam>,
    ) -> Result<u64> {
        let sql = sql.into();
        self.with_retry(|pool| {
            let sql = sql.clone();
            let params = params.clone();
            async move { pool.execute(sql, params).await }
        })
        .await
    }

    /// Retry loop shared by the execute paths.
    ///
    /// Pool-creation failures feed the same classification as query
    /// failures, so a login rejection during connect still gets the
    /// reauthenticate-and-retry treatment. Token acquisition failures do
    /// not: retrying those is the token provider's business.
    async fn with_retry<T, F, Fut>(&self, run: F) -> Result<T>
    where
        F: Fn(Arc<dyn SqlPool>) -> Fut,
        Fut: Future<Output = std::result::Result<T, DriverError>>,
    {
        let mut delay = self.retry.initial_delay;
        let mut attempt = 1u32;
        loop {
            let outcome = match self.get_pool().await {
                Ok(pool) => run(pool).await,
                Err(Error::Connect(err)) => Err(err),
                Err(other) => return Err(other),
            };
            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let Some(cause) = classify_driver_error(&err) else {
                warn!(error = %err, "query failed with unrecoverable error");
                return Err(Error::Query {
                    attempts: attempt,
                    source: err,
                });
            };
            if attempt > self.retry.max_attempts {
                warn!(
                    attempts = attempt,
                    cause = cause.label(),
                    error = %err,
                    "recoverable failure on final attempt, giving up"
                );
                return Err(Error::Query {
                    attempts: attempt,
                    source: err,
                });
            }

            counter!("sql_query_retries_total", "cause" => cause.label()).increment(1);
            warn!(
                attempt,
                cause = cause.label(),
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "recoverable failure, retrying"
            );
            if cause.requires_reauth() {
                self.provider.reset().await;
                self.close_pool().await;
            }
            tokio::time::sleep(delay).await;
            delay = delay.saturating_mul(2);
            attempt += 1;
        }
    }

    /// Health snapshot of the pool and its credential.
    pub async fn health(&self) -> Health {
        let pool_connected = self
            .current_pool()
            .await
            .is_some_and(|pool| pool.connected());
        let token_expires_in = self.provider.time_until_expiry_minutes().await;
        let token_valid = self.provider.is_valid().await;
        let status = if pool_connected && token_valid {
            "healthy"
        } else if pool_connected || token_valid {
            "degraded"
        } else {
            "unhealthy"
        };
        Health {
            status,
            token_expires_in,
            pool_connected,
        }
    }

    /// Warm the pool at startup. Failure is logged, not fatal: the first
    /// request or the background refresher rebuilds later.
    pub async fn initialize(&self) {
        match self.get_pool().await {
            Ok(_) => info!("connection manager initialized"),
            Err(err) => {
                warn!(error = %err, "startup pool creation failed, continuing without a pool")
            }
        }
    }

    /// Tear down in dependency order: close the pool, then clear token
    /// state. Idempotent.
    pub async fn shutdown(&self) {
        self.close_pool().await;
        self.provider.reset().await;
        info!("connection manager shut down");
    }

    /// Full teardown followed by a fresh warmup.
    pub async fn reinitialize(&self) {
        self.shutdown().await;
        self.initialize().await;
    }
}
