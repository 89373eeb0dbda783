//! Production pool implementation over tiberius
//!
//! tiberius exposes single connections, not pools, so the handle here is a
//! small fixed set of TDS clients dispatched round-robin behind one
//! `SqlPool`. Every client authenticates with the same Azure AD access
//! token; when the token ages out the whole handle is discarded and rebuilt
//! by the connection manager rather than re-authenticated in place.

use crate::{DriverError, DriverErrorKind, SqlParam, SqlPool, SqlRow, SqlTarget, SqlValue};

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel, FromSql, ToSql};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};

type TdsClient = Client<Compat<TcpStream>>;

/// Opens `TdsPool` handles. Stateless; one instance serves the process.
#[derive(Debug, Default)]
pub struct TdsConnector;

impl TdsConnector {
    pub fn new() -> Self {
        Self
    }
}

impl crate::SqlConnector for TdsConnector {
    fn connect<'a>(
        &'a self,
        target: &'a SqlTarget,
        access_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn SqlPool>, DriverError>> + Send + 'a>> {
        Box::pin(async move {
            let size = target.pool_size.max(1);
            let mut clients = Vec::with_capacity(size);
            for _ in 0..size {
                let client = open_client(target, access_token).await?;
                clients.push(Mutex::new(Some(client)));
            }
            info!(
                host = %target.host,
                database = %target.database,
                connections = size,
                "opened sql server pool"
            );
            let pool: Arc<dyn SqlPool> = Arc::new(TdsPool {
                clients,
                next: AtomicUsize::new(0),
                dead: AtomicUsize::new(0),
                open: AtomicBool::new(true),
                request_timeout: target.request_timeout,
            });
            Ok(pool)
        })
    }
}

async fn open_client(target: &SqlTarget, access_token: &str) -> Result<TdsClient, DriverError> {
    let mut config = Config::new();
    config.host(&target.host);
    config.port(target.port);
    config.database(&target.database);
    config.authentication(AuthMethod::aad_token(access_token));
    if target.encrypt {
        config.encryption(EncryptionLevel::Required);
    } else {
        config.encryption(EncryptionLevel::NotSupported);
    }
    if target.trust_server_certificate {
        config.trust_cert();
    }

    let handshake = async {
        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(io_to_driver)?;
        tcp.set_nodelay(true).map_err(io_to_driver)?;
        Client::connect(config, tcp.compat_write())
            .await
            .map_err(map_tds_error)
    };
    match tokio::time::timeout(target.connect_timeout, handshake).await {
        Ok(result) => result,
        Err(_) => Err(DriverError::timeout(format!(
            "connect to {}:{} exceeded {:?}",
            target.host, target.port, target.connect_timeout
        ))),
    }
}

/// Fixed set of TDS clients behind one pool handle.
pub struct TdsPool {
    clients: Vec<Mutex<Option<TdsClient>>>,
    next: AtomicUsize,
    dead: AtomicUsize,
    open: AtomicBool,
    request_timeout: Duration,
}

impl TdsPool {
    async fn run_query(
        &self,
        text: String,
        params: Vec<SqlParam>,
    ) -> Result<Vec<SqlRow>, DriverError> {
        let (sql, values) = rewrite_named(&text, &params)?;
        let mut slot = self.checked_slot().await?;
        let Some(client) = slot.as_mut() else {
            return Err(DriverError::closed("connection slot already torn down"));
        };
        let refs: Vec<&dyn ToSql> = values.iter().map(|v| v as &dyn ToSql).collect();
        let work = async {
            let stream = client.query(sql.as_str(), &refs).await?;
            stream.into_first_result().await
        };
        match tokio::time::timeout(self.request_timeout, work).await {
            Err(_) => Err(self.kill_slot(&mut slot)),
            Ok(Err(err)) => Err(self.map_and_reap(err, &mut slot)),
            Ok(Ok(rows)) => Ok(rows.into_iter().map(row_to_json).collect()),
        }
    }

    async fn run_execute(&self, text: String, params: Vec<SqlParam>) -> Result<u64, DriverError> {
        let (sql, values) = rewrite_named(&text, &params)?;
        let mut slot = self.checked_slot().await?;
        let Some(client) = slot.as_mut() else {
            return Err(DriverError::closed("connection slot already torn down"));
        };
        let refs: Vec<&dyn ToSql> = values.iter().map(|v| v as &dyn ToSql).collect();
        let work = client.execute(sql.as_str(), &refs);
        match tokio::time::timeout(self.request_timeout, work).await {
            Err(_) => Err(self.kill_slot(&mut slot)),
            Ok(Err(err)) => Err(self.map_and_reap(err, &mut slot)),
            Ok(Ok(result)) => Ok(result.rows_affected().iter().copied().sum()),
        }
    }

    async fn run_close(&self) -> Result<(), DriverError> {
        self.open.store(false, Ordering::SeqCst);
        let mut first_err = None;
        for slot in &self.clients {
            let client = { slot.lock().await.take() };
            if let Some(client) = client {
                if let Err(err) = client.close().await {
                    let mapped = map_tds_error(err);
                    debug!(error = %mapped, "error closing tds connection");
                    first_err.get_or_insert(mapped);
                }
            }
        }
        match first_err {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    async fn checked_slot(
        &self,
    ) -> Result<tokio::sync::MutexGuard<'_, Option<TdsClient>>, DriverError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(DriverError::closed("pool handle is closed"));
        }
        let idx = self.next.fetch_add(1, Ordering::SeqCst) % self.clients.len();
        Ok(self.clients[idx].lock().await)
    }

    /// A request deadline elapsed mid-conversation; the stream state is
    /// unknown, so the connection is dropped instead of reused.
    fn kill_slot(&self, slot: &mut Option<TdsClient>) -> DriverError {
        if slot.take().is_some() {
            self.dead.fetch_add(1, Ordering::SeqCst);
        }
        DriverError::timeout(format!("request exceeded {:?}", self.request_timeout))
    }

    fn map_and_reap(&self, err: tiberius::error::Error, slot: &mut Option<TdsClient>) -> DriverError {
        let mapped = map_tds_error(err);
        if matches!(mapped.kind, DriverErrorKind::Io | DriverErrorKind::Closed) {
            if slot.take().is_some() {
                self.dead.fetch_add(1, Ordering::SeqCst);
            }
        }
        mapped
    }
}

impl SqlPool for TdsPool {
    fn connected(&self) -> bool {
        self.open.load(Ordering::SeqCst) && self.dead.load(Ordering::SeqCst) < self.clients.len()
    }

    fn ping(&self) -> Pin<Box<dyn Future<Output = Result<(), DriverError>> + Send + '_>> {
        Box::pin(async move {
            self.run_query("SELECT 1 AS ok".to_string(), Vec::new())
                .await
                .map(|_| ())
        })
    }

    fn query(
        &self,
        text: String,
        params: Vec<SqlParam>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SqlRow>, DriverError>> + Send + '_>> {
        Box::pin(self.run_query(text, params))
    }

    fn execute(
        &self,
        text: String,
        params: Vec<SqlParam>,
    ) -> Pin<Box<dyn Future<Output = Result<u64, DriverError>> + Send + '_>> {
        Box::pin(self.run_execute(text, params))
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), DriverError>> + Send + '_>> {
        Box::pin(self.run_close())
    }
}

fn io_to_driver(err: std::io::Error) -> DriverError {
    DriverError::new(DriverErrorKind::Io, err.to_string())
}

fn map_tds_error(err: tiberius::error::Error) -> DriverError {
    use tiberius::error::Error as Tds;
    match err {
        Tds::Server(token) => DriverError::server(token.code(), token.message().to_string()),
        Tds::Io { kind, message } => {
            let closed = matches!(
                kind,
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            );
            let kind = if closed {
                DriverErrorKind::Closed
            } else {
                DriverErrorKind::Io
            };
            DriverError::new(kind, message)
        }
        Tds::Tls(message) => DriverError::new(DriverErrorKind::Tls, message),
        Tds::Protocol(message) => DriverError::new(DriverErrorKind::Protocol, message.into_owned()),
        Tds::Encoding(message) => DriverError::new(DriverErrorKind::Encoding, message.into_owned()),
        Tds::Conversion(message) => {
            DriverError::new(DriverErrorKind::Conversion, message.into_owned())
        }
        Tds::Utf8 | Tds::Utf16 => {
            DriverError::new(DriverErrorKind::Encoding, "invalid string data in stream")
        }
        Tds::Routing { host, port } => DriverError::new(
            DriverErrorKind::Io,
            format!("server redirected the session to {host}:{port}"),
        ),
        other => DriverError::new(DriverErrorKind::Protocol, other.to_string()),
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> ColumnData<'_> {
        match self {
            SqlValue::Null => ColumnData::String(None),
            SqlValue::Bool(b) => ColumnData::Bit(Some(*b)),
            SqlValue::Int(i) => ColumnData::I64(Some(*i)),
            SqlValue::Float(f) => ColumnData::F64(Some(*f)),
            SqlValue::Text(s) => ColumnData::String(Some(s.as_str().into())),
            SqlValue::DateTime(dt) => dt.to_sql(),
        }
    }
}

fn row_to_json(row: tiberius::Row) -> SqlRow {
    let names: Vec<String> = row.columns().iter().map(|c| c.name().to_string()).collect();
    let mut out = SqlRow::new();
    for (name, data) in names.into_iter().zip(row.into_iter()) {
        out.insert(name, column_data_to_json(data));
    }
    out
}

/// Decode one column into JSON. Binary/XML columns have no use in this
/// service's tables and decode to null.
fn column_data_to_json(data: ColumnData<'static>) -> serde_json::Value {
    use serde_json::Value;
    match data {
        ColumnData::Bit(v) => v.map(Value::from).unwrap_or(Value::Null),
        ColumnData::U8(v) => v.map(|x| Value::from(x as i64)).unwrap_or(Value::Null),
        ColumnData::I16(v) => v.map(|x| Value::from(x as i64)).unwrap_or(Value::Null),
        ColumnData::I32(v) => v.map(|x| Value::from(x as i64)).unwrap_or(Value::Null),
        ColumnData::I64(v) => v.map(Value::from).unwrap_or(Value::Null),
        ColumnData::F32(v) => v.map(|x| Value::from(x as f64)).unwrap_or(Value::Null),
        ColumnData::F64(v) => v.map(Value::from).unwrap_or(Value::Null),
        ColumnData::String(v) => v.map(|s| Value::from(s.into_owned())).unwrap_or(Value::Null),
        ColumnData::Guid(v) => v.map(|g| Value::from(g.to_string())).unwrap_or(Value::Null),
        ColumnData::Numeric(v) => v
            .map(|n| {
                let scaled = (n.value() as f64) / 10f64.powi(n.scale() as i32);
                Value::from(scaled)
            })
            .unwrap_or(Value::Null),
        data @ (ColumnData::DateTime(_)
        | ColumnData::SmallDateTime(_)
        | ColumnData::DateTime2(_)) => chrono::NaiveDateTime::from_sql(&data)
            .ok()
            .flatten()
            .map(|dt| Value::from(dt.format("%Y-%m-%dT%H:%M:%S%.3f").to_string()))
            .unwrap_or(Value::Null),
        data @ ColumnData::Date(_) => chrono::NaiveDate::from_sql(&data)
            .ok()
            .flatten()
            .map(|d| Value::from(d.format("%Y-%m-%d").to_string()))
            .unwrap_or(Value::Null),
        data @ ColumnData::Time(_) => chrono::NaiveTime::from_sql(&data)
            .ok()
            .flatten()
            .map(|t| Value::from(t.format("%H:%M:%S%.3f").to_string()))
            .unwrap_or(Value::Null),
        data @ ColumnData::DateTimeOffset(_) => {
            chrono::DateTime::<chrono::Utc>::from_sql(&data)
                .ok()
                .flatten()
                .map(|dt| Value::from(dt.to_rfc3339()))
                .unwrap_or(Value::Null)
        }
        _ => serde_json::Value::Null,
    }
}

/// Rewrite `@name` placeholders into the positional `@P1..@Pn` form tiberius
/// binds, returning the bind values in placeholder order. Repeated references
/// to one name share a single bind position; parameters supplied but never
/// referenced are dropped. `@@server_variables` and quoted literals are left
/// untouched.
fn rewrite_named(
    text: &str,
    params: &[SqlParam],
) -> Result<(String, Vec<SqlValue>), DriverError> {
    let mut out = String::with_capacity(text.len() + 8);
    let mut order: Vec<usize> = Vec::new();
    let mut chars = text.char_indices().peekable();
    let mut in_literal = false;

    while let Some((idx, ch)) = chars.next() {
        if in_literal {
            out.push(ch);
            if ch == '\'' {
                in_literal = false;
            }
            continue;
        }
        match ch {
            '\'' => {
                in_literal = true;
                out.push(ch);
            }
            '@' => {
                if matches!(chars.peek(), Some((_, '@'))) {
                    out.push_str("@@");
                    chars.next();
                    continue;
                }
                let start = idx + 1;
                let mut end = start;
                while let Some(&(j, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        end = j + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                if end == start {
                    out.push('@');
                    continue;
                }
                let name = &text[start..end];
                let param_idx = params
                    .iter()
                    .position(|(n, _)| n == name)
                    .ok_or_else(|| {
                        DriverError::new(
                            DriverErrorKind::Conversion,
                            format!("no binding supplied for parameter @{name}"),
                        )
                    })?;
                let position = match order.iter().position(|&p| p == param_idx) {
                    Some(existing) => existing,
                    None => {
                        order.push(param_idx);
                        order.len() - 1
                    }
                };
                out.push_str("@P");
                out.push_str(&(position + 1).to_string());
            }
            _ => out.push(ch),
        }
    }

    let values = order.into_iter().map(|i| params[i].1.clone()).collect();
    Ok((out, values))
}
