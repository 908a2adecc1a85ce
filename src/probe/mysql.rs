use super::{ErrorDetail, ProbeOutcome, ProbeTarget};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use sqlx::{
    Column, ConnectOptions, Connection, Row, TypeInfo, ValueRef,
    mysql::{MySqlColumn, MySqlConnectOptions, MySqlConnection, MySqlRow, MySqlSslMode},
};
use std::time::{Duration, Instant};
use tokio::time;
use tracing::{debug, warn};

/// The one query a database probe runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticQuery {
    /// `SELECT 1` with the server version, and optionally the server time
    Liveness { timestamp: bool },
    /// Number of tables visible under `schema`
    Catalog { schema: String },
    /// First `limit` rows of `table` plus its total row count
    Sample {
        table: String,
        columns: Vec<String>,
        limit: u32,
    },
}

/// Where the probe clock starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timing {
    /// Before the session is opened, handshake included
    #[default]
    Session,
    /// Immediately before the query runs; a failure to open the session reports 0 ms
    Query,
}

/// True for plain identifiers: ASCII alphanumerics and `_`
#[must_use]
pub fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Backtick-quote an identifier, `None` when it is not a plain identifier
fn quote_identifier(name: &str) -> Option<String> {
    is_identifier(name).then(|| format!("`{name}`"))
}

fn connect_options(target: &ProbeTarget) -> MySqlConnectOptions {
    let mut options = MySqlConnectOptions::new()
        .host(target.host.as_str())
        .port(target.port)
        .username(target.credentials.user.as_str())
        .password(target.credentials.password.as_str())
        .ssl_mode(MySqlSslMode::Disabled)
        .charset("utf8mb4")
        .timezone(Some(String::from("+00:00")));

    if let Some(database) = &target.database {
        options = options.database(database.as_str());
    }

    options
}

/// Open a session, run `query`, close the session
///
/// The session is closed on every path once opened; a close failure is
/// logged and never replaces the outcome already computed.
pub async fn probe_database(
    target: &ProbeTarget,
    query: &DiagnosticQuery,
    timing: Timing,
    connect_timeout: Duration,
) -> ProbeOutcome {
    let database = target.database.as_deref().unwrap_or("");
    debug!(
        host = %target.host,
        port = target.port,
        database,
        "opening session"
    );

    let session_start = Instant::now();
    let connecting = time::timeout(connect_timeout, connect_options(target).connect()).await;
    let before_query = |elapsed: Duration| match timing {
        Timing::Session => elapsed,
        Timing::Query => Duration::ZERO,
    };

    let mut conn = match connecting {
        Ok(Ok(conn)) => conn,
        Ok(Err(err)) => {
            let outcome = ProbeOutcome::failed(
                before_query(session_start.elapsed()),
                ErrorDetail::from(&err),
            );
            log_outcome(database, &outcome);
            return outcome;
        }
        Err(_) => {
            let outcome = ProbeOutcome::failed(
                before_query(session_start.elapsed()),
                ErrorDetail::timeout(),
            );
            log_outcome(database, &outcome);
            return outcome;
        }
    };

    let query_start = Instant::now();
    let result = run_query(&mut conn, query).await;
    let elapsed = match timing {
        Timing::Session => session_start.elapsed(),
        Timing::Query => query_start.elapsed(),
    };

    let closed = conn.close().await;
    let outcome = settle(database, result, closed, elapsed);
    log_outcome(database, &outcome);
    outcome
}

/// Outcome of a query whose session has been closed
///
/// The close result is logged and otherwise ignored: it never turns a
/// success into a failure nor replaces the query's own error.
fn settle(
    database: &str,
    result: Result<Map<String, Value>, ErrorDetail>,
    closed: Result<(), sqlx::Error>,
    elapsed: Duration,
) -> ProbeOutcome {
    if let Err(err) = closed {
        warn!(database, "error closing session: {err}");
    }

    match result {
        Ok(payload) => ProbeOutcome::succeeded(elapsed, payload),
        Err(err) => ProbeOutcome::failed(elapsed, err),
    }
}

fn log_outcome(database: &str, outcome: &ProbeOutcome) {
    match &outcome.error {
        None => debug!(database, duration_ms = outcome.duration_ms, "query ok"),
        Some(err) => warn!(
            database,
            duration_ms = outcome.duration_ms,
            code = err.code.as_deref().unwrap_or("N/A"),
            errno = err.errno.unwrap_or_default(),
            "database probe failed: {}",
            err.message
        ),
    }
}

fn liveness_sql(timestamp: bool) -> &'static str {
    if timestamp {
        "SELECT 1 AS test, VERSION() AS version, NOW() AS timestamp"
    } else {
        "SELECT 1 AS test, VERSION() AS version"
    }
}

const CATALOG_SQL: &str =
    "SELECT 1 AS test, COUNT(*) AS total FROM information_schema.tables WHERE table_schema = ?";

/// Build the sample and count statements, `None` on a bad identifier
fn sample_sql(table: &str, columns: &[String]) -> Option<(String, String)> {
    let table = quote_identifier(table)?;
    let columns = if columns.is_empty() {
        "*".to_string()
    } else {
        columns
            .iter()
            .map(|column| quote_identifier(column))
            .collect::<Option<Vec<_>>>()?
            .join(", ")
    };

    Some((
        format!("SELECT {columns} FROM {table} LIMIT ?"),
        format!("SELECT COUNT(*) AS total FROM {table}"),
    ))
}

async fn run_query(
    conn: &mut MySqlConnection,
    query: &DiagnosticQuery,
) -> Result<Map<String, Value>, ErrorDetail> {
    let db_err = |err: sqlx::Error| ErrorDetail::from(&err);

    match query {
        DiagnosticQuery::Liveness { timestamp } => {
            let row = sqlx::query(liveness_sql(*timestamp))
                .fetch_one(&mut *conn)
                .await
                .map_err(db_err)?;
            Ok(row_to_map(&row))
        }
        DiagnosticQuery::Catalog { schema } => {
            let row = sqlx::query(CATALOG_SQL)
                .bind(schema.as_str())
                .fetch_one(&mut *conn)
                .await
                .map_err(db_err)?;
            let mut payload = Map::new();
            payload.insert("database".to_string(), Value::from(schema.as_str()));
            payload.extend(row_to_map(&row));
            Ok(payload)
        }
        DiagnosticQuery::Sample {
            table,
            columns,
            limit,
        } => {
            let (select_sql, count_sql) = sample_sql(table, columns).ok_or_else(|| {
                ErrorDetail::new(format!("Incorrect table name '{table}'"))
                    .with_code("ER_WRONG_TABLE_NAME")
            })?;

            let rows = sqlx::query(&select_sql)
                .bind(*limit)
                .fetch_all(&mut *conn)
                .await
                .map_err(db_err)?;
            let total: i64 = sqlx::query_scalar(&count_sql)
                .fetch_one(&mut *conn)
                .await
                .map_err(db_err)?;

            let mut payload = Map::new();
            payload.insert("total_users".to_string(), Value::from(total));
            payload.insert(
                "sample_users".to_string(),
                Value::Array(rows.iter().map(|row| Value::Object(row_to_map(row))).collect()),
            );
            Ok(payload)
        }
    }
}

/// Map a row field by field into JSON, in column order
fn row_to_map(row: &MySqlRow) -> Map<String, Value> {
    row.columns()
        .iter()
        .map(|column| (column.name().to_string(), column_value(row, column)))
        .collect()
}

fn iso_utc(datetime: DateTime<Utc>) -> Value {
    Value::String(datetime.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn column_value(row: &MySqlRow, column: &MySqlColumn) -> Value {
    let index = column.ordinal();
    match row.try_get_raw(index) {
        Ok(raw) if !raw.is_null() => {}
        _ => return Value::Null,
    }

    let decoded = match column.type_info().name() {
        "BOOLEAN" => row.try_get::<bool, _>(index).map(Value::from),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            row.try_get::<i64, _>(index).map(Value::from)
        }
        name if name.ends_with("UNSIGNED") => row.try_get::<u64, _>(index).map(Value::from),
        "FLOAT" => row
            .try_get::<f32, _>(index)
            .map(|v| Value::from(f64::from(v))),
        "DOUBLE" => row.try_get::<f64, _>(index).map(Value::from),
        // exact numerics keep their textual form
        "DECIMAL" => row.try_get_unchecked::<String, _>(index).map(Value::from),
        "DATETIME" => row
            .try_get::<NaiveDateTime, _>(index)
            .map(|v| iso_utc(v.and_utc())),
        "TIMESTAMP" => row.try_get::<DateTime<Utc>, _>(index).map(iso_utc),
        "DATE" => row
            .try_get::<NaiveDate, _>(index)
            .map(|v| Value::from(v.to_string())),
        "TIME" => row
            .try_get::<NaiveTime, _>(index)
            .map(|v| Value::from(v.to_string())),
        _ => row.try_get::<String, _>(index).map(Value::from).or_else(|_| {
            row.try_get_unchecked::<Vec<u8>, _>(index)
                .map(|bytes| Value::from(String::from_utf8_lossy(&bytes).into_owned()))
        }),
    };

    decoded.unwrap_or(Value::Null)
}
