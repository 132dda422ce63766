//! SQL resource executor.
//!
//! Follows the HTTP executor's discipline: resolve expression-bearing
//! fields, consult the cache, run the query with retry, shape a result
//! map. Driver failures (connect, query) are result-map data; unknown
//! drivers and expression failures are configuration errors.
//!
//! Supported drivers: `postgres` and `sqlite`.

use crate::constants;
use crate::duration::parse_duration_or;
use crate::engine::context::ExecutionContext;
use crate::engine::registry::Executor;
use crate::error::Error;
use crate::executors::cache::{self, ResolvedCache};
use crate::executors::retry::RetryPolicy;
use crate::executors::eval_field;
use crate::expr;
use crate::workflow::{ResourceKind, RunSpec, SqlConfig};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row};
use std::time::Duration;
use tracing::debug;

pub struct SqlExecutor;

#[async_trait]
impl Executor for SqlExecutor {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Sql
    }

    async fn execute(&self, ctx: &ExecutionContext, run: &RunSpec) -> Result<Value, Error> {
        let RunSpec::Sql(config) = run else {
            return Err(Error::invalid_config_type("sql"));
        };
        execute_sql(ctx, config).await
    }
}

async fn execute_sql(ctx: &ExecutionContext, config: &SqlConfig) -> Result<Value, Error> {
    let scope = ctx.expression_scope();

    let driver = config.driver.trim().to_lowercase();
    if driver != "postgres" && driver != "sqlite" {
        return Err(Error::invalid_config(format!(
            "unsupported SQL driver '{}': expected postgres or sqlite",
            config.driver
        )));
    }

    let dsn = eval_field(&config.dsn, &scope, "dsn")?;
    let query = eval_field(&config.query, &scope, "query")?;
    if query.trim().is_empty() {
        return Err(Error::invalid_config("query is required"));
    }

    let params = match &config.params {
        Some(raw) => raw
            .iter()
            .map(|p| expr::evaluate_value(p, &scope))
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };

    let timeout_text = config
        .timeout_duration
        .as_deref()
        .map(|t| eval_field(t, &scope, "timeoutDuration"))
        .transpose()?;
    let timeout = parse_duration_or(
        timeout_text.as_deref(),
        Duration::from_secs(constants::DEFAULT_TIMEOUT_SECS),
    );

    let retry = RetryPolicy::resolve(config.retry.as_ref(), &scope)?;
    let resolved_cache = ResolvedCache::resolve(config.cache.as_ref(), &scope)?;

    let cache_key = resolved_cache
        .as_ref()
        .filter(|c| c.enabled)
        .map(|c| {
            cache::derived_cache_key(
                constants::CACHE_PREFIX_SQL,
                c,
                &[driver.as_str(), dsn.as_str(), query.as_str()],
            )
        });
    if let Some(key) = &cache_key {
        if let Some(hit) = cache::check(&ctx.memory, key) {
            return Ok(hit);
        }
    }

    let result = run_with_retry(&driver, &dsn, &query, &params, timeout, retry.as_ref()).await;

    if let Some(key) = &cache_key {
        if result.get(constants::RESULT_KEY_ERROR).is_none() {
            cache::put(&ctx.memory, key, &result);
        }
    }

    Ok(result)
}

/// Driver failures retry whenever a retry config is present; the final
/// failure is returned as result-map data.
async fn run_with_retry(
    driver: &str,
    dsn: &str,
    query: &str,
    params: &[Value],
    timeout: Duration,
    retry: Option<&RetryPolicy>,
) -> Value {
    let attempts = retry.map_or(1, |r| r.max_attempts.max(1));

    for attempt in 1..=attempts {
        let outcome = tokio::time::timeout(timeout, run_query(driver, dsn, query, params)).await;
        let failure = match outcome {
            Ok(Ok(result)) => return result,
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("query timed out after {timeout:?}"),
        };
        if attempt < attempts {
            if let Some(policy) = retry {
                debug!(attempt, error = %failure, "sql failure, retrying");
                tokio::time::sleep(policy.delay_for(attempt)).await;
                continue;
            }
        }
        return json!({ constants::RESULT_KEY_ERROR: failure });
    }

    json!({ constants::RESULT_KEY_ERROR: "no attempts executed" })
}

async fn run_query(
    driver: &str,
    dsn: &str,
    query: &str,
    params: &[Value],
) -> Result<Value, sqlx::Error> {
    if driver == "postgres" {
        run_postgres(dsn, query, params).await
    } else {
        run_sqlite(dsn, query, params).await
    }
}

/// Whether a statement produces rows (SELECT-like) versus a row count.
fn returns_rows(query: &str) -> bool {
    let head = query
        .trim_start()
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_lowercase();
    matches!(
        head.as_str(),
        "select" | "with" | "show" | "values" | "pragma" | "explain"
    ) || query.to_lowercase().contains("returning")
}

fn shape_rows(rows: Vec<Value>, columns: Vec<String>) -> Value {
    let count = rows.len();
    json!({
        "rows": rows,
        "rowCount": count,
        "columns": columns,
    })
}

async fn run_postgres(dsn: &str, query: &str, params: &[Value]) -> Result<Value, sqlx::Error> {
    let pool = PgPoolOptions::new().max_connections(1).connect(dsn).await?;
    let mut q = sqlx::query(query);
    for param in params {
        q = bind_pg(q, param);
    }

    let result = if returns_rows(query) {
        let rows = q.fetch_all(&pool).await?;
        let columns = rows
            .first()
            .map(|r| r.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();
        let values = rows.iter().map(pg_row_to_value).collect();
        shape_rows(values, columns)
    } else {
        let done = q.execute(&pool).await?;
        json!({ "rows": [], "rowCount": done.rows_affected(), "columns": [] })
    };

    pool.close().await;
    Ok(result)
}

async fn run_sqlite(dsn: &str, query: &str, params: &[Value]) -> Result<Value, sqlx::Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(dsn)
        .await?;
    let mut q = sqlx::query(query);
    for param in params {
        q = bind_sqlite(q, param);
    }

    let result = if returns_rows(query) {
        let rows = q.fetch_all(&pool).await?;
        let columns = rows
            .first()
            .map(|r| r.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();
        let values = rows.iter().map(sqlite_row_to_value).collect();
        shape_rows(values, columns)
    } else {
        let done = q.execute(&pool).await?;
        json!({ "rows": [], "rowCount": done.rows_affected(), "columns": [] })
    };

    pool.close().await;
    Ok(result)
}

type PgQuery<'q> = sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>;
type SqliteQuery<'q> =
    sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

fn bind_pg<'q>(q: PgQuery<'q>, param: &Value) -> PgQuery<'q> {
    match param {
        Value::Null => q.bind(None::<String>),
        Value::Bool(b) => q.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                q.bind(i)
            } else {
                q.bind(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => q.bind(s.clone()),
        other => q.bind(other.to_string()),
    }
}

fn bind_sqlite<'q>(q: SqliteQuery<'q>, param: &Value) -> SqliteQuery<'q> {
    match param {
        Value::Null => q.bind(None::<String>),
        Value::Bool(b) => q.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                q.bind(i)
            } else {
                q.bind(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => q.bind(s.clone()),
        other => q.bind(other.to_string()),
    }
}

fn pg_row_to_value(row: &PgRow) -> Value {
    let mut map = Map::new();
    for (i, column) in row.columns().iter().enumerate() {
        map.insert(column.name().to_string(), pg_cell(row, i));
    }
    Value::Object(map)
}

fn pg_cell(row: &PgRow, i: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<i64>, _>(i) {
        return v.map_or(Value::Null, Value::from);
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(i) {
        return v.map_or(Value::Null, Value::from);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(i) {
        return v.map_or(Value::Null, |f| json!(f));
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(i) {
        return v.map_or(Value::Null, Value::from);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(i) {
        return v.map_or(Value::Null, Value::from);
    }
    if let Ok(v) = row.try_get::<Option<Value>, _>(i) {
        return v.unwrap_or(Value::Null);
    }
    Value::Null
}

fn sqlite_row_to_value(row: &SqliteRow) -> Value {
    let mut map = Map::new();
    for (i, column) in row.columns().iter().enumerate() {
        map.insert(column.name().to_string(), sqlite_cell(row, i));
    }
    Value::Object(map)
}

fn sqlite_cell(row: &SqliteRow, i: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<i64>, _>(i) {
        return v.map_or(Value::Null, Value::from);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(i) {
        return v.map_or(Value::Null, |f| json!(f));
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(i) {
        return v.map_or(Value::Null, Value::from);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(i) {
        return v.map_or(Value::Null, Value::from);
    }
    Value::Null
}
