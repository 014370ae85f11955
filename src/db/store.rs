use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::{types::Json, PgPool};
use uuid::Uuid;

/// A single table row as a column -> value map.
pub type Row = Map<String, Value>;

/// Column equality predicate. A `Null` value matches `IS NULL`.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Self {
            column: column.to_string(),
            value: value.into(),
        }
    }

    /// Shorthand for the `website_id = $id` scope every content query carries.
    pub fn website(id: Uuid) -> Self {
        Self::eq(crate::models::content::TENANT_COLUMN, id.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

impl OrderBy {
    pub fn asc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            descending: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("operation on {table} timed out")]
    Timeout { table: String },

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("refusing unscoped delete on {0}")]
    Unscoped(String),

    #[error("insert into {table} returned {actual} rows, expected {expected}")]
    RowCount {
        table: String,
        expected: usize,
        actual: usize,
    },

    #[error("row decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Row-level access to the relational store.
///
/// `insert` returns the stored rows with defaults filled in. Callers that need
/// to correlate inputs with outputs supply their own ids rather than rely on
/// the order of the returned rows.
#[async_trait]
pub trait Store: Send + Sync {
    async fn select(
        &self,
        table: &str,
        filters: &[Filter],
        order: &[OrderBy],
    ) -> Result<Vec<Row>, StoreError>;

    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>, StoreError>;

    async fn update(&self, table: &str, id: Uuid, patch: Row) -> Result<Option<Row>, StoreError>;

    /// Deletes matching rows and returns how many were removed. An empty filter
    /// list is rejected.
    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<u64, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Unwraps a `json!({...})` literal into a row; anything but an object yields an empty row.
pub fn row_from(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}

/// Reads the `id` column of a row as a UUID.
pub fn row_id(row: &Row) -> Option<Uuid> {
    row.get("id")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
}

/// Only lowercase snake_case identifiers are ever interpolated into SQL.
fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && s.len() <= 63
}

fn ident(s: &str) -> Result<&str, StoreError> {
    if is_valid_identifier(s) {
        Ok(s)
    } else {
        Err(StoreError::InvalidIdentifier(s.to_string()))
    }
}

/// Builds `t."a" = f."a" AND t."b" IS NULL` plus the jsonb object that feeds `f`.
///
/// Filter values go through `jsonb_populate_record` so each one is cast to the
/// column's own type on the database side.
fn predicate(filters: &[Filter]) -> Result<(String, Row), StoreError> {
    let mut clauses = Vec::with_capacity(filters.len());
    let mut values = Row::new();
    for filter in filters {
        let column = ident(&filter.column)?;
        if filter.value.is_null() {
            clauses.push(format!(r#"t."{column}" IS NULL"#));
        } else {
            clauses.push(format!(r#"t."{column}" = f."{column}""#));
            values.insert(column.to_string(), filter.value.clone());
        }
    }
    if clauses.is_empty() {
        clauses.push("TRUE".into());
    }
    Ok((clauses.join(" AND "), values))
}

/// PostgreSQL-backed store. Rows travel as jsonb in both directions.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    timeout: Duration,
}

impl PgStore {
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    async fn timed<T, F>(&self, table: &str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout {
                table: table.to_string(),
            })?
            .map_err(StoreError::from)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn select(
        &self,
        table: &str,
        filters: &[Filter],
        order: &[OrderBy],
    ) -> Result<Vec<Row>, StoreError> {
        let table = ident(table)?;
        let (clause, values) = predicate(filters)?;

        let mut sql = format!(
            r#"SELECT to_jsonb(t) FROM "{table}" t, jsonb_populate_record(NULL::"{table}", $1) f
               WHERE {clause}"#
        );
        if !order.is_empty() {
            let terms = order
                .iter()
                .map(|o| {
                    ident(&o.column).map(|c| {
                        format!(r#"t."{c}" {}"#, if o.descending { "DESC" } else { "ASC" })
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }

        let rows: Vec<Json<Row>> = self
            .timed(
                table,
                sqlx::query_scalar(&sql)
                    .bind(Json(Value::Object(values)))
                    .fetch_all(&self.pool),
            )
            .await?;
        Ok(rows.into_iter().map(|Json(r)| r).collect())
    }

    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>, StoreError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let table = ident(table)?;
        let columns: BTreeSet<&str> = rows.iter().flat_map(|r| r.keys().map(String::as_str)).collect();
        let columns = columns
            .into_iter()
            .map(|c| ident(c).map(|c| format!(r#""{c}""#)))
            .collect::<Result<Vec<_>, _>>()?
            .join(", ");

        let expected = rows.len();
        let payload = Value::Array(rows.into_iter().map(Value::Object).collect());
        let sql = format!(
            r#"INSERT INTO "{table}" AS t ({columns})
               SELECT {columns} FROM jsonb_populate_recordset(NULL::"{table}", $1)
                    WITH ORDINALITY AS r
               ORDER BY r.ordinality
               RETURNING to_jsonb(t)"#
        );

        let inserted: Vec<Json<Row>> = self
            .timed(
                table,
                sqlx::query_scalar(&sql).bind(Json(payload)).fetch_all(&self.pool),
            )
            .await?;
        if inserted.len() != expected {
            return Err(StoreError::RowCount {
                table: table.to_string(),
                expected,
                actual: inserted.len(),
            });
        }
        Ok(inserted.into_iter().map(|Json(r)| r).collect())
    }

    async fn update(&self, table: &str, id: Uuid, patch: Row) -> Result<Option<Row>, StoreError> {
        let table = ident(table)?;
        if patch.is_empty() {
            let mut rows = self
                .select(table, &[Filter::eq("id", id.to_string())], &[])
                .await?;
            return Ok(rows.pop());
        }

        let assignments = patch
            .keys()
            .map(|c| ident(c).map(|c| format!(r#""{c}" = p."{c}""#)))
            .collect::<Result<Vec<_>, _>>()?
            .join(", ");
        let sql = format!(
            r#"UPDATE "{table}" AS t SET {assignments}
               FROM jsonb_populate_record(NULL::"{table}", $1) p
               WHERE t.id = $2
               RETURNING to_jsonb(t)"#
        );

        let row: Option<Json<Row>> = self
            .timed(
                table,
                sqlx::query_scalar(&sql)
                    .bind(Json(Value::Object(patch)))
                    .bind(id)
                    .fetch_optional(&self.pool),
            )
            .await?;
        Ok(row.map(|Json(r)| r))
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<u64, StoreError> {
        let table = ident(table)?;
        if filters.is_empty() {
            return Err(StoreError::Unscoped(table.to_string()));
        }
        let (clause, values) = predicate(filters)?;
        let sql = format!(
            r#"DELETE FROM "{table}" t USING jsonb_populate_record(NULL::"{table}", $1) f
               WHERE {clause}"#
        );

        let result = self
            .timed(
                table,
                sqlx::query(&sql)
                    .bind(Json(Value::Object(values)))
                    .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.timed("health", sqlx::query("SELECT 1").execute(&self.pool))
            .await
            .map(|_| ())
    }
}
