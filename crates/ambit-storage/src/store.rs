// Generic data-access layer over Postgres
//
// The typed repositories cover the hot paths; this layer carries the
// genuinely dynamic operations: filtered reads on caller-named tables
// (dynamic memory tables), batch id lookups, race-free upserts, the raw SQL
// escape hatch and the in-process vector similarity scan.
//
// Every identifier that reaches SQL text is validated against
// ^[A-Za-z0-9_]+$ first; values always travel as bind parameters.

use anyhow::{bail, Context, Result};
use regex::Regex;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Column, PgPool, Row, TypeInfo};
use std::collections::HashMap;
use std::sync::OnceLock;

/// A bindable SQL value for the dynamic operations
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(chrono::DateTime<chrono::Utc>),
    Json(serde_json::Value),
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<serde_json::Value> for SqlValue {
    fn from(v: serde_json::Value) -> Self {
        SqlValue::Json(v)
    }
}

impl From<chrono::DateTime<chrono::Utc>> for SqlValue {
    fn from(v: chrono::DateTime<chrono::Utc>) -> Self {
        SqlValue::Timestamp(v)
    }
}

/// Options for `get`
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    pub order_by: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("valid regex"))
}

/// Validate a SQL identifier (table or column name) before interpolation
pub fn validate_identifier(identifier: &str) -> Result<&str> {
    if identifier.is_empty() || !identifier_pattern().is_match(identifier) {
        bail!("invalid SQL identifier: {identifier:?}");
    }
    Ok(identifier)
}

fn bind_value<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    value: SqlValue,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    match value {
        SqlValue::Null => query.bind(Option::<String>::None),
        SqlValue::Bool(v) => query.bind(v),
        SqlValue::Int(v) => query.bind(v),
        SqlValue::Float(v) => query.bind(v),
        SqlValue::Text(v) => query.bind(v),
        SqlValue::Timestamp(v) => query.bind(v),
        SqlValue::Json(v) => query.bind(v),
    }
}

/// Decode a dynamic row into a JSON object, keyed by column name
fn row_to_json(row: &PgRow) -> serde_json::Value {
    let mut object = serde_json::Map::new();
    for column in row.columns() {
        let name = column.name();
        let value = match column.type_info().name() {
            "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" => row
                .try_get::<Option<String>, _>(name)
                .ok()
                .flatten()
                .map(serde_json::Value::String),
            "INT2" => row
                .try_get::<Option<i16>, _>(name)
                .ok()
                .flatten()
                .map(|v| serde_json::Value::from(v as i64)),
            "INT4" => row
                .try_get::<Option<i32>, _>(name)
                .ok()
                .flatten()
                .map(|v| serde_json::Value::from(v as i64)),
            "INT8" => row
                .try_get::<Option<i64>, _>(name)
                .ok()
                .flatten()
                .map(serde_json::Value::from),
            "FLOAT4" => row
                .try_get::<Option<f32>, _>(name)
                .ok()
                .flatten()
                .map(|v| serde_json::Value::from(v as f64)),
            "FLOAT8" => row
                .try_get::<Option<f64>, _>(name)
                .ok()
                .flatten()
                .map(serde_json::Value::from),
            "BOOL" => row
                .try_get::<Option<bool>, _>(name)
                .ok()
                .flatten()
                .map(serde_json::Value::Bool),
            "TIMESTAMPTZ" | "TIMESTAMP" => row
                .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name)
                .ok()
                .flatten()
                .map(|v| serde_json::Value::String(v.to_rfc3339())),
            "JSON" | "JSONB" => row
                .try_get::<Option<serde_json::Value>, _>(name)
                .ok()
                .flatten(),
            _ => row
                .try_get::<Option<String>, _>(name)
                .ok()
                .flatten()
                .map(serde_json::Value::String),
        };
        object.insert(name.to_string(), value.unwrap_or(serde_json::Value::Null));
    }
    serde_json::Value::Object(object)
}

/// The persistence abstraction. Owns the connection pool.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with a configured pool size
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Liveness probe
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Filtered read. Filters combine with AND; `order_by` may carry a
    /// trailing ` DESC`/` ASC` after the validated column name.
    pub async fn get(
        &self,
        table: &str,
        filters: &[(&str, SqlValue)],
        options: GetOptions,
    ) -> Result<Vec<serde_json::Value>> {
        let table = validate_identifier(table)?;
        let (where_clause, values) = build_where(filters, 1)?;
        let mut sql = format!("SELECT * FROM {table}{where_clause}");

        if let Some(order_by) = &options.order_by {
            let (column, direction) = parse_order_by(order_by)?;
            sql.push_str(&format!(" ORDER BY {column} {direction}"));
        }
        if let Some(limit) = options.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = options.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }

        let mut query = sqlx::query(&sql);
        for value in values {
            query = bind_value(query, value);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    /// Single-row read
    pub async fn get_one(
        &self,
        table: &str,
        filters: &[(&str, SqlValue)],
    ) -> Result<Option<serde_json::Value>> {
        let mut rows = self
            .get(
                table,
                filters,
                GetOptions {
                    limit: Some(1),
                    ..Default::default()
                },
            )
            .await?;
        let result = rows.drain(..).next();
        Ok(result)
    }

    /// Batch lookup by primary key in one `= ANY` query. Results come back
    /// in the requested id order with `None` holes for missing ids; this is
    /// the primitive higher layers use to avoid N+1 scans.
    pub async fn get_by_ids(
        &self,
        table: &str,
        id_field: &str,
        ids: &[String],
    ) -> Result<Vec<Option<serde_json::Value>>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let table = validate_identifier(table)?;
        let id_field = validate_identifier(id_field)?;

        let sql = format!("SELECT * FROM {table} WHERE {id_field} = ANY($1)");
        let rows = sqlx::query(&sql)
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;

        let mut by_id: HashMap<String, serde_json::Value> = HashMap::new();
        for row in &rows {
            let value = row_to_json(row);
            if let Some(id) = value.get(id_field).and_then(|v| v.as_str()) {
                by_id.insert(id.to_string(), value.clone());
            }
        }

        Ok(ids.iter().map(|id| by_id.get(id).cloned()).collect())
    }

    /// Insert one row. Null values are dropped so column defaults apply.
    pub async fn insert(&self, table: &str, data: &[(&str, SqlValue)]) -> Result<u64> {
        let table = validate_identifier(table)?;
        let live: Vec<&(&str, SqlValue)> = data
            .iter()
            .filter(|(_, v)| !matches!(v, SqlValue::Null))
            .collect();
        if live.is_empty() {
            bail!("insert into {table} with no non-null values");
        }

        let mut columns = Vec::with_capacity(live.len());
        let mut placeholders = Vec::with_capacity(live.len());
        for (i, (column, _)) in live.iter().enumerate() {
            columns.push(validate_identifier(column)?.to_string());
            placeholders.push(format!("${}", i + 1));
        }
        let sql = format!(
            "INSERT INTO {table} ({}) VALUES ({})",
            columns.join(", "),
            placeholders.join(", ")
        );

        let mut query = sqlx::query(&sql);
        for (_, value) in &live {
            query = bind_value(query, value.clone());
        }
        Ok(query.execute(&self.pool).await?.rows_affected())
    }

    /// Update rows. Refuses an empty filter set.
    pub async fn update(
        &self,
        table: &str,
        filters: &[(&str, SqlValue)],
        data: &[(&str, SqlValue)],
    ) -> Result<u64> {
        let table = validate_identifier(table)?;
        if filters.is_empty() {
            bail!("update on {table} requires non-empty filters");
        }
        if data.is_empty() {
            return Ok(0);
        }

        let mut sets = Vec::with_capacity(data.len());
        for (i, (column, _)) in data.iter().enumerate() {
            sets.push(format!("{} = ${}", validate_identifier(column)?, i + 1));
        }
        let (where_clause, filter_values) = build_where(filters, data.len() + 1)?;
        let sql = format!("UPDATE {table} SET {}{where_clause}", sets.join(", "));

        let mut query = sqlx::query(&sql);
        for (_, value) in data {
            query = bind_value(query, value.clone());
        }
        for value in filter_values {
            query = bind_value(query, value);
        }
        Ok(query.execute(&self.pool).await?.rows_affected())
    }

    /// Delete rows. Refuses an empty filter set.
    pub async fn delete(&self, table: &str, filters: &[(&str, SqlValue)]) -> Result<u64> {
        let table = validate_identifier(table)?;
        if filters.is_empty() {
            bail!("delete on {table} requires non-empty filters");
        }
        let (where_clause, values) = build_where(filters, 1)?;
        let sql = format!("DELETE FROM {table}{where_clause}");

        let mut query = sqlx::query(&sql);
        for value in values {
            query = bind_value(query, value);
        }
        Ok(query.execute(&self.pool).await?.rows_affected())
    }

    /// Atomic insert-or-update keyed on `id_field`. Race-free under
    /// concurrent writers to the same id (database-native upsert).
    pub async fn upsert(
        &self,
        table: &str,
        data: &[(&str, SqlValue)],
        id_field: &str,
    ) -> Result<u64> {
        let table = validate_identifier(table)?;
        let id_field = validate_identifier(id_field)?;

        let mut columns = Vec::with_capacity(data.len());
        let mut placeholders = Vec::with_capacity(data.len());
        let mut updates = Vec::new();
        for (i, (column, _)) in data.iter().enumerate() {
            let column = validate_identifier(column)?;
            columns.push(column.to_string());
            placeholders.push(format!("${}", i + 1));
            if column != id_field {
                updates.push(format!("{column} = EXCLUDED.{column}"));
            }
        }
        let sql = if updates.is_empty() {
            format!(
                "INSERT INTO {table} ({}) VALUES ({}) ON CONFLICT ({id_field}) DO NOTHING",
                columns.join(", "),
                placeholders.join(", ")
            )
        } else {
            format!(
                "INSERT INTO {table} ({}) VALUES ({}) ON CONFLICT ({id_field}) DO UPDATE SET {}",
                columns.join(", "),
                placeholders.join(", "),
                updates.join(", ")
            )
        };

        let mut query = sqlx::query(&sql);
        for (_, value) in data {
            query = bind_value(query, value.clone());
        }
        Ok(query.execute(&self.pool).await?.rows_affected())
    }

    /// Raw SQL escape hatch. Identifiers interpolated by the caller MUST be
    /// passed through `validate_identifier` first; values travel in `params`.
    pub async fn execute(
        &self,
        sql: &str,
        params: Vec<SqlValue>,
        fetch: bool,
    ) -> Result<ExecuteResult> {
        let mut query = sqlx::query(sql);
        for value in params {
            query = bind_value(query, value);
        }
        if fetch {
            let rows = query.fetch_all(&self.pool).await?;
            Ok(ExecuteResult::Rows(
                rows.iter().map(row_to_json).collect(),
            ))
        } else {
            Ok(ExecuteResult::Affected(
                query.execute(&self.pool).await?.rows_affected(),
            ))
        }
    }

    /// Scoped exclusive transaction. Rolls back on any exit path except
    /// explicit commit.
    pub async fn transaction(&self) -> Result<sqlx::Transaction<'static, sqlx::Postgres>> {
        Ok(self.pool.begin().await?)
    }

    /// Cosine-similarity scan over a JSON-stored embedding column.
    /// Embedding arithmetic runs in-process; rows with no embedding are
    /// skipped. Results come back descending by score.
    pub async fn semantic_search(
        &self,
        table: &str,
        embedding_column: &str,
        query_vec: &[f32],
        filters: &[(&str, SqlValue)],
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<(serde_json::Value, f32)>> {
        let embedding_column = validate_identifier(embedding_column)?.to_string();
        let rows = self.get(table, filters, GetOptions::default()).await?;

        let query_norm = norm(query_vec);
        if query_norm == 0.0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(serde_json::Value, f32)> = Vec::new();
        for row in rows {
            let Some(vec) = row
                .get(&embedding_column)
                .and_then(parse_embedding)
            else {
                continue;
            };
            if vec.len() != query_vec.len() {
                continue;
            }
            let row_norm = norm(&vec);
            if row_norm == 0.0 {
                continue;
            }
            let similarity = dot(query_vec, &vec) / (query_norm * row_norm);
            if similarity >= min_similarity {
                scored.push((row, similarity));
            }
        }

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }
}

/// Result of the raw SQL escape hatch
#[derive(Debug)]
pub enum ExecuteResult {
    Rows(Vec<serde_json::Value>),
    Affected(u64),
}

impl ExecuteResult {
    pub fn rows(self) -> Vec<serde_json::Value> {
        match self {
            ExecuteResult::Rows(rows) => rows,
            ExecuteResult::Affected(_) => Vec::new(),
        }
    }

    pub fn affected(&self) -> u64 {
        match self {
            ExecuteResult::Rows(rows) => rows.len() as u64,
            ExecuteResult::Affected(n) => *n,
        }
    }
}

/// Build a WHERE clause starting placeholders at `$start`. Null filters
/// become `IS NULL` and consume no placeholder; returns the values to bind
/// in order.
fn build_where(
    filters: &[(&str, SqlValue)],
    start: usize,
) -> Result<(String, Vec<SqlValue>)> {
    if filters.is_empty() {
        return Ok((String::new(), Vec::new()));
    }
    let mut clauses = Vec::with_capacity(filters.len());
    let mut values = Vec::new();
    let mut next = start;
    for (column, value) in filters {
        let column = validate_identifier(column)?;
        if matches!(value, SqlValue::Null) {
            clauses.push(format!("{column} IS NULL"));
        } else {
            clauses.push(format!("{column} = ${next}"));
            values.push(value.clone());
            next += 1;
        }
    }
    Ok((format!(" WHERE {}", clauses.join(" AND ")), values))
}

fn parse_order_by(order_by: &str) -> Result<(String, &'static str)> {
    let mut parts = order_by.split_whitespace();
    let column = validate_identifier(parts.next().unwrap_or(""))?.to_string();
    let direction = match parts.next() {
        None => "ASC",
        Some(d) if d.eq_ignore_ascii_case("asc") => "ASC",
        Some(d) if d.eq_ignore_ascii_case("desc") => "DESC",
        Some(other) => bail!("invalid order direction: {other:?}"),
    };
    Ok((column, direction))
}

pub(crate) fn parse_embedding(value: &serde_json::Value) -> Option<Vec<f32>> {
    match value {
        serde_json::Value::Array(items) => items
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32))
            .collect(),
        serde_json::Value::String(raw) => serde_json::from_str::<Vec<f32>>(raw).ok(),
        _ => None,
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_validation_blocks_injection() {
        assert!(validate_identifier("module_instances").is_ok());
        assert!(validate_identifier("json_format_event_memory_chat").is_ok());
        assert!(validate_identifier("users; DROP TABLE users").is_err());
        assert!(validate_identifier("users--").is_err());
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn order_by_accepts_direction_suffix_only() {
        assert_eq!(parse_order_by("next_run_time").unwrap().1, "ASC");
        assert_eq!(parse_order_by("next_run_time desc").unwrap().1, "DESC");
        assert!(parse_order_by("next_run_time; --").is_err());
        assert!(parse_order_by("col USING x").is_err());
    }

    #[test]
    fn null_filters_become_is_null_without_placeholders() {
        let filters = [
            ("agent_id", SqlValue::from("agent_1")),
            ("user_id", SqlValue::Null),
            ("is_public", SqlValue::from(true)),
        ];
        let (clause, values) = build_where(&filters, 1).unwrap();
        assert_eq!(
            clause,
            " WHERE agent_id = $1 AND user_id IS NULL AND is_public = $2"
        );
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn embedding_parses_from_array_or_string() {
        let from_array = parse_embedding(&serde_json::json!([0.1, 0.2])).unwrap();
        assert_eq!(from_array.len(), 2);
        let from_string =
            parse_embedding(&serde_json::Value::String("[1.0, 0.0]".into())).unwrap();
        assert_eq!(from_string, vec![1.0, 0.0]);
        assert!(parse_embedding(&serde_json::Value::Bool(true)).is_none());
    }

    #[test]
    fn cosine_math_is_sane() {
        assert_eq!(dot(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(dot(&[1.0, 2.0], &[3.0, 4.0]), 11.0);
        assert!((norm(&[3.0, 4.0]) - 5.0).abs() < f32::EPSILON);
    }
}
