//! Load stage
//!
//! Reads processed snapshots, cleans them against the table schema and fully
//! replaces the matching SQLite tables. Each operation opens its own
//! connection.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::{params_from_iter, Connection};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{error, info, info_span, warn, Span};

use crate::error::{PipelineError, Result};
use crate::model::{DataRow, EntityKind};
use crate::parquet_writer::read_parquet_rows;
use crate::schema::{quote_identifier, ColumnType, TableSchema, TABLES};
use crate::snapshot::{ensure_dir, partition_dir};
use crate::store::{self, QueryRows};

/// How timestamps are written to DATETIME columns
pub const STORE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Outcome of loading one table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableLoad {
    pub table: String,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadReport {
    pub tables: Vec<TableLoad>,
}

impl LoadReport {
    /// Rows loaded across tables that did not report an error
    pub fn total_records(&self) -> usize {
        self.tables
            .iter()
            .filter(|t| t.error.is_none())
            .map(|t| t.count)
            .sum()
    }

    pub fn get(&self, table: &str) -> Option<&TableLoad> {
        self.tables.iter().find(|t| t.table == table)
    }
}

pub struct Loader {
    db_path: PathBuf,
    processed_dir: PathBuf,
    span: Span,
}

impl Loader {
    pub fn new(db_path: impl Into<PathBuf>, processed_dir: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            processed_dir: processed_dir.into(),
            span: info_span!("load"),
        }
    }

    /// Record this component's events under `span`
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    fn connect(&self) -> Result<Connection> {
        if let Some(parent) = self.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                ensure_dir(parent)?;
            }
        }

        store::open(&self.db_path).map_err(|e| {
            PipelineError::storage(format!("cannot open {}: {}", self.db_path.display(), e))
        })
    }

    /// Ensure both tables exist; existing tables are left untouched
    pub fn create_schema(&self) -> Result<()> {
        let _entered = self.span.enter();
        info!("Creating tables...");

        let conn = self.connect()?;
        for table in TABLES {
            conn.execute_batch(&table.create_table_sql())
                .map_err(|e| PipelineError::storage(format!("create {}: {}", table.name, e)))?;
        }

        info!("Tables created successfully");
        Ok(())
    }

    /// Read the processed snapshot of `kind` from the partition for `date`
    pub fn load_processed(&self, name: &str, kind: EntityKind, date: NaiveDate) -> Result<Vec<DataRow>> {
        let _entered = self.span.enter();

        let file_path = partition_dir(&self.processed_dir, date).join(name);
        let rows = read_parquet_rows(&file_path, &kind.schema())?;

        info!("Loaded {} records from: {:?}", rows.len(), file_path);
        Ok(rows)
    }

    /// Truncate text to the declared lengths and coerce timestamps.
    /// Never adds or drops rows.
    pub fn clean_for_storage(rows: Vec<DataRow>, kind: EntityKind) -> Vec<DataRow> {
        let schema = kind.schema();

        rows.into_iter()
            .map(|mut row| {
                for column in schema.columns {
                    let Some(value) = row.get_mut(column.name) else {
                        continue;
                    };

                    match (column.column_type, column.max_len) {
                        (ColumnType::Text, Some(max_len)) => {
                            if let Value::String(s) = value {
                                truncate_chars(s, max_len);
                            }
                        }
                        (ColumnType::Timestamp, _) => {
                            *value = coerce_timestamp(value)
                                .map(|ts| Value::String(ts.format(STORE_TIMESTAMP_FORMAT).to_string()))
                                .unwrap_or(Value::Null);
                        }
                        _ => {}
                    }
                }
                row
            })
            .collect()
    }

    /// Replace the contents of `table_name` with `rows` in one transaction.
    /// Returns the number of rows inserted.
    pub fn load_table(&self, rows: &[DataRow], table_name: &str) -> Result<usize> {
        let _entered = self.span.enter();

        let table = TableSchema::find(table_name).ok_or_else(|| {
            PipelineError::Validation(format!("unknown table '{}'", table_name))
        })?;

        let mut conn = self.connect()?;
        let inserted = replace_table(&mut conn, &table, rows).map_err(|e| {
            error!("Failed to insert {}: {}", table_name, e);
            PipelineError::storage(format!("failed to insert {}: {}", table_name, e))
        })?;

        info!("Inserted {} rows into table {}", inserted, table_name);
        Ok(inserted)
    }

    /// Committed row count of a table
    pub fn verify(&self, table_name: &str) -> Result<usize> {
        let _entered = self.span.enter();

        let conn = self.connect()?;
        let sql = format!("SELECT COUNT(*) FROM {}", quote_identifier(table_name));
        let count: i64 = conn
            .query_row(&sql, [], |row| row.get(0))
            .map_err(|e| PipelineError::storage(format!("count {}: {}", table_name, e)))?;

        info!("Table {} contains {} rows", table_name, count);
        Ok(count.max(0) as usize)
    }

    /// Row count of every table present in the store
    pub fn table_info(&self) -> Result<BTreeMap<String, usize>> {
        let names = {
            let conn = self.connect()?;
            let result = store::select(
                &conn,
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )
            .map_err(PipelineError::storage)?;

            result
                .rows
                .into_iter()
                .filter_map(|row| row.get("name").and_then(Value::as_str).map(String::from))
                .collect::<Vec<_>>()
        };

        let mut info = BTreeMap::new();
        for name in names {
            let count = self.verify(&name)?;
            info.insert(name, count);
        }
        Ok(info)
    }

    /// Run an ad-hoc read query against the store
    pub fn execute_query(&self, sql: &str) -> Result<QueryRows> {
        let _entered = self.span.enter();

        let conn = self.connect()?;
        let result = store::select(&conn, sql).map_err(|e| {
            warn!("Error while executing query: {}", e);
            PipelineError::query("ad-hoc", e)
        })?;

        info!("Query executed, got {} rows", result.len());
        Ok(result)
    }

    /// Load users then posts from the processed partition for `date`.
    /// A missing snapshot for one kind yields a zero-count entry and leaves
    /// that kind's table from the previous load untouched; any other failure
    /// aborts.
    pub fn load_all(&self, date: NaiveDate) -> Result<LoadReport> {
        self.create_schema()?;

        let mut report = LoadReport::default();
        for kind in EntityKind::ALL {
            let table = kind.schema().name;

            match self.load_kind(kind, date) {
                Ok(count) => report.tables.push(TableLoad {
                    table: table.to_string(),
                    count,
                    error: None,
                }),
                Err(e) if e.is_not_found() => {
                    self.span.in_scope(|| warn!("{} file not found: {}", kind, e));
                    report.tables.push(TableLoad {
                        table: table.to_string(),
                        count: 0,
                        error: Some(e.to_string()),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        self.span.in_scope(|| info!("All tables loaded"));
        Ok(report)
    }

    fn load_kind(&self, kind: EntityKind, date: NaiveDate) -> Result<usize> {
        let rows = self.load_processed(&kind.processed_file_name(), kind, date)?;
        let rows = Self::clean_for_storage(rows, kind);
        self.load_table(&rows, kind.schema().name)?;
        self.verify(kind.schema().name)
    }
}

fn replace_table(conn: &mut Connection, table: &TableSchema, rows: &[DataRow]) -> rusqlite::Result<usize> {
    let tx = conn.transaction()?;
    tx.execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_identifier(table.name)))?;
    tx.execute_batch(&table.create_table_sql())?;

    {
        let mut stmt = tx.prepare(&table.insert_sql())?;
        for row in rows {
            let values = table
                .columns
                .iter()
                .map(|c| store::to_sql(row.get(c.name).unwrap_or(&Value::Null)));
            stmt.execute(params_from_iter(values))?;
        }
    }

    tx.commit()?;
    Ok(rows.len())
}

/// Keep at most `max_len` characters
fn truncate_chars(s: &mut String, max_len: usize) {
    if let Some((byte_idx, _)) = s.char_indices().nth(max_len) {
        s.truncate(byte_idx);
    }
}

/// Parse the timestamp shapes the pipeline may see; anything else is None
pub fn coerce_timestamp(value: &Value) -> Option<NaiveDateTime> {
    let s = value.as_str()?.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc).naive_utc());
    }

    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt);
        }
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parquet_writer::ParquetWriter;
    use crate::schema::{POSTS, USERS};
    use serde_json::json;
    use tempfile::TempDir;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
    }

    fn loader(tmp: &TempDir) -> Loader {
        Loader::new(tmp.path().join("local.db"), tmp.path().join("processed"))
    }

    fn row(value: Value) -> DataRow {
        value.as_object().unwrap().clone().into_iter().collect()
    }

    fn user_row(id: i64, username: &str) -> DataRow {
        row(json!({
            "user_id": id,
            "username": username,
            "name": format!("User {}", id),
            "email": format!("{}@x.com", username),
            "phone": "",
            "website": "",
            "city": "",
            "zipcode": "",
            "lat": null,
            "lng": null,
            "company_name": "",
            "company_catchphrase": "",
            "email_domain": "x.com",
            "has_coordinates": false,
            "created_at": "2024-01-02T03:04:05.000000+00:00"
        }))
    }

    fn post_row(id: i64, user_id: i64) -> DataRow {
        row(json!({
            "post_id": id,
            "user_id": user_id,
            "title": "t",
            "body": "b",
            "title_length": 1,
            "body_length": 1,
            "word_count": 1,
            "post_category": "short",
            "created_at": "2024-01-02T03:04:05.000000+00:00"
        }))
    }

    fn write_snapshot(tmp: &TempDir, schema: TableSchema, rows: &[DataRow]) {
        let path = tmp
            .path()
            .join("processed/2024-01-02")
            .join(format!("{}.parquet", schema.name));
        ParquetWriter::new(schema).write(&path, rows).unwrap();
    }

    #[test]
    fn test_create_schema_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let l = loader(&tmp);

        l.create_schema().unwrap();
        l.create_schema().unwrap();

        let info = l.table_info().unwrap();
        assert_eq!(info.get("users"), Some(&0));
        assert_eq!(info.get("posts"), Some(&0));
    }

    #[test]
    fn test_truncation_keeps_rows_and_short_fields() {
        let long_name = "n".repeat(150);
        let mut r = user_row(1, &"u".repeat(120));
        r.insert("city".to_string(), json!("Gwenborough"));
        r.insert("company_catchphrase".to_string(), json!("c".repeat(1000)));
        r.insert("zipcode".to_string(), json!("ä".repeat(25)));
        let rows = vec![r, user_row(2, &long_name[..10])];

        let cleaned = Loader::clean_for_storage(rows, EntityKind::Users);

        assert_eq!(cleaned.len(), 2);
        assert_eq!(cleaned[0]["username"].as_str().unwrap().chars().count(), 100);
        assert_eq!(cleaned[0]["city"], json!("Gwenborough"));
        // Unlimited text column
        assert_eq!(cleaned[0]["company_catchphrase"].as_str().unwrap().len(), 1000);
        assert_eq!(cleaned[0]["zipcode"], json!("ä".repeat(20)));
        assert_eq!(cleaned[1]["username"], json!("nnnnnnnnnn"));
    }

    #[test]
    fn test_created_at_coercion() {
        let mut good = post_row(1, 1);
        good.insert("created_at".to_string(), json!("2024-01-02T03:04:05.123456+02:00"));
        let mut naive = post_row(2, 1);
        naive.insert("created_at".to_string(), json!("2024-01-02 03:04:05"));
        let mut bad = post_row(3, 1);
        bad.insert("created_at".to_string(), json!("yesterday"));

        let cleaned = Loader::clean_for_storage(vec![good, naive, bad], EntityKind::Posts);

        assert_eq!(cleaned.len(), 3);
        assert_eq!(cleaned[0]["created_at"], json!("2024-01-02 01:04:05.123456"));
        assert_eq!(cleaned[1]["created_at"], json!("2024-01-02 03:04:05.000000"));
        assert_eq!(cleaned[2]["created_at"], Value::Null);
    }

    #[test]
    fn test_load_table_replaces_contents() {
        let tmp = TempDir::new().unwrap();
        let l = loader(&tmp);
        let rows: Vec<DataRow> = (1..=3).map(|i| post_row(i, 1)).collect();

        assert_eq!(l.load_table(&rows, "posts").unwrap(), 3);
        assert_eq!(l.load_table(&rows, "posts").unwrap(), 3);
        assert_eq!(l.verify("posts").unwrap(), 3);

        assert_eq!(l.load_table(&rows[..1], "posts").unwrap(), 1);
        assert_eq!(l.verify("posts").unwrap(), 1);
    }

    #[test]
    fn test_load_table_storage_failure_propagates() {
        let tmp = TempDir::new().unwrap();
        let l = loader(&tmp);
        let mut broken = post_row(1, 1);
        broken.insert("title".to_string(), Value::Null);

        let err = l.load_table(&[broken], "posts").unwrap_err();
        assert!(matches!(err, PipelineError::Storage(_)));

        let err = l.load_table(&[], "comments").unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[test]
    fn test_verify_missing_table_is_storage_error() {
        let tmp = TempDir::new().unwrap();
        let err = loader(&tmp).verify("users").unwrap_err();
        assert!(matches!(err, PipelineError::Storage(_)));
    }

    #[test]
    fn test_load_all_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let l = loader(&tmp);
        write_snapshot(&tmp, USERS, &[user_row(1, "a"), user_row(2, "b")]);
        write_snapshot(&tmp, POSTS, &[post_row(1, 1), post_row(2, 1), post_row(3, 2)]);

        let first = l.load_all(date()).unwrap();
        let second = l.load_all(date()).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.get("users").unwrap().count, 2);
        assert_eq!(first.get("posts").unwrap().count, 3);
        assert_eq!(first.total_records(), 5);

        let stored = l
            .execute_query("SELECT created_at, has_coordinates FROM users ORDER BY user_id")
            .unwrap();
        assert_eq!(stored.rows[0]["created_at"], json!("2024-01-02 03:04:05.000000"));
        assert_eq!(stored.rows[0]["has_coordinates"], json!(0));
    }

    #[test]
    fn test_load_all_tolerates_one_missing_snapshot() {
        let tmp = TempDir::new().unwrap();
        let l = loader(&tmp);
        write_snapshot(&tmp, USERS, &[user_row(1, "a")]);

        let report = l.load_all(date()).unwrap();

        let users = report.get("users").unwrap();
        assert_eq!((users.count, users.error.is_none()), (1, true));
        let posts = report.get("posts").unwrap();
        assert_eq!(posts.count, 0);
        assert!(posts.error.as_deref().unwrap().contains("posts.parquet"));
        assert_eq!(report.total_records(), 1);
    }

    #[test]
    fn test_load_all_missing_snapshot_keeps_previous_table() {
        let tmp = TempDir::new().unwrap();
        let l = loader(&tmp);
        write_snapshot(&tmp, USERS, &[user_row(1, "a")]);
        write_snapshot(&tmp, POSTS, &[post_row(1, 1), post_row(2, 1)]);
        l.load_all(date()).unwrap();

        std::fs::remove_file(tmp.path().join("processed/2024-01-02/posts.parquet")).unwrap();
        let report = l.load_all(date()).unwrap();

        assert_eq!(report.get("posts").unwrap().count, 0);
        assert_eq!(l.verify("posts").unwrap(), 2);
    }

    #[test]
    fn test_load_all_storage_failure_aborts() {
        let tmp = TempDir::new().unwrap();
        // A directory where the database file should be
        let db_dir = tmp.path().join("local.db");
        std::fs::create_dir(&db_dir).unwrap();
        let l = Loader::new(&db_dir, tmp.path().join("processed"));

        let err = l.load_all(date()).unwrap_err();
        assert!(matches!(err, PipelineError::Storage(_)));
    }

    #[test]
    fn test_execute_query_malformed_sql() {
        let tmp = TempDir::new().unwrap();
        let err = loader(&tmp).execute_query("SELECT FROM WHERE").unwrap_err();
        assert!(matches!(err, PipelineError::Query { .. }));
    }
}
