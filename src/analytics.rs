//! Analytics stage
//!
//! Runs the fixed aggregate queries over the relational store and writes the
//! report as one JSON document plus one CSV per non-empty result.

use chrono::{DateTime, Utc};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{error, info, info_span, Span};

use crate::error::{PipelineError, Result};
use crate::snapshot::{create_file, ensure_dir};
use crate::store::{self, QueryRows};

pub const USER_STATISTICS: &str = "
    SELECT COUNT(*)                                        AS total_users,
           COUNT(DISTINCT email_domain)                    AS unique_domains,
           COUNT(CASE WHEN has_coordinates = 1 THEN 1 END) AS users_with_coordinates,
           COUNT(CASE WHEN company_name != '' THEN 1 END)  AS users_with_company
    FROM users";

pub const POST_STATISTICS: &str = "
    SELECT COUNT(*)                AS total_posts,
           COUNT(DISTINCT user_id) AS unique_authors,
           AVG(title_length)       AS avg_title_length,
           AVG(body_length)        AS avg_body_length,
           AVG(word_count)         AS avg_word_count,
           MAX(body_length)        AS max_body_length,
           MIN(body_length)        AS min_body_length
    FROM posts";

pub const USER_POST_ACTIVITY: &str = "
    SELECT u.user_id,
           u.username,
           u.name,
           u.email_domain,
           COUNT(p.post_id)   AS post_count,
           AVG(p.word_count)  AS avg_post_length,
           MAX(p.body_length) AS max_post_length
    FROM users u
             LEFT JOIN posts p ON u.user_id = p.user_id
    GROUP BY u.user_id, u.username, u.name, u.email_domain
    ORDER BY post_count DESC, u.user_id ASC";

/// Report queries in execution order
pub const QUERIES: [(&str, &str); 3] = [
    ("user_statistics", USER_STATISTICS),
    ("post_statistics", POST_STATISTICS),
    ("user_post_activity", USER_POST_ACTIVITY),
];

const FILE_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// One query's slot in the report
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutcome {
    pub name: String,
    pub result: QueryRows,
    pub error: Option<String>,
}

impl QueryOutcome {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

impl Serialize for QueryOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        if let Some(error) = &self.error {
            map.serialize_entry("error", error)?;
        }
        map.serialize_entry("data", &self.result.rows)?;
        map.serialize_entry("record_count", &self.result.len())?;
        if self.error.is_none() {
            map.serialize_entry("columns", &self.result.columns)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub generated_at: String,
    pub database: String,
    #[serde(serialize_with = "serialize_outcomes")]
    pub analytics: Vec<QueryOutcome>,
}

impl Report {
    pub fn get(&self, name: &str) -> Option<&QueryOutcome> {
        self.analytics.iter().find(|o| o.name == name)
    }
}

/// Keyed by query name, in execution order
fn serialize_outcomes<S: Serializer>(
    outcomes: &[QueryOutcome],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_map(outcomes.iter().map(|o| (&o.name, o)))
}

/// Files produced by one analytics run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsManifest {
    pub json_report: PathBuf,
    pub csv_files: Vec<PathBuf>,
    pub queries_executed: Vec<String>,
    pub total_csv_files: usize,
}

pub struct Analytics {
    db_path: PathBuf,
    reports_dir: PathBuf,
    span: Span,
}

impl Analytics {
    pub fn new(db_path: impl Into<PathBuf>, reports_dir: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            reports_dir: reports_dir.into(),
            span: info_span!("analytics"),
        }
    }

    /// Record this component's events under `span`
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Execute `sql` against the store; any engine failure is a `Query` error
    pub fn run_query(&self, sql: &str, name: &str) -> Result<QueryRows> {
        let _entered = self.span.enter();

        let result = store::open_read_only(&self.db_path)
            .and_then(|conn| store::select(&conn, sql))
            .map_err(|e| {
                error!("Failed to execute query: {}, error: {}", name, e);
                PipelineError::query(name, e)
            })?;

        info!("Executed query: {}, received {} rows", name, result.len());
        Ok(result)
    }

    /// Run every report query; a failing query becomes an error entry
    pub fn generate_report(&self, at: DateTime<Utc>) -> Report {
        self.span.in_scope(|| info!("Generating report"));

        let analytics = QUERIES
            .iter()
            .map(|(name, sql)| match self.run_query(sql, name) {
                Ok(result) => QueryOutcome {
                    name: name.to_string(),
                    result,
                    error: None,
                },
                Err(e) => QueryOutcome {
                    name: name.to_string(),
                    result: QueryRows::default(),
                    error: Some(e.to_string()),
                },
            })
            .collect();

        Report {
            generated_at: at.to_rfc3339(),
            database: self.db_path.display().to_string(),
            analytics,
        }
    }

    /// One CSV per query that returned rows
    pub fn save_csv(&self, report: &Report, at: DateTime<Utc>) -> Result<Vec<PathBuf>> {
        let _entered = self.span.enter();
        ensure_dir(&self.reports_dir)?;

        let stamp = at.format(FILE_TIMESTAMP_FORMAT);
        let mut saved = Vec::new();

        for outcome in report.analytics.iter().filter(|o| !o.result.is_empty()) {
            let file_path = self.reports_dir.join(format!("{}_{}.csv", outcome.name, stamp));
            write_csv(&file_path, &outcome.result)?;

            info!("CSV saved: {:?}", file_path);
            saved.push(file_path);
        }

        Ok(saved)
    }

    /// The full report, error entries included
    pub fn save_json(&self, report: &Report, at: DateTime<Utc>) -> Result<PathBuf> {
        let _entered = self.span.enter();
        ensure_dir(&self.reports_dir)?;

        let file_path = self
            .reports_dir
            .join(format!("summary_report_{}.json", at.format(FILE_TIMESTAMP_FORMAT)));

        let file = create_file(&file_path)?;
        serde_json::to_writer_pretty(file, report)
            .map_err(|e| PipelineError::io(&file_path, e.into()))?;

        info!("JSON report saved: {:?}", file_path);
        Ok(file_path)
    }

    /// generate + save, stamped with `at`
    pub fn run(&self, at: DateTime<Utc>) -> Result<AnalyticsManifest> {
        self.span.in_scope(|| info!("Starting analytics run"));

        let report = self.generate_report(at);
        let csv_files = self.save_csv(&report, at)?;
        let json_report = self.save_json(&report, at)?;

        self.span.in_scope(|| {
            info!(
                "Analytics completed. Generated {} CSV files and 1 JSON report",
                csv_files.len()
            )
        });

        Ok(AnalyticsManifest {
            json_report,
            total_csv_files: csv_files.len(),
            csv_files,
            queries_executed: report.analytics.into_iter().map(|o| o.name).collect(),
        })
    }
}

fn write_csv(path: &Path, result: &QueryRows) -> Result<()> {
    let file = create_file(path)?;
    let mut writer = csv::Writer::from_writer(file);
    let to_io = |e: csv::Error| PipelineError::io(path, e.into());

    writer.write_record(&result.columns).map_err(to_io)?;
    for row in &result.rows {
        writer
            .write_record(result.columns.iter().map(|c| csv_field(row, c)))
            .map_err(to_io)?;
    }

    writer.flush().map_err(|e| PipelineError::io(path, e))
}

fn csv_field(row: &Map<String, Value>, column: &str) -> String {
    match row.get(column) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rusqlite::Connection;
    use serde_json::json;
    use tempfile::TempDir;

    use crate::schema::{POSTS, USERS};

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
    }

    fn seed(db_path: &Path, sql: &str) {
        let conn = Connection::open(db_path).unwrap();
        conn.execute_batch(&USERS.create_table_sql()).unwrap();
        conn.execute_batch(&POSTS.create_table_sql()).unwrap();
        conn.execute_batch(sql).unwrap();
    }

    const TWO_USERS: &str = "
        INSERT INTO users (user_id, username, name, email, company_name, email_domain, has_coordinates)
        VALUES (1, 'bob', 'Bob', 'bob@x.com', 'Acme', 'x.com', 1),
               (2, 'ann', 'Ann', 'ann@y.org', '', 'y.org', 0);
        INSERT INTO posts (post_id, user_id, title, body, title_length, body_length, word_count, post_category)
        VALUES (1, 1, 't', 'one two', 1, 7, 2, 'short'),
               (2, 1, 'tt', 'one two three four', 2, 18, 4, 'short');";

    #[test]
    fn test_report_queries() {
        let tmp = TempDir::new().unwrap();
        let db = tmp.path().join("local.db");
        seed(&db, TWO_USERS);
        let analytics = Analytics::new(&db, tmp.path().join("reports"));

        let report = analytics.generate_report(at());
        assert_eq!(report.analytics.len(), 3);
        assert!(report.analytics.iter().all(|o| !o.is_error()));

        let users = &report.get("user_statistics").unwrap().result;
        assert_eq!(
            Value::Object(users.rows[0].clone()),
            json!({"total_users": 2, "unique_domains": 2, "users_with_coordinates": 1, "users_with_company": 1})
        );

        let posts = &report.get("post_statistics").unwrap().result;
        assert_eq!(posts.rows[0]["total_posts"], json!(2));
        assert_eq!(posts.rows[0]["unique_authors"], json!(1));
        assert_eq!(posts.rows[0]["avg_word_count"], json!(3.0));
        assert_eq!(posts.rows[0]["max_body_length"], json!(18));
        assert_eq!(posts.rows[0]["min_body_length"], json!(7));
    }

    #[test]
    fn test_zero_post_user_still_listed() {
        let tmp = TempDir::new().unwrap();
        let db = tmp.path().join("local.db");
        seed(&db, TWO_USERS);
        let analytics = Analytics::new(&db, tmp.path());

        let activity = analytics.run_query(USER_POST_ACTIVITY, "user_post_activity").unwrap();

        assert_eq!(
            activity.columns,
            vec!["user_id", "username", "name", "email_domain", "post_count", "avg_post_length", "max_post_length"]
        );
        assert_eq!(activity.len(), 2);
        assert_eq!(activity.rows[0]["user_id"], json!(1));
        assert_eq!(activity.rows[0]["post_count"], json!(2));
        assert_eq!(activity.rows[1]["user_id"], json!(2));
        assert_eq!(activity.rows[1]["post_count"], json!(0));
        assert_eq!(activity.rows[1]["avg_post_length"], Value::Null);
        assert_eq!(activity.rows[1]["max_post_length"], Value::Null);
    }

    #[test]
    fn test_ties_ordered_by_user_id() {
        let tmp = TempDir::new().unwrap();
        let db = tmp.path().join("local.db");
        seed(
            &db,
            "INSERT INTO users (user_id, username, name, email) VALUES (3, 'c', 'C', ''), (1, 'a', 'A', ''), (2, 'b', 'B', '');",
        );

        let activity = Analytics::new(&db, tmp.path())
            .run_query(USER_POST_ACTIVITY, "user_post_activity")
            .unwrap();
        let ids: Vec<&Value> = activity.rows.iter().map(|r| &r["user_id"]).collect();
        assert_eq!(ids, vec![&json!(1), &json!(2), &json!(3)]);
    }

    #[test]
    fn test_failing_query_becomes_error_entry() {
        let tmp = TempDir::new().unwrap();
        let db = tmp.path().join("local.db");
        // Only the users table exists
        let conn = Connection::open(&db).unwrap();
        conn.execute_batch(&USERS.create_table_sql()).unwrap();
        drop(conn);

        let report = Analytics::new(&db, tmp.path()).generate_report(at());

        assert!(!report.get("user_statistics").unwrap().is_error());
        let posts = report.get("post_statistics").unwrap();
        assert!(posts.error.as_deref().unwrap().contains("no such table: posts"));
        assert!(report.get("user_post_activity").unwrap().is_error());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(
            json["analytics"]["post_statistics"],
            json!({"error": posts.error.clone().unwrap(), "data": [], "record_count": 0})
        );
        assert_eq!(json["analytics"]["user_statistics"]["columns"][0], json!("total_users"));
    }

    #[test]
    fn test_run_query_malformed_sql() {
        let tmp = TempDir::new().unwrap();
        let db = tmp.path().join("local.db");
        seed(&db, "");

        let err = Analytics::new(&db, tmp.path())
            .run_query("SELECT nope FROM", "broken")
            .unwrap_err();
        assert!(matches!(err, PipelineError::Query { ref name, .. } if name == "broken"));
    }

    #[test]
    fn test_run_writes_reports() {
        let tmp = TempDir::new().unwrap();
        let db = tmp.path().join("local.db");
        seed(&db, TWO_USERS);
        let reports = tmp.path().join("reports");

        let manifest = Analytics::new(&db, &reports).run(at()).unwrap();

        assert_eq!(manifest.json_report, reports.join("summary_report_20240102_030405.json"));
        assert_eq!(manifest.total_csv_files, 3);
        assert_eq!(
            manifest.queries_executed,
            vec!["user_statistics", "post_statistics", "user_post_activity"]
        );
        assert!(manifest.csv_files.contains(&reports.join("user_post_activity_20240102_030405.csv")));

        let saved: Value =
            serde_json::from_str(&std::fs::read_to_string(&manifest.json_report).unwrap()).unwrap();
        let keys: Vec<&String> = saved["analytics"].as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["user_statistics", "post_statistics", "user_post_activity"]);
        assert_eq!(saved["analytics"]["user_post_activity"]["record_count"], json!(2));

        let csv = std::fs::read_to_string(reports.join("user_post_activity_20240102_030405.csv")).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(
            lines[0],
            "user_id,username,name,email_domain,post_count,avg_post_length,max_post_length"
        );
        assert_eq!(lines[1], "1,bob,Bob,x.com,2,3.0,18");
        assert_eq!(lines[2], "2,ann,Ann,y.org,0,,");
    }

    #[test]
    fn test_empty_result_writes_no_csv() {
        let tmp = TempDir::new().unwrap();
        let db = tmp.path().join("local.db");
        seed(&db, "");
        let reports = tmp.path().join("reports");

        let manifest = Analytics::new(&db, &reports).run(at()).unwrap();

        // The two COUNT(*) queries always return one row; activity is empty
        assert_eq!(manifest.total_csv_files, 2);
        assert!(!reports.join("user_post_activity_20240102_030405.csv").exists());
        assert!(manifest.json_report.exists());
    }
}
