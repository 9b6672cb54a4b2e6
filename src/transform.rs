//! Transformation stage
//!
//! Reads a raw snapshot, normalizes every record according to its entity kind
//! and writes the result as a processed Parquet snapshot. Records are
//! normalized independently, so the per-record work runs on rayon; the output
//! keeps the raw order.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rayon::prelude::*;
use serde_json::{Map, Value};
use std::path::PathBuf;
use tracing::{info, info_span, Span};

use crate::error::{PipelineError, Result};
use crate::model::{to_rows, DataRow, EntityKind, PostCategory, PostRecord, UserRecord};
use crate::parquet_writer::ParquetWriter;
use crate::snapshot::{ensure_dir, partition_dir, read_json};

pub struct Transformer {
    raw_dir: PathBuf,
    processed_dir: PathBuf,
    span: Span,
}

impl Transformer {
    pub fn new(raw_dir: impl Into<PathBuf>, processed_dir: impl Into<PathBuf>) -> Self {
        Self {
            raw_dir: raw_dir.into(),
            processed_dir: processed_dir.into(),
            span: info_span!("transform"),
        }
    }

    /// Record this component's events under `span`
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Load a raw snapshot from the partition for `date`
    pub fn load_raw(&self, name: &str, date: NaiveDate) -> Result<Value> {
        let _entered = self.span.enter();

        let file_path = partition_dir(&self.raw_dir, date).join(name);
        let data = read_json(&file_path)?;

        info!("Loaded raw data from {:?}", file_path);
        Ok(data)
    }

    /// Normalize raw users; `created_at` is stamped on every row
    pub fn transform_users(&self, raw: &Value, created_at: DateTime<Utc>) -> Result<Vec<UserRecord>> {
        let _entered = self.span.enter();

        let items = as_records(raw, EntityKind::Users)?;
        let stamp = format_timestamp(created_at);
        let users = items
            .par_iter()
            .enumerate()
            .map(|(idx, item)| normalize_user(idx, item, &stamp))
            .collect::<Result<Vec<_>>>()?;

        info!("Transformed {} users", users.len());
        Ok(users)
    }

    /// Normalize raw posts; `created_at` is stamped on every row
    pub fn transform_posts(&self, raw: &Value, created_at: DateTime<Utc>) -> Result<Vec<PostRecord>> {
        let _entered = self.span.enter();

        let items = as_records(raw, EntityKind::Posts)?;
        let stamp = format_timestamp(created_at);
        let posts = items
            .par_iter()
            .enumerate()
            .map(|(idx, item)| normalize_post(idx, item, &stamp))
            .collect::<Result<Vec<_>>>()?;

        info!("Transformed {} posts", posts.len());
        Ok(posts)
    }

    /// Write rows of `kind` to the processed partition for `date`
    pub fn save_processed(
        &self,
        rows: &[DataRow],
        kind: EntityKind,
        name: &str,
        date: NaiveDate,
    ) -> Result<PathBuf> {
        let _entered = self.span.enter();

        let dir = partition_dir(&self.processed_dir, date);
        ensure_dir(&dir)?;

        let file_path = dir.join(name);
        ParquetWriter::new(kind.schema()).write(&file_path, rows)?;

        info!("Saved {} {} rows to {:?}", rows.len(), kind, file_path);
        Ok(file_path)
    }

    /// Load -> transform(kind) -> save. Raw and processed partitions both use
    /// `date`; rows are stamped with `created_at`.
    pub fn process_data(
        &self,
        raw_name: &str,
        processed_name: &str,
        kind: EntityKind,
        date: NaiveDate,
        created_at: DateTime<Utc>,
    ) -> Result<Vec<DataRow>> {
        let raw = self.load_raw(raw_name, date)?;

        let rows = match kind {
            EntityKind::Users => to_rows(&self.transform_users(&raw, created_at)?)?,
            EntityKind::Posts => to_rows(&self.transform_posts(&raw, created_at)?)?,
        };

        self.save_processed(&rows, kind, processed_name, date)?;
        Ok(rows)
    }
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, false)
}

fn as_records(raw: &Value, kind: EntityKind) -> Result<&Vec<Value>> {
    raw.as_array().ok_or_else(|| {
        PipelineError::Validation(format!("raw {} must be a JSON array", kind))
    })
}

fn as_object<'a>(idx: usize, item: &'a Value) -> Result<&'a Map<String, Value>> {
    item.as_object().ok_or_else(|| {
        PipelineError::Validation(format!("record {} is not a JSON object", idx))
    })
}

/// Integer identifier; numeric strings are accepted
fn id_field(idx: usize, obj: &Map<String, Value>, key: &str) -> Result<i64> {
    let id = match obj.get(key) {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    id.ok_or_else(|| {
        PipelineError::Validation(format!("record {} has no integer '{}'", idx, key))
    })
}

/// String field; absent or null becomes empty
fn str_field(obj: Option<&Map<String, Value>>, key: &str) -> String {
    match obj.and_then(|o| o.get(key)) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn coordinate(value: Option<&Value>) -> Option<f64> {
    let parsed = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|f| f.is_finite())
}

/// Everything after the first '@'; empty when there is none
pub fn email_domain(email: &str) -> String {
    email
        .split_once('@')
        .map(|(_, domain)| domain.to_string())
        .unwrap_or_default()
}

fn normalize_user(idx: usize, item: &Value, created_at: &str) -> Result<UserRecord> {
    let obj = as_object(idx, item)?;
    let address = obj.get("address").and_then(Value::as_object);
    let geo = address.and_then(|a| a.get("geo")).and_then(Value::as_object);
    let company = obj.get("company").and_then(Value::as_object);

    let email = str_field(Some(obj), "email").to_lowercase();
    let lat = coordinate(geo.and_then(|g| g.get("lat")));
    let lng = coordinate(geo.and_then(|g| g.get("lng")));

    Ok(UserRecord {
        user_id: id_field(idx, obj, "id")?,
        username: str_field(Some(obj), "username"),
        name: str_field(Some(obj), "name"),
        email_domain: email_domain(&email),
        email,
        phone: str_field(Some(obj), "phone"),
        website: str_field(Some(obj), "website"),
        city: str_field(address, "city"),
        zipcode: str_field(address, "zipcode"),
        has_coordinates: lat.is_some() && lng.is_some(),
        lat,
        lng,
        company_name: str_field(company, "name"),
        company_catchphrase: str_field(company, "catchPhrase"),
        created_at: created_at.to_string(),
    })
}

fn normalize_post(idx: usize, item: &Value, created_at: &str) -> Result<PostRecord> {
    let obj = as_object(idx, item)?;

    let title = str_field(Some(obj), "title").trim().to_string();
    let body = str_field(Some(obj), "body").trim().to_string();
    let title_length = title.chars().count();
    let body_length = body.chars().count();
    let word_count = body.split_whitespace().count();

    Ok(PostRecord {
        post_id: id_field(idx, obj, "id")?,
        user_id: id_field(idx, obj, "userId")?,
        title_length: title_length as i64,
        body_length: body_length as i64,
        word_count: word_count as i64,
        post_category: PostCategory::from_body_length(body_length),
        title,
        body,
        created_at: created_at.to_string(),
    })
}
