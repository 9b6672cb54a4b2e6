//! Extraction stage
//!
//! Fetches JSON collections from the upstream API and stores them verbatim as
//! raw snapshots under `{raw_dir}/{YYYY-MM-DD}/`.

use chrono::NaiveDate;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{info, info_span, Instrument, Span};

use crate::error::Result;
use crate::snapshot::{ensure_dir, partition_dir, write_json};
use crate::source::{JsonSource, QueryParams};

pub struct Extractor {
    source: Box<dyn JsonSource>,
    raw_dir: PathBuf,
    span: Span,
}

impl Extractor {
    pub fn new(source: Box<dyn JsonSource>, raw_dir: impl Into<PathBuf>) -> Self {
        Self {
            source,
            raw_dir: raw_dir.into(),
            span: info_span!("extract"),
        }
    }

    /// Record this component's events under `span`
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn raw_dir(&self) -> &Path {
        &self.raw_dir
    }

    /// Fetch one endpoint; failures propagate immediately
    pub async fn fetch(&self, endpoint: &str, params: &QueryParams) -> Result<Value> {
        self.source
            .fetch_json(endpoint, params)
            .instrument(self.span.clone())
            .await
    }

    /// Write `data` into the raw partition for `date` (created if needed)
    pub fn save_raw(&self, data: &Value, name: &str, date: NaiveDate) -> Result<PathBuf> {
        let _entered = self.span.enter();

        let dir = partition_dir(&self.raw_dir, date);
        ensure_dir(&dir)?;

        let file_path = dir.join(name);
        write_json(&file_path, data)?;

        info!("Saved raw data to {:?}", file_path);
        Ok(file_path)
    }

    /// Full cycle: fetch and save, returning the fetched document
    pub async fn extract_and_save(
        &self,
        endpoint: &str,
        name: &str,
        params: &QueryParams,
        date: NaiveDate,
    ) -> Result<Value> {
        let data = self.fetch(endpoint, params).await?;
        self.save_raw(&data, name, date)?;

        self.span.in_scope(|| {
            info!(
                "Extracted data to {} from {} ({})",
                name,
                endpoint,
                self.source.describe()
            )
        });
        Ok(data)
    }
}

/// Number of records in a fetched collection (1 for a lone object)
pub fn record_count(data: &Value) -> usize {
    match data {
        Value::Array(items) => items.len(),
        Value::Null => 0,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::snapshot::read_json;
    use crate::source::testing::StaticSource;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 17).unwrap()
    }

    #[tokio::test]
    async fn test_extract_and_save_writes_dated_snapshot() {
        let tmp = TempDir::new().unwrap();
        let users = json!([{"id": 1, "username": "bob"}, {"id": 2, "username": "ann"}]);
        let source = StaticSource::default().with("/users", users.clone());
        let extractor = Extractor::new(Box::new(source), tmp.path().join("raw"));

        let data = extractor
            .extract_and_save("/users", "users.json", &[], date())
            .await
            .unwrap();

        assert_eq!(data, users);
        assert_eq!(record_count(&data), 2);
        let path = tmp.path().join("raw/2024-05-17/users.json");
        assert_eq!(read_json(&path).unwrap(), users);
    }

    #[tokio::test]
    async fn test_fetch_passes_params() {
        let tmp = TempDir::new().unwrap();
        let source = Arc::new(StaticSource::default().with("/posts", json!([])));
        let extractor = Extractor::new(Box::new(Arc::clone(&source)), tmp.path());

        let params = vec![("userId".to_string(), "1".to_string())];
        extractor.fetch("/posts", &params).await.unwrap();

        let requests = source.requests.lock().unwrap();
        assert_eq!(requests.as_slice(), &[("/posts".to_string(), params.clone())]);
    }

    #[tokio::test]
    async fn test_transport_error_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let extractor = Extractor::new(Box::new(StaticSource::default()), tmp.path().join("raw"));

        let err = extractor
            .extract_and_save("/users", "users.json", &[], date())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Transport { .. }));
        assert!(!tmp.path().join("raw/2024-05-17/users.json").exists());
    }

    #[test]
    fn test_save_raw_to_unwritable_location_is_io_error() {
        let tmp = TempDir::new().unwrap();
        // A regular file where the raw directory should be
        let blocker = tmp.path().join("raw");
        std::fs::write(&blocker, "x").unwrap();
        let extractor = Extractor::new(Box::new(StaticSource::default()), &blocker);

        let err = extractor.save_raw(&json!([]), "users.json", date()).unwrap_err();
        assert!(matches!(err, PipelineError::Io { .. }));
    }
}
