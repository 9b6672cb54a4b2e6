//! Orchestrator
//!
//! Runs the four stages in order, or any one of them. Each stage reads the
//! previous stage's files from disk, so a single stage can be re-run on its
//! own against an existing partition.

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{error, info, info_span, Instrument, Span};

use crate::analytics::{Analytics, AnalyticsManifest};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::extract::{record_count, Extractor};
use crate::http_client::HttpClient;
use crate::load::{LoadReport, Loader};
use crate::model::EntityKind;
use crate::source::JsonSource;
use crate::transform::Transformer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Extract,
    Transform,
    Load,
    Analytics,
}

impl Stage {
    /// Execution order of a full run
    pub const ALL: [Stage; 4] = [Stage::Extract, Stage::Transform, Stage::Load, Stage::Analytics];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Extract => "extract",
            Stage::Transform => "transform",
            Stage::Load => "load",
            Stage::Analytics => "analytics",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| PipelineError::UnknownStage(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Extracted {
    pub kind: EntityKind,
    pub success: bool,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractSummary {
    pub entities: Vec<Extracted>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transformed {
    pub kind: EntityKind,
    pub count: usize,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransformSummary {
    pub entities: Vec<Transformed>,
}

/// Result of one stage, tagged with the stage name when serialized
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "stage", rename_all = "lowercase")]
pub enum StageReport {
    Extract(ExtractSummary),
    Transform(TransformSummary),
    Load(LoadReport),
    Analytics(AnalyticsManifest),
}

impl StageReport {
    pub fn stage(&self) -> Stage {
        match self {
            StageReport::Extract(_) => Stage::Extract,
            StageReport::Transform(_) => Stage::Transform,
            StageReport::Load(_) => Stage::Load,
            StageReport::Analytics(_) => Stage::Analytics,
        }
    }
}

/// Timing and per-stage results of a full run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineRun {
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: f64,
    pub success: bool,
    pub stages: Vec<StageReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PipelineRun {
    fn started(start_time: DateTime<Utc>) -> Self {
        Self {
            start_time,
            end_time: None,
            duration_seconds: 0.0,
            success: false,
            stages: Vec::new(),
            failed_stage: None,
            error: None,
        }
    }

    fn finish(&mut self, failure: Option<(Stage, &PipelineError)>) {
        let end_time = Utc::now();
        self.duration_seconds = (end_time - self.start_time).num_milliseconds() as f64 / 1000.0;
        self.end_time = Some(end_time);
        self.success = failure.is_none();

        if let Some((stage, error)) = failure {
            self.failed_stage = Some(stage);
            self.error = Some(error.to_string());
        }
    }
}

/// A failed full run together with everything recorded before the failure
#[derive(Debug, Error)]
#[error("{error}")]
pub struct RunFailure {
    pub run: PipelineRun,
    pub error: PipelineError,
}

pub struct Pipeline {
    config: PipelineConfig,
    date: NaiveDate,
    extractor: Extractor,
    transformer: Transformer,
    loader: Loader,
    analytics: Analytics,
    span: Span,
}

impl Pipeline {
    /// Pipeline fetching over HTTP from `config.api`
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let client = HttpClient::new(&config.api)?;
        Ok(Self::with_source(config, Box::new(client)))
    }

    /// Pipeline fetching from an arbitrary source. Partitions default to
    /// today's local date.
    pub fn with_source(config: PipelineConfig, source: Box<dyn JsonSource>) -> Self {
        let span = info_span!(
            "pipeline",
            api_url = %config.api.base_url,
            db_path = %config.storage.db_path.display()
        );

        let extractor = Extractor::new(source, config.raw_dir())
            .with_span(info_span!(parent: &span, "extract"));
        let transformer = Transformer::new(config.raw_dir(), config.processed_dir())
            .with_span(info_span!(parent: &span, "transform"));
        let loader = Loader::new(&config.storage.db_path, config.processed_dir())
            .with_span(info_span!(parent: &span, "load"));
        let analytics = Analytics::new(&config.storage.db_path, &config.storage.reports_dir)
            .with_span(info_span!(parent: &span, "analytics"));

        Self {
            config,
            date: Local::now().date_naive(),
            extractor,
            transformer,
            loader,
            analytics,
            span,
        }
    }

    /// Read and write partitions for `date` instead of today
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = date;
        self
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn loader(&self) -> &Loader {
        &self.loader
    }

    pub async fn run_extract(&self) -> Result<ExtractSummary> {
        self.span.in_scope(|| info!("=== EXTRACT STAGE ==="));

        let api = &self.config.api;
        let mut summary = ExtractSummary::default();

        for kind in EntityKind::ALL {
            let endpoint = api.endpoint(kind);
            let data = self
                .extractor
                .extract_and_save(&endpoint.path, &endpoint.file_name, &[], self.date)
                .await?;

            summary.entities.push(Extracted {
                kind,
                success: true,
                count: record_count(&data),
            });
        }

        Ok(summary)
    }

    pub fn run_transform(&self) -> Result<TransformSummary> {
        self.span.in_scope(|| info!("=== TRANSFORM STAGE ==="));

        let api = &self.config.api;
        let created_at = Utc::now();
        let mut summary = TransformSummary::default();

        for kind in EntityKind::ALL {
            let raw_name = api.endpoint(kind).file_name;
            let rows = self.transformer.process_data(
                &raw_name,
                &kind.processed_file_name(),
                kind,
                self.date,
                created_at,
            )?;

            summary.entities.push(Transformed {
                kind,
                count: rows.len(),
                columns: kind.schema().column_names().into_iter().map(String::from).collect(),
            });
        }

        Ok(summary)
    }

    pub fn run_load(&self) -> Result<LoadReport> {
        self.span.in_scope(|| info!("=== LOAD STAGE ==="));

        let report = self.loader.load_all(self.date)?;

        self.span
            .in_scope(|| info!("Loaded {} records in total", report.total_records()));
        Ok(report)
    }

    pub fn run_analytics(&self) -> Result<AnalyticsManifest> {
        self.span.in_scope(|| info!("=== ANALYTICS STAGE ==="));
        self.analytics.run(Utc::now())
    }

    pub async fn run_stage(&self, stage: Stage) -> Result<StageReport> {
        match stage {
            Stage::Extract => self.run_extract().await.map(StageReport::Extract),
            Stage::Transform => self.run_transform().map(StageReport::Transform),
            Stage::Load => self.run_load().map(StageReport::Load),
            Stage::Analytics => self.run_analytics().map(StageReport::Analytics),
        }
    }

    /// Dispatch by name; unknown names are an `UnknownStage` error
    pub async fn run_stage_named(&self, name: &str) -> Result<StageReport> {
        let stage = name.parse::<Stage>()?;
        self.span
            .in_scope(|| info!("Running single stage: {}", stage));
        self.run_stage(stage).await
    }

    /// All stages in order, stopping at the first failure. The run record
    /// is returned either way.
    pub async fn run_full(&self) -> std::result::Result<PipelineRun, RunFailure> {
        let mut run = PipelineRun::started(Utc::now());
        self.span
            .in_scope(|| info!("Starting full pipeline run at {}", run.start_time));

        for stage in Stage::ALL {
            match self.run_stage(stage).instrument(self.span.clone()).await {
                Ok(report) => run.stages.push(report),
                Err(error) => {
                    run.finish(Some((stage, &error)));
                    self.span.in_scope(|| {
                        error!(
                            "Pipeline failed at {} stage after {:.2}s: {}",
                            stage, run.duration_seconds, error
                        )
                    });
                    return Err(RunFailure { run, error });
                }
            }
        }

        run.finish(None);
        self.span.in_scope(|| {
            info!(
                "Pipeline completed successfully in {:.2} seconds",
                run.duration_seconds
            )
        });
        Ok(run)
    }
}
