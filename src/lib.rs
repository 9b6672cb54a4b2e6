//! JSON ETL Pipeline Library
//!
//! This library pulls JSON collections (users and posts) from a REST API,
//! normalizes them into typed rows stored as Parquet snapshots, loads the
//! snapshots into SQLite and produces aggregate reports as JSON and CSV.
//!
//! Stages:
//! - Extract: Extractor
//! - Transform: Transformer
//! - Load: Loader
//! - Analytics: Analytics
//!
//! The Pipeline runs them in order or one at a time.

pub mod error;
pub mod config;
pub mod logging;
pub mod schema;
pub mod model;
pub mod snapshot;
pub mod parquet_writer;
pub mod source;
pub mod http_client;
pub mod store;
pub mod extract;
pub mod transform;
pub mod load;
pub mod analytics;
pub mod pipeline;

// Re-export commonly used types
pub use error::{PipelineError, Result};
pub use config::{ApiConfig, Endpoint, EndpointConfig, LoggingConfig, PipelineConfig, StorageConfig};
pub use schema::{ColumnSpec, ColumnType, TableSchema};
pub use model::{DataRow, EntityKind, PostCategory, PostRecord, UserRecord};
pub use parquet_writer::ParquetWriter;
pub use source::JsonSource;
pub use http_client::HttpClient;
pub use store::QueryRows;
pub use extract::Extractor;
pub use transform::Transformer;
pub use load::{LoadReport, Loader, TableLoad};
pub use analytics::{Analytics, AnalyticsManifest, Report};
pub use pipeline::{Pipeline, PipelineRun, RunFailure, Stage, StageReport};
