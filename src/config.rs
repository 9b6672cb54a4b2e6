//! Configuration module for the ETL pipeline
//!
//! This module defines the configuration structure for the upstream API,
//! the on-disk layout (data directory, SQLite store, reports) and logging.
//! Every field has a default, so an empty YAML document is a valid config.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::model::EntityKind;

pub const DEFAULT_API_URL: &str = "https://jsonplaceholder.typicode.com";

/// One upstream collection and the raw file it is saved as. Both fields may
/// be omitted; see [`ApiConfig::endpoint`] for the fallbacks.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EndpointConfig {
    /// Path appended to the base URL (e.g., "/users")
    pub path: Option<String>,
    /// File name inside the raw partition (e.g., "users.json")
    pub file_name: Option<String>,
}

/// Endpoint with every fallback applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub path: String,
    pub file_name: String,
}

impl EndpointConfig {
    fn resolve(&self, kind: EntityKind) -> Endpoint {
        let path = self
            .path
            .clone()
            .unwrap_or_else(|| format!("/{}", kind));
        let file_name = self
            .file_name
            .clone()
            .unwrap_or_else(|| file_name_for(&path, kind));

        Endpoint { path, file_name }
    }
}

/// Last path segment plus ".json" ("/v2/users" -> "users.json")
fn file_name_for(path: &str, kind: EntityKind) -> String {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let segment = path
        .rsplit('/')
        .find(|s| !s.is_empty())
        .unwrap_or(kind.as_str());
    format!("{}.json", segment)
}

/// Upstream REST API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the API (e.g., "https://jsonplaceholder.typicode.com")
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Optional proxy URL for HTTP requests (e.g., "http://proxy.example.com:8080")
    pub proxy: Option<String>,
    pub users: EndpointConfig,
    pub posts: EndpointConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            timeout_secs: 30,
            proxy: None,
            users: EndpointConfig::default(),
            posts: EndpointConfig::default(),
        }
    }
}

impl ApiConfig {
    /// Request path and raw file name for `kind`. A missing path is
    /// "/{kind}"; a missing file name is the last path segment plus ".json".
    pub fn endpoint(&self, kind: EntityKind) -> Endpoint {
        match kind {
            EntityKind::Users => self.users.resolve(kind),
            EntityKind::Posts => self.posts.resolve(kind),
        }
    }
}

/// Where snapshots, the relational store and reports live
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of the raw/ and processed/ partitions
    pub data_dir: PathBuf,
    /// SQLite database file
    pub db_path: PathBuf,
    /// Output directory for JSON/CSV reports
    pub reports_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            db_path: PathBuf::from("local.db"),
            reports_dir: PathBuf::from("reports"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_file: PathBuf,
    /// Default filter directive, overridden by RUST_LOG
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_file: PathBuf::from("logs/pipeline.log"),
            level: "info".to_string(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub api: ApiConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

impl PipelineConfig {
    /// Load configuration from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .context(format!("Failed to read config file: {:?}", path.as_ref()))?;

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        // serde_yaml maps an empty document to unit, not to an empty map
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: PipelineConfig =
            serde_yaml::from_str(content).context("Failed to parse config YAML")?;

        Ok(config)
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.storage.data_dir.join("raw")
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.storage.data_dir.join("processed")
    }

    /// Directories created by `--setup`
    pub fn skeleton_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = vec![
            self.raw_dir(),
            self.processed_dir(),
            self.storage.reports_dir.clone(),
        ];
        if let Some(parent) = self.logging.log_file.parent() {
            if !parent.as_os_str().is_empty() {
                dirs.push(parent.to_path_buf());
            }
        }
        dirs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_parsing() {
        let yaml = r#"
api:
  base_url: "http://localhost:8080"
  timeout_secs: 5
  posts:
    path: "/v2/posts"
    file_name: "posts.json"

storage:
  data_dir: "/var/etl/data"
  db_path: "/var/etl/etl.db"
"#;

        let config = PipelineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.api.base_url, "http://localhost:8080");
        assert_eq!(config.api.timeout_secs, 5);
        assert_eq!(config.api.endpoint(EntityKind::Users).path, "/users");
        assert_eq!(config.api.endpoint(EntityKind::Posts).path, "/v2/posts");
        assert_eq!(config.storage.db_path, PathBuf::from("/var/etl/etl.db"));
        assert_eq!(config.storage.reports_dir, PathBuf::from("reports"));
        assert_eq!(config.raw_dir(), PathBuf::from("/var/etl/data/raw"));
    }

    #[test]
    fn test_partial_endpoint_block() {
        let config = PipelineConfig::from_yaml("api:\n  users:\n    path: \"/v2/users\"\n").unwrap();

        assert_eq!(
            config.api.endpoint(EntityKind::Users),
            Endpoint {
                path: "/v2/users".to_string(),
                file_name: "users.json".to_string(),
            }
        );
        assert_eq!(config.api.endpoint(EntityKind::Posts).path, "/posts");

        let config = PipelineConfig::from_yaml("api:\n  posts:\n    file_name: \"articles.json\"\n").unwrap();
        assert_eq!(
            config.api.endpoint(EntityKind::Posts),
            Endpoint {
                path: "/posts".to_string(),
                file_name: "articles.json".to_string(),
            }
        );
    }

    #[test]
    fn test_default_file_name_ignores_query_and_trailing_slash() {
        assert_eq!(file_name_for("/api/posts/?page=2", EntityKind::Posts), "posts.json");
        assert_eq!(file_name_for("/", EntityKind::Users), "users.json");
    }

    #[test]
    fn test_config_parsing_empty_document() {
        let config = PipelineConfig::from_yaml("").unwrap();
        assert_eq!(config.api.base_url, DEFAULT_API_URL);
        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(config.storage.data_dir, PathBuf::from("data"));
        assert_eq!(config.logging.level, "info");
        assert_eq!(
            config.api.endpoint(EntityKind::Users),
            Endpoint {
                path: "/users".to_string(),
                file_name: "users.json".to_string(),
            }
        );
        assert_eq!(config.api.endpoint(EntityKind::Posts).file_name, "posts.json");
    }

    #[test]
    fn test_skeleton_dirs() {
        let config = PipelineConfig::default();
        let dirs = config.skeleton_dirs();
        assert_eq!(
            dirs,
            vec![
                PathBuf::from("data/raw"),
                PathBuf::from("data/processed"),
                PathBuf::from("reports"),
                PathBuf::from("logs"),
            ]
        );
    }
}
