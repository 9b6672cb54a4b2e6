//! HTTP client module for fetching JSON collections
//!
//! This module handles HTTP GET requests against the upstream REST API.
//! Every failure (connect, timeout, non-2xx status, undecodable body) is
//! reported as a `Transport` error and never retried.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::config::ApiConfig;
use crate::error::{PipelineError, Result};
use crate::source::{JsonSource, QueryParams};

/// HTTP client wrapper for API requests
pub struct HttpClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let mut builder =
            reqwest::Client::builder().timeout(Duration::from_secs(config.timeout_secs));

        // Configure proxy if provided
        if let Some(proxy_url) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| PipelineError::Transport {
                url: proxy_url.clone(),
                message: format!("invalid proxy: {}", e),
            })?;
            builder = builder.proxy(proxy);
            info!("HTTP client configured with proxy: {}", proxy_url);
        }

        let client = builder.build().map_err(|e| PipelineError::Transport {
            url: config.base_url.clone(),
            message: format!("failed to create HTTP client: {}", e),
        })?;

        Ok(Self {
            base_url: config.base_url.clone(),
            client,
        })
    }

    /// Join the base URL and an endpoint path
    pub fn endpoint_url(&self, endpoint: &str) -> String {
        join_url(&self.base_url, endpoint)
    }
}

fn join_url(base_url: &str, endpoint: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        endpoint.trim_start_matches('/')
    )
}

#[async_trait]
impl JsonSource for HttpClient {
    async fn fetch_json(&self, endpoint: &str, params: &QueryParams) -> Result<Value> {
        let url = self.endpoint_url(endpoint);
        let transport = |message: String| PipelineError::Transport {
            url: url.clone(),
            message,
        };

        info!("Fetching data from {}", url);

        let mut request = self.client.get(&url);
        if !params.is_empty() {
            request = request.query(params);
        }

        let response = request.send().await.map_err(|e| {
            error!("Failed to fetch data from {}: {}", url, e);
            transport(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            error!("HTTP request failed with status: {} for {}", status, url);
            return Err(transport(format!("HTTP status {}", status)));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| transport(format!("invalid JSON body: {}", e)))?;

        debug!("Received {} from {}", describe_shape(&data), url);
        info!("Successfully fetched data from {}", url);
        Ok(data)
    }

    fn describe(&self) -> String {
        self.base_url.clone()
    }
}

fn describe_shape(value: &Value) -> String {
    match value {
        Value::Array(items) => format!("array of {} items", items.len()),
        Value::Object(obj) => format!("object with {} keys", obj.len()),
        _ => "scalar".to_string(),
    }
}
