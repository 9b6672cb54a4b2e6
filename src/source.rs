//! JSON source trait definition
//!
//! This module defines the transport seam of the extractor: anything that can
//! turn an endpoint (plus query parameters) into a JSON document.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// Query parameters appended to an endpoint
pub type QueryParams = [(String, String)];

#[async_trait]
pub trait JsonSource: Send + Sync {
    /// Fetch one JSON document. Any transport problem or non-2xx status is a
    /// `Transport` error; no retry is attempted.
    async fn fetch_json(&self, endpoint: &str, params: &QueryParams) -> Result<Value>;

    /// Human-readable location of the source, for logs
    fn describe(&self) -> String;
}
