//! Normalized record types and entity kinds

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{PipelineError, Result};
use crate::schema::{TableSchema, POSTS, USERS};

/// Type alias for a data row (map of column names to JSON values)
pub type DataRow = HashMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Users,
    Posts,
}

impl EntityKind {
    pub const ALL: [EntityKind; 2] = [EntityKind::Users, EntityKind::Posts];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Users => "users",
            EntityKind::Posts => "posts",
        }
    }

    pub fn schema(&self) -> TableSchema {
        match self {
            EntityKind::Users => USERS,
            EntityKind::Posts => POSTS,
        }
    }

    /// File name of this kind inside a processed partition
    pub fn processed_file_name(&self) -> String {
        format!("{}.parquet", self.as_str())
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "users" | "user" => Ok(EntityKind::Users),
            "posts" | "post" => Ok(EntityKind::Posts),
            other => Err(PipelineError::Validation(format!(
                "unknown entity kind '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostCategory {
    Short,
    Medium,
    Long,
}

impl PostCategory {
    pub fn from_body_length(body_length: usize) -> Self {
        if body_length <= 100 {
            PostCategory::Short
        } else if body_length <= 200 {
            PostCategory::Medium
        } else {
            PostCategory::Long
        }
    }
}

/// A normalized user, one row of the `users` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: i64,
    pub username: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub website: String,
    pub city: String,
    pub zipcode: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub company_name: String,
    pub company_catchphrase: String,
    pub email_domain: String,
    pub has_coordinates: bool,
    pub created_at: String,
}

/// A normalized post, one row of the `posts` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRecord {
    pub post_id: i64,
    pub user_id: i64,
    pub title: String,
    pub body: String,
    pub title_length: i64,
    pub body_length: i64,
    pub word_count: i64,
    pub post_category: PostCategory,
    pub created_at: String,
}

/// Convert typed records into schema-keyed rows
pub fn to_rows<T: Serialize>(records: &[T]) -> Result<Vec<DataRow>> {
    records
        .iter()
        .map(|record| match serde_json::to_value(record) {
            Ok(Value::Object(obj)) => Ok(obj.into_iter().collect()),
            Ok(other) => Err(PipelineError::Validation(format!(
                "record did not serialize to an object: {}",
                other
            ))),
            Err(e) => Err(PipelineError::Validation(e.to_string())),
        })
        .collect()
}
