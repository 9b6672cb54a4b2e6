//! Explicit table descriptions
//!
//! One description per table drives the Parquet layout of processed
//! snapshots, the SQLite DDL/DML, and the length-limit cleaning applied
//! before a load. Nothing else declares columns.

use arrow::datatypes::{DataType, Field, Schema};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Float,
    Boolean,
    Text,
    /// RFC 3339 text in snapshots, DATETIME in the store
    Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub column_type: ColumnType,
    pub nullable: bool,
    /// Maximum character count for text columns
    pub max_len: Option<usize>,
}

impl ColumnSpec {
    const fn new(name: &'static str, column_type: ColumnType, nullable: bool) -> Self {
        Self {
            name,
            column_type,
            nullable,
            max_len: None,
        }
    }

    const fn varchar(name: &'static str, max_len: usize, nullable: bool) -> Self {
        Self {
            name,
            column_type: ColumnType::Text,
            nullable,
            max_len: Some(max_len),
        }
    }

    /// SQL type as declared in CREATE TABLE
    pub fn sql_type(&self) -> String {
        match (self.column_type, self.max_len) {
            (ColumnType::Integer, _) => "INTEGER".to_string(),
            (ColumnType::Float, _) => "FLOAT".to_string(),
            (ColumnType::Boolean, _) => "BOOLEAN".to_string(),
            (ColumnType::Text, Some(n)) => format!("VARCHAR({})", n),
            (ColumnType::Text, None) => "TEXT".to_string(),
            (ColumnType::Timestamp, _) => "DATETIME".to_string(),
        }
    }

    pub fn arrow_type(&self) -> DataType {
        match self.column_type {
            ColumnType::Integer => DataType::Int64,
            ColumnType::Float => DataType::Float64,
            ColumnType::Boolean => DataType::Boolean,
            ColumnType::Text | ColumnType::Timestamp => DataType::Utf8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSchema {
    pub name: &'static str,
    pub primary_key: &'static str,
    pub columns: &'static [ColumnSpec],
}

pub const USERS: TableSchema = TableSchema {
    name: "users",
    primary_key: "user_id",
    columns: &[
        ColumnSpec::new("user_id", ColumnType::Integer, false),
        ColumnSpec::varchar("username", 100, false),
        ColumnSpec::varchar("name", 200, false),
        ColumnSpec::varchar("email", 200, false),
        ColumnSpec::varchar("phone", 50, true),
        ColumnSpec::varchar("website", 200, true),
        ColumnSpec::varchar("city", 100, true),
        ColumnSpec::varchar("zipcode", 20, true),
        ColumnSpec::new("lat", ColumnType::Float, true),
        ColumnSpec::new("lng", ColumnType::Float, true),
        ColumnSpec::varchar("company_name", 200, true),
        ColumnSpec::new("company_catchphrase", ColumnType::Text, true),
        ColumnSpec::varchar("email_domain", 100, true),
        ColumnSpec::new("has_coordinates", ColumnType::Boolean, true),
        ColumnSpec::new("created_at", ColumnType::Timestamp, true),
    ],
};

pub const POSTS: TableSchema = TableSchema {
    name: "posts",
    primary_key: "post_id",
    columns: &[
        ColumnSpec::new("post_id", ColumnType::Integer, false),
        ColumnSpec::new("user_id", ColumnType::Integer, false),
        ColumnSpec::varchar("title", 500, false),
        ColumnSpec::new("body", ColumnType::Text, false),
        ColumnSpec::new("title_length", ColumnType::Integer, true),
        ColumnSpec::new("body_length", ColumnType::Integer, true),
        ColumnSpec::new("word_count", ColumnType::Integer, true),
        ColumnSpec::varchar("post_category", 20, true),
        ColumnSpec::new("created_at", ColumnType::Timestamp, true),
    ],
};

/// All tables owned by the loader, in load order
pub const TABLES: [TableSchema; 2] = [USERS, POSTS];

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.name).collect()
    }

    pub fn arrow_schema(&self) -> Arc<Schema> {
        let fields: Vec<Field> = self
            .columns
            .iter()
            .map(|c| Field::new(c.name, c.arrow_type(), c.nullable))
            .collect();
        Arc::new(Schema::new(fields))
    }

    pub fn create_table_sql(&self) -> String {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                let mut def = format!("{} {}", quote_identifier(c.name), c.sql_type());
                if c.name == self.primary_key {
                    def.push_str(" PRIMARY KEY");
                } else if !c.nullable {
                    def.push_str(" NOT NULL");
                }
                def
            })
            .collect();

        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            quote_identifier(self.name),
            columns.join(",\n    ")
        )
    }

    pub fn insert_sql(&self) -> String {
        let names: Vec<String> = self.columns.iter().map(|c| quote_identifier(c.name)).collect();
        let placeholders: Vec<String> = (1..=self.columns.len()).map(|i| format!("?{}", i)).collect();

        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_identifier(self.name),
            names.join(", "),
            placeholders.join(", ")
        )
    }

    pub fn find(name: &str) -> Option<TableSchema> {
        TABLES.iter().copied().find(|t| t.name == name)
    }
}

/// Double-quote an SQL identifier
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
