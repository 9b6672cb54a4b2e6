//! Date-partitioned snapshot layout
//!
//! Raw and processed snapshots live under `{base}/{YYYY-MM-DD}/{name}`.
//! Partitions are created lazily; writing the same name twice on the same day
//! replaces the earlier file.

use chrono::NaiveDate;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

#[cfg(unix)]
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};

use crate::error::{PipelineError, Result};

/// Directory of one date partition
pub fn partition_dir(base: &Path, date: NaiveDate) -> PathBuf {
    base.join(date.format("%Y-%m-%d").to_string())
}

/// Create a directory (and parents) with 0775 permissions, no-op if present
pub fn ensure_dir(dir: &Path) -> Result<()> {
    if dir.is_dir() {
        return Ok(());
    }

    #[cfg(unix)]
    {
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true).mode(0o775);
        builder.create(dir).map_err(|e| PipelineError::io(dir, e))?;
    }

    #[cfg(not(unix))]
    fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;

    debug!("Created directory {:?}", dir);
    Ok(())
}

/// Open a file for writing (create + truncate, 0664 on unix)
pub fn create_file(path: &Path) -> Result<fs::File> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }

    let mut options = OpenOptions::new();
    options.create(true).write(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o664);

    options.open(path).map_err(|e| PipelineError::io(path, e))
}

/// Write a JSON document, pretty-printed, UTF-8
pub fn write_json(path: &Path, value: &Value) -> Result<()> {
    let file = create_file(path)?;
    let mut writer = BufWriter::new(file);

    serde_json::to_writer_pretty(&mut writer, value)
        .map_err(|e| PipelineError::io(path, e.into()))?;
    writer
        .write_all(b"\n")
        .and_then(|_| writer.flush())
        .map_err(|e| PipelineError::io(path, e))?;

    Ok(())
}

/// Read a JSON document; a missing file is `NotFound`, bad JSON is `Validation`
pub fn read_json(path: &Path) -> Result<Value> {
    if !path.is_file() {
        return Err(PipelineError::NotFound {
            path: path.to_path_buf(),
        });
    }

    let file = fs::File::open(path).map_err(|e| PipelineError::io(path, e))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| {
        PipelineError::Validation(format!("malformed JSON in {}: {}", path.display(), e))
    })
}
