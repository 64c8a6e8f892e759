//! Kernel I/O statistics sampler
//!
//! Reads `/proc/diskstats`. Fields of interest (1-based): 1 major,
//! 2 minor, 3 kernel name, 4 reads completed, 8 writes completed.

use crate::models::SampleRow;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;

const MIN_FIELDS: usize = 8;

/// Rows parsed from one read of the statistics table
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ParsedStats {
    pub rows: Vec<SampleRow>,
    /// Rows skipped for too few fields or unparsable numbers
    pub malformed: usize,
}

/// Parse the statistics table, skipping malformed rows
pub fn parse_diskstats(content: &str) -> ParsedStats {
    let mut stats = ParsedStats::default();

    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        match parse_row(line) {
            Some(row) => stats.rows.push(row),
            None => {
                warn!(line = index + 1, "Skipping malformed diskstats row");
                stats.malformed += 1;
            }
        }
    }

    stats
}

fn parse_row(line: &str) -> Option<SampleRow> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < MIN_FIELDS {
        return None;
    }

    Some(SampleRow {
        major: fields[0].parse().ok()?,
        minor: fields[1].parse().ok()?,
        kernel_name: fields[2].to_string(),
        reads_completed: fields[3].parse().ok()?,
        writes_completed: fields[7].parse().ok()?,
    })
}

/// Reads the statistics table from a fixed path
#[derive(Debug, Clone)]
pub struct DiskstatsSampler {
    path: PathBuf,
}

impl Default for DiskstatsSampler {
    fn default() -> Self {
        Self::new("/proc/diskstats")
    }
}

impl DiskstatsSampler {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the whole table once
    pub async fn sample(&self) -> Result<ParsedStats> {
        let content = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        Ok(parse_diskstats(&content))
    }
}
