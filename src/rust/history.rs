//! Append-only log of past predictions.
//!
//! The classifier never writes here itself; callers record a result after a
//! successful classification. Entries are stored as JSON lines.

use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::ClassificationResult;

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Corrupt history entry on line {line}: {source}")]
    Corrupt {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to encode history entry: {0}")]
    Encode(#[source] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: u64,
    pub image_uri: String,
    pub prediction: String,
    pub confidence: f32,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct HistoryLog {
    path: PathBuf,
    /// Highest id written so far. Also serializes appends.
    last_id: Mutex<u64>,
}

impl HistoryLog {
    /// Opens (and creates if needed) the log at `path`.
    ///
    /// Existing entries are read once here to find the next id.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, HistoryError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(&path)?;
        let last_id = read_entries(&path)?.iter().map(|e| e.id).max().unwrap_or(0);
        Ok(Self { path, last_id: Mutex::new(last_id) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records one prediction and returns the stored entry.
    pub fn append(
        &self,
        image_uri: impl Into<String>,
        result: &ClassificationResult,
    ) -> Result<HistoryEntry, HistoryError> {
        let mut last_id = self.last_id.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let entry = HistoryEntry {
            id: *last_id + 1,
            image_uri: image_uri.into(),
            prediction: result.label.clone(),
            confidence: result.confidence,
            recorded_at: Utc::now(),
        };

        let mut line = serde_json::to_string(&entry).map_err(HistoryError::Encode)?;
        line.push('\n');
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.flush()?;
        *last_id = entry.id;

        log::debug!("Recorded history entry {} for {}", entry.id, entry.image_uri);
        Ok(entry)
    }

    /// All entries, newest first.
    pub fn entries(&self) -> Result<Vec<HistoryEntry>, HistoryError> {
        let mut entries = read_entries(&self.path)?;
        entries.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(entries)
    }

}

fn read_entries(path: &Path) -> Result<Vec<HistoryEntry>, HistoryError> {
    let file = fs::File::open(path)?;
    let mut entries = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let entry = serde_json::from_str(&line)
            .map_err(|source| HistoryError::Corrupt { line: index + 1, source })?;
        entries.push(entry);
    }
    Ok(entries)
}
