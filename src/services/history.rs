// Scan history. The latest summary is what a review screen reopens; deleting
// photos from it rewrites that entry in place.

use crate::core::result::{ScanCounts, ScanResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("History IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("History serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("No scan history recorded")]
    NoEntries,

    #[error("Latest history entry is scan {found}, not {expected}")]
    ScanMismatch { expected: String, found: String },

    #[error("History store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub scan_id: String,
    pub recorded_at: DateTime<Utc>,
    pub counts: ScanCounts,
    pub result: ScanResult,
}

impl ScanSummary {
    pub fn from_result(result: &ScanResult) -> Self {
        Self {
            scan_id: result.scan_id.clone(),
            recorded_at: Utc::now(),
            counts: result.counts(),
            result: result.clone(),
        }
    }
}

pub trait HistoryStore: Send + Sync {
    fn write_scan_summary(&self, summary: &ScanSummary) -> Result<(), HistoryError>;

    fn read_latest_scan_summary(&self) -> Result<Option<ScanSummary>, HistoryError>;

    /// Overwrite the most recent entry, which must belong to the same scan.
    fn replace_latest_scan_summary(&self, summary: &ScanSummary) -> Result<(), HistoryError>;

    /// All summaries, newest first.
    fn list_scan_summaries(&self) -> Result<Vec<ScanSummary>, HistoryError>;
}

fn check_same_scan(latest: &ScanSummary, replacement: &ScanSummary) -> Result<(), HistoryError> {
    if latest.scan_id == replacement.scan_id {
        Ok(())
    } else {
        Err(HistoryError::ScanMismatch {
            expected: replacement.scan_id.clone(),
            found: latest.scan_id.clone(),
        })
    }
}

/// One JSON summary per line, oldest first.
#[derive(Debug, Clone)]
pub struct JsonlHistoryStore {
    path: PathBuf,
}

impl JsonlHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw lines paired with their parsed summary, if the line parses.
    fn read_lines(&self) -> Result<Vec<(String, Option<ScanSummary>)>, HistoryError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut lines = Vec::new();
        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let parsed = match serde_json::from_str::<ScanSummary>(&line) {
                Ok(summary) => Some(summary),
                Err(err) => {
                    log::warn!(
                        "Skipping malformed history entry {} in {}: {}",
                        i,
                        self.path.display(),
                        err
                    );
                    None
                }
            };
            lines.push((line, parsed));
        }
        Ok(lines)
    }
}

impl HistoryStore for JsonlHistoryStore {
    fn write_scan_summary(&self, summary: &ScanSummary) -> Result<(), HistoryError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(out, "{}", serde_json::to_string(summary)?)?;
        Ok(())
    }

    fn read_latest_scan_summary(&self) -> Result<Option<ScanSummary>, HistoryError> {
        let lines = self.read_lines()?;
        Ok(lines.into_iter().rev().find_map(|(_, parsed)| parsed))
    }

    fn replace_latest_scan_summary(&self, summary: &ScanSummary) -> Result<(), HistoryError> {
        let mut lines = self.read_lines()?;
        let (index, latest) = lines
            .iter()
            .enumerate()
            .rev()
            .find_map(|(i, (_, parsed))| parsed.as_ref().map(|p| (i, p)))
            .ok_or(HistoryError::NoEntries)?;
        check_same_scan(latest, summary)?;

        lines[index] = (serde_json::to_string(summary)?, Some(summary.clone()));
        let content: String = lines.iter().map(|(line, _)| format!("{line}\n")).collect();
        fs::write(&self.path, content)?;
        Ok(())
    }

    fn list_scan_summaries(&self) -> Result<Vec<ScanSummary>, HistoryError> {
        let lines = self.read_lines()?;
        Ok(lines
            .into_iter()
            .rev()
            .filter_map(|(_, parsed)| parsed)
            .collect())
    }
}

/// Summaries kept for the life of the process.
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    entries: Mutex<Vec<ScanSummary>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, Vec<ScanSummary>>, HistoryError> {
        self.entries
            .lock()
            .map_err(|_| HistoryError::Unavailable("history lock poisoned".to_string()))
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn write_scan_summary(&self, summary: &ScanSummary) -> Result<(), HistoryError> {
        self.entries()?.push(summary.clone());
        Ok(())
    }

    fn read_latest_scan_summary(&self) -> Result<Option<ScanSummary>, HistoryError> {
        Ok(self.entries()?.last().cloned())
    }

    fn replace_latest_scan_summary(&self, summary: &ScanSummary) -> Result<(), HistoryError> {
        let mut entries = self.entries()?;
        let latest = entries.last_mut().ok_or(HistoryError::NoEntries)?;
        check_same_scan(latest, summary)?;
        *latest = summary.clone();
        Ok(())
    }

    fn list_scan_summaries(&self) -> Result<Vec<ScanSummary>, HistoryError> {
        Ok(self.entries()?.iter().rev().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::asset::record;
    use crate::core::result::SimilaritySource;
    use tempfile::TempDir;

    fn result(scan_id: &str, low_quality: usize) -> ScanResult {
        ScanResult {
            scan_id: scan_id.to_string(),
            scanned_at: Utc::now(),
            low_quality: (0..low_quality)
                .map(|i| record(&format!("lq{i}"), 10, 1, 1, i as i64))
                .collect(),
            duplicates: Vec::new(),
            similar: Vec::new(),
            total_scanned: 10,
            skipped: 0,
            similarity_source: SimilaritySource::Heuristic,
        }
    }

    fn summary(scan_id: &str, low_quality: usize) -> ScanSummary {
        ScanSummary::from_result(&result(scan_id, low_quality))
    }

    #[test]
    fn test_jsonl_round_trip_keeps_counts() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonlHistoryStore::new(temp_dir.path().join("nested").join("history.jsonl"));

        let summary = summary("s1", 3);
        store.write_scan_summary(&summary).unwrap();

        let latest = store.read_latest_scan_summary().unwrap().unwrap();
        assert_eq!(latest.counts.low_quality, 3);
        assert_eq!(latest.counts.total_scanned, 10);
        assert_eq!(latest, summary);
    }

    #[test]
    fn test_missing_file_reads_as_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonlHistoryStore::new(temp_dir.path().join("history.jsonl"));
        assert!(store.read_latest_scan_summary().unwrap().is_none());
        assert!(store.list_scan_summaries().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("history.jsonl");
        let store = JsonlHistoryStore::new(&path);

        store.write_scan_summary(&summary("s1", 1)).unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{ truncated").unwrap();

        let latest = store.read_latest_scan_summary().unwrap().unwrap();
        assert_eq!(latest.scan_id, "s1");
        assert_eq!(store.list_scan_summaries().unwrap().len(), 1);
    }

    #[test]
    fn test_list_is_newest_first() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonlHistoryStore::new(temp_dir.path().join("history.jsonl"));
        for id in ["s1", "s2", "s3"] {
            store.write_scan_summary(&summary(id, 0)).unwrap();
        }
        let ids: Vec<String> = store
            .list_scan_summaries()
            .unwrap()
            .into_iter()
            .map(|s| s.scan_id)
            .collect();
        assert_eq!(ids, vec!["s3", "s2", "s1"]);
    }

    #[test]
    fn test_replace_latest_rewrites_only_last_entry() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonlHistoryStore::new(temp_dir.path().join("history.jsonl"));
        store.write_scan_summary(&summary("s1", 4)).unwrap();
        store.write_scan_summary(&summary("s2", 4)).unwrap();

        store.replace_latest_scan_summary(&summary("s2", 1)).unwrap();

        let all = store.list_scan_summaries().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].counts.low_quality, 1);
        assert_eq!(all[1].counts.low_quality, 4);
    }

    #[test]
    fn test_replace_rejects_other_scan() {
        let store = MemoryHistoryStore::new();
        assert!(matches!(
            store.replace_latest_scan_summary(&summary("s1", 0)),
            Err(HistoryError::NoEntries)
        ));

        store.write_scan_summary(&summary("s1", 0)).unwrap();
        assert!(matches!(
            store.replace_latest_scan_summary(&summary("s9", 0)),
            Err(HistoryError::ScanMismatch { .. })
        ));
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryHistoryStore::new();
        store.write_scan_summary(&summary("s1", 2)).unwrap();
        store.write_scan_summary(&summary("s2", 5)).unwrap();
        let latest = store.read_latest_scan_summary().unwrap().unwrap();
        assert_eq!(latest.scan_id, "s2");
        assert_eq!(store.list_scan_summaries().unwrap()[1].scan_id, "s1");
    }
}
