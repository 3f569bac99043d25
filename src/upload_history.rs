//! Upload history
//!
//! In-memory log of finished upload attempts, newest first. Entries are kept
//! for the lifetime of the session and dropped on logout.

use serde::Serialize;
use std::collections::VecDeque;

use crate::file_info::format_size;
use crate::upload::UploadResult;

/// Oldest entries are dropped past this count
pub const MAX_HISTORY_ENTRIES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UploadStatus {
    Success,
    Failed,
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadStatus::Success => write!(f, "Success"),
            UploadStatus::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub id: String,
    pub file_name: String,
    /// Human-readable size ("1.50 MB")
    pub file_size: String,
    pub target_path: String,
    /// Local time, `%Y-%m-%d %H:%M:%S`
    pub timestamp: String,
    pub status: UploadStatus,
    pub error_message: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct UploadHistory {
    entries: VecDeque<HistoryEntry>,
}

impl UploadHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of an upload attempt
    pub fn record(&mut self, file_name: &str, size: u64, target_path: &str, result: &UploadResult) -> &HistoryEntry {
        let status = if result.succeeded() {
            UploadStatus::Success
        } else {
            UploadStatus::Failed
        };
        self.push(file_name, size, target_path, status, result.error_detail())
    }

    /// Record an upload rejected before it reached the remote
    pub fn record_failure(&mut self, file_name: &str, size: u64, target_path: &str, message: &str) -> &HistoryEntry {
        self.push(file_name, size, target_path, UploadStatus::Failed, Some(message.to_string()))
    }

    fn push(
        &mut self,
        file_name: &str,
        size: u64,
        target_path: &str,
        status: UploadStatus,
        error_message: Option<String>,
    ) -> &HistoryEntry {
        self.entries.push_front(HistoryEntry {
            id: uuid::Uuid::new_v4().to_string(),
            file_name: file_name.to_string(),
            file_size: format_size(size),
            target_path: target_path.to_string(),
            timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            status,
            error_message,
        });
        self.entries.truncate(MAX_HISTORY_ENTRIES);
        &self.entries[0]
    }

    /// Entries, most recent first
    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn get(&self, id: &str) -> Option<&HistoryEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::UploadError;

    #[test]
    fn test_newest_first() {
        let mut history = UploadHistory::new();
        history.record("a.txt", 10, "/a.txt", &UploadResult::success());
        history.record_failure("b.exe", 2048, "/b.exe", "File type not allowed");

        let names: Vec<&str> = history.entries().map(|e| e.file_name.as_str()).collect();
        assert_eq!(names, vec!["b.exe", "a.txt"]);

        let failed = history.entries().next().unwrap();
        assert_eq!(failed.status, UploadStatus::Failed);
        assert_eq!(failed.file_size, "2.00 KB");
        assert_eq!(failed.error_message.as_deref(), Some("File type not allowed"));
    }

    #[test]
    fn test_failed_result_keeps_detail() {
        let mut history = UploadHistory::new();
        let result = UploadResult::failure(UploadError::MissingFolder("/gone".to_string()));
        let entry = history.record("c.bin", 1, "/gone/c.bin", &result).clone();

        assert_eq!(entry.status, UploadStatus::Failed);
        assert_eq!(entry.error_message.as_deref(), Some("Parent folder does not exist: /gone"));
        assert_eq!(history.get(&entry.id).map(|e| e.file_name.as_str()), Some("c.bin"));
    }

    #[test]
    fn test_capped_at_max_entries() {
        let mut history = UploadHistory::new();
        for i in 0..MAX_HISTORY_ENTRIES + 5 {
            history.record(&format!("{}.txt", i), 1, "/x", &UploadResult::success());
        }
        assert_eq!(history.len(), MAX_HISTORY_ENTRIES);
        assert_eq!(history.entries().next().unwrap().file_name, format!("{}.txt", MAX_HISTORY_ENTRIES + 4));
        assert_eq!(history.entries().last().unwrap().file_name, "5.txt");

        history.clear();
        assert!(history.is_empty());
    }
}
