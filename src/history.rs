//! Recent export history.
//!
//! Keeps a bounded list of the files written by exports so a front end can
//! offer "open last export" style actions. Oldest entries fall off the end.

use std::path::{Path, PathBuf};

/// Default number of exports remembered.
pub const DEFAULT_RECENT_EXPORTS: usize = 10;

/// A completed export.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRecord {
    /// Where the file was written.
    pub path: PathBuf,

    /// Length of the exported audio.
    pub duration_seconds: f64,
}

impl ExportRecord {
    /// Creates a record for a written file.
    ///
    /// # Arguments
    ///
    /// * `path` - The written file
    /// * `duration_seconds` - Length of the exported audio
    pub fn new(path: impl AsRef<Path>, duration_seconds: f64) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            duration_seconds,
        }
    }
}

/// Bounded list of recent exports.
#[derive(Debug)]
pub struct ExportHistory {
    /// Records in export order (most recent last).
    records: Vec<ExportRecord>,

    /// Maximum number of records kept.
    capacity: usize,
}

impl Default for ExportHistory {
    fn default() -> Self {
        Self::new(DEFAULT_RECENT_EXPORTS)
    }
}

impl ExportHistory {
    /// Creates an empty history that keeps at most `capacity` records.
    ///
    /// A capacity of 0 disables tracking.
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Records a new export, dropping the oldest if full.
    pub fn push(&mut self, record: ExportRecord) {
        if self.capacity == 0 {
            return;
        }

        self.records.push(record);

        // Enforce maximum size by removing oldest entries
        while self.records.len() > self.capacity {
            self.records.remove(0);
        }
    }

    /// Iterates over the records, most recent first.
    pub fn recent(&self) -> impl Iterator<Item = &ExportRecord> {
        self.records.iter().rev()
    }

    /// Returns the most recent record.
    pub fn latest(&self) -> Option<&ExportRecord> {
        self.records.last()
    }

    /// Number of records kept.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if nothing has been exported.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Forgets all records.
    pub fn clear(&mut self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_latest() {
        let mut history = ExportHistory::default();
        assert!(history.is_empty());

        history.push(ExportRecord::new("a.wav", 60.0));
        history.push(ExportRecord::new("b.wav", 12.5));

        assert_eq!(history.len(), 2);
        assert_eq!(history.latest().unwrap().path, PathBuf::from("b.wav"));
    }

    #[test]
    fn test_max_size() {
        let mut history = ExportHistory::new(3);

        // Push more than the capacity
        for i in 0..5 {
            history.push(ExportRecord::new(format!("export_{}.wav", i), 1.0));
        }

        // The oldest entries should have been removed
        assert_eq!(history.len(), 3);
        let names: Vec<_> = history
            .recent()
            .map(|r| r.path.to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["export_4.wav", "export_3.wav", "export_2.wav"]);
    }

    #[test]
    fn test_zero_capacity_disables_tracking() {
        let mut history = ExportHistory::new(0);
        history.push(ExportRecord::new("a.wav", 1.0));
        assert!(history.is_empty());
        assert!(history.latest().is_none());
    }

    #[test]
    fn test_clear() {
        let mut history = ExportHistory::new(2);
        history.push(ExportRecord::new("a.wav", 1.0));
        history.clear();
        assert!(history.is_empty());

        // Still bounded after clearing
        for i in 0..3 {
            history.push(ExportRecord::new(format!("{}.wav", i), 1.0));
        }
        assert_eq!(history.len(), 2);
    }
}
