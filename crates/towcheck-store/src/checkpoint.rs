//! Durable record of carriers that have been through verification.
//!
//! The file form is JSON lines, one [`CheckpointEntry`] per line, appended
//! and synced before `record` returns. A line is only ever appended, never
//! rewritten. Identifiers form a set: once a carrier has a terminal outcome
//! (`verified` / `rejected`) further records for it are no-ops.
//!
//! `inconclusive` lines are not terminal. Each one counts a run in which the
//! carrier could not be verified, so a caller can cap how many runs retry it.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use towcheck_core::{CheckpointEntry, DotNumber, Outcome};
use tracing::{debug, info, warn};

use crate::StoreError;

/// Checkpoint storage used by the pipeline.
pub trait CheckpointStore {
    /// True iff `id` has a terminal outcome.
    fn contains(&self, id: DotNumber) -> bool;

    /// Durably record an outcome for `id`. A no-op if `id` already has a
    /// terminal outcome.
    fn record(&mut self, id: DotNumber, outcome: Outcome) -> Result<(), StoreError>;

    /// All identifiers with a terminal outcome.
    fn load_all(&self) -> HashSet<DotNumber>;

    /// Terminal outcome recorded for `id`, if any.
    fn outcome(&self, id: DotNumber) -> Option<Outcome>;

    /// Number of inconclusive runs recorded for `id`.
    fn inconclusive_runs(&self, id: DotNumber) -> u32;
}

/// In-memory view shared by both store implementations.
#[derive(Debug, Default)]
struct CheckpointIndex {
    terminal: HashMap<DotNumber, Outcome>,
    inconclusive: HashMap<DotNumber, u32>,
}

impl CheckpointIndex {
    /// Whether recording `outcome` for `id` would change anything.
    fn accepts(&self, id: DotNumber) -> bool {
        !self.terminal.contains_key(&id)
    }

    fn apply(&mut self, id: DotNumber, outcome: Outcome) {
        if !self.accepts(id) {
            return;
        }
        if outcome.is_terminal() {
            self.terminal.insert(id, outcome);
        } else {
            *self.inconclusive.entry(id).or_insert(0) += 1;
        }
    }

    fn terminal_ids(&self) -> HashSet<DotNumber> {
        self.terminal.keys().copied().collect()
    }
}

// ── JSON-lines file ──

/// File-backed checkpoint.
pub struct JsonlCheckpoint {
    path: PathBuf,
    file: File,
    index: CheckpointIndex,
    /// The last entry on disk has no trailing newline.
    needs_newline: bool,
}

impl JsonlCheckpoint {
    /// Open (or create) a checkpoint file and load every entry in it.
    ///
    /// A torn final line from a crash mid-write is dropped with a warning
    /// and truncated away. Any other unparseable line means the file is
    /// corrupt.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StoreError::storage(parent, e))?;
        }

        let mut index = CheckpointIndex::default();
        let mut needs_newline = false;
        let mut truncate_to = None;

        if path.exists() {
            let content = fs::read_to_string(path).map_err(|e| StoreError::storage(path, e))?;
            let (body, tail) = match content.rfind('\n') {
                Some(i) => content.split_at(i + 1),
                None => ("", content.as_str()),
            };

            for (i, line) in body.lines().enumerate() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let entry = serde_json::from_str::<CheckpointEntry>(line).map_err(|e| {
                    StoreError::storage(
                        path,
                        io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("corrupt checkpoint line {}: {e}", i + 1),
                        ),
                    )
                })?;
                index.apply(entry.dot_number, entry.outcome);
            }

            let tail = tail.trim();
            if !tail.is_empty() {
                match serde_json::from_str::<CheckpointEntry>(tail) {
                    Ok(entry) => {
                        index.apply(entry.dot_number, entry.outcome);
                        needs_newline = true;
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "dropping torn checkpoint line");
                        truncate_to = Some(body.len() as u64);
                    }
                }
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| StoreError::storage(path, e))?;

        if let Some(len) = truncate_to {
            file.set_len(len)
                .and_then(|()| file.sync_data())
                .map_err(|e| StoreError::storage(path, e))?;
        }

        info!(
            path = %path.display(),
            completed = index.terminal.len(),
            inconclusive = index.inconclusive.len(),
            "loaded checkpoint"
        );

        Ok(Self {
            path: path.to_path_buf(),
            file,
            index,
            needs_newline,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&mut self, entry: &CheckpointEntry) -> Result<(), StoreError> {
        let mut line = String::new();
        if self.needs_newline {
            line.push('\n');
        }
        line.push_str(&serde_json::to_string(entry)?);
        line.push('\n');

        self.file
            .write_all(line.as_bytes())
            .and_then(|()| self.file.sync_data())
            .map_err(|e| StoreError::storage(&self.path, e))?;
        self.needs_newline = false;
        Ok(())
    }
}

impl CheckpointStore for JsonlCheckpoint {
    fn contains(&self, id: DotNumber) -> bool {
        self.index.terminal.contains_key(&id)
    }

    fn record(&mut self, id: DotNumber, outcome: Outcome) -> Result<(), StoreError> {
        if !self.index.accepts(id) {
            debug!(dot_number = id, "checkpoint already has terminal outcome");
            return Ok(());
        }
        self.append(&CheckpointEntry::now(id, outcome))?;
        self.index.apply(id, outcome);
        Ok(())
    }

    fn load_all(&self) -> HashSet<DotNumber> {
        self.index.terminal_ids()
    }

    fn outcome(&self, id: DotNumber) -> Option<Outcome> {
        self.index.terminal.get(&id).copied()
    }

    fn inconclusive_runs(&self, id: DotNumber) -> u32 {
        self.index.inconclusive.get(&id).copied().unwrap_or(0)
    }
}

// ── In-memory ──

/// Checkpoint held in memory; used in tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryCheckpoint {
    index: CheckpointIndex,
    entries: Vec<CheckpointEntry>,
    fail_writes: bool,
}

impl MemoryCheckpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every write fails, for exercising storage-error paths.
    pub fn failing() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }

    /// Every entry written, in order.
    pub fn entries(&self) -> &[CheckpointEntry] {
        &self.entries
    }
}

impl CheckpointStore for MemoryCheckpoint {
    fn contains(&self, id: DotNumber) -> bool {
        self.index.terminal.contains_key(&id)
    }

    fn record(&mut self, id: DotNumber, outcome: Outcome) -> Result<(), StoreError> {
        if !self.index.accepts(id) {
            return Ok(());
        }
        if self.fail_writes {
            return Err(StoreError::storage(
                "<memory>",
                io::Error::other("checkpoint writes disabled"),
            ));
        }
        self.entries.push(CheckpointEntry::now(id, outcome));
        self.index.apply(id, outcome);
        Ok(())
    }

    fn load_all(&self) -> HashSet<DotNumber> {
        self.index.terminal_ids()
    }

    fn outcome(&self, id: DotNumber) -> Option<Outcome> {
        self.index.terminal.get(&id).copied()
    }

    fn inconclusive_runs(&self, id: DotNumber) -> u32 {
        self.index.inconclusive.get(&id).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn line_count(path: &Path) -> usize {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .filter(|l| !l.trim().is_empty())
            .count()
    }

    #[test]
    fn open_creates_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state").join("processed.jsonl");
        let store = JsonlCheckpoint::open(&path).unwrap();
        assert!(path.exists());
        assert!(store.load_all().is_empty());
    }

    #[test]
    fn record_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("processed.jsonl");

        let mut store = JsonlCheckpoint::open(&path).unwrap();
        store.record(11, Outcome::Verified).unwrap();
        store.record(12, Outcome::Rejected).unwrap();
        assert!(store.contains(11));
        drop(store);

        // Simulated restart.
        let store = JsonlCheckpoint::open(&path).unwrap();
        assert!(store.contains(11));
        assert!(store.contains(12));
        assert!(!store.contains(13));
        assert_eq!(store.outcome(11), Some(Outcome::Verified));
        assert_eq!(store.outcome(12), Some(Outcome::Rejected));
        assert_eq!(store.load_all(), HashSet::from([11, 12]));
    }

    #[test]
    fn record_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("processed.jsonl");

        let mut store = JsonlCheckpoint::open(&path).unwrap();
        store.record(5, Outcome::Verified).unwrap();
        store.record(5, Outcome::Verified).unwrap();
        store.record(5, Outcome::Rejected).unwrap();
        drop(store);

        assert_eq!(line_count(&path), 1);
        let mut store = JsonlCheckpoint::open(&path).unwrap();
        assert_eq!(store.outcome(5), Some(Outcome::Verified));
        store.record(5, Outcome::Verified).unwrap();
        assert_eq!(line_count(&path), 1);
    }

    #[test]
    fn duplicate_lines_on_disk_are_tolerated() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("processed.jsonl");
        fs::write(
            &path,
            concat!(
                r#"{"dot_number":9,"outcome":"rejected","recorded_at":"2026-01-01T00:00:00Z"}"#,
                "\n",
                r#"{"dot_number":9,"outcome":"verified","recorded_at":"2026-01-02T00:00:00Z"}"#,
                "\n",
            ),
        )
        .unwrap();

        let store = JsonlCheckpoint::open(&path).unwrap();
        assert_eq!(store.outcome(9), Some(Outcome::Rejected), "first entry wins");
        assert_eq!(store.load_all().len(), 1);
    }

    #[test]
    fn inconclusive_runs_are_counted_not_terminal() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("processed.jsonl");

        let mut store = JsonlCheckpoint::open(&path).unwrap();
        store.record(3, Outcome::Inconclusive).unwrap();
        store.record(3, Outcome::Inconclusive).unwrap();
        assert!(!store.contains(3));
        assert_eq!(store.inconclusive_runs(3), 2);
        drop(store);

        let mut store = JsonlCheckpoint::open(&path).unwrap();
        assert_eq!(store.inconclusive_runs(3), 2);
        assert!(store.load_all().is_empty());

        store.record(3, Outcome::Verified).unwrap();
        assert!(store.contains(3));
        store.record(3, Outcome::Inconclusive).unwrap();
        assert_eq!(store.inconclusive_runs(3), 2, "no counting after terminal");
    }

    #[test]
    fn torn_final_line_is_skipped_and_appends_continue() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("processed.jsonl");
        fs::write(
            &path,
            concat!(
                r#"{"dot_number":1,"outcome":"verified","recorded_at":"2026-01-01T00:00:00Z"}"#,
                "\n",
                r#"{"dot_number":2,"outc"#,
            ),
        )
        .unwrap();

        let mut store = JsonlCheckpoint::open(&path).unwrap();
        assert!(store.contains(1));
        assert!(!store.contains(2));
        store.record(2, Outcome::Rejected).unwrap();
        drop(store);

        assert_eq!(line_count(&path), 2);
        let store = JsonlCheckpoint::open(&path).unwrap();
        assert_eq!(store.load_all(), HashSet::from([1, 2]));
    }

    #[test]
    fn unterminated_final_entry_is_kept() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("processed.jsonl");
        fs::write(
            &path,
            r#"{"dot_number":4,"outcome":"verified","recorded_at":"2026-01-01T00:00:00Z"}"#,
        )
        .unwrap();

        let mut store = JsonlCheckpoint::open(&path).unwrap();
        assert!(store.contains(4));
        store.record(6, Outcome::Rejected).unwrap();
        drop(store);

        let store = JsonlCheckpoint::open(&path).unwrap();
        assert_eq!(store.load_all(), HashSet::from([4, 6]));
    }

    #[test]
    fn corrupt_middle_line_is_storage_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("processed.jsonl");
        fs::write(
            &path,
            concat!(
                "not json\n",
                r#"{"dot_number":1,"outcome":"verified","recorded_at":"2026-01-01T00:00:00Z"}"#,
                "\n",
            ),
        )
        .unwrap();

        let err = JsonlCheckpoint::open(&path).err().unwrap();
        assert!(err.is_storage());
    }

    #[test]
    fn memory_store_records_once() {
        let mut store = MemoryCheckpoint::new();
        store.record(1, Outcome::Verified).unwrap();
        store.record(1, Outcome::Verified).unwrap();
        assert_eq!(store.entries().len(), 1);
        assert!(store.contains(1));
    }

    #[test]
    fn failing_memory_store_errors() {
        let mut store = MemoryCheckpoint::failing();
        let err = store.record(1, Outcome::Rejected).unwrap_err();
        assert!(err.is_storage());
        assert!(!store.contains(1));
    }
}
