use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::model::BackupEntry;
use crate::error::AppError;

/// Default maximum number of entries held for replay.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Entries that exhausted their replay attempts are kept here for inspection.
pub const DEAD_LETTER_CAPACITY: usize = 100;

// =============================================================================
// BackupQueue
// =============================================================================

#[derive(Debug, Default)]
struct Inner {
    entries: VecDeque<BackupEntry>,
    dead_letters: VecDeque<BackupEntry>,
    evicted: u64,
}

/// Bounded FIFO of action records that failed remote persistence.
///
/// `len() <= capacity` always holds. Pushing into a full queue evicts the
/// oldest entry, never the one being pushed. All access goes through one
/// mutex and every critical section is a short copy or pointer shuffle.
#[derive(Debug)]
pub struct BackupQueue {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl Default for BackupQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl BackupQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// `capacity` is clamped to at least one entry.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append an entry. Returns the evicted oldest entry when the queue was full.
    pub fn push(&self, entry: BackupEntry) -> Option<BackupEntry> {
        let mut inner = self.lock();
        let evicted = if inner.entries.len() >= self.capacity {
            inner.evicted += 1;
            inner.entries.pop_front()
        } else {
            None
        };
        inner.entries.push_back(entry);
        evicted
    }

    /// The last `n` entries, oldest first.
    pub fn snapshot(&self, n: usize) -> Vec<BackupEntry> {
        let inner = self.lock();
        let skip = inner.entries.len().saturating_sub(n);
        inner.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Total entries dropped by capacity eviction since startup.
    pub fn evicted_total(&self) -> u64 {
        self.lock().evicted
    }

    /// Remove up to `max` entries whose backoff deadline has passed, in queue order.
    pub fn drain_batch(&self, max: usize, now: DateTime<Utc>) -> Vec<BackupEntry> {
        let mut inner = self.lock();
        let mut taken = Vec::new();
        let mut kept = VecDeque::with_capacity(inner.entries.len());
        while let Some(entry) = inner.entries.pop_front() {
            if taken.len() < max && entry.next_attempt_at <= now {
                taken.push(entry);
            } else {
                kept.push_back(entry);
            }
        }
        inner.entries = kept;
        taken
    }

    /// Put a failed replay back at the front. When newer pushes filled the
    /// queue in the meantime, the requeued entry is the oldest and is dropped.
    pub fn requeue(&self, entry: BackupEntry) -> bool {
        let mut inner = self.lock();
        if inner.entries.len() >= self.capacity {
            inner.evicted += 1;
            tracing::warn!(entry_id = %entry.id, action = %entry.action, "Backup queue full, dropping requeued entry");
            return false;
        }
        inner.entries.push_front(entry);
        true
    }

    /// Move an entry to the bounded dead-letter list.
    pub fn dead_letter(&self, entry: BackupEntry) {
        let mut inner = self.lock();
        if inner.dead_letters.len() >= DEAD_LETTER_CAPACITY {
            inner.dead_letters.pop_front();
        }
        inner.dead_letters.push_back(entry);
    }

    pub fn dead_letters(&self, n: usize) -> Vec<BackupEntry> {
        let inner = self.lock();
        let skip = inner.dead_letters.len().saturating_sub(n);
        inner.dead_letters.iter().skip(skip).cloned().collect()
    }

    pub fn dead_letter_len(&self) -> usize {
        self.lock().dead_letters.len()
    }

    fn to_journal(&self) -> JournalFile {
        let inner = self.lock();
        JournalFile {
            entries: inner.entries.iter().cloned().collect(),
            dead_letters: inner.dead_letters.iter().cloned().collect(),
        }
    }

    fn restore(&self, file: JournalFile) {
        let mut inner = self.lock();
        for entry in file.entries {
            if inner.entries.len() >= self.capacity {
                inner.entries.pop_front();
                inner.evicted += 1;
            }
            inner.entries.push_back(entry);
        }
        for entry in file.dead_letters {
            if inner.dead_letters.len() >= DEAD_LETTER_CAPACITY {
                inner.dead_letters.pop_front();
            }
            inner.dead_letters.push_back(entry);
        }
    }
}

// =============================================================================
// BackupJournal
// =============================================================================

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JournalFile {
    entries: Vec<BackupEntry>,
    #[serde(default)]
    dead_letters: Vec<BackupEntry>,
}

/// Opt-in on-disk copy of the backup queue so queued records survive a restart.
///
/// Saved as one JSON document, written to a temp file and renamed into place.
#[derive(Debug, Clone)]
pub struct BackupJournal {
    path: PathBuf,
}

impl BackupJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load a previous journal into `queue`. A missing file is not an error.
    pub fn load_into(&self, queue: &BackupQueue) -> Result<usize, AppError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let file: JournalFile = serde_json::from_str(&raw)?;
        let restored = file.entries.len();
        queue.restore(file);
        Ok(restored)
    }

    pub fn save(&self, queue: &BackupQueue) -> Result<(), AppError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let body = serde_json::to_vec(&queue.to_journal())?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
