//! Background replay of backup-queue entries.
//!
//! Every tick drains the entries whose backoff deadline has passed and rewrites
//! them to the metrics collection. Failures back off exponentially; entries
//! that run out of attempts move to the dead-letter list.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::backup::{BackupJournal, BackupQueue};
use super::model::BackupEntry;
use crate::config::RetryConfig;
use crate::error::AppError;
use crate::store::RecordStore;

/// Maximum entries replayed per tick.
pub const REPLAY_BATCH: usize = 10;

/// Delay before the next attempt after `attempts` failures: `base * 2^(attempts-1)`, capped.
pub fn backoff_delay(attempts: u32, base: Duration, max: Duration) -> Duration {
    let exp = attempts.saturating_sub(1).min(31);
    base.checked_mul(1u32 << exp).map_or(max, |d| d.min(max))
}

// =============================================================================
// Stats
// =============================================================================

#[derive(Debug, Default)]
pub struct RetryStats {
    ticks: AtomicU64,
    replayed: AtomicU64,
    failed: AtomicU64,
    dead_lettered: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryStatsSnapshot {
    pub ticks: u64,
    pub replayed: u64,
    pub failed: u64,
    pub dead_lettered: u64,
}

impl RetryStats {
    pub fn snapshot(&self) -> RetryStatsSnapshot {
        RetryStatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            replayed: self.replayed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub skipped: bool,
    pub replayed: usize,
    pub failed: usize,
    pub dead_lettered: usize,
}

// =============================================================================
// RetryWorker
// =============================================================================

pub struct RetryWorker {
    store: Arc<dyn RecordStore>,
    backup: Arc<BackupQueue>,
    collection: String,
    config: RetryConfig,
    timeout: Duration,
    journal: Option<BackupJournal>,
    stats: Arc<RetryStats>,
}

impl RetryWorker {
    pub fn new(
        store: Arc<dyn RecordStore>,
        backup: Arc<BackupQueue>,
        collection: impl Into<String>,
        config: RetryConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            backup,
            collection: collection.into(),
            config,
            timeout,
            journal: None,
            stats: Arc::new(RetryStats::default()),
        }
    }

    pub fn with_journal(mut self, journal: Option<BackupJournal>) -> Self {
        self.journal = journal;
        self
    }

    pub fn stats(&self) -> Arc<RetryStats> {
        self.stats.clone()
    }

    /// Replay one batch of due entries.
    pub async fn run_once(&self) -> TickReport {
        self.stats.ticks.fetch_add(1, Ordering::Relaxed);

        // Without a token every attempt would fail; leave the queue untouched.
        if !self.store.is_configured() {
            return TickReport {
                skipped: true,
                ..Default::default()
            };
        }

        let batch = self.backup.drain_batch(REPLAY_BATCH, Utc::now());
        if batch.is_empty() {
            return TickReport::default();
        }

        let mut report = TickReport::default();
        let mut untouched: Vec<BackupEntry> = Vec::new();
        let mut retry_later: Vec<BackupEntry> = Vec::new();
        let mut store_down = false;

        for mut entry in batch {
            if store_down {
                untouched.push(entry);
                continue;
            }

            match self.replay(&entry).await {
                Ok(()) => {
                    report.replayed += 1;
                    tracing::debug!(entry_id = %entry.id, action = %entry.action, "Replayed backup entry");
                }
                Err(e) => {
                    report.failed += 1;
                    store_down = true;
                    entry.attempts += 1;
                    entry.last_error = Some(e.to_string());

                    if entry.attempts >= self.config.max_attempts {
                        report.dead_lettered += 1;
                        tracing::error!(
                            entry_id = %entry.id,
                            action = %entry.action,
                            attempts = entry.attempts,
                            error = %e,
                            "Backup entry exhausted replay attempts, moved to dead letters"
                        );
                        self.backup.dead_letter(entry);
                    } else {
                        let delay = backoff_delay(
                            entry.attempts,
                            self.config.base_delay,
                            self.config.max_delay,
                        );
                        entry.next_attempt_at = Utc::now()
                            + chrono::Duration::from_std(delay)
                                .unwrap_or_else(|_| chrono::Duration::seconds(300));
                        tracing::warn!(
                            entry_id = %entry.id,
                            action = %entry.action,
                            attempts = entry.attempts,
                            retry_in_secs = delay.as_secs(),
                            error = %e,
                            "Backup entry replay failed"
                        );
                        retry_later.push(entry);
                    }
                }
            }
        }

        // Restore original queue order: failed entry first, then the ones never tried.
        for entry in retry_later.into_iter().chain(untouched).rev() {
            self.backup.requeue(entry);
        }

        self.stats
            .replayed
            .fetch_add(report.replayed as u64, Ordering::Relaxed);
        self.stats
            .failed
            .fetch_add(report.failed as u64, Ordering::Relaxed);
        self.stats
            .dead_lettered
            .fetch_add(report.dead_lettered as u64, Ordering::Relaxed);

        if report.replayed > 0 {
            tracing::info!(
                replayed = report.replayed,
                remaining = self.backup.len(),
                "Backup queue replay tick"
            );
        }
        report
    }

    async fn replay(&self, entry: &BackupEntry) -> Result<(), AppError> {
        let fields = [entry.original_record.to_store_fields()];
        match tokio::time::timeout(self.timeout, self.store.write(&self.collection, &fields)).await
        {
            Ok(result) => result.map(|_| ()),
            Err(_) => Err(AppError::Timeout(format!(
                "replay write exceeded {}s",
                self.timeout.as_secs()
            ))),
        }
    }

    /// Snapshot the queue to disk on the blocking pool.
    async fn save_journal(&self) {
        let Some(journal) = self.journal.clone() else {
            return;
        };
        let backup = self.backup.clone();
        let path = journal.path().display().to_string();
        match tokio::task::spawn_blocking(move || journal.save(&backup)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(path = %path, "Failed to save backup journal: {}", e),
            Err(e) => tracing::error!(path = %path, "Backup journal save task failed: {}", e),
        }
    }

    /// Run the replay loop until the shutdown flag flips.
    pub fn spawn(self, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                interval_secs = self.config.interval.as_secs(),
                max_attempts = self.config.max_attempts,
                "Retry worker starting"
            );
            let mut interval = tokio::time::interval(self.config.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.run_once().await;
                        self.save_journal().await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            self.save_journal().await;
            tracing::info!(pending = self.backup.len(), "Retry worker stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::FakeStore;
    use crate::telemetry::model::ActionInput;

    fn config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            interval: Duration::from_millis(10),
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            max_attempts,
        }
    }

    fn queued(backup: &BackupQueue, actions: &[&str]) {
        let now = Utc::now();
        for a in actions {
            let record = ActionInput::new(*a, "System").validate(now).unwrap();
            backup.push(BackupEntry::new(record, None, now));
        }
    }

    fn worker(store: Arc<FakeStore>, backup: Arc<BackupQueue>, max_attempts: u32) -> RetryWorker {
        RetryWorker::new(
            store,
            backup,
            "Metrics",
            config(max_attempts),
            Duration::from_secs(15),
        )
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let base = Duration::from_secs(5);
        let max = Duration::from_secs(300);
        assert_eq!(backoff_delay(1, base, max), Duration::from_secs(5));
        assert_eq!(backoff_delay(2, base, max), Duration::from_secs(10));
        assert_eq!(backoff_delay(4, base, max), Duration::from_secs(40));
        assert_eq!(backoff_delay(7, base, max), Duration::from_secs(300));
        assert_eq!(backoff_delay(40, base, max), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_replays_due_entries() {
        let store = Arc::new(FakeStore::healthy());
        let backup = Arc::new(BackupQueue::new());
        queued(&backup, &["a", "b", "c"]);

        let w = worker(store.clone(), backup.clone(), 5);
        let report = w.run_once().await;

        assert_eq!(report.replayed, 3);
        assert!(backup.is_empty());
        let actions: Vec<_> = store.rows("Metrics").iter().map(|r| r["action"].clone()).collect();
        assert_eq!(actions, vec!["a", "b", "c"]);
        assert_eq!(w.stats().snapshot().replayed, 3);
    }

    #[tokio::test]
    async fn test_skips_when_unconfigured() {
        let store = Arc::new(FakeStore::unconfigured());
        let backup = Arc::new(BackupQueue::new());
        queued(&backup, &["a"]);

        let report = worker(store, backup.clone(), 5).run_once().await;
        assert!(report.skipped);
        assert_eq!(backup.len(), 1);
    }

    #[tokio::test]
    async fn test_failure_backs_off_and_preserves_order() {
        let store = Arc::new(FakeStore::failing_writes());
        let backup = Arc::new(BackupQueue::new());
        queued(&backup, &["a", "b", "c"]);

        let report = worker(store.clone(), backup.clone(), 5).run_once().await;

        assert_eq!(report.failed, 1);
        assert_eq!(store.write_calls.load(Ordering::SeqCst), 1);
        let entries = backup.snapshot(10);
        let actions: Vec<_> = entries.iter().map(|e| e.action.as_str()).collect();
        assert_eq!(actions, vec!["a", "b", "c"]);
        assert_eq!(entries[0].attempts, 1);
        assert!(entries[0].next_attempt_at > Utc::now());
        assert_eq!(entries[1].attempts, 0);

        // "a" is backing off, so the next tick starts with "b".
        let taken = backup.drain_batch(10, Utc::now());
        let actions: Vec<_> = taken.iter().map(|e| e.action.as_str()).collect();
        assert_eq!(actions, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_exhausted_entries_are_dead_lettered() {
        let store = Arc::new(FakeStore::failing_writes());
        let backup = Arc::new(BackupQueue::new());
        queued(&backup, &["a"]);

        let w = worker(store, backup.clone(), 1);
        let report = w.run_once().await;

        assert_eq!(report.dead_lettered, 1);
        assert!(backup.is_empty());
        assert_eq!(backup.dead_letter_len(), 1);
        assert_eq!(backup.dead_letters(1)[0].attempts, 1);
        assert_eq!(w.stats().snapshot().dead_lettered, 1);
    }

    #[tokio::test]
    async fn test_recovers_after_store_comes_back() {
        let store = Arc::new(FakeStore::failing_writes());
        let backup = Arc::new(BackupQueue::new());
        queued(&backup, &["a"]);
        let w = worker(store.clone(), backup.clone(), 5);

        w.run_once().await;
        assert_eq!(backup.len(), 1);

        store.set_fail_writes(false);
        // Make the backed-off entry due again.
        let mut entry = backup.drain_batch(1, Utc::now() + chrono::Duration::hours(1)).remove(0);
        entry.next_attempt_at = Utc::now();
        backup.requeue(entry);

        let report = w.run_once().await;
        assert_eq!(report.replayed, 1);
        assert!(backup.is_empty());
    }

    #[tokio::test]
    async fn test_spawned_loop_drains_and_stops() {
        let store = Arc::new(FakeStore::healthy());
        let backup = Arc::new(BackupQueue::new());
        queued(&backup, &["a", "b"]);

        let dir = tempfile::tempdir().unwrap();
        let journal = BackupJournal::new(dir.path().join("backup.json"));
        let (tx, rx) = watch::channel(false);
        let handle = worker(store.clone(), backup.clone(), 5)
            .with_journal(Some(journal.clone()))
            .spawn(rx);

        for _ in 0..100 {
            if backup.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert!(backup.is_empty());
        assert_eq!(store.rows("Metrics").len(), 2);
        assert!(journal.path().exists());
        let restored = BackupQueue::new();
        assert_eq!(journal.load_into(&restored).unwrap(), 0);
    }
}
