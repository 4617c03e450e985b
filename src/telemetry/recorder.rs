use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use super::backup::BackupQueue;
use super::model::{ActionInput, ActionRecord, BackupEntry};
use crate::error::AppError;
use crate::store::RecordStore;

/// Result of one ingestion: exactly one of the two flags is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecordOutcome {
    pub persisted: bool,
    pub queued: bool,
}

impl RecordOutcome {
    pub const PERSISTED: Self = Self {
        persisted: true,
        queued: false,
    };
    pub const QUEUED: Self = Self {
        persisted: false,
        queued: true,
    };
}

/// Public ingestion point for action telemetry.
///
/// Validation failures are the only errors returned. Store failures of any
/// kind end with the record in the backup queue.
pub struct ActionRecorder {
    store: Arc<dyn RecordStore>,
    backup: Arc<BackupQueue>,
    collection: String,
    timeout: Duration,
    warned_unconfigured: AtomicBool,
}

impl ActionRecorder {
    pub fn new(
        store: Arc<dyn RecordStore>,
        backup: Arc<BackupQueue>,
        collection: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            backup,
            collection: collection.into(),
            timeout,
            warned_unconfigured: AtomicBool::new(false),
        }
    }

    pub fn backup(&self) -> &Arc<BackupQueue> {
        &self.backup
    }

    /// Validate, stamp, attempt one remote write, fall back to the backup queue.
    pub async fn record(&self, input: ActionInput) -> Result<RecordOutcome, AppError> {
        let record = match input.validate(Utc::now()) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "Rejected action record");
                return Err(e);
            }
        };
        Ok(self.record_validated(record).await)
    }

    /// Ingest an already-validated record. Never fails.
    pub async fn record_validated(&self, record: ActionRecord) -> RecordOutcome {
        if !self.store.is_configured() {
            if !self.warned_unconfigured.swap(true, Ordering::Relaxed) {
                tracing::warn!(
                    "Record store token missing: action telemetry is queue-only until configured"
                );
            }
            tracing::info!(
                action = record.action(),
                actor = record.actor(),
                outcome = "queued",
                "Action queued, record store not configured"
            );
            self.enqueue(record, Some("record store token is not configured".into()));
            return RecordOutcome::QUEUED;
        }

        let fields = [record.to_store_fields()];
        let result = match tokio::time::timeout(
            self.timeout,
            self.store.write(&self.collection, &fields),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(format!(
                "record store write exceeded {}s",
                self.timeout.as_secs()
            ))),
        };

        match result {
            Ok(ack) => {
                tracing::info!(
                    action = record.action(),
                    actor = record.actor(),
                    outcome = "persisted",
                    record_id = ack.ids.first().map(String::as_str).unwrap_or(""),
                    "Action recorded"
                );
                RecordOutcome::PERSISTED
            }
            Err(e) => {
                match &e {
                    AppError::Store { status, body } => tracing::warn!(
                        action = record.action(),
                        actor = record.actor(),
                        outcome = "queued",
                        status,
                        body = body.as_str(),
                        "Record store rejected action, queued for replay"
                    ),
                    other => tracing::warn!(
                        action = record.action(),
                        actor = record.actor(),
                        outcome = "queued",
                        error = %other,
                        "Record store unreachable, queued action for replay"
                    ),
                }
                self.enqueue(record, Some(e.to_string()));
                RecordOutcome::QUEUED
            }
        }
    }

    fn enqueue(&self, record: ActionRecord, error: Option<String>) {
        let entry = BackupEntry::new(record, error, Utc::now());
        if let Some(evicted) = self.backup.push(entry) {
            tracing::warn!(
                evicted_action = %evicted.action,
                evicted_at = %evicted.timestamp,
                "Backup queue at capacity, evicted oldest entry"
            );
        }
    }
}
