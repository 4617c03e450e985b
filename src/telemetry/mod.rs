//! Action telemetry: validation, remote persistence, and the in-process
//! fallback queue that holds records the store could not accept.

pub mod backup;
pub mod model;
pub mod recorder;
pub mod retry;

pub use backup::{BackupJournal, BackupQueue};
pub use model::{ActionFields, ActionInput, ActionRecord, BackupEntry, Scalar};
pub use recorder::{ActionRecorder, RecordOutcome};
pub use retry::{RetryStats, RetryStatsSnapshot, RetryWorker};
