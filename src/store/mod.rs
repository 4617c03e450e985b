//! Remote tabular record store: the durable home for telemetry and execution-log rows.

pub mod client;
pub mod types;

use async_trait::async_trait;

use crate::error::AppError;

pub use client::RecordStoreClient;
pub use types::{Fields, ReadQuery, StoreRow, WriteAck};

/// Write/read access to the record store.
///
/// A batch write is atomic from the caller's perspective: it either
/// round-trips completely or returns an error.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Whether an auth token is available. Unconfigured stores reject every call.
    fn is_configured(&self) -> bool;

    async fn write(&self, collection: &str, records: &[Fields]) -> Result<WriteAck, AppError>;

    async fn read(
        &self,
        collection: &str,
        query: Option<&ReadQuery>,
    ) -> Result<Vec<StoreRow>, AppError>;
}
