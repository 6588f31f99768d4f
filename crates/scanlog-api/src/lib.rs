mod memory;
mod webhook;
mod wire;

use async_trait::async_trait;
use scanlog_core::{Record, ScanResult};
use serde::Serialize;

pub use memory::MemoryRemote;
pub use webhook::WebhookClient;
pub use wire::{PushRequest, RemoteRecord, RemoteStatus};

/// Outcome of a single upsert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ack {
    pub id: String,
    /// `false` when the transport gave no readable answer and success is
    /// assumed because the request itself went through.
    pub confirmed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchAck {
    pub added: u64,
    pub updated: u64,
    pub total_processed: u64,
    pub confirmed: bool,
}

/// Authenticated operations against the remote record store.
///
/// Implementations never touch local state; callers apply the results.
#[async_trait]
pub trait RemoteAdapter: Send + Sync {
    async fn push_one(&self, record: &Record, token: &str) -> ScanResult<Ack>;

    async fn push_batch(&self, records: &[Record], token: &str) -> ScanResult<BatchAck>;

    /// The complete authoritative set, newest first.
    async fn pull_all(&self, token: &str) -> ScanResult<Vec<RemoteRecord>>;
}
