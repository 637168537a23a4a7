use crate::entry::ReadyEntry;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use models::{RequestId, TaskRequest};

/// StoreError is the persistence collaborator's failure taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("transaction lost a write race")]
    Contention,
    #[error("store operation timed out")]
    Timeout,
    #[error("transaction failed to commit")]
    TransactionFailed,
    #[error("store operation was cancelled")]
    Cancelled,
    #[error("malformed store request: {0}")]
    BadRequest(String),
    #[error("internal store fault: {0}")]
    Internal(String),
}

impl StoreError {
    /// Transient faults clear on their own. Mutators which can safely
    /// report "not this time" absorb them instead of surfacing them.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Contention | Self::Timeout | Self::TransactionFailed | Self::Cancelled
        )
    }
}

/// Hints for the ordered ready scan. Implementations may tune around them,
/// but must not load the entire queue eagerly.
#[derive(Debug, Clone, Copy)]
pub struct ScanParams {
    /// Entries fetched per underlying batch.
    pub batch: usize,
    /// Entries the scan may stage ahead of its consumer.
    pub prefetch: usize,
}

/// EntryScan lazily yields entries, and may block on I/O between batches.
pub type EntryScan = BoxStream<'static, Result<ReadyEntry, StoreError>>;

/// EntryTxn is a single strongly-consistent transaction over entries.
/// Reads observe committed state, writes are staged, and `commit` applies
/// them atomically. Dropping the handle abandons the transaction.
#[async_trait::async_trait]
pub trait EntryTxn: Send {
    /// Re-reads an entry.
    async fn get(&mut self, id: RequestId) -> Result<Option<ReadyEntry>, StoreError>;
    /// Stages a write of `entry`.
    async fn put(&mut self, entry: ReadyEntry) -> Result<(), StoreError>;
    /// Registers work to run strictly after a successful commit.
    fn on_commit(&mut self, action: BoxFuture<'static, ()>);
    /// Atomically applies the staged writes, then runs deferred work.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// EntryStore is the persistence seam for ready-queue entries: a
/// strongly-consistent record store with eventually-consistent scans.
#[async_trait::async_trait]
pub trait EntryStore: Send + Sync + 'static {
    async fn get(&self, id: RequestId) -> Result<Option<ReadyEntry>, StoreError>;
    /// Non-transactional upsert.
    async fn put(&self, entry: ReadyEntry) -> Result<(), StoreError>;
    /// Opens a transaction.
    async fn begin(&self) -> Result<Box<dyn EntryTxn>, StoreError>;
    /// Streams entries whose queue_number is present and strictly
    /// positive, ordered on queue_number ascending. The backing index is
    /// eventually consistent: consumers must re-check what they read.
    fn scan_ready(&self, params: ScanParams) -> EntryScan;
    /// Streams entries whose queue_number is present, in no particular
    /// order. Also eventually consistent.
    fn scan_available(&self) -> EntryScan;
}

/// RequestStore resolves the TaskRequest owning a ready-queue entry.
#[async_trait::async_trait]
pub trait RequestStore: Send + Sync + 'static {
    async fn get(&self, id: RequestId) -> Result<Option<TaskRequest>, StoreError>;
}
