use crate::store::StoreError;
use models::RequestId;

/// Error is the typed failure surface of the dispatch core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("identity {0} does not refer to a ready-queue entry")]
    InvalidEntryKind(RequestId),
    #[error("priority {0} is outside of the supported [0, 255] range")]
    InvalidPriority(u16),
    #[error("timestamp {0} does not fit the 47-bit millisecond window")]
    InvalidTimestamp(chrono::DateTime<chrono::Utc>),
    #[error("ready-queue entry {0} was not found")]
    EntryNotFound(RequestId),
    #[error("task request {0} was not found")]
    RequestNotFound(RequestId),
    #[error(transparent)]
    Store(#[from] StoreError),
}
