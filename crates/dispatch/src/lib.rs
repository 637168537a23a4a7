//! The ready-queue core of the swarm dispatch service.
//!
//! Workers ("bots") poll with their capability dimensions and are offered
//! the highest-priority compatible pending task. This crate owns the queue
//! of dispatchable entries: creating them from filed requests, streaming
//! candidates to polling bots, claiming an entry for exactly one bot at a
//! time, restoring entries after transient bot failures, and sweeping out
//! entries which expired before any bot claimed them.
//!
//! Persistence, the negative cache, and the clock are collaborator seams
//! (`EntryStore`, `ShortTtlCache`, `Clock`); in-process implementations
//! live in `memory` for tests and single-node use.

mod cache;
mod clock;
pub mod dimensions;
mod dispatch;
mod entry;
mod error;
mod memory;
pub mod queue_key;
mod store;

pub use cache::ShortTtlCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatch::{Candidates, Config, Dispatcher};
pub use entry::{negative_cache_key, validate, ReadyEntry};
pub use error::Error;
pub use memory::{MemoryCache, MemoryStore};
pub use store::{EntryScan, EntryStore, EntryTxn, RequestStore, ScanParams, StoreError};
