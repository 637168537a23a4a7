//! In-process implementations of the store, request lookup, and negative
//! cache seams, used by tests and single-node deployments.

use crate::cache::ShortTtlCache;
use crate::clock::Clock;
use crate::entry::ReadyEntry;
use crate::store::{EntryScan, EntryStore, EntryTxn, RequestStore, ScanParams, StoreError};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::StreamExt;
use models::{RequestId, TaskRequest};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ops::Bound;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// MemoryStore holds entries and requests in process memory.
///
/// Records are strongly consistent. The ordered scan reads a secondary
/// index which is not updated by entry transactions: rows for entries
/// that are no longer available linger until a scan observes them, just
/// as a production index would lag, so consumers exercise the same
/// re-check paths they need against a real store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    // Serializes transactions, making the commit of one visible to the
    // reads of the next. This is the store's single-entity transaction
    // guarantee, and the serialization point for concurrent reaps.
    txn_lock: Arc<tokio::sync::Mutex<()>>,
}

#[derive(Default)]
struct State {
    entries: HashMap<RequestId, ReadyEntry>,
    requests: HashMap<RequestId, TaskRequest>,
    // Secondary index on (queue_number, request_id). Rows are added when
    // an available entry is written and pruned lazily by scans.
    index: BTreeMap<(u64, RequestId), ()>,
}

impl State {
    fn apply(&mut self, entry: ReadyEntry) {
        if let Some(queue_number) = entry.queue_number {
            self.index.insert((queue_number, entry.request_id), ());
        }
        self.entries.insert(entry.request_id, entry);
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a request for `RequestStore` lookups.
    pub fn insert_request(&self, request: TaskRequest) {
        let mut state = self.state.lock().unwrap();
        state.requests.insert(request.id, request);
    }
}

#[async_trait::async_trait]
impl EntryStore for MemoryStore {
    async fn get(&self, id: RequestId) -> Result<Option<ReadyEntry>, StoreError> {
        Ok(self.state.lock().unwrap().entries.get(&id).cloned())
    }

    async fn put(&self, entry: ReadyEntry) -> Result<(), StoreError> {
        self.state.lock().unwrap().apply(entry);
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn EntryTxn>, StoreError> {
        let guard = self.txn_lock.clone().lock_owned().await;
        Ok(Box::new(MemoryTxn {
            state: self.state.clone(),
            staged: Vec::new(),
            deferred: Vec::new(),
            _guard: guard,
        }))
    }

    fn scan_ready(&self, params: ScanParams) -> EntryScan {
        let cursor = ScanCursor {
            state: self.state.clone(),
            batch: params.batch.max(1),
            after: None,
            buffered: VecDeque::new(),
            done: false,
        };
        futures::stream::try_unfold(cursor, |mut cursor| async move {
            if cursor.buffered.is_empty() && !cursor.done {
                // A real store blocks on I/O between batches.
                tokio::task::yield_now().await;
                cursor.fill();
            }
            Ok::<_, StoreError>(cursor.buffered.pop_front().map(|entry| (entry, cursor)))
        })
        .boxed()
    }

    fn scan_available(&self) -> EntryScan {
        let snapshot: Vec<ReadyEntry> = {
            let state = self.state.lock().unwrap();
            state
                .entries
                .values()
                .filter(|entry| entry.is_available())
                .cloned()
                .collect()
        };
        futures::stream::iter(snapshot.into_iter().map(Ok)).boxed()
    }
}

#[async_trait::async_trait]
impl RequestStore for MemoryStore {
    async fn get(&self, id: RequestId) -> Result<Option<TaskRequest>, StoreError> {
        Ok(self.state.lock().unwrap().requests.get(&id).cloned())
    }
}

struct ScanCursor {
    state: Arc<Mutex<State>>,
    batch: usize,
    after: Option<(u64, RequestId)>,
    buffered: VecDeque<ReadyEntry>,
    done: bool,
}

impl ScanCursor {
    // Buffers the next batch of index rows, resolving each to its
    // authoritative entry. A row whose entry no longer carries that key is
    // stale: it is surfaced once (consumers re-check availability) and
    // pruned.
    fn fill(&mut self) {
        let mut guard = self.state.lock().unwrap();
        let State { entries, index, .. } = &mut *guard;

        let mut stale = Vec::new();
        let range = match self.after {
            Some(bound) => index.range((Bound::Excluded(bound), Bound::Unbounded)),
            None => index.range(..),
        };
        for (&row, _) in range {
            if self.buffered.len() == self.batch {
                break;
            }
            let (queue_number, request_id) = row;
            self.after = Some(row);
            if queue_number == 0 {
                continue;
            }
            match entries.get(&request_id) {
                Some(entry) if entry.queue_number == Some(queue_number) => {
                    self.buffered.push_back(entry.clone());
                }
                Some(entry) => {
                    stale.push(row);
                    self.buffered.push_back(entry.clone());
                }
                None => stale.push(row),
            }
        }
        for row in stale {
            index.remove(&row);
        }
        if self.buffered.is_empty() {
            self.done = true;
        }
    }
}

struct MemoryTxn {
    state: Arc<Mutex<State>>,
    staged: Vec<ReadyEntry>,
    deferred: Vec<BoxFuture<'static, ()>>,
    _guard: tokio::sync::OwnedMutexGuard<()>,
}

#[async_trait::async_trait]
impl EntryTxn for MemoryTxn {
    async fn get(&mut self, id: RequestId) -> Result<Option<ReadyEntry>, StoreError> {
        // Read-your-writes: staged entries shadow committed state.
        if let Some(staged) = self.staged.iter().rev().find(|e| e.request_id == id) {
            return Ok(Some(staged.clone()));
        }
        Ok(self.state.lock().unwrap().entries.get(&id).cloned())
    }

    async fn put(&mut self, entry: ReadyEntry) -> Result<(), StoreError> {
        self.staged.push(entry);
        Ok(())
    }

    fn on_commit(&mut self, action: BoxFuture<'static, ()>) {
        self.deferred.push(action);
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTxn {
            state,
            staged,
            deferred,
            _guard,
        } = *self;
        {
            let mut state = state.lock().unwrap();
            for entry in staged {
                state.apply(entry);
            }
        }
        // Release the transaction before running deferred work, which may
        // itself take time or touch the store.
        std::mem::drop(_guard);
        for action in deferred {
            action.await;
        }
        Ok(())
    }
}

/// MemoryCache is an in-process ShortTtlCache over an injected Clock.
pub struct MemoryCache {
    clock: Arc<dyn Clock>,
    marks: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl MemoryCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            marks: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait::async_trait]
impl ShortTtlCache for MemoryCache {
    async fn set(&self, key: &str, ttl: Duration) {
        let expires = match chrono::Duration::from_std(ttl) {
            Ok(ttl) => self.clock.now() + ttl,
            Err(_) => DateTime::<Utc>::MAX_UTC,
        };
        self.marks.lock().unwrap().insert(key.to_string(), expires);
    }

    async fn delete(&self, key: &str) {
        self.marks.lock().unwrap().remove(key);
    }

    async fn get(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut marks = self.marks.lock().unwrap();
        match marks.get(key) {
            Some(&expires) if expires > now => true,
            Some(_) => {
                marks.remove(key);
                false
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use futures::TryStreamExt;

    fn entry(id: u64, queue_number: Option<u64>) -> ReadyEntry {
        ReadyEntry {
            request_id: RequestId::new(id),
            dimensions_hash: 0xf50681b3,
            expiration_ts: "2014-01-02T03:05:05Z".parse().unwrap(),
            queue_number,
        }
    }

    const SCAN: ScanParams = ScanParams {
        batch: 2,
        prefetch: 4,
    };

    #[tokio::test]
    async fn test_scan_orders_on_queue_number() {
        let store = MemoryStore::new();
        for (id, queue_number) in [(1, 300), (2, 100), (3, 200)] {
            store.put(entry(id, Some(queue_number))).await.unwrap();
        }

        let scanned: Vec<ReadyEntry> = store.scan_ready(SCAN).try_collect().await.unwrap();
        let order: Vec<u64> = scanned.iter().map(|e| e.request_id.as_u64()).collect();
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[tokio::test]
    async fn test_scan_surfaces_stale_index_row_once() {
        let store = MemoryStore::new();
        store.put(entry(1, Some(100))).await.unwrap();

        // Clear availability through a transaction, which leaves the
        // index row behind.
        let mut txn = store.begin().await.unwrap();
        txn.put(entry(1, None)).await.unwrap();
        txn.commit().await.unwrap();

        // The first scan still observes the row, resolving the entry in
        // its authoritative, unavailable state.
        let scanned: Vec<ReadyEntry> = store.scan_ready(SCAN).try_collect().await.unwrap();
        assert_eq!(scanned.len(), 1);
        assert_eq!(scanned[0].queue_number, None);

        // The row was pruned: a second scan is clean.
        let scanned: Vec<ReadyEntry> = store.scan_ready(SCAN).try_collect().await.unwrap();
        assert!(scanned.is_empty());
    }

    #[tokio::test]
    async fn test_txn_reads_its_own_writes_and_commits_atomically() {
        let store = MemoryStore::new();
        store.put(entry(1, Some(100))).await.unwrap();

        let mut txn = store.begin().await.unwrap();
        let read = txn.get(RequestId::new(1)).await.unwrap().unwrap();
        assert_eq!(read.queue_number, Some(100));

        txn.put(entry(1, None)).await.unwrap();
        let read = txn.get(RequestId::new(1)).await.unwrap().unwrap();
        assert_eq!(read.queue_number, None);

        // Not committed yet: the store still sees the old state.
        let committed = EntryStore::get(&store, RequestId::new(1)).await.unwrap();
        assert_eq!(committed.unwrap().queue_number, Some(100));

        txn.commit().await.unwrap();
        let committed = EntryStore::get(&store, RequestId::new(1)).await.unwrap();
        assert_eq!(committed.unwrap().queue_number, None);
    }

    #[tokio::test]
    async fn test_dropped_txn_discards_staged_writes() {
        let store = MemoryStore::new();
        store.put(entry(1, Some(100))).await.unwrap();

        let mut txn = store.begin().await.unwrap();
        txn.put(entry(1, None)).await.unwrap();
        std::mem::drop(txn);

        let committed = EntryStore::get(&store, RequestId::new(1)).await.unwrap();
        assert_eq!(committed.unwrap().queue_number, Some(100));
    }

    #[tokio::test]
    async fn test_cache_marks_expire() {
        let clock = ManualClock::new("2014-01-02T03:04:05Z".parse().unwrap());
        let cache = MemoryCache::new(Arc::new(clock.clone()));

        cache.set("abc", Duration::from_secs(120)).await;
        assert!(cache.get("abc").await);
        assert!(!cache.get("missing").await);

        clock.advance(chrono::Duration::seconds(119));
        assert!(cache.get("abc").await);

        // Marks expire at exactly their deadline.
        clock.advance(chrono::Duration::seconds(1));
        assert!(!cache.get("abc").await);
    }

    #[tokio::test]
    async fn test_cache_delete() {
        let clock = ManualClock::new("2014-01-02T03:04:05Z".parse().unwrap());
        let cache = MemoryCache::new(Arc::new(clock));

        cache.set("abc", Duration::from_secs(120)).await;
        cache.delete("abc").await;
        assert!(!cache.get("abc").await);
    }
}
