use crate::cache::ShortTtlCache;
use crate::clock::Clock;
use crate::entry::{self, ReadyEntry};
use crate::error::Error;
use crate::store::{EntryScan, EntryStore, EntryTxn, RequestStore, ScanParams};
use crate::{dimensions, queue_key};
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use models::{Dimensions, RequestId, TaskRequest};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Config tunes the dispatch core.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Wall-time budget of one candidate scan. Yielding stops once the
    /// budget is spent, leaving the caller room to commit a reap within
    /// its own request deadline.
    #[serde(with = "humantime_serde")]
    pub scan_budget: Duration,
    /// Batch hint for the ordered ready scan.
    pub scan_batch: usize,
    /// Prefetch hint for the ordered ready scan.
    pub scan_prefetch: usize,
    /// Lifetime of negative-cache marks left by reaps and aborts. Long
    /// enough to ride out index staleness, short enough not to clog the
    /// cache.
    #[serde(with = "humantime_serde")]
    pub negative_cache_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scan_budget: Duration::from_secs(40),
            scan_batch: 50,
            scan_prefetch: 500,
            negative_cache_ttl: Duration::from_secs(120),
        }
    }
}

/// Dispatcher owns the ready queue: it files entries for new requests,
/// offers candidates to polling bots, toggles availability under the
/// store's transactions, and feeds the expiration sweep.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn EntryStore>,
    requests: Arc<dyn RequestStore>,
    cache: Arc<dyn ShortTtlCache>,
    clock: Arc<dyn Clock>,
    config: Config,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn EntryStore>,
        requests: Arc<dyn RequestStore>,
        cache: Arc<dyn ShortTtlCache>,
        clock: Arc<dyn Clock>,
        config: Config,
    ) -> Self {
        Self {
            store,
            requests,
            cache,
            clock,
            config,
        }
    }

    /// Files the ready-queue entry of a freshly created request and
    /// returns it, available for dispatch.
    #[tracing::instrument(skip_all, fields(request_id = %request.id))]
    pub async fn create(&self, request: &TaskRequest) -> Result<ReadyEntry, Error> {
        let entry = ReadyEntry::new(request)?;
        self.store.put(entry.clone()).await?;
        Ok(entry)
    }

    /// Asserts that `id` structurally refers to a ready-queue entry.
    pub fn validate(&self, id: RequestId) -> Result<(), Error> {
        entry::validate(id)
    }

    /// Begins a poll on behalf of a bot: candidates compatible with
    /// `bot_dimensions` are offered in non-decreasing queue order. Once
    /// the caller settles on one it must `reap` it, since another bot may
    /// be offered the same candidate concurrently.
    pub fn yield_candidates(
        &self,
        bot_dimensions: Dimensions,
        cancel: CancellationToken,
    ) -> Candidates {
        let allowed = dimensions::powerset(&bot_dimensions)
            .iter()
            .map(dimensions::hash)
            .collect();
        Candidates {
            scan: self.store.scan_ready(ScanParams {
                batch: self.config.scan_batch,
                prefetch: self.config.scan_prefetch,
            }),
            requests: self.requests.clone(),
            cache: self.cache.clone(),
            clock: self.clock.clone(),
            bot_dimensions,
            allowed,
            started: self.clock.now(),
            budget: self.config.scan_budget,
            batch: self.config.scan_batch,
            prefetch: self.config.scan_prefetch,
            cancel,
            counters: ScanCounters::default(),
            done: false,
        }
    }

    /// Claims the entry for the calling bot. Runs inside `txn`, which the
    /// caller opened and will commit; the entry's negative-cache mark is
    /// published only after that commit succeeds. Returns false if the
    /// entry was already claimed.
    pub async fn reap(&self, txn: &mut dyn EntryTxn, id: RequestId) -> Result<bool, Error> {
        entry::validate(id)?;
        let Some(mut entry) = txn.get(id).await? else {
            return Err(Error::EntryNotFound(id));
        };
        if entry.queue_number.is_none() {
            // Another bot reaped it in the meantime.
            return Ok(false);
        }
        entry.queue_number = None;
        let key = entry.negative_cache_key();
        txn.put(entry).await?;

        let (cache, ttl) = (self.cache.clone(), self.config.negative_cache_ttl);
        txn.on_commit(Box::pin(async move { cache.set(&key, ttl).await }));
        Ok(true)
    }

    /// Restores a claimed entry to the ready queue after a transient bot
    /// failure. The entry is re-keyed with the request's original
    /// priority and submission instant, so a retried request is not
    /// starved behind newer requests of equal priority.
    ///
    /// Opens its own transaction, with at most one retry; transient store
    /// faults are absorbed as `false`. Returns false as well if the entry
    /// is already available.
    pub async fn retry(&self, id: RequestId) -> Result<bool, Error> {
        entry::validate(id)?;
        let Some(request) = self.requests.get(id).await? else {
            return Err(Error::RequestNotFound(id));
        };
        let queue_number = queue_key::pack(request.priority, request.created_ts)?;

        let mut attempts = 0;
        let toggled = loop {
            attempts += 1;
            match self.try_restore(id, queue_number).await {
                Ok(toggled) => break toggled,
                Err(Error::Store(err)) if err.is_transient() && attempts < 2 => {
                    tracing::debug!(request_id = %id, %err, "restore lost a race, trying again");
                }
                Err(Error::Store(err)) if err.is_transient() => {
                    tracing::warn!(request_id = %id, %err, "failed to restore entry");
                    break false;
                }
                Err(err) => return Err(err),
            }
        };
        if toggled {
            self.cache.delete(&entry::negative_cache_key(id)).await;
        }
        Ok(toggled)
    }

    async fn try_restore(&self, id: RequestId, queue_number: u64) -> Result<bool, Error> {
        let mut txn = self.store.begin().await?;
        let Some(mut entry) = txn.get(id).await? else {
            return Err(Error::EntryNotFound(id));
        };
        if entry.queue_number.is_some() {
            return Ok(false); // Nothing to toggle.
        }
        entry.queue_number = Some(queue_number);
        txn.put(entry).await?;
        txn.commit().await?;
        Ok(true)
    }

    /// Permanently removes `entry` from the ready queue. Idempotent. Used
    /// to cancel a request outright, and by `sweep` once an entry
    /// expires.
    #[tracing::instrument(skip_all, fields(request_id = %entry.request_id))]
    pub async fn abort(&self, entry: &mut ReadyEntry) -> Result<(), Error> {
        entry.queue_number = None;
        self.store.put(entry.clone()).await?;
        self.cache
            .set(&entry.negative_cache_key(), self.config.negative_cache_ttl)
            .await;
        Ok(())
    }

    /// Lazily yields every entry still marked available but past its
    /// deadline. Reads only; cancellation is `sweep`'s job.
    pub fn yield_expired(&self) -> BoxStream<'static, Result<ReadyEntry, Error>> {
        let now = self.clock.now();
        self.store
            .scan_available()
            .try_filter(move |entry| {
                futures::future::ready(entry.is_available() && entry.expiration_ts < now)
            })
            .map_err(Error::from)
            .boxed()
    }

    /// Aborts every expired entry, returning the cancelled entries so the
    /// caller can record their outcome. Observes `cancel` between
    /// entries.
    #[tracing::instrument(skip_all)]
    pub async fn sweep(&self, cancel: &CancellationToken) -> Result<Vec<ReadyEntry>, Error> {
        let mut expired = self.yield_expired();
        let mut aborted = Vec::new();
        while let Some(mut entry) = expired.try_next().await? {
            if cancel.is_cancelled() {
                break;
            }
            self.abort(&mut entry).await?;
            tracing::info!(
                request_id = %entry.request_id,
                expiration_ts = %entry.expiration_ts,
                "cancelled expired entry"
            );
            aborted.push(entry);
        }
        Ok(aborted)
    }
}

/// Candidates offers `(request, entry)` pairs a bot may execute, in
/// non-decreasing queue order. Pull with `next`, and stop pulling once a
/// reap succeeds.
///
/// The scan self-terminates once its wall-time budget is spent or its
/// cancellation token fires, and logs a summary of what it skipped when
/// dropped.
pub struct Candidates {
    scan: EntryScan,
    requests: Arc<dyn RequestStore>,
    cache: Arc<dyn ShortTtlCache>,
    clock: Arc<dyn Clock>,
    bot_dimensions: Dimensions,
    allowed: HashSet<u32>,
    started: DateTime<Utc>,
    budget: Duration,
    batch: usize,
    prefetch: usize,
    cancel: CancellationToken,
    counters: ScanCounters,
    done: bool,
}

#[derive(Debug, Default)]
struct ScanCounters {
    total: u64,
    broken: u64,
    no_queue: u64,
    expired: u64,
    hash_mismatch: u64,
    negative_cache: u64,
    real_mismatch: u64,
    yielded: u64,
}

impl Candidates {
    /// The next candidate this bot could execute, or None once the scan
    /// is exhausted, over budget, or cancelled.
    pub async fn next(&mut self) -> Result<Option<(TaskRequest, ReadyEntry)>, Error> {
        while !self.done {
            if self.cancel.is_cancelled() {
                self.done = true;
                break;
            }
            let elapsed = (self.clock.now() - self.started).to_std().unwrap_or_default();
            if elapsed > self.budget {
                self.done = true;
                break;
            }
            let Some(entry) = self.scan.try_next().await? else {
                self.done = true;
                break;
            };
            self.counters.total += 1;

            if entry::validate(entry.request_id).is_err() {
                tracing::error!(request_id = %entry.request_id, "skipping malformed entry");
                self.counters.broken += 1;
                continue;
            }
            // The index lags entry transactions, so the scan can return
            // entries which are no longer available.
            if entry.queue_number.is_none() {
                self.counters.no_queue += 1;
                continue;
            }
            // Expired entries are skipped, not surfaced: the sweep cron
            // cancels them. Comparing against the scan's initial snapshot
            // keeps a slow scan from exaggerating expirations.
            if entry.expiration_ts < self.started {
                self.counters.expired += 1;
                continue;
            }
            if !self.allowed.contains(&entry.dimensions_hash) {
                self.counters.hash_mismatch += 1;
                continue;
            }
            // Cheap filter before the request fetch and the transactional
            // reap: skip entries some other bot reaped moments ago.
            if self.cache.get(&entry.negative_cache_key()).await {
                self.counters.negative_cache += 1;
                continue;
            }
            // The 32-bit fingerprint can collide, so re-check the
            // authoritative request before offering it.
            let Some(request) = self.requests.get(entry.request_id).await? else {
                self.counters.broken += 1;
                continue;
            };
            if !dimensions::matches(&request.properties.dimensions, &self.bot_dimensions) {
                self.counters.real_mismatch += 1;
                continue;
            }

            self.counters.yielded += 1;
            return Ok(Some((request, entry)));
        }
        Ok(None)
    }
}

impl Drop for Candidates {
    fn drop(&mut self) {
        let elapsed = (self.clock.now() - self.started).to_std().unwrap_or_default();
        tracing::info!(
            batch = self.batch,
            prefetch = self.prefetch,
            elapsed = ?elapsed,
            total = self.counters.total,
            expired = self.counters.expired,
            no_queue = self.counters.no_queue,
            hash_mismatch = self.counters.hash_mismatch,
            negative_cache = self.counters.negative_cache,
            real_mismatch = self.counters.real_mismatch,
            yielded = self.counters.yielded,
            broken = self.counters.broken,
            "scanned the ready queue"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.scan_budget, Duration::from_secs(40));
        assert_eq!(config.scan_batch, 50);
        assert_eq!(config.scan_prefetch, 500);
        assert_eq!(config.negative_cache_ttl, Duration::from_secs(120));
    }

    #[test]
    fn test_config_overrides_with_human_durations() {
        let config: Config = serde_json::from_value(json!({
            "scan_budget": "15s",
            "negative_cache_ttl": "2m",
        }))
        .unwrap();
        assert_eq!(config.scan_budget, Duration::from_secs(15));
        assert_eq!(config.scan_batch, 50);
        assert_eq!(config.negative_cache_ttl, Duration::from_secs(120));
    }
}
