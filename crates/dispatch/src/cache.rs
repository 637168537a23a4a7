use std::time::Duration;

/// ShortTtlCache is the negative-cache seam: a shared, short-lived map of
/// entries which were reaped moments ago, consulted before attempting a
/// transactional claim on a hot entry.
///
/// The cache is strictly advisory. A false positive delays dispatch of an
/// entry by at most the TTL; a false negative is caught by the re-read
/// inside the reap transaction.
#[async_trait::async_trait]
pub trait ShortTtlCache: Send + Sync + 'static {
    /// Marks `key` present for at most `ttl`.
    async fn set(&self, key: &str, ttl: Duration);
    /// Removes `key` immediately.
    async fn delete(&self, key: &str);
    /// True if `key` is present and unexpired. Absent keys are false.
    async fn get(&self, key: &str) -> bool;
}
