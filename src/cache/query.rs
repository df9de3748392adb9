//! Dependency-tagged query cache with request deduplication.
//!
//! Entries expire lazily at read time and can be dropped in bulk by tag.
//! Concurrent misses for the same key share one underlying fetch: the first
//! caller spawns it as a detached task and registers a shared handle in the
//! in-flight map, later callers await that handle.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use metrics::counter;
use tokio::time::Instant;
use tracing::debug;

use crate::application::error::QueryError;

use super::lock::{rw_read, rw_write};
use super::tags::{CacheTag, TagIndex};

const SOURCE: &str = "cache::query";

const METRIC_HIT: &str = "vitrine_query_cache_hit_total";
const METRIC_MISS: &str = "vitrine_query_cache_miss_total";
const METRIC_DEDUP: &str = "vitrine_query_cache_dedup_total";

type SharedFetch<T> = Shared<BoxFuture<'static, Result<Arc<T>, QueryError>>>;

/// Time-to-live and invalidation tags for a cached result.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub ttl: Duration,
    pub tags: HashSet<CacheTag>,
}

impl FetchOptions {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            tags: HashSet::new(),
        }
    }

    pub fn tag(mut self, tag: CacheTag) -> Self {
        self.tags.insert(tag);
        self
    }
}

struct CacheEntry<T> {
    value: Arc<T>,
    expires_at: Instant,
}

struct Entries<T> {
    values: HashMap<String, CacheEntry<T>>,
    index: TagIndex,
}

struct Inner<T> {
    name: &'static str,
    entries: RwLock<Entries<T>>,
    in_flight: DashMap<String, (u64, SharedFetch<T>)>,
    generation: AtomicU64,
}

/// Keyed store of query results with TTL, tags and in-flight deduplication.
///
/// Cloning is cheap and every clone shares the same state.
pub struct QueryCache<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for QueryCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> QueryCache<T>
where
    T: Send + Sync + 'static,
{
    /// Create an empty cache; `name` labels logs and metrics.
    pub fn new(name: &'static str) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                entries: RwLock::new(Entries {
                    values: HashMap::new(),
                    index: TagIndex::default(),
                }),
                in_flight: DashMap::new(),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Return the cached value if present and not yet expired.
    ///
    /// An expired entry is dropped on the way out.
    pub fn get(&self, key: &str) -> Option<Arc<T>> {
        let now = Instant::now();
        {
            let entries = rw_read(&self.inner.entries, SOURCE, "get");
            match entries.values.get(key) {
                Some(entry) if now < entry.expires_at => {
                    counter!(METRIC_HIT, "cache" => self.inner.name).increment(1);
                    return Some(Arc::clone(&entry.value));
                }
                Some(_) => {}
                None => {
                    counter!(METRIC_MISS, "cache" => self.inner.name).increment(1);
                    return None;
                }
            }
        }

        let mut entries = rw_write(&self.inner.entries, SOURCE, "get.expire");
        let expired = entries
            .values
            .get(key)
            .is_some_and(|entry| now >= entry.expires_at);
        if expired {
            entries.values.remove(key);
            entries.index.unregister(key);
            debug!(cache = self.inner.name, key, "dropped expired entry");
        }
        counter!(METRIC_MISS, "cache" => self.inner.name).increment(1);
        None
    }

    /// Store `value` under `key`, replacing any previous entry.
    pub fn insert(&self, key: &str, value: T, options: FetchOptions) -> Arc<T> {
        let value = Arc::new(value);
        store(&self.inner, key, Arc::clone(&value), options);
        value
    }

    /// Return the cached value, joining or starting a fetch on a miss.
    ///
    /// Failures are never cached; the in-flight marker is cleared as soon as
    /// the fetch settles so the next call retries.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &str,
        fetch: F,
        options: FetchOptions,
    ) -> Result<Arc<T>, QueryError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let shared = match self.inner.in_flight.entry(key.to_string()) {
            Entry::Occupied(occupied) => {
                counter!(METRIC_DEDUP, "cache" => self.inner.name).increment(1);
                debug!(cache = self.inner.name, key, "joined in-flight fetch");
                occupied.get().1.clone()
            }
            Entry::Vacant(vacant) => {
                // A fetch may have settled between the lookup above and
                // claiming the slot.
                if let Some(value) = self.peek(key) {
                    return Ok(value);
                }
                let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
                let shared = spawn_fetch(
                    Arc::clone(&self.inner),
                    key.to_string(),
                    generation,
                    fetch(),
                    options,
                );
                vacant.insert((generation, shared.clone()));
                shared
            }
        };

        shared.await
    }

    /// Drop every entry carrying `tag`. Returns the number of entries removed.
    ///
    /// Fetches already in flight are not interrupted.
    pub fn invalidate(&self, tag: &CacheTag) -> usize {
        let mut entries = rw_write(&self.inner.entries, SOURCE, "invalidate");
        let keys = entries.index.take_tag(tag);
        for key in &keys {
            entries.values.remove(key);
        }
        debug!(
            cache = self.inner.name,
            tag = %tag,
            removed = keys.len(),
            "invalidated tag"
        );
        keys.len()
    }

    pub fn clear(&self) {
        let mut entries = rw_write(&self.inner.entries, SOURCE, "clear");
        entries.values.clear();
        entries.index.clear();
    }

    /// Number of stored entries, including expired ones not yet read.
    pub fn len(&self) -> usize {
        rw_read(&self.inner.entries, SOURCE, "len").values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight_len(&self) -> usize {
        self.inner.in_flight.len()
    }

    fn peek(&self, key: &str) -> Option<Arc<T>> {
        let now = Instant::now();
        rw_read(&self.inner.entries, SOURCE, "peek")
            .values
            .get(key)
            .filter(|entry| now < entry.expires_at)
            .map(|entry| Arc::clone(&entry.value))
    }
}

fn store<T>(inner: &Inner<T>, key: &str, value: Arc<T>, options: FetchOptions) {
    let expires_at = Instant::now() + options.ttl;
    let mut entries = rw_write(&inner.entries, SOURCE, "store");
    entries.index.register(key, options.tags);
    entries
        .values
        .insert(key.to_string(), CacheEntry { value, expires_at });
}

/// Clears the in-flight slot it was created for, even if the fetch panics.
struct InFlightGuard<T> {
    inner: Arc<Inner<T>>,
    key: String,
    generation: u64,
}

impl<T> Drop for InFlightGuard<T> {
    fn drop(&mut self) {
        let generation = self.generation;
        self.inner
            .in_flight
            .remove_if(&self.key, |_, (current, _)| *current == generation);
    }
}

fn spawn_fetch<T, Fut>(
    inner: Arc<Inner<T>>,
    key: String,
    generation: u64,
    fetch: Fut,
    options: FetchOptions,
) -> SharedFetch<T>
where
    T: Send + Sync + 'static,
    Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
{
    let handle = tokio::spawn(async move {
        let guard = InFlightGuard {
            inner,
            key,
            generation,
        };
        let result = fetch.await.map(Arc::new);
        match &result {
            Ok(value) => store(&guard.inner, &guard.key, Arc::clone(value), options),
            Err(err) => debug!(
                cache = guard.inner.name,
                key = %guard.key,
                error = %err,
                "fetch failed; nothing cached"
            ),
        }
        drop(guard);
        result
    });

    async move {
        handle
            .await
            .unwrap_or_else(|err| Err(QueryError::Aborted(err.to_string())))
    }
    .boxed()
    .shared()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tokio::sync::Notify;

    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    fn counting_fetch(
        calls: &Arc<AtomicUsize>,
        value: u32,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<u32, QueryError>> {
        let calls = Arc::clone(calls);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(value) }.boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_misses_share_one_fetch() {
        let cache = QueryCache::<u32>::new("test");
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let first = {
            let calls = Arc::clone(&calls);
            let gate = Arc::clone(&gate);
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    gate.notified().await;
                    Ok(7)
                }
            }
        };
        let second = {
            let calls = Arc::clone(&calls);
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok(99) }
            }
        };

        let (a, b, ()) = tokio::join!(
            cache.get_or_fetch("k", first, FetchOptions::new(TTL)),
            cache.get_or_fetch("k", second, FetchOptions::new(TTL)),
            async { gate.notify_one() },
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*a.expect("first caller"), 7);
        assert_eq!(*b.expect("second caller"), 7);
        assert_eq!(cache.in_flight_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_at_ttl() {
        let cache = QueryCache::<u32>::new("test");
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get_or_fetch("k", counting_fetch(&calls, 1), FetchOptions::new(TTL))
            .await
            .expect("fetch");

        tokio::time::advance(TTL - Duration::from_millis(1)).await;
        assert!(cache.get("k").is_some());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());

        cache
            .get_or_fetch("k", counting_fetch(&calls, 2), FetchOptions::new(TTL))
            .await
            .expect("refetch");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidating_a_tag_keeps_other_entries() {
        let cache = QueryCache::<u32>::new("test");
        cache.insert(
            "s1",
            1,
            FetchOptions::new(TTL).tag(CacheTag::section("1")),
        );
        cache.insert(
            "s2",
            2,
            FetchOptions::new(TTL).tag(CacheTag::section("2")),
        );

        assert_eq!(cache.invalidate(&CacheTag::section("1")), 1);

        assert!(cache.get("s1").is_none());
        assert_eq!(cache.get("s2").as_deref(), Some(&2));
    }

    #[tokio::test]
    async fn invalidating_unknown_tag_is_a_no_op() {
        let cache = QueryCache::<u32>::new("test");
        cache.insert("k", 1, FetchOptions::new(TTL));
        assert_eq!(cache.invalidate(&CacheTag::Menus), 0);
        assert!(cache.get("k").is_some());
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let cache = QueryCache::<u32>::new("test");
        let calls = Arc::new(AtomicUsize::new(0));

        let failing = {
            let calls = Arc::clone(&calls);
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(QueryError::transport("offline")) }
            }
        };
        let err = cache
            .get_or_fetch("k", failing, FetchOptions::new(TTL))
            .await
            .expect_err("fetch should fail");
        assert_eq!(err, QueryError::transport("offline"));
        assert_eq!(cache.in_flight_len(), 0);
        assert!(cache.is_empty());

        let value = cache
            .get_or_fetch("k", counting_fetch(&calls, 5), FetchOptions::new(TTL))
            .await
            .expect("retry succeeds");
        assert_eq!(*value, 5);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn valid_entry_skips_fetch() {
        let cache = QueryCache::<u32>::new("test");
        let calls = Arc::new(AtomicUsize::new(0));
        cache.insert("k", 3, FetchOptions::new(TTL));

        let value = cache
            .get_or_fetch("k", counting_fetch(&calls, 4), FetchOptions::new(TTL))
            .await
            .expect("cached");
        assert_eq!(*value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn panicking_fetch_clears_in_flight_slot() {
        let cache = QueryCache::<u32>::new("test");
        let err = cache
            .get_or_fetch(
                "k",
                || async {
                    let missing: Option<u32> = None;
                    Ok(missing.expect("fetch exploded"))
                },
                FetchOptions::new(TTL),
            )
            .await
            .expect_err("panic surfaces as error");

        assert!(matches!(err, QueryError::Aborted(_)));
        assert_eq!(cache.in_flight_len(), 0);
    }
}
