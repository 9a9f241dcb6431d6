//! The pool proper: LRU cache, memory budget, idle reaper.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use lru::LruCache;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use tutu_types::{BackendLoader, ModelBackend, ModelResolver, PoolError};

use crate::handle::PoolHandle;

/// Pool sizing and timing.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Total bytes of loaded models the pool may hold.
    pub memory_budget: u64,
    /// How long an unreferenced entry may sit idle before the reaper
    /// unloads it.
    pub idle_timeout: Duration,
    /// Reaper tick interval.
    pub reap_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            memory_budget: 8 * 1024 * 1024 * 1024,
            idle_timeout: Duration::from_secs(300),
            reap_interval: Duration::from_secs(30),
        }
    }
}

/// Snapshot of one loaded model for status endpoints.
#[derive(Debug, Clone)]
pub struct LoadedModelInfo {
    /// Canonical model name.
    pub name: String,
    /// Bytes charged against the budget.
    pub size: u64,
    /// Where the model runs. Currently always `CPU`.
    pub processor: String,
    /// When the idle reaper would unload it, absent further use.
    pub expires_at: DateTime<Utc>,
}

struct PoolEntry {
    backend: Arc<dyn ModelBackend>,
    mem_bytes: u64,
    refs: Arc<AtomicUsize>,
    last_used: DateTime<Utc>,
}

struct PoolInner {
    /// Recency order lives in the cache itself: `get` promotes to MRU,
    /// iteration runs MRU → LRU.
    cache: LruCache<String, PoolEntry>,
    used_mem: u64,
}

/// Bounded-memory LRU cache of loaded models.
///
/// Invariants:
/// - `used_mem` equals the sum of entry sizes at all times.
/// - No entry with a positive reference count is evicted or reaped;
///   [`unload_all`](EnginePool::unload_all) (shutdown only) is the one
///   exception.
pub struct EnginePool {
    inner: Mutex<PoolInner>,
    resolver: Arc<dyn ModelResolver>,
    loader: Arc<dyn BackendLoader>,
    config: PoolConfig,
}

impl EnginePool {
    /// Pool over an injected resolver and loader.
    pub fn new(
        resolver: Arc<dyn ModelResolver>,
        loader: Arc<dyn BackendLoader>,
        config: PoolConfig,
    ) -> Self {
        // Capacity bounds nothing here (memory does); unbounded keeps the
        // cache from ever evicting behind our back.
        Self {
            inner: Mutex::new(PoolInner {
                cache: LruCache::unbounded(),
                used_mem: 0,
            }),
            resolver,
            loader,
            config,
        }
    }

    /// Borrow the model, loading it on a miss.
    ///
    /// The pool lock is held across resolve + load: concurrent callers for
    /// the same model queue behind the loader instead of loading twice,
    /// and callers for other models queue too. Loads are rare; this is the
    /// simple-correctness trade the pool makes.
    pub async fn acquire(&self, name: &str) -> Result<PoolHandle, PoolError> {
        let mut inner = self.inner.lock().await;

        if let Some(entry) = inner.cache.get_mut(name) {
            entry.refs.fetch_add(1, Ordering::SeqCst);
            entry.last_used = Utc::now();
            tracing::debug!(model = name, "pool hit");
            return Ok(PoolHandle::new(entry.backend.clone(), entry.refs.clone()));
        }

        let path = self.resolver.resolve(name).await?;
        let backend = self.loader.load(name, &path).await?;
        let mem_needed = backend.memory_bytes();

        while inner.used_mem + mem_needed > self.config.memory_budget {
            if !evict_one(&mut inner).await {
                backend.close().await;
                return Err(PoolError::Exhausted {
                    needed: mem_needed,
                    budget: self.config.memory_budget,
                });
            }
        }

        let refs = Arc::new(AtomicUsize::new(1));
        inner.cache.put(
            name.to_string(),
            PoolEntry {
                backend: backend.clone(),
                mem_bytes: mem_needed,
                refs: refs.clone(),
                last_used: Utc::now(),
            },
        );
        inner.used_mem += mem_needed;
        tracing::info!(model = name, bytes = mem_needed, "loaded model into pool");
        Ok(PoolHandle::new(backend, refs))
    }

    /// Snapshot for `/api/ps`-style endpoints, MRU first.
    pub async fn loaded_models(&self) -> Vec<LoadedModelInfo> {
        let idle = idle_chrono(self.config.idle_timeout);
        let inner = self.inner.lock().await;
        inner
            .cache
            .iter()
            .map(|(name, entry)| LoadedModelInfo {
                name: name.clone(),
                size: entry.mem_bytes,
                processor: "CPU".to_string(),
                expires_at: entry.last_used + idle,
            })
            .collect()
    }

    /// Bytes currently charged against the budget.
    pub async fn used_memory(&self) -> u64 {
        self.inner.lock().await.used_mem
    }

    /// Unload every entry regardless of reference counts. Shutdown only.
    pub async fn unload_all(&self) {
        let mut inner = self.inner.lock().await;
        while let Some((name, entry)) = inner.cache.pop_lru() {
            tracing::info!(model = %name, "unloading at shutdown");
            entry.backend.close().await;
        }
        inner.used_mem = 0;
    }

    /// Unload entries idle past the timeout with no outstanding handles.
    pub async fn reap_idle(&self) {
        let cutoff = Utc::now() - idle_chrono(self.config.idle_timeout);
        let mut inner = self.inner.lock().await;
        let victims: Vec<String> = inner
            .cache
            .iter()
            .filter(|(_, e)| e.refs.load(Ordering::SeqCst) == 0 && e.last_used < cutoff)
            .map(|(name, _)| name.clone())
            .collect();
        for name in victims {
            if let Some(entry) = inner.cache.pop(&name) {
                inner.used_mem -= entry.mem_bytes;
                tracing::info!(model = %name, "reaping idle model");
                entry.backend.close().await;
            }
        }
    }

    /// Run the idle reaper until the token is cancelled.
    pub async fn run_reaper(&self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.reap_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => self.reap_idle().await,
            }
        }
    }
}

/// Evict the least-recently-used unreferenced entry. Returns false when
/// nothing is evictable.
async fn evict_one(inner: &mut PoolInner) -> bool {
    let victim = inner
        .cache
        .iter()
        .rev() // LRU end first
        .find(|(_, e)| e.refs.load(Ordering::SeqCst) == 0)
        .map(|(name, _)| name.clone());
    let Some(name) = victim else {
        return false;
    };
    if let Some(entry) = inner.cache.pop(&name) {
        inner.used_mem -= entry.mem_bytes;
        tracing::info!(model = %name, bytes = entry.mem_bytes, "evicting model");
        entry.backend.close().await;
    }
    true
}

fn idle_chrono(idle: Duration) -> chrono::Duration {
    // Out-of-range timeouts degrade to a century, which is close enough
    // to "never" without risking timestamp-arithmetic overflow.
    chrono::Duration::from_std(idle).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tutu_types::test_utils::{FakeResolver, MOCK_MEMORY_BYTES, MockLoader};

    fn pool_with(config: PoolConfig) -> (EnginePool, Arc<MockLoader>) {
        let loader = Arc::new(MockLoader::new());
        let pool = EnginePool::new(Arc::new(FakeResolver), loader.clone(), config);
        (pool, loader)
    }

    fn small_config(budget_models: u64) -> PoolConfig {
        PoolConfig {
            memory_budget: budget_models * MOCK_MEMORY_BYTES,
            idle_timeout: Duration::from_secs(300),
            reap_interval: Duration::from_secs(30),
        }
    }

    #[tokio::test]
    async fn second_acquire_hits_the_cache() {
        let (pool, loader) = pool_with(small_config(4));

        let h1 = pool.acquire("m").await.unwrap();
        h1.release();
        let h2 = pool.acquire("m").await.unwrap();

        assert!(Arc::ptr_eq(h1.backend(), h2.backend()));
        assert_eq!(loader.loads(), 1);
        assert_eq!(pool.loaded_models().await.len(), 1);
        h2.release();
        assert_eq!(pool.loaded_models().await.len(), 1, "release does not unload");
    }

    #[tokio::test]
    async fn eviction_frees_unreferenced_lru_entry() {
        let (pool, loader) = pool_with(small_config(2));

        let h1 = pool.acquire("a").await.unwrap();
        h1.release();
        let h2 = pool.acquire("b").await.unwrap();
        h2.release();
        // "a" is the LRU tail; loading "c" must evict it.
        let h3 = pool.acquire("c").await.unwrap();
        h3.release();

        assert_eq!(loader.loads(), 3);
        let names: Vec<String> = pool
            .loaded_models()
            .await
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["c", "b"]);
        assert_eq!(pool.used_memory().await, 2 * MOCK_MEMORY_BYTES);
    }

    #[tokio::test]
    async fn cache_hit_promotes_to_mru() {
        let (pool, _) = pool_with(small_config(2));

        pool.acquire("a").await.unwrap().release();
        pool.acquire("b").await.unwrap().release();
        // Touch "a" so "b" becomes the LRU tail.
        pool.acquire("a").await.unwrap().release();
        pool.acquire("c").await.unwrap().release();

        let names: Vec<String> = pool
            .loaded_models()
            .await
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["c", "a"]);
    }

    #[tokio::test]
    async fn referenced_entries_are_never_evicted() {
        let (pool, _) = pool_with(small_config(1));

        let held = pool.acquire("a").await.unwrap();
        let err = pool.acquire("b").await.unwrap_err();
        assert!(matches!(err, PoolError::Exhausted { .. }), "got: {err}");

        // The budget invariant held throughout.
        assert_eq!(pool.used_memory().await, MOCK_MEMORY_BYTES);
        assert_eq!(pool.loaded_models().await.len(), 1);
        held.release();
    }

    #[tokio::test]
    async fn oversized_model_is_rejected_and_closed() {
        let (pool, _) = pool_with(PoolConfig {
            memory_budget: MOCK_MEMORY_BYTES / 2,
            ..small_config(1)
        });

        let err = pool.acquire("huge").await.unwrap_err();
        assert!(matches!(err, PoolError::Exhausted { .. }));
        assert_eq!(pool.used_memory().await, 0);
        assert!(pool.loaded_models().await.is_empty());
    }

    #[tokio::test]
    async fn resolver_failure_surfaces_as_resolve_error() {
        struct NoResolver;
        #[async_trait::async_trait]
        impl ModelResolver for NoResolver {
            async fn resolve(
                &self,
                name: &str,
            ) -> Result<std::path::PathBuf, tutu_types::RegistryError> {
                Err(tutu_types::RegistryError::NotFound(name.to_string()))
            }
        }

        let pool = EnginePool::new(
            Arc::new(NoResolver),
            Arc::new(MockLoader::new()),
            small_config(4),
        );
        let err = pool.acquire("ghost").await.unwrap_err();
        assert!(matches!(err, PoolError::Resolve(_)), "got: {err}");
    }

    #[tokio::test]
    async fn unload_all_clears_even_referenced_entries() {
        let (pool, _) = pool_with(small_config(4));

        let _held = pool.acquire("a").await.unwrap();
        pool.acquire("b").await.unwrap().release();

        pool.unload_all().await;
        assert!(pool.loaded_models().await.is_empty());
        assert_eq!(pool.used_memory().await, 0);
    }

    #[tokio::test]
    async fn reaper_unloads_idle_entries() {
        let (pool, _) = pool_with(PoolConfig {
            memory_budget: 4 * MOCK_MEMORY_BYTES,
            idle_timeout: Duration::from_millis(50),
            reap_interval: Duration::from_millis(25),
        });
        let pool = Arc::new(pool);

        pool.acquire("m").await.unwrap().release();

        let token = CancellationToken::new();
        let reaper = {
            let pool = pool.clone();
            let token = token.clone();
            tokio::spawn(async move { pool.run_reaper(token).await })
        };

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(pool.loaded_models().await.is_empty());
        assert_eq!(pool.used_memory().await, 0);

        token.cancel();
        reaper.await.unwrap();
    }

    #[tokio::test]
    async fn reaper_spares_referenced_and_fresh_entries() {
        let (pool, _) = pool_with(PoolConfig {
            memory_budget: 4 * MOCK_MEMORY_BYTES,
            idle_timeout: Duration::from_millis(50),
            reap_interval: Duration::from_millis(25),
        });

        let held = pool.acquire("held").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        pool.reap_idle().await;
        assert_eq!(pool.loaded_models().await.len(), 1, "referenced survives");

        held.release();
        pool.acquire("held").await.unwrap().release();
        pool.reap_idle().await;
        assert_eq!(pool.loaded_models().await.len(), 1, "fresh survives");
    }

    #[tokio::test]
    async fn expires_at_reflects_idle_timeout() {
        let (pool, _) = pool_with(small_config(4));
        let before = Utc::now();
        pool.acquire("m").await.unwrap().release();

        let info = pool.loaded_models().await.remove(0);
        assert_eq!(info.processor, "CPU");
        assert_eq!(info.size, MOCK_MEMORY_BYTES);
        let min_expiry = before + chrono::Duration::seconds(299);
        assert!(info.expires_at > min_expiry);
    }
}
