use crate::analytics::BucketKey;
use crate::models::{Link, NewLink};
use crate::storage::{ListQuery, Storage, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use moka::future::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;

/// Cached storage wrapper that implements read caching and write buffering
pub struct CachedStorage {
    /// Underlying storage implementation
    inner: Arc<dyn Storage>,
    /// Read cache for redirect lookups, including negative entries
    read_cache: Cache<String, Option<Link>>,
    /// Bumped by every link write; a lookup that overlaps a write never stays cached
    write_generation: AtomicU64,
    /// Write buffer for click increments
    click_buffer: Arc<DashMap<String, u64>>,
    /// Shutdown signal sender
    shutdown_tx: watch::Sender<bool>,
    flush_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl CachedStorage {
    /// `cache_ttl_secs` bounds how long writes made by other processes stay invisible
    pub fn new(
        inner: Arc<dyn Storage>,
        max_cache_entries: u64,
        cache_ttl_secs: u64,
        flush_interval_secs: u64,
    ) -> Self {
        let read_cache = Cache::builder()
            .max_capacity(max_cache_entries)
            .time_to_live(Duration::from_secs(cache_ttl_secs.max(1)))
            .build();

        let click_buffer = Arc::new(DashMap::new());
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        // Periodically move buffered clicks into the underlying storage
        let storage = Arc::clone(&inner);
        let buffer = Arc::clone(&click_buffer);
        let flush_task = tokio::spawn(async move {
            let mut interval = time::interval(Duration::from_secs(flush_interval_secs.max(1)));
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = flush_click_buffer(&storage, &buffer).await {
                            tracing::error!("Failed to flush click buffer: {}", e);
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!("Shutdown signal received, flushing click buffer...");
                            if let Err(e) = flush_click_buffer(&storage, &buffer).await {
                                tracing::error!("Failed to flush click buffer on shutdown: {}", e);
                            } else {
                                tracing::info!("Click buffer flushed successfully on shutdown");
                            }
                            break;
                        }
                    }
                }
            }
        });

        Self {
            inner,
            read_cache,
            write_generation: AtomicU64::new(0),
            click_buffer,
            shutdown_tx,
            flush_task: std::sync::Mutex::new(Some(flush_task)),
        }
    }

    /// Write buffered clicks through to the underlying storage now
    pub async fn flush(&self) -> Result<()> {
        flush_click_buffer(&self.inner, &self.click_buffer).await
    }

    /// Signal shutdown and wait for the final flush
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self
            .flush_task
            .lock()
            .ok()
            .and_then(|mut guard| guard.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!("Click buffer flush task failed: {}", e);
            }
        }
    }

    fn get_buffered_clicks(&self, shortcode: &str) -> u64 {
        self.click_buffer
            .get(shortcode)
            .map(|entry| *entry.value())
            .unwrap_or(0)
    }

    async fn invalidate_cache(&self, shortcode: &str) {
        self.read_cache.invalidate(shortcode).await;
    }

    fn bump_generation(&self) {
        self.write_generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Bracket a link write. Lookups overlapping either edge are not cached, and
    /// whatever a lookup cached before the write finished is invalidated.
    async fn write_through<T, F>(&self, shortcode: &str, write: F) -> T
    where
        F: std::future::Future<Output = T>,
    {
        self.bump_generation();
        let result = write.await;
        self.bump_generation();
        self.invalidate_cache(shortcode).await;
        result
    }

    /// Cache a value read while the generation was `seen`. If a write started in
    /// the meantime the entry is dropped again, since the read may predate it.
    async fn cache_lookup(&self, shortcode: &str, seen: u64, value: Option<Link>) {
        if self.write_generation.load(Ordering::SeqCst) != seen {
            return;
        }
        self.read_cache.insert(shortcode.to_string(), value).await;
        if self.write_generation.load(Ordering::SeqCst) != seen {
            self.invalidate_cache(shortcode).await;
        }
    }
}

/// Flush accumulated clicks to the database
async fn flush_click_buffer(
    storage: &Arc<dyn Storage>,
    buffer: &Arc<DashMap<String, u64>>,
) -> Result<()> {
    // Take each count under its entry lock so concurrent increments are never lost
    let keys: Vec<String> = buffer.iter().map(|entry| entry.key().clone()).collect();
    let mut pending_updates = Vec::with_capacity(keys.len());
    for key in keys {
        if let Some(mut entry) = buffer.get_mut(&key) {
            let count = std::mem::take(entry.value_mut());
            if count > 0 {
                pending_updates.push((key, count));
            }
        }
    }

    buffer.retain(|_, v| *v > 0);

    let mut failed = None;
    for (shortcode, count) in pending_updates {
        if failed.is_some() {
            *buffer.entry(shortcode).or_insert(0) += count;
            continue;
        }
        if let Err(e) = storage.increment_clicks(&shortcode, count).await {
            // Put the clicks back for the next round
            *buffer.entry(shortcode).or_insert(0) += count;
            failed = Some(e);
        }
    }

    match failed {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[async_trait]
impl Storage for CachedStorage {
    async fn init(&self) -> Result<()> {
        self.inner.init().await
    }

    async fn create(&self, link: &NewLink) -> StorageResult<Link> {
        self.write_through(&link.shortcode, self.inner.create(link))
            .await
    }

    async fn get(&self, shortcode: &str) -> Result<Option<Link>> {
        if let Some(cached) = self.read_cache.get(shortcode).await {
            return Ok(cached);
        }

        let seen = self.write_generation.load(Ordering::SeqCst);
        let result = self.inner.get(shortcode).await?;

        // Cache without buffered clicks to avoid double-counting
        self.cache_lookup(shortcode, seen, result.clone()).await;

        Ok(result)
    }

    async fn get_authoritative(&self, shortcode: &str) -> Result<Option<Link>> {
        let seen = self.write_generation.load(Ordering::SeqCst);
        let db_value = self.inner.get_authoritative(shortcode).await?;

        self.cache_lookup(shortcode, seen, db_value.clone()).await;

        let mut result = db_value;
        if let Some(ref mut link) = result {
            link.clicks += self.get_buffered_clicks(shortcode);
        }

        Ok(result)
    }

    async fn update(&self, link: &Link) -> Result<bool> {
        self.write_through(&link.shortcode, self.inner.update(link))
            .await
    }

    async fn delete(&self, shortcode: &str) -> Result<bool> {
        let result = self
            .write_through(shortcode, self.inner.delete(shortcode))
            .await;
        if matches!(result, Ok(true)) {
            self.click_buffer.remove(shortcode);
        }
        result
    }

    async fn increment_clicks(&self, shortcode: &str, amount: u64) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }

        self.click_buffer
            .entry(shortcode.to_string())
            .and_modify(|count| *count += amount)
            .or_insert(amount);

        Ok(())
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<Link>> {
        let mut links = self.inner.list(query).await?;

        for link in &mut links {
            link.clicks += self.get_buffered_clicks(&link.shortcode);
        }

        Ok(links)
    }

    async fn count(&self, owner: Option<&str>) -> Result<u64> {
        self.inner.count(owner).await
    }

    async fn owned_shortcodes(&self, owner: &str) -> Result<Vec<String>> {
        self.inner.owned_shortcodes(owner).await
    }

    async fn upsert_click_buckets(&self, batch: &[(BucketKey, u64)]) -> Result<Vec<String>> {
        self.inner.upsert_click_buckets(batch).await
    }

    async fn load_click_buckets(&self) -> Result<Vec<(BucketKey, u64)>> {
        self.inner.load_click_buckets().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RedirectType;
    use crate::storage::SqliteStorage;
    use chrono::Utc;

    /// Delegates to SQLite but stalls after each lookup, widening the gap between
    /// the database read and the cache insert
    struct SlowLookups {
        inner: Arc<dyn Storage>,
        delay: Duration,
    }

    #[async_trait]
    impl Storage for SlowLookups {
        async fn init(&self) -> Result<()> {
            self.inner.init().await
        }
        async fn create(&self, link: &NewLink) -> StorageResult<Link> {
            self.inner.create(link).await
        }
        async fn get(&self, shortcode: &str) -> Result<Option<Link>> {
            let link = self.inner.get(shortcode).await?;
            tokio::time::sleep(self.delay).await;
            Ok(link)
        }
        async fn get_authoritative(&self, shortcode: &str) -> Result<Option<Link>> {
            self.inner.get_authoritative(shortcode).await
        }
        async fn update(&self, link: &Link) -> Result<bool> {
            self.inner.update(link).await
        }
        async fn delete(&self, shortcode: &str) -> Result<bool> {
            self.inner.delete(shortcode).await
        }
        async fn increment_clicks(&self, shortcode: &str, amount: u64) -> Result<()> {
            self.inner.increment_clicks(shortcode, amount).await
        }
        async fn list(&self, query: &ListQuery) -> Result<Vec<Link>> {
            self.inner.list(query).await
        }
        async fn count(&self, owner: Option<&str>) -> Result<u64> {
            self.inner.count(owner).await
        }
        async fn owned_shortcodes(&self, owner: &str) -> Result<Vec<String>> {
            self.inner.owned_shortcodes(owner).await
        }
        async fn upsert_click_buckets(&self, batch: &[(BucketKey, u64)]) -> Result<Vec<String>> {
            self.inner.upsert_click_buckets(batch).await
        }
        async fn load_click_buckets(&self) -> Result<Vec<(BucketKey, u64)>> {
            self.inner.load_click_buckets().await
        }
    }

    async fn setup() -> (Arc<dyn Storage>, CachedStorage) {
        let sqlite = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
        sqlite.init().await.unwrap();
        let inner: Arc<dyn Storage> = Arc::new(sqlite);
        let cached = CachedStorage::new(Arc::clone(&inner), 100, 300, 3600);
        (inner, cached)
    }

    fn new_link(shortcode: &str) -> NewLink {
        NewLink {
            shortcode: shortcode.to_string(),
            url: "https://example.com/".to_string(),
            title: None,
            description: None,
            tags: vec![],
            password_hash: None,
            activates_at: None,
            expires_at: None,
            redirect_type: RedirectType::Found,
            archived: false,
            created_by: None,
            created: Utc::now(),
        }
    }

    #[tokio::test]
    async fn buffered_clicks_survive_concurrent_increments() {
        let (inner, cached) = setup().await;
        let cached = Arc::new(cached);
        cached.create(&new_link("hot")).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..100 {
            let cached = Arc::clone(&cached);
            handles.push(tokio::spawn(async move {
                cached.increment_clicks("hot", 1).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(cached.get_authoritative("hot").await.unwrap().unwrap().clicks, 100);

        cached.flush().await.unwrap();
        assert_eq!(inner.get("hot").await.unwrap().unwrap().clicks, 100);
        assert_eq!(cached.get_authoritative("hot").await.unwrap().unwrap().clicks, 100);
    }

    #[tokio::test]
    async fn update_invalidates_cached_link() {
        let (_inner, cached) = setup().await;
        cached.create(&new_link("edit")).await.unwrap();

        let mut link = cached.get("edit").await.unwrap().unwrap();
        assert!(!link.archived);

        link.archived = true;
        assert!(cached.update(&link).await.unwrap());

        assert!(cached.get("edit").await.unwrap().unwrap().archived);
    }

    #[tokio::test]
    async fn delete_drops_cache_and_pending_clicks() {
        let (_inner, cached) = setup().await;
        cached.create(&new_link("gone")).await.unwrap();
        cached.increment_clicks("gone", 3).await.unwrap();

        assert!(cached.delete("gone").await.unwrap());
        assert!(cached.get("gone").await.unwrap().is_none());
        assert_eq!(cached.get_buffered_clicks("gone"), 0);
    }

    #[tokio::test]
    async fn lookup_racing_a_delete_is_not_cached() {
        let (inner, _) = setup().await;
        let slow: Arc<dyn Storage> = Arc::new(SlowLookups {
            inner,
            delay: Duration::from_millis(200),
        });
        let cached = Arc::new(CachedStorage::new(slow, 100, 300, 3600));
        cached.create(&new_link("gone")).await.unwrap();

        let in_flight = {
            let cached = Arc::clone(&cached);
            tokio::spawn(async move { cached.get("gone").await.unwrap() })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cached.delete("gone").await.unwrap());

        // The in-flight lookup read the row before the delete committed
        assert!(in_flight.await.unwrap().is_some());
        assert!(
            cached.get("gone").await.unwrap().is_none(),
            "deleted link must not be served from cache"
        );
    }

    #[tokio::test]
    async fn lookup_racing_an_archive_is_not_cached() {
        let (inner, _) = setup().await;
        let slow: Arc<dyn Storage> = Arc::new(SlowLookups {
            inner,
            delay: Duration::from_millis(200),
        });
        let cached = Arc::new(CachedStorage::new(slow, 100, 300, 3600));
        let mut link = cached.create(&new_link("old")).await.unwrap();

        let in_flight = {
            let cached = Arc::clone(&cached);
            tokio::spawn(async move { cached.get("old").await.unwrap() })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        link.archived = true;
        assert!(cached.update(&link).await.unwrap());
        in_flight.await.unwrap();

        assert!(cached.get("old").await.unwrap().unwrap().archived);
    }

    #[tokio::test]
    async fn create_replaces_cached_miss() {
        let (_inner, cached) = setup().await;
        assert!(cached.get("fresh").await.unwrap().is_none());

        cached.create(&new_link("fresh")).await.unwrap();
        assert!(cached.get("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn external_writes_show_up_after_ttl() {
        let sqlite = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
        sqlite.init().await.unwrap();
        let inner: Arc<dyn Storage> = Arc::new(sqlite);
        let cached = CachedStorage::new(Arc::clone(&inner), 100, 1, 3600);

        cached.create(&new_link("live")).await.unwrap();
        let mut link = cached.get("live").await.unwrap().unwrap();

        // Written around the cache, the way the admin CLI does it
        link.archived = true;
        assert!(inner.update(&link).await.unwrap());

        tokio::time::sleep(Duration::from_millis(1_200)).await;
        assert!(cached.get("live").await.unwrap().unwrap().archived);
    }
}
