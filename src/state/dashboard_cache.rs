use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::error::{AppError, Result};
use crate::types::DashboardSnapshot;

/// Cache key for one owner's dashboard.
pub fn owner_key(owner_id: &str) -> String {
    format!("dashboard:{owner_id}")
}

/// Read-through cache of per-owner dashboard snapshots.
///
/// `delete` must be complete when it returns: a following `exists` on the
/// same key reports false. Writers rely on delete, miss, repopulate being the
/// only sequence that refreshes an entry.
#[async_trait]
pub trait DashboardCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<DashboardSnapshot>>;
    async fn put(&self, key: &str, snapshot: DashboardSnapshot) -> Result<()>;
    /// Returns whether an entry was removed.
    async fn delete(&self, key: &str) -> Result<bool>;
    async fn exists(&self, key: &str) -> Result<bool>;
}

/// Drop the owner's dashboard entry and confirm it is gone.
pub async fn invalidate_owner(cache: &dyn DashboardCache, owner_id: &str) -> Result<()> {
    let key = owner_key(owner_id);
    let removed = cache.delete(&key).await?;
    if cache.exists(&key).await? {
        return Err(AppError::Cache(format!("entry {key} still present after delete")));
    }
    debug!(owner_id, removed, "Dashboard cache invalidated");
    Ok(())
}

struct CacheEntry {
    snapshot: DashboardSnapshot,
    inserted_at: Instant,
}

/// In-process cache with a fixed TTL. Deletes are synchronous map removals.
pub struct InMemoryDashboardCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl InMemoryDashboardCache {
    pub fn new(ttl: Duration) -> Arc<Self> {
        Arc::new(Self { entries: DashMap::new(), ttl })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evict expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.inserted_at.elapsed() < self.ttl);
        before.saturating_sub(self.entries.len())
    }

    /// Background sweeper; runs until the task is dropped.
    pub async fn run_sweeper(self: Arc<Self>, every: Duration) {
        let mut interval = tokio::time::interval(every);
        interval.tick().await; // consume immediate first tick

        loop {
            interval.tick().await;
            let evicted = self.purge_expired();
            if evicted > 0 {
                info!("Cache sweeper evicted {evicted} expired dashboards");
            }
        }
    }

    fn is_fresh(&self, entry: &CacheEntry) -> bool {
        entry.inserted_at.elapsed() < self.ttl
    }
}

#[async_trait]
impl DashboardCache for InMemoryDashboardCache {
    async fn get(&self, key: &str) -> Result<Option<DashboardSnapshot>> {
        if let Some(entry) = self.entries.get(key) {
            if self.is_fresh(&entry) {
                return Ok(Some(entry.snapshot.clone()));
            }
        }
        // Expired or missing. remove_if avoids dropping a fresh entry written meanwhile.
        self.entries.remove_if(key, |_, e| !self.is_fresh(e));
        Ok(None)
    }

    async fn put(&self, key: &str, snapshot: DashboardSnapshot) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            CacheEntry { snapshot, inserted_at: Instant::now() },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.entries.get(key).is_some_and(|e| self.is_fresh(&e)))
    }
}
