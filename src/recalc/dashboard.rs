use std::sync::Arc;

use tracing::{debug, warn};

use crate::db::ResearchStore;
use crate::error::{AppError, Result};
use crate::merge::merge_all;
use crate::scorer::aggregate;
use crate::state::{owner_key, DashboardCache};
use crate::types::{now_ns, DashboardSnapshot, EffectiveProduct, MarketView, StatisticsSource};

/// Read-through loader for an owner's dashboard.
///
/// Hit: the cached snapshot. Miss: every market is rebuilt from base products
/// and overrides, then the cache is repopulated.
#[derive(Clone)]
pub struct DashboardReader {
    store: Arc<dyn ResearchStore>,
    cache: Arc<dyn DashboardCache>,
}

impl DashboardReader {
    pub fn new(store: Arc<dyn ResearchStore>, cache: Arc<dyn DashboardCache>) -> Self {
        Self { store, cache }
    }

    pub async fn load(&self, owner_id: &str) -> Result<DashboardSnapshot> {
        let key = owner_key(owner_id);
        match self.cache.get(&key).await {
            Ok(Some(snapshot)) => {
                debug!(owner_id, "Dashboard cache hit");
                return Ok(snapshot);
            }
            Ok(None) => debug!(owner_id, "Dashboard cache miss"),
            Err(e) => warn!(owner_id, "Dashboard cache read failed, rebuilding: {e}"),
        }

        let snapshot = self.build(owner_id).await?;
        if let Err(e) = self.cache.put(&key, snapshot.clone()).await {
            warn!(owner_id, "Dashboard cache write failed: {e}");
        }
        Ok(snapshot)
    }

    async fn build(&self, owner_id: &str) -> Result<DashboardSnapshot> {
        let markets = self.store.fetch_markets(owner_id).await.map_err(fetch_error)?;

        let mut views = Vec::with_capacity(markets.len());
        for market in markets {
            let products = self
                .store
                .fetch_products_for_market(&market.id, owner_id)
                .await
                .map_err(fetch_error)?;
            let ids: Vec<String> = products.iter().map(|p| p.id.clone()).collect();
            let overrides = self
                .store
                .fetch_overrides_for_products(&ids, owner_id)
                .await
                .map_err(fetch_error)?;
            let effective = merge_all(products, &overrides);

            let (statistics, source) = match market.snapshot {
                Some(snapshot) if !has_newer_override(&effective, market.snapshot_updated_at_ns) => {
                    (snapshot, StatisticsSource::Persisted)
                }
                _ => (aggregate(&effective), StatisticsSource::Computed),
            };

            views.push(MarketView {
                market_id: market.id,
                keyword: market.keyword,
                statistics,
                source,
                products: effective,
            });
        }

        Ok(DashboardSnapshot {
            owner_id: owner_id.to_string(),
            markets: views,
            generated_at_ns: now_ns(),
        })
    }
}

/// True when an override was written after the persisted snapshot, which
/// then no longer reflects the effective data.
fn has_newer_override(effective: &[EffectiveProduct], snapshot_at: Option<i64>) -> bool {
    let snapshot_at = snapshot_at.unwrap_or(i64::MIN);
    effective
        .iter()
        .filter_map(|e| e.override_source.as_ref())
        .any(|src| src.updated_at_ns > snapshot_at)
}

fn fetch_error(e: AppError) -> AppError {
    match e {
        AppError::Fetch(_) => e,
        other => AppError::Fetch(other.to_string()),
    }
}
