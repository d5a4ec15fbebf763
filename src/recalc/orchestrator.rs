use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::db::ResearchStore;
use crate::error::{AppError, Result};
use crate::merge::merge_all;
use crate::scorer::aggregate;
use crate::state::{invalidate_owner, DashboardCache};
use crate::types::{now_ns, GradeLabel, MarketOverride, ProductOverride};

#[derive(Debug, Clone, Serialize)]
pub struct RecalculationOutcome {
    pub market_override: MarketOverride,
    /// Grade of the row this recalculation replaced, if any.
    pub previous_grade: Option<GradeLabel>,
    pub new_grade: GradeLabel,
}

/// Runs fetch, merge, aggregate, upsert, invalidate for one (owner, market).
///
/// Concurrent recalculations of the same key are not serialized here; the
/// keyed upsert makes the last write win.
#[derive(Clone)]
pub struct Recalculator {
    store: Arc<dyn ResearchStore>,
    cache: Arc<dyn DashboardCache>,
}

impl Recalculator {
    pub fn new(store: Arc<dyn ResearchStore>, cache: Arc<dyn DashboardCache>) -> Self {
        Self { store, cache }
    }

    /// Recompute and persist the market override for `(owner_id, market_id)`.
    ///
    /// A fetch failure aborts before anything is written. A persist failure
    /// leaves the cache alone. On success the owner's dashboard entry is gone
    /// before this returns.
    pub async fn recalculate_market(
        &self,
        market_id: &str,
        owner_id: &str,
        reason: &str,
    ) -> Result<RecalculationOutcome> {
        let products = self
            .store
            .fetch_products_for_market(market_id, owner_id)
            .await
            .map_err(|e| fetch_failure("products", e))?;
        if products.is_empty() {
            self.ensure_market_exists(market_id, owner_id).await?;
        }

        let product_ids: Vec<String> = products.iter().map(|p| p.id.clone()).collect();
        let overrides = self
            .store
            .fetch_overrides_for_products(&product_ids, owner_id)
            .await
            .map_err(|e| fetch_failure("overrides", e))?;

        let previous = self
            .store
            .fetch_market_override(owner_id, market_id)
            .await
            .map_err(|e| fetch_failure("market override", e))?;

        let effective = merge_all(products, &overrides);
        let statistics = aggregate(&effective);

        let persisted = self
            .store
            .upsert_market_override(owner_id, market_id, &statistics, reason, now_ns())
            .await
            .map_err(|e| {
                warn!(owner_id, market_id, "Market override upsert failed: {e}");
                AppError::Persist(e.to_string())
            })?;

        invalidate_owner(self.cache.as_ref(), owner_id).await?;

        let previous_grade = previous.map(|p| p.statistics.market_grade);
        info!(
            event = "MARKET_RECALCULATED",
            owner_id,
            market_id,
            grade = %persisted.statistics.market_grade,
            previous_grade = ?previous_grade.map(|g| g.to_string()),
            opportunity_score = persisted.statistics.opportunity_score,
            products_verified = persisted.statistics.products_verified,
            total_products = persisted.statistics.total_products_analyzed,
            overrides = overrides.len(),
            "Market recalculated"
        );

        Ok(RecalculationOutcome {
            new_grade: persisted.statistics.market_grade,
            previous_grade,
            market_override: persisted,
        })
    }

    /// An empty market is valid; a market the owner never registered is not.
    async fn ensure_market_exists(&self, market_id: &str, owner_id: &str) -> Result<()> {
        let markets = self
            .store
            .fetch_markets(owner_id)
            .await
            .map_err(|e| fetch_failure("markets", e))?;
        if markets.iter().any(|m| m.id == market_id) {
            Ok(())
        } else {
            Err(AppError::NotFound(format!("market {market_id} for owner {owner_id}")))
        }
    }

    /// Save (insert or replace) one product override, then invalidate the
    /// owner's dashboard. The timestamp is set here.
    pub async fn apply_product_override(&self, mut ov: ProductOverride) -> Result<ProductOverride> {
        if ov.owner_id.trim().is_empty() || ov.product_id.trim().is_empty() {
            return Err(AppError::BadRequest("override needs owner_id and product_id".to_string()));
        }
        ov.updated_at_ns = now_ns();

        let saved = self
            .store
            .upsert_product_override(&ov)
            .await
            .map_err(|e| AppError::Persist(e.to_string()))?;
        invalidate_owner(self.cache.as_ref(), &saved.owner_id).await?;

        info!(owner_id = %saved.owner_id, product_id = %saved.product_id, "Product override saved");
        Ok(saved)
    }

    /// Remove a product override so the product reverts to its base data.
    /// Returns whether an override existed.
    pub async fn clear_product_override(&self, owner_id: &str, product_id: &str) -> Result<bool> {
        let removed = self
            .store
            .delete_product_override(owner_id, product_id)
            .await
            .map_err(|e| AppError::Persist(e.to_string()))?;
        if removed {
            invalidate_owner(self.cache.as_ref(), owner_id).await?;
        }
        Ok(removed)
    }
}

fn fetch_failure(what: &str, e: AppError) -> AppError {
    warn!("Fetching {what} failed: {e}");
    match e {
        AppError::Fetch(_) => e,
        other => AppError::Fetch(format!("{what}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryResearchStore;
    use crate::state::{owner_key, InMemoryDashboardCache};
    use crate::types::{DashboardSnapshot, MarketStatistics, Market, Product};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Wraps the in-memory store and fails selected calls on demand.
    #[derive(Default)]
    struct FlakyStore {
        inner: InMemoryResearchStore,
        fail_products: AtomicBool,
        fail_overrides: AtomicBool,
        fail_upsert: AtomicBool,
    }

    #[async_trait]
    impl ResearchStore for FlakyStore {
        async fn fetch_markets(&self, owner_id: &str) -> Result<Vec<Market>> {
            self.inner.fetch_markets(owner_id).await
        }

        async fn fetch_products_for_market(&self, market_id: &str, owner_id: &str) -> Result<Vec<Product>> {
            if self.fail_products.load(Ordering::SeqCst) {
                return Err(AppError::Fetch("store unreachable".to_string()));
            }
            self.inner.fetch_products_for_market(market_id, owner_id).await
        }

        async fn fetch_overrides_for_products(
            &self,
            product_ids: &[String],
            owner_id: &str,
        ) -> Result<Vec<ProductOverride>> {
            if self.fail_overrides.load(Ordering::SeqCst) {
                return Err(AppError::Config("query error".to_string()));
            }
            self.inner.fetch_overrides_for_products(product_ids, owner_id).await
        }

        async fn fetch_market_override(&self, owner_id: &str, market_id: &str) -> Result<Option<MarketOverride>> {
            self.inner.fetch_market_override(owner_id, market_id).await
        }

        async fn upsert_market_override(
            &self,
            owner_id: &str,
            market_id: &str,
            statistics: &MarketStatistics,
            reason: &str,
            recalculated_at_ns: i64,
        ) -> Result<MarketOverride> {
            if self.fail_upsert.load(Ordering::SeqCst) {
                return Err(AppError::Config("disk full".to_string()));
            }
            self.inner
                .upsert_market_override(owner_id, market_id, statistics, reason, recalculated_at_ns)
                .await
        }

        async fn upsert_product_override(&self, ov: &ProductOverride) -> Result<ProductOverride> {
            self.inner.upsert_product_override(ov).await
        }

        async fn delete_product_override(&self, owner_id: &str, product_id: &str) -> Result<bool> {
            self.inner.delete_product_override(owner_id, product_id).await
        }
    }

    fn product(id: &str, price: f64, monthly_revenue: f64) -> Product {
        Product {
            id: id.to_string(),
            market_id: "earbuds".to_string(),
            price,
            monthly_revenue,
            margin: 30.0,
            review_count: 120,
            rating: 4.4,
            bsr: 8_000,
            ..Default::default()
        }
    }

    async fn setup() -> (Arc<FlakyStore>, Arc<InMemoryDashboardCache>, Recalculator) {
        let store = Arc::new(FlakyStore::default());
        store.inner.insert_market("owner1", "earbuds", "wireless earbuds").await;
        store.inner.insert_product("owner1", product("p1", 20.0, 1000.0)).await;
        store.inner.insert_product("owner1", product("p2", 25.0, 2000.0)).await;
        store.inner.insert_product("owner1", product("p3", 0.0, 0.0)).await;
        let cache = InMemoryDashboardCache::new(Duration::from_secs(300));
        let recalc = Recalculator::new(store.clone(), cache.clone());
        (store, cache, recalc)
    }

    fn cached_dashboard() -> DashboardSnapshot {
        DashboardSnapshot { owner_id: "owner1".to_string(), markets: Vec::new(), generated_at_ns: 0 }
    }

    fn revenue_override(value: f64) -> ProductOverride {
        ProductOverride {
            owner_id: "owner1".to_string(),
            product_id: "p1".to_string(),
            monthly_revenue: Some(value),
            reason: "seller central export".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn recalculation_persists_statistics_and_invalidates_cache() {
        let (store, cache, recalc) = setup().await;
        cache.put(&owner_key("owner1"), cached_dashboard()).await.unwrap();

        let outcome = recalc.recalculate_market("earbuds", "owner1", "initial").await.unwrap();

        let stats = &outcome.market_override.statistics;
        assert_eq!(stats.averages.avg_monthly_revenue, 1500.0);
        assert_eq!(stats.total_products_analyzed, 3);
        assert_eq!(stats.products_verified, 2);
        assert_eq!(outcome.previous_grade, None);
        assert_eq!(outcome.new_grade, stats.market_grade);
        assert!(!cache.exists(&owner_key("owner1")).await.unwrap());
        assert_eq!(
            store.inner.fetch_market_override("owner1", "earbuds").await.unwrap(),
            Some(outcome.market_override)
        );
    }

    #[tokio::test]
    async fn repeated_recalculation_is_idempotent_and_upserts() {
        let (store, _cache, recalc) = setup().await;

        let first = recalc.recalculate_market("earbuds", "owner1", "r").await.unwrap();
        let second = recalc.recalculate_market("earbuds", "owner1", "r").await.unwrap();

        assert_eq!(first.market_override.statistics, second.market_override.statistics);
        assert_eq!(
            first.market_override.statistics.composite_score.to_bits(),
            second.market_override.statistics.composite_score.to_bits()
        );
        assert_eq!(second.previous_grade, Some(first.new_grade));
        assert_eq!(store.inner.market_override_rows().await, 1);
    }

    #[tokio::test]
    async fn override_then_recalculate_raises_average_without_lowering_grade() {
        let (_store, cache, recalc) = setup().await;
        let before = recalc.recalculate_market("earbuds", "owner1", "baseline").await.unwrap();

        cache.put(&owner_key("owner1"), cached_dashboard()).await.unwrap();
        let saved = recalc.apply_product_override(revenue_override(4000.0)).await.unwrap();
        assert!(saved.updated_at_ns > 0);
        assert!(!cache.exists(&owner_key("owner1")).await.unwrap());

        let after = recalc.recalculate_market("earbuds", "owner1", "override").await.unwrap();
        assert_eq!(after.market_override.statistics.averages.avg_monthly_revenue, 3000.0);
        assert!(after.new_grade >= before.new_grade);
        assert_eq!(after.previous_grade, Some(before.new_grade));
    }

    #[tokio::test]
    async fn clearing_override_restores_base_statistics() {
        let (_store, _cache, recalc) = setup().await;
        let base = recalc.recalculate_market("earbuds", "owner1", "base").await.unwrap();
        recalc.apply_product_override(revenue_override(4000.0)).await.unwrap();

        assert!(recalc.clear_product_override("owner1", "p1").await.unwrap());
        assert!(!recalc.clear_product_override("owner1", "p1").await.unwrap());

        let again = recalc.recalculate_market("earbuds", "owner1", "base").await.unwrap();
        assert_eq!(again.market_override.statistics, base.market_override.statistics);
    }

    #[tokio::test]
    async fn product_fetch_failure_writes_nothing() {
        let (store, cache, recalc) = setup().await;
        let original = recalc.recalculate_market("earbuds", "owner1", "ok").await.unwrap();
        cache.put(&owner_key("owner1"), cached_dashboard()).await.unwrap();

        store.fail_products.store(true, Ordering::SeqCst);
        let err = recalc.recalculate_market("earbuds", "owner1", "broken").await.unwrap_err();
        assert!(matches!(err, AppError::Fetch(_)));

        let kept = store.inner.fetch_market_override("owner1", "earbuds").await.unwrap();
        assert_eq!(kept, Some(original.market_override));
        assert!(cache.exists(&owner_key("owner1")).await.unwrap());
    }

    #[tokio::test]
    async fn override_fetch_failure_is_a_fetch_error() {
        let (store, _cache, recalc) = setup().await;
        store.fail_overrides.store(true, Ordering::SeqCst);
        let err = recalc.recalculate_market("earbuds", "owner1", "x").await.unwrap_err();
        assert!(matches!(err, AppError::Fetch(_)));
        assert_eq!(store.inner.market_override_rows().await, 0);
    }

    #[tokio::test]
    async fn persist_failure_keeps_cache_entry() {
        let (store, cache, recalc) = setup().await;
        cache.put(&owner_key("owner1"), cached_dashboard()).await.unwrap();

        store.fail_upsert.store(true, Ordering::SeqCst);
        let err = recalc.recalculate_market("earbuds", "owner1", "x").await.unwrap_err();
        assert!(matches!(err, AppError::Persist(_)));
        assert!(cache.exists(&owner_key("owner1")).await.unwrap());
    }

    #[tokio::test]
    async fn empty_market_yields_zero_statistics() {
        let (store, _cache, recalc) = setup().await;
        store.inner.insert_market("owner1", "blenders", "travel blender").await;
        let outcome = recalc.recalculate_market("blenders", "owner1", "x").await.unwrap();
        let stats = outcome.market_override.statistics;
        assert_eq!(stats.total_products_analyzed, 0);
        assert_eq!(stats.products_verified, 0);
        assert_eq!(stats.market_grade, GradeLabel::F1);
    }

    #[tokio::test]
    async fn unknown_market_is_not_found_and_writes_nothing() {
        let (store, cache, recalc) = setup().await;
        cache.put(&owner_key("owner1"), cached_dashboard()).await.unwrap();

        let err = recalc.recalculate_market("unknown", "owner1", "typo").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        // Another owner's market id does not count either.
        let err = recalc.recalculate_market("earbuds", "owner2", "x").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        assert_eq!(store.inner.market_override_rows().await, 0);
        assert!(cache.exists(&owner_key("owner1")).await.unwrap());
    }

    #[tokio::test]
    async fn override_without_target_is_rejected() {
        let (_store, _cache, recalc) = setup().await;
        let err = recalc
            .apply_product_override(ProductOverride { owner_id: "owner1".to_string(), ..Default::default() })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}
