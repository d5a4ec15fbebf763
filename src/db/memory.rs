//! In-memory store for tests and local experiments.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::db::ResearchStore;
use crate::error::Result;
use crate::types::{Market, MarketOverride, MarketStatistics, Product, ProductOverride};

/// (owner_id, id)
type Key = (String, String);

fn key(owner_id: &str, id: &str) -> Key {
    (owner_id.to_string(), id.to_string())
}

#[derive(Default)]
struct Tables {
    markets: HashMap<Key, Market>,
    products: HashMap<Key, Product>,
    product_overrides: HashMap<Key, ProductOverride>,
    market_overrides: HashMap<Key, MarketOverride>,
}

impl Tables {
    fn clear_snapshot_for_product(&mut self, owner_id: &str, product_id: &str) {
        let Some(market_id) = self.products.get(&key(owner_id, product_id)).map(|p| p.market_id.clone())
        else {
            return;
        };
        if let Some(market) = self.markets.get_mut(&key(owner_id, &market_id)) {
            market.snapshot = None;
            market.snapshot_updated_at_ns = None;
        }
    }
}

/// Keyed maps with the same upsert semantics as the SQLite store.
/// Data is lost when the store is dropped.
#[derive(Default)]
pub struct InMemoryResearchStore {
    tables: RwLock<Tables>,
}

impl InMemoryResearchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_market(&self, owner_id: &str, market_id: &str, keyword: &str) {
        let mut t = self.tables.write().await;
        t.markets.entry(key(owner_id, market_id)).or_insert_with(|| Market {
            id: market_id.to_string(),
            owner_id: owner_id.to_string(),
            keyword: keyword.to_string(),
            snapshot: None,
            snapshot_updated_at_ns: None,
        });
    }

    pub async fn insert_product(&self, owner_id: &str, product: Product) {
        let mut t = self.tables.write().await;
        t.products.insert(key(owner_id, &product.id), product);
    }

    /// Number of persisted market override rows across all owners.
    pub async fn market_override_rows(&self) -> usize {
        self.tables.read().await.market_overrides.len()
    }
}

#[async_trait]
impl ResearchStore for InMemoryResearchStore {
    async fn fetch_markets(&self, owner_id: &str) -> Result<Vec<Market>> {
        let t = self.tables.read().await;
        let mut markets: Vec<Market> =
            t.markets.values().filter(|m| m.owner_id == owner_id).cloned().collect();
        markets.sort_by(|a, b| a.keyword.cmp(&b.keyword).then_with(|| a.id.cmp(&b.id)));
        Ok(markets)
    }

    async fn fetch_products_for_market(&self, market_id: &str, owner_id: &str) -> Result<Vec<Product>> {
        let t = self.tables.read().await;
        let mut products: Vec<Product> = t
            .products
            .iter()
            .filter(|((owner, _), p)| owner == owner_id && p.market_id == market_id)
            .map(|(_, p)| p.clone())
            .collect();
        products.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(products)
    }

    async fn fetch_overrides_for_products(
        &self,
        product_ids: &[String],
        owner_id: &str,
    ) -> Result<Vec<ProductOverride>> {
        let wanted: HashSet<&str> = product_ids.iter().map(String::as_str).collect();
        let t = self.tables.read().await;
        Ok(t.product_overrides
            .values()
            .filter(|o| o.owner_id == owner_id && wanted.contains(o.product_id.as_str()))
            .cloned()
            .collect())
    }

    async fn fetch_market_override(&self, owner_id: &str, market_id: &str) -> Result<Option<MarketOverride>> {
        Ok(self.tables.read().await.market_overrides.get(&key(owner_id, market_id)).cloned())
    }

    async fn upsert_market_override(
        &self,
        owner_id: &str,
        market_id: &str,
        statistics: &MarketStatistics,
        reason: &str,
        recalculated_at_ns: i64,
    ) -> Result<MarketOverride> {
        let row = MarketOverride {
            owner_id: owner_id.to_string(),
            market_id: market_id.to_string(),
            statistics: statistics.clone(),
            reason: reason.to_string(),
            recalculated_at_ns,
        };
        let mut t = self.tables.write().await;
        if let Some(market) = t.markets.get_mut(&key(owner_id, market_id)) {
            market.snapshot = Some(statistics.clone());
            market.snapshot_updated_at_ns = Some(recalculated_at_ns);
        }
        t.market_overrides.insert(key(owner_id, market_id), row.clone());
        Ok(row)
    }

    async fn upsert_product_override(&self, ov: &ProductOverride) -> Result<ProductOverride> {
        let mut t = self.tables.write().await;
        t.product_overrides.insert(key(&ov.owner_id, &ov.product_id), ov.clone());
        t.clear_snapshot_for_product(&ov.owner_id, &ov.product_id);
        Ok(ov.clone())
    }

    async fn delete_product_override(&self, owner_id: &str, product_id: &str) -> Result<bool> {
        let mut t = self.tables.write().await;
        let removed = t.product_overrides.remove(&key(owner_id, product_id)).is_some();
        if removed {
            t.clear_snapshot_for_product(owner_id, product_id);
        }
        Ok(removed)
    }
}
