pub mod memory;
pub mod models;
pub mod sqlite_store;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Market, MarketOverride, MarketStatistics, Product, ProductOverride};

pub use memory::InMemoryResearchStore;
pub use sqlite_store::SqliteResearchStore;

/// Persistent store the grading core reads from and writes to. Every call is
/// scoped to an already-authenticated owner.
#[async_trait]
pub trait ResearchStore: Send + Sync {
    async fn fetch_markets(&self, owner_id: &str) -> Result<Vec<Market>>;

    async fn fetch_products_for_market(&self, market_id: &str, owner_id: &str) -> Result<Vec<Product>>;

    /// Empty `product_ids` or no matching rows is `Ok(vec![])`.
    async fn fetch_overrides_for_products(
        &self,
        product_ids: &[String],
        owner_id: &str,
    ) -> Result<Vec<ProductOverride>>;

    async fn fetch_market_override(&self, owner_id: &str, market_id: &str) -> Result<Option<MarketOverride>>;

    /// Insert-or-replace keyed on (owner_id, market_id). Also refreshes the
    /// market's denormalized snapshot in the same write.
    async fn upsert_market_override(
        &self,
        owner_id: &str,
        market_id: &str,
        statistics: &MarketStatistics,
        reason: &str,
        recalculated_at_ns: i64,
    ) -> Result<MarketOverride>;

    /// Insert-or-replace keyed on (owner_id, product_id). Clears the persisted
    /// snapshot of the product's market in the same write.
    async fn upsert_product_override(&self, ov: &ProductOverride) -> Result<ProductOverride>;

    /// Returns whether a row was removed. When one was, the product's market
    /// snapshot is cleared in the same write.
    async fn delete_product_override(&self, owner_id: &str, product_id: &str) -> Result<bool>;
}
