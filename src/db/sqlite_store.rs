use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqlitePool, Transaction};
use tracing::debug;

use crate::db::models::{MarketOverrideRow, MarketRow, ProductOverrideRow, ProductRow};
use crate::db::ResearchStore;
use crate::error::Result;
use crate::types::{
    now_ns, Market, MarketOverride, MarketStatistics, Product, ProductOverride,
};

const OVERRIDE_COLUMNS: &str = "owner_id, product_id, price, review_count, rating, bsr, \
    monthly_sales, monthly_revenue, cogs, margin, daily_revenue, fulfillment_fee, launch_budget, \
    profit_per_unit, weight, risk_classification, consistency_rating, avg_cpc, reason, updated_at";

const MARKET_OVERRIDE_COLUMNS: &str = "owner_id, market_id, averages_json, market_grade, \
    market_risk_classification, market_consistency_rating, composite_score, opportunity_score, \
    total_products_analyzed, products_verified, reason, recalculated_at";

/// SQLite-backed store. Constructed once and injected; holds no other state.
#[derive(Clone)]
pub struct SqliteResearchStore {
    pool: SqlitePool,
}

impl SqliteResearchStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Register a market for an owner. Existing rows are left as they are.
    pub async fn insert_market(&self, owner_id: &str, market_id: &str, keyword: &str) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO markets (id, owner_id, keyword, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(market_id)
        .bind(owner_id)
        .bind(keyword)
        .bind(now_ns())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert or replace an ingested product with its keyword CPCs.
    pub async fn insert_product(
        &self,
        owner_id: &str,
        product: &Product,
        keyword_cpcs: &[(&str, Option<f64>)],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO products (
                id, owner_id, market_id, price, review_count, rating, bsr, monthly_sales,
                monthly_revenue, cogs, margin, daily_revenue, fulfillment_fee, launch_budget,
                profit_per_unit, weight, risk_classification, consistency_rating
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&product.id)
        .bind(owner_id)
        .bind(&product.market_id)
        .bind(product.price)
        .bind(product.review_count)
        .bind(product.rating)
        .bind(product.bsr)
        .bind(product.monthly_sales)
        .bind(product.monthly_revenue)
        .bind(product.cogs)
        .bind(product.margin)
        .bind(product.daily_revenue)
        .bind(product.fulfillment_fee)
        .bind(product.launch_budget)
        .bind(product.profit_per_unit)
        .bind(product.weight)
        .bind(product.risk_classification.to_string())
        .bind(product.consistency_rating.to_string())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM keywords WHERE owner_id = ? AND product_id = ?")
            .bind(owner_id)
            .bind(&product.id)
            .execute(&mut *tx)
            .await?;
        for (keyword, cpc) in keyword_cpcs {
            sqlx::query("INSERT INTO keywords (owner_id, product_id, keyword, cpc) VALUES (?, ?, ?, ?)")
                .bind(owner_id)
                .bind(&product.id)
                .bind(*keyword)
                .bind(*cpc)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl ResearchStore for SqliteResearchStore {
    async fn fetch_markets(&self, owner_id: &str) -> Result<Vec<Market>> {
        let rows = sqlx::query_as::<_, MarketRow>(
            r#"
            SELECT id, owner_id, keyword, snapshot_json, snapshot_updated_at
            FROM markets
            WHERE owner_id = ?
            ORDER BY keyword, id
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Market::try_from).collect()
    }

    async fn fetch_products_for_market(&self, market_id: &str, owner_id: &str) -> Result<Vec<Product>> {
        let rows = sqlx::query_as::<_, ProductRow>(
            r#"
            SELECT p.id, p.market_id, p.price, p.review_count, p.rating, p.bsr, p.monthly_sales,
                   p.monthly_revenue, p.cogs, p.margin, p.daily_revenue, p.fulfillment_fee,
                   p.launch_budget, p.profit_per_unit, p.weight,
                   p.risk_classification, p.consistency_rating,
                   (SELECT AVG(k.cpc) FROM keywords k
                     WHERE k.owner_id = p.owner_id AND k.product_id = p.id AND k.cpc > 0
                   ) AS avg_keyword_cpc
            FROM products p
            WHERE p.market_id = ? AND p.owner_id = ?
            ORDER BY p.id
            "#,
        )
        .bind(market_id)
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Product::from).collect())
    }

    async fn fetch_overrides_for_products(
        &self,
        product_ids: &[String],
        owner_id: &str,
    ) -> Result<Vec<ProductOverride>> {
        if product_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {OVERRIDE_COLUMNS} FROM product_overrides WHERE owner_id = "
        ));
        qb.push_bind(owner_id);
        qb.push(" AND product_id IN (");
        let mut ids = qb.separated(", ");
        for id in product_ids {
            ids.push_bind(id.as_str());
        }
        ids.push_unseparated(")");

        let rows = qb.build_query_as::<ProductOverrideRow>().fetch_all(&self.pool).await?;
        debug!(owner_id, requested = product_ids.len(), found = rows.len(), "Fetched overrides");
        Ok(rows.into_iter().map(ProductOverride::from).collect())
    }

    async fn fetch_market_override(&self, owner_id: &str, market_id: &str) -> Result<Option<MarketOverride>> {
        let row = sqlx::query_as::<_, MarketOverrideRow>(&format!(
            "SELECT {MARKET_OVERRIDE_COLUMNS} FROM market_overrides WHERE owner_id = ? AND market_id = ?"
        ))
        .bind(owner_id)
        .bind(market_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(MarketOverride::try_from).transpose()
    }

    async fn upsert_market_override(
        &self,
        owner_id: &str,
        market_id: &str,
        statistics: &MarketStatistics,
        reason: &str,
        recalculated_at_ns: i64,
    ) -> Result<MarketOverride> {
        let averages_json = serde_json::to_string(&statistics.averages)?;
        let snapshot_json = serde_json::to_string(statistics)?;
        let grade = statistics.market_grade.to_string();
        let total = statistics.total_products_analyzed as i64;
        let verified = statistics.products_verified as i64;

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            r#"
            INSERT INTO market_overrides ({MARKET_OVERRIDE_COLUMNS})
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(owner_id, market_id) DO UPDATE SET
                averages_json = excluded.averages_json,
                market_grade = excluded.market_grade,
                market_risk_classification = excluded.market_risk_classification,
                market_consistency_rating = excluded.market_consistency_rating,
                composite_score = excluded.composite_score,
                opportunity_score = excluded.opportunity_score,
                total_products_analyzed = excluded.total_products_analyzed,
                products_verified = excluded.products_verified,
                reason = excluded.reason,
                recalculated_at = excluded.recalculated_at
            "#
        ))
        .bind(owner_id)
        .bind(market_id)
        .bind(&averages_json)
        .bind(&grade)
        .bind(statistics.market_risk_classification.to_string())
        .bind(statistics.market_consistency_rating.to_string())
        .bind(statistics.composite_score)
        .bind(statistics.opportunity_score)
        .bind(total)
        .bind(verified)
        .bind(reason)
        .bind(recalculated_at_ns)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE markets SET
                market_grade = ?, opportunity_score = ?, products_verified = ?,
                total_products_analyzed = ?, snapshot_json = ?, snapshot_updated_at = ?
            WHERE owner_id = ? AND id = ?
            "#,
        )
        .bind(&grade)
        .bind(statistics.opportunity_score)
        .bind(verified)
        .bind(total)
        .bind(&snapshot_json)
        .bind(recalculated_at_ns)
        .bind(owner_id)
        .bind(market_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(MarketOverride {
            owner_id: owner_id.to_string(),
            market_id: market_id.to_string(),
            statistics: statistics.clone(),
            reason: reason.to_string(),
            recalculated_at_ns,
        })
    }

    async fn upsert_product_override(&self, ov: &ProductOverride) -> Result<ProductOverride> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            r#"
            INSERT INTO product_overrides ({OVERRIDE_COLUMNS})
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(owner_id, product_id) DO UPDATE SET
                price = excluded.price,
                review_count = excluded.review_count,
                rating = excluded.rating,
                bsr = excluded.bsr,
                monthly_sales = excluded.monthly_sales,
                monthly_revenue = excluded.monthly_revenue,
                cogs = excluded.cogs,
                margin = excluded.margin,
                daily_revenue = excluded.daily_revenue,
                fulfillment_fee = excluded.fulfillment_fee,
                launch_budget = excluded.launch_budget,
                profit_per_unit = excluded.profit_per_unit,
                weight = excluded.weight,
                risk_classification = excluded.risk_classification,
                consistency_rating = excluded.consistency_rating,
                avg_cpc = excluded.avg_cpc,
                reason = excluded.reason,
                updated_at = excluded.updated_at
            "#
        ))
        .bind(&ov.owner_id)
        .bind(&ov.product_id)
        .bind(ov.price)
        .bind(ov.review_count)
        .bind(ov.rating)
        .bind(ov.bsr)
        .bind(ov.monthly_sales)
        .bind(ov.monthly_revenue)
        .bind(ov.cogs)
        .bind(ov.margin)
        .bind(ov.daily_revenue)
        .bind(ov.fulfillment_fee)
        .bind(ov.launch_budget)
        .bind(ov.profit_per_unit)
        .bind(ov.weight)
        .bind(ov.risk_classification.map(|r| r.to_string()))
        .bind(ov.consistency_rating.map(|c| c.to_string()))
        .bind(ov.avg_cpc)
        .bind(&ov.reason)
        .bind(ov.updated_at_ns)
        .execute(&mut *tx)
        .await?;
        clear_snapshot_for_product(&mut tx, &ov.owner_id, &ov.product_id).await?;
        tx.commit().await?;

        Ok(ov.clone())
    }

    async fn delete_product_override(&self, owner_id: &str, product_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM product_overrides WHERE owner_id = ? AND product_id = ?")
            .bind(owner_id)
            .bind(product_id)
            .execute(&mut *tx)
            .await?;
        let removed = result.rows_affected() > 0;
        if removed {
            clear_snapshot_for_product(&mut tx, owner_id, product_id).await?;
        }
        tx.commit().await?;
        Ok(removed)
    }
}

/// Drop the persisted snapshot of the market holding `product_id`. The
/// snapshot no longer matches the effective data until the next recalculation.
async fn clear_snapshot_for_product(
    tx: &mut Transaction<'_, Sqlite>,
    owner_id: &str,
    product_id: &str,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE markets SET snapshot_json = NULL, snapshot_updated_at = NULL
        WHERE owner_id = ?
          AND id IN (SELECT market_id FROM products WHERE owner_id = ? AND id = ?)
        "#,
    )
    .bind(owner_id)
    .bind(owner_id)
    .bind(product_id)
    .execute(&mut **tx)
    .await?;
    debug!(owner_id, product_id, markets = result.rows_affected(), "Market snapshot cleared");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recalc::Recalculator;
    use crate::scorer::aggregate;
    use crate::state::InMemoryDashboardCache;
    use crate::types::{EffectiveProduct, GradeLabel, RiskClassification};
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::Arc;
    use std::time::Duration;

    async fn store() -> SqliteResearchStore {
        // One connection: every connection to :memory: is a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        SqliteResearchStore::new(pool)
    }

    fn product(id: &str, price: f64, monthly_revenue: f64) -> Product {
        Product {
            id: id.to_string(),
            market_id: "m1".to_string(),
            price,
            monthly_revenue,
            margin: 25.0,
            review_count: 80,
            ..Default::default()
        }
    }

    async fn seeded() -> SqliteResearchStore {
        let s = store().await;
        s.insert_market("owner1", "m1", "wireless earbuds").await.unwrap();
        s.insert_product("owner1", &product("p1", 20.0, 1000.0), &[("earbuds", Some(1.0)), ("buds", Some(2.0))])
            .await
            .unwrap();
        s.insert_product("owner1", &product("p2", 25.0, 2000.0), &[("earbuds", None)])
            .await
            .unwrap();
        s.insert_product("owner2", &product("p9", 30.0, 900.0), &[]).await.unwrap();
        s
    }

    #[tokio::test]
    async fn products_are_owner_scoped_with_keyword_cpc() {
        let s = seeded().await;
        let products = s.fetch_products_for_market("m1", "owner1").await.unwrap();
        assert_eq!(products.len(), 2);
        assert_eq!(products[0].id, "p1");
        assert_eq!(products[0].avg_cpc, Some(1.5));
        assert_eq!(products[1].avg_cpc, None);

        let other = s.fetch_products_for_market("m1", "owner3").await.unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn product_override_upsert_replaces_and_deletes() {
        let s = seeded().await;
        let ov = ProductOverride {
            owner_id: "owner1".to_string(),
            product_id: "p1".to_string(),
            monthly_revenue: Some(4000.0),
            risk_classification: Some(RiskClassification::Breakable),
            reason: "first".to_string(),
            updated_at_ns: 1,
            ..Default::default()
        };
        s.upsert_product_override(&ov).await.unwrap();
        let second = ProductOverride { reason: "second".to_string(), price: Some(22.0), updated_at_ns: 2, ..ov };
        s.upsert_product_override(&second).await.unwrap();

        let ids = vec!["p1".to_string(), "p2".to_string()];
        let fetched = s.fetch_overrides_for_products(&ids, "owner1").await.unwrap();
        assert_eq!(fetched, vec![second]);
        assert!(s.fetch_overrides_for_products(&ids, "owner2").await.unwrap().is_empty());
        assert!(s.fetch_overrides_for_products(&[], "owner1").await.unwrap().is_empty());

        assert!(s.delete_product_override("owner1", "p1").await.unwrap());
        assert!(!s.delete_product_override("owner1", "p1").await.unwrap());
        assert!(s.fetch_overrides_for_products(&ids, "owner1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn market_override_upsert_keeps_one_row_and_refreshes_snapshot() {
        let s = seeded().await;
        let products: Vec<EffectiveProduct> = s
            .fetch_products_for_market("m1", "owner1")
            .await
            .unwrap()
            .into_iter()
            .map(EffectiveProduct::from)
            .collect();
        let stats = aggregate(&products);

        s.upsert_market_override("owner1", "m1", &stats, "first", 10).await.unwrap();
        let written = s.upsert_market_override("owner1", "m1", &stats, "second", 20).await.unwrap();

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM market_overrides WHERE owner_id = 'owner1' AND market_id = 'm1'",
        )
        .fetch_one(s.pool())
        .await
        .unwrap();
        assert_eq!(count, 1);

        let read = s.fetch_market_override("owner1", "m1").await.unwrap().expect("row exists");
        assert_eq!(read, written);
        assert_eq!(read.reason, "second");
        assert_eq!(read.statistics.products_verified, 2);

        let markets = s.fetch_markets("owner1").await.unwrap();
        assert_eq!(markets.len(), 1);
        assert_eq!(markets[0].snapshot.as_ref(), Some(&stats));
        assert_eq!(markets[0].snapshot_updated_at_ns, Some(20));
        assert!(s.fetch_market_override("owner2", "m1").await.unwrap().is_none());
        assert!(stats.market_grade > GradeLabel::F1);
    }

    fn stat_bits(s: &MarketStatistics) -> Vec<u64> {
        let a = &s.averages;
        [
            a.avg_price,
            a.avg_review_count,
            a.avg_rating,
            a.avg_bsr,
            a.avg_monthly_sales,
            a.avg_monthly_revenue,
            a.avg_monthly_profit,
            a.avg_cogs,
            a.avg_margin,
            a.avg_daily_revenue,
            a.avg_fulfillment_fee,
            a.avg_launch_budget,
            a.avg_profit_per_unit,
            a.avg_weight,
            a.avg_cpc,
            s.composite_score,
            s.opportunity_score,
        ]
        .iter()
        .map(|v| v.to_bits())
        .collect()
    }

    #[tokio::test]
    async fn recalculation_through_sqlite_is_bit_identical() {
        let s = store().await;
        s.insert_market("owner1", "m1", "garlic press").await.unwrap();
        let awkward = [("a", 19.99, 1234.57, 0.1), ("b", 7.3, 981.13, 0.7), ("c", 44.01, 15_000.3, 0.0)];
        for (id, price, revenue, cpc) in awkward {
            let p = Product {
                margin: 27.3,
                rating: 4.37,
                weight: 0.33,
                profit_per_unit: price / 3.0,
                ..product(id, price, revenue)
            };
            s.insert_product("owner1", &p, &[("garlic press", Some(cpc))]).await.unwrap();
        }

        let store: Arc<SqliteResearchStore> = Arc::new(s);
        let recalc = Recalculator::new(store.clone(), InMemoryDashboardCache::new(Duration::from_secs(60)));

        let first = recalc.recalculate_market("m1", "owner1", "r").await.unwrap();
        let read_first = store.fetch_market_override("owner1", "m1").await.unwrap().expect("row exists");
        let second = recalc.recalculate_market("m1", "owner1", "r").await.unwrap();
        let read_second = store.fetch_market_override("owner1", "m1").await.unwrap().expect("row exists");

        assert_eq!(stat_bits(&read_first.statistics), stat_bits(&first.market_override.statistics));
        assert_eq!(stat_bits(&read_second.statistics), stat_bits(&read_first.statistics));
        assert_eq!(read_second.statistics, read_first.statistics);
        assert_eq!(second.previous_grade, Some(first.new_grade));

        let markets = store.fetch_markets("owner1").await.unwrap();
        let snapshot = markets[0].snapshot.as_ref().expect("snapshot persisted");
        assert_eq!(stat_bits(snapshot), stat_bits(&read_second.statistics));
    }

    #[tokio::test]
    async fn override_writes_clear_the_market_snapshot() {
        let s = seeded().await;
        let stats = aggregate(&[]);
        s.upsert_market_override("owner1", "m1", &stats, "base", 10).await.unwrap();

        let ov = ProductOverride {
            owner_id: "owner1".to_string(),
            product_id: "p1".to_string(),
            monthly_revenue: Some(4000.0),
            updated_at_ns: 11,
            ..Default::default()
        };
        s.upsert_product_override(&ov).await.unwrap();
        let markets = s.fetch_markets("owner1").await.unwrap();
        assert!(markets[0].snapshot.is_none());
        assert_eq!(markets[0].snapshot_updated_at_ns, None);

        s.upsert_market_override("owner1", "m1", &stats, "again", 12).await.unwrap();
        assert!(s.delete_product_override("owner1", "p1").await.unwrap());
        let markets = s.fetch_markets("owner1").await.unwrap();
        assert!(markets[0].snapshot.is_none());
        // The market override row itself stays for the previous-grade lookup.
        assert!(s.fetch_market_override("owner1", "m1").await.unwrap().is_some());

        // Deleting nothing leaves a fresh snapshot alone.
        s.upsert_market_override("owner1", "m1", &stats, "third", 13).await.unwrap();
        assert!(!s.delete_product_override("owner1", "p1").await.unwrap());
        let markets = s.fetch_markets("owner1").await.unwrap();
        assert_eq!(markets[0].snapshot_updated_at_ns, Some(13));
    }
}
