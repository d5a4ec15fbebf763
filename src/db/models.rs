//! Database row types matching `migrations/0001_initial_schema.sql`, and their
//! conversion into domain types. This is the ingestion boundary: NULL numerics
//! become zero and unknown categorical text falls back to the default with a
//! warning, so nothing loosely typed reaches the merge engine or aggregator.

use std::str::FromStr;

use tracing::warn;

use crate::error::AppError;
use crate::types::{
    GradeLabel, Market, MarketAverages, MarketOverride, MarketStatistics, Product, ProductOverride,
};

#[derive(Debug, sqlx::FromRow)]
pub struct MarketRow {
    pub id: String,
    pub owner_id: String,
    pub keyword: String,
    pub snapshot_json: Option<String>,
    pub snapshot_updated_at: Option<i64>,
}

#[derive(Debug, sqlx::FromRow)]
pub struct ProductRow {
    pub id: String,
    pub market_id: String,
    pub price: Option<f64>,
    pub review_count: Option<i64>,
    pub rating: Option<f64>,
    pub bsr: Option<i64>,
    pub monthly_sales: Option<i64>,
    pub monthly_revenue: Option<f64>,
    pub cogs: Option<f64>,
    pub margin: Option<f64>,
    pub daily_revenue: Option<f64>,
    pub fulfillment_fee: Option<f64>,
    pub launch_budget: Option<f64>,
    pub profit_per_unit: Option<f64>,
    pub weight: Option<f64>,
    pub risk_classification: Option<String>,
    pub consistency_rating: Option<String>,
    /// AVG over the product's keyword rows with a positive CPC.
    pub avg_keyword_cpc: Option<f64>,
}

#[derive(Debug, sqlx::FromRow)]
pub struct ProductOverrideRow {
    pub owner_id: String,
    pub product_id: String,
    pub price: Option<f64>,
    pub review_count: Option<i64>,
    pub rating: Option<f64>,
    pub bsr: Option<i64>,
    pub monthly_sales: Option<i64>,
    pub monthly_revenue: Option<f64>,
    pub cogs: Option<f64>,
    pub margin: Option<f64>,
    pub daily_revenue: Option<f64>,
    pub fulfillment_fee: Option<f64>,
    pub launch_budget: Option<f64>,
    pub profit_per_unit: Option<f64>,
    pub weight: Option<f64>,
    pub risk_classification: Option<String>,
    pub consistency_rating: Option<String>,
    pub avg_cpc: Option<f64>,
    pub reason: String,
    pub updated_at: i64,
}

#[derive(Debug, sqlx::FromRow)]
pub struct MarketOverrideRow {
    pub owner_id: String,
    pub market_id: String,
    pub averages_json: String,
    pub market_grade: String,
    pub market_risk_classification: String,
    pub market_consistency_rating: String,
    pub composite_score: f64,
    pub opportunity_score: f64,
    pub total_products_analyzed: i64,
    pub products_verified: i64,
    pub reason: String,
    pub recalculated_at: i64,
}

fn category<T: FromStr<Err = String>>(raw: Option<String>, column: &str, id: &str) -> Option<T> {
    let raw = raw?;
    if raw.trim().is_empty() {
        return None;
    }
    match raw.parse() {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(id, column, "{e}, using default");
            None
        }
    }
}

impl From<ProductRow> for Product {
    fn from(r: ProductRow) -> Self {
        let risk_classification = category(r.risk_classification, "risk_classification", &r.id);
        let consistency_rating = category(r.consistency_rating, "consistency_rating", &r.id);
        Self {
            price: r.price.unwrap_or(0.0),
            review_count: r.review_count.unwrap_or(0),
            rating: r.rating.unwrap_or(0.0),
            bsr: r.bsr.unwrap_or(0),
            monthly_sales: r.monthly_sales.unwrap_or(0),
            monthly_revenue: r.monthly_revenue.unwrap_or(0.0),
            cogs: r.cogs.unwrap_or(0.0),
            margin: r.margin.unwrap_or(0.0),
            daily_revenue: r.daily_revenue.unwrap_or(0.0),
            fulfillment_fee: r.fulfillment_fee.unwrap_or(0.0),
            launch_budget: r.launch_budget.unwrap_or(0.0),
            profit_per_unit: r.profit_per_unit.unwrap_or(0.0),
            weight: r.weight.unwrap_or(0.0),
            risk_classification: risk_classification.unwrap_or_default(),
            consistency_rating: consistency_rating.unwrap_or_default(),
            avg_cpc: r.avg_keyword_cpc.filter(|c| *c > 0.0),
            id: r.id,
            market_id: r.market_id,
        }
    }
}

impl From<ProductOverrideRow> for ProductOverride {
    fn from(r: ProductOverrideRow) -> Self {
        // An unreadable category on an override is treated as "not overridden".
        let risk_classification = category(r.risk_classification, "risk_classification", &r.product_id);
        let consistency_rating = category(r.consistency_rating, "consistency_rating", &r.product_id);
        Self {
            owner_id: r.owner_id,
            product_id: r.product_id,
            price: r.price,
            review_count: r.review_count,
            rating: r.rating,
            bsr: r.bsr,
            monthly_sales: r.monthly_sales,
            monthly_revenue: r.monthly_revenue,
            cogs: r.cogs,
            margin: r.margin,
            daily_revenue: r.daily_revenue,
            fulfillment_fee: r.fulfillment_fee,
            launch_budget: r.launch_budget,
            profit_per_unit: r.profit_per_unit,
            weight: r.weight,
            risk_classification,
            consistency_rating,
            avg_cpc: r.avg_cpc,
            reason: r.reason,
            updated_at_ns: r.updated_at,
        }
    }
}

impl TryFrom<MarketOverrideRow> for MarketOverride {
    type Error = AppError;

    fn try_from(r: MarketOverrideRow) -> Result<Self, Self::Error> {
        let averages: MarketAverages = serde_json::from_str(&r.averages_json)?;
        let market_grade = r.market_grade.parse::<GradeLabel>().map_err(decode_error)?;
        let id = r.market_id.as_str();
        Ok(Self {
            statistics: MarketStatistics {
                averages,
                market_risk_classification: category(
                    Some(r.market_risk_classification),
                    "market_risk_classification",
                    id,
                )
                .unwrap_or_default(),
                market_consistency_rating: category(
                    Some(r.market_consistency_rating),
                    "market_consistency_rating",
                    id,
                )
                .unwrap_or_default(),
                market_grade,
                composite_score: r.composite_score,
                opportunity_score: r.opportunity_score,
                total_products_analyzed: r.total_products_analyzed.max(0) as usize,
                products_verified: r.products_verified.max(0) as usize,
            },
            owner_id: r.owner_id,
            market_id: r.market_id,
            reason: r.reason,
            recalculated_at_ns: r.recalculated_at,
        })
    }
}

impl TryFrom<MarketRow> for Market {
    type Error = AppError;

    fn try_from(r: MarketRow) -> Result<Self, Self::Error> {
        let snapshot = r
            .snapshot_json
            .as_deref()
            .map(serde_json::from_str::<MarketStatistics>)
            .transpose()?;
        Ok(Self {
            id: r.id,
            owner_id: r.owner_id,
            keyword: r.keyword,
            snapshot,
            snapshot_updated_at_ns: r.snapshot_updated_at,
        })
    }
}

fn decode_error(msg: String) -> AppError {
    AppError::Database(sqlx::Error::Decode(msg.into()))
}
