use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

// ---------------------------------------------------------------------------
// Categorical classifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskClassification {
    #[default]
    NoRisk,
    Electric,
    Breakable,
    Banned,
}

impl RiskClassification {
    pub const ALL: [RiskClassification; 4] = [
        RiskClassification::NoRisk,
        RiskClassification::Electric,
        RiskClassification::Breakable,
        RiskClassification::Banned,
    ];

    /// Tie-break priority for plurality votes. Higher wins, so ties resolve
    /// toward the more restrictive classification.
    pub fn severity(self) -> u8 {
        match self {
            RiskClassification::NoRisk => 0,
            RiskClassification::Breakable => 1,
            RiskClassification::Electric => 2,
            RiskClassification::Banned => 3,
        }
    }
}

impl std::fmt::Display for RiskClassification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskClassification::NoRisk => "no_risk",
            RiskClassification::Electric => "electric",
            RiskClassification::Breakable => "breakable",
            RiskClassification::Banned => "banned",
        };
        write!(f, "{s}")
    }
}

impl FromStr for RiskClassification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "no_risk" | "norisk" | "none" => Ok(RiskClassification::NoRisk),
            "electric" => Ok(RiskClassification::Electric),
            "breakable" => Ok(RiskClassification::Breakable),
            "banned" => Ok(RiskClassification::Banned),
            other => Err(format!("unknown risk classification: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyRating {
    #[default]
    Consistent,
    Seasonal,
    Trendy,
}

impl ConsistencyRating {
    pub const ALL: [ConsistencyRating; 3] = [
        ConsistencyRating::Consistent,
        ConsistencyRating::Seasonal,
        ConsistencyRating::Trendy,
    ];

    /// Tie-break priority for plurality votes; least stable demand wins ties.
    pub fn severity(self) -> u8 {
        match self {
            ConsistencyRating::Consistent => 0,
            ConsistencyRating::Seasonal => 1,
            ConsistencyRating::Trendy => 2,
        }
    }
}

impl std::fmt::Display for ConsistencyRating {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConsistencyRating::Consistent => "consistent",
            ConsistencyRating::Seasonal => "seasonal",
            ConsistencyRating::Trendy => "trendy",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ConsistencyRating {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "consistent" => Ok(ConsistencyRating::Consistent),
            "seasonal" => Ok(ConsistencyRating::Seasonal),
            "trendy" => Ok(ConsistencyRating::Trendy),
            other => Err(format!("unknown consistency rating: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Grade buckets
// ---------------------------------------------------------------------------

/// One of 41 ordered grade buckets. Rank 0 is F1, ranks 1..=10 are D1..D10,
/// then C, B, and A up to rank 40 (A10). Derived `Ord` is the grade order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GradeLabel(u8);

impl GradeLabel {
    pub const F1: GradeLabel = GradeLabel(0);
    pub const A10: GradeLabel = GradeLabel(40);
    pub const MAX_RANK: u8 = 40;

    pub fn from_rank(rank: u8) -> Self {
        GradeLabel(rank.min(Self::MAX_RANK))
    }

    pub fn rank(self) -> u8 {
        self.0
    }

    /// Every bucket, worst first.
    pub fn all() -> impl Iterator<Item = GradeLabel> {
        (0..=Self::MAX_RANK).map(GradeLabel)
    }

    pub fn letter(self) -> char {
        match self.0 {
            0 => 'F',
            r => ['D', 'C', 'B', 'A'][((r - 1) / 10) as usize],
        }
    }

    /// Sub-bucket within the letter, 1..=10 (always 1 for F).
    pub fn step(self) -> u8 {
        match self.0 {
            0 => 1,
            r => (r - 1) % 10 + 1,
        }
    }
}

impl std::fmt::Display for GradeLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.letter(), self.step())
    }
}

impl FromStr for GradeLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let mut chars = s.chars();
        let letter = chars.next().map(|c| c.to_ascii_uppercase());
        let step: u8 = chars
            .as_str()
            .parse()
            .map_err(|_| format!("invalid grade label: {s}"))?;
        let base = match letter {
            Some('F') if step == 1 => return Ok(GradeLabel::F1),
            Some('D') => 0,
            Some('C') => 10,
            Some('B') => 20,
            Some('A') => 30,
            _ => return Err(format!("invalid grade label: {s}")),
        };
        if !(1..=10).contains(&step) {
            return Err(format!("invalid grade label: {s}"));
        }
        Ok(GradeLabel(base + step))
    }
}

impl TryFrom<String> for GradeLabel {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<GradeLabel> for String {
    fn from(value: GradeLabel) -> Self {
        value.to_string()
    }
}

// ---------------------------------------------------------------------------
// Product records
// ---------------------------------------------------------------------------

/// Base product snapshot as ingested. Read-only to the grading core.
/// Missing numeric data is defaulted to zero at the ingestion boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Product {
    pub id: String,
    pub market_id: String,
    pub price: f64,
    pub review_count: i64,
    pub rating: f64,
    /// Marketplace best-seller rank (lower is better, 0 = unknown).
    pub bsr: i64,
    pub monthly_sales: i64,
    pub monthly_revenue: f64,
    pub cogs: f64,
    /// Percent, e.g. 32.5.
    pub margin: f64,
    pub daily_revenue: f64,
    pub fulfillment_fee: f64,
    pub launch_budget: f64,
    pub profit_per_unit: f64,
    pub weight: f64,
    pub risk_classification: RiskClassification,
    pub consistency_rating: ConsistencyRating,
    /// Mean CPC of linked keyword records. None when no keyword carries a CPC.
    pub avg_cpc: Option<f64>,
}

impl Product {
    /// Positive price and positive monthly revenue.
    pub fn is_valid(&self) -> bool {
        self.price > 0.0 && self.monthly_revenue > 0.0
    }

    /// Monthly profit from margin, falling back to per-unit profit when no
    /// margin is known.
    pub fn monthly_profit(&self) -> f64 {
        if self.margin != 0.0 {
            self.monthly_revenue * self.margin / 100.0
        } else {
            self.profit_per_unit * self.monthly_sales as f64
        }
    }
}

/// Mean of the keyword CPCs that are present and positive.
pub fn mean_keyword_cpc(cpcs: &[Option<f64>]) -> Option<f64> {
    let known: Vec<f64> = cpcs.iter().flatten().copied().filter(|c| *c > 0.0).collect();
    if known.is_empty() {
        None
    } else {
        Some(known.iter().sum::<f64>() / known.len() as f64)
    }
}

/// Sparse user-authored patch over one product. `None` means "not overridden",
/// never zero. At most one per (owner_id, product_id).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductOverride {
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
    pub risk_classification: Option<RiskClassification>,
    pub consistency_rating: Option<ConsistencyRating>,
    pub avg_cpc: Option<f64>,
    pub reason: String,
    pub updated_at_ns: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideField {
    Price,
    ReviewCount,
    Rating,
    Bsr,
    MonthlySales,
    MonthlyRevenue,
    Cogs,
    Margin,
    DailyRevenue,
    FulfillmentFee,
    LaunchBudget,
    ProfitPerUnit,
    Weight,
    RiskClassification,
    ConsistencyRating,
    AvgCpc,
}

/// Identifies the override that produced an effective product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideSource {
    pub owner_id: String,
    pub reason: String,
    pub updated_at_ns: i64,
}

/// Product with its override applied. Computed on every read, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveProduct {
    #[serde(flatten)]
    pub product: Product,
    pub has_overrides: bool,
    pub overridden_fields: Vec<OverrideField>,
    pub override_source: Option<OverrideSource>,
}

impl From<Product> for EffectiveProduct {
    fn from(product: Product) -> Self {
        Self {
            product,
            has_overrides: false,
            overridden_fields: Vec::new(),
            override_source: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Market aggregates
// ---------------------------------------------------------------------------

/// Arithmetic means over valid products. Empty input yields all zeros.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketAverages {
    pub avg_price: f64,
    pub avg_review_count: f64,
    pub avg_rating: f64,
    pub avg_bsr: f64,
    pub avg_monthly_sales: f64,
    pub avg_monthly_revenue: f64,
    pub avg_monthly_profit: f64,
    pub avg_cogs: f64,
    pub avg_margin: f64,
    pub avg_daily_revenue: f64,
    pub avg_fulfillment_fee: f64,
    pub avg_launch_budget: f64,
    pub avg_profit_per_unit: f64,
    pub avg_weight: f64,
    pub avg_cpc: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketStatistics {
    #[serde(flatten)]
    pub averages: MarketAverages,
    pub market_risk_classification: RiskClassification,
    pub market_consistency_rating: ConsistencyRating,
    pub market_grade: GradeLabel,
    /// Pre-bucketing composite, kept for ranking.
    pub composite_score: f64,
    /// 0..=100
    pub opportunity_score: f64,
    pub total_products_analyzed: usize,
    pub products_verified: usize,
}

/// Persisted aggregator result. One row per (owner_id, market_id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketOverride {
    pub owner_id: String,
    pub market_id: String,
    #[serde(flatten)]
    pub statistics: MarketStatistics,
    pub reason: String,
    pub recalculated_at_ns: i64,
}

/// Keyword grouping of one owner's products, with its denormalized snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    pub id: String,
    pub owner_id: String,
    pub keyword: String,
    pub snapshot: Option<MarketStatistics>,
    pub snapshot_updated_at_ns: Option<i64>,
}

// ---------------------------------------------------------------------------
// Dashboard read model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatisticsSource {
    /// Read from the persisted market override.
    Persisted,
    /// Aggregated on the fly; no market override exists yet.
    Computed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketView {
    pub market_id: String,
    pub keyword: String,
    pub statistics: MarketStatistics,
    pub source: StatisticsSource,
    pub products: Vec<EffectiveProduct>,
}

/// Denormalized per-owner dashboard, the unit the read cache stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub owner_id: String,
    pub markets: Vec<MarketView>,
    pub generated_at_ns: i64,
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Nanosecond UTC epoch.
pub fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grade_labels_render_and_parse() {
        assert_eq!(GradeLabel::F1.to_string(), "F1");
        assert_eq!(GradeLabel::from_rank(1).to_string(), "D1");
        assert_eq!(GradeLabel::from_rank(10).to_string(), "D10");
        assert_eq!(GradeLabel::from_rank(11).to_string(), "C1");
        assert_eq!(GradeLabel::A10.to_string(), "A10");

        for label in GradeLabel::all() {
            assert_eq!(label.to_string().parse::<GradeLabel>(), Ok(label));
        }
        assert!("F2".parse::<GradeLabel>().is_err());
        assert!("A11".parse::<GradeLabel>().is_err());
        assert!("E5".parse::<GradeLabel>().is_err());
    }

    #[test]
    fn grade_order_is_total_and_letter_major() {
        let labels: Vec<GradeLabel> = GradeLabel::all().collect();
        assert_eq!(labels.len(), 41);
        assert!("A1".parse::<GradeLabel>().unwrap() > "B10".parse::<GradeLabel>().unwrap());
        assert!("D1".parse::<GradeLabel>().unwrap() > GradeLabel::F1);
        assert!(labels.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn grade_label_serializes_as_string() {
        let json = serde_json::to_string(&GradeLabel::from_rank(25)).unwrap();
        assert_eq!(json, "\"B5\"");
        let back: GradeLabel = serde_json::from_str(&json).unwrap();
        assert_eq!(back.rank(), 25);
    }

    #[test]
    fn categorical_parsing_accepts_legacy_spellings() {
        assert_eq!("No Risk".parse::<RiskClassification>(), Ok(RiskClassification::NoRisk));
        assert_eq!("BANNED".parse::<RiskClassification>(), Ok(RiskClassification::Banned));
        assert_eq!("Seasonal".parse::<ConsistencyRating>(), Ok(ConsistencyRating::Seasonal));
        assert!("sometimes".parse::<ConsistencyRating>().is_err());
    }

    #[test]
    fn keyword_cpc_mean_skips_missing() {
        assert_eq!(mean_keyword_cpc(&[]), None);
        assert_eq!(mean_keyword_cpc(&[None, Some(0.0)]), None);
        assert_eq!(mean_keyword_cpc(&[Some(1.0), None, Some(2.0)]), Some(1.5));
    }

    #[test]
    fn monthly_profit_prefers_margin() {
        let p = Product {
            monthly_revenue: 2000.0,
            margin: 25.0,
            profit_per_unit: 3.0,
            monthly_sales: 100,
            ..Default::default()
        };
        assert_eq!(p.monthly_profit(), 500.0);
        let q = Product { margin: 0.0, ..p };
        assert_eq!(q.monthly_profit(), 300.0);
    }
}
