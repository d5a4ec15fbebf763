use std::cmp::Ordering;

use crate::config::cpc_estimate;
use crate::scorer::grading::{grade, grade_product, ScoringInputs};
use crate::types::{
    ConsistencyRating, EffectiveProduct, MarketAverages, MarketStatistics, Product,
    RiskClassification,
};

/// Fold effective products into market statistics and grade the market.
///
/// Means are taken over valid products only (positive price and positive
/// monthly revenue); `total_products_analyzed` still counts everything.
/// Products are put into a canonical order before summing, so the result is
/// bit-identical for any permutation of the input.
pub fn aggregate(effective: &[EffectiveProduct]) -> MarketStatistics {
    let mut valid: Vec<&EffectiveProduct> =
        effective.iter().filter(|e| e.product.is_valid()).collect();
    valid.sort_by(|a, b| canonical_order(&a.product, &b.product));

    let averages = averages(&valid);
    let risk = plurality(valid.iter().map(|e| e.product.risk_classification), RiskClassification::severity);
    let consistency =
        plurality(valid.iter().map(|e| e.product.consistency_rating), ConsistencyRating::severity);

    let seed = mean(valid.iter().map(|e| grade_product(e).score), valid.len());
    let result = grade(&ScoringInputs {
        monthly_profit: averages.avg_monthly_profit,
        price: averages.avg_price,
        margin: averages.avg_margin,
        reviews: averages.avg_review_count,
        avg_cpc: averages.avg_cpc,
        risk_classification: risk.unwrap_or_default(),
        consistency_rating: consistency.unwrap_or_default(),
        profit_per_unit: averages.avg_profit_per_unit,
        bsr: averages.avg_bsr,
        rating: averages.avg_rating,
        opportunity_score_seed: (!valid.is_empty()).then_some(seed),
    });

    MarketStatistics {
        averages,
        market_risk_classification: risk.unwrap_or(RiskClassification::NoRisk),
        market_consistency_rating: consistency.unwrap_or(ConsistencyRating::Consistent),
        market_grade: result.grade,
        composite_score: result.score,
        opportunity_score: result.opportunity_score(),
        total_products_analyzed: effective.len(),
        products_verified: valid.len(),
    }
}

/// Per-product CPC: the product's own value (override or keyword mean), else a
/// price-derived estimate clamped to the configured band.
pub fn product_cpc(p: &Product) -> f64 {
    match p.avg_cpc {
        Some(cpc) if cpc > 0.0 => cpc,
        _ => (p.price * cpc_estimate::PRICE_RATIO).clamp(cpc_estimate::MIN, cpc_estimate::MAX),
    }
}

fn averages(valid: &[&EffectiveProduct]) -> MarketAverages {
    let n = valid.len();
    let avg = |f: fn(&Product) -> f64| mean(valid.iter().map(|e| f(&e.product)), n);

    MarketAverages {
        avg_price: avg(|p| p.price),
        avg_review_count: avg(|p| p.review_count as f64),
        avg_rating: avg(|p| p.rating),
        avg_bsr: avg(|p| p.bsr as f64),
        avg_monthly_sales: avg(|p| p.monthly_sales as f64),
        avg_monthly_revenue: avg(|p| p.monthly_revenue),
        avg_monthly_profit: avg(Product::monthly_profit),
        avg_cogs: avg(|p| p.cogs),
        avg_margin: avg(|p| p.margin),
        avg_daily_revenue: avg(|p| p.daily_revenue),
        avg_fulfillment_fee: avg(|p| p.fulfillment_fee),
        avg_launch_budget: avg(|p| p.launch_budget),
        avg_profit_per_unit: avg(|p| p.profit_per_unit),
        avg_weight: avg(|p| p.weight),
        avg_cpc: avg(product_cpc),
    }
}

/// Mean with an empty-set guard (0, never NaN).
fn mean(values: impl Iterator<Item = f64>, n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    values.sum::<f64>() / n as f64
}

/// Most frequent value; ties go to the highest `priority`.
fn plurality<T: Copy + PartialEq>(values: impl Iterator<Item = T>, priority: fn(T) -> u8) -> Option<T> {
    let mut counts: Vec<(T, usize)> = Vec::new();
    for v in values {
        match counts.iter_mut().find(|(k, _)| *k == v) {
            Some((_, c)) => *c += 1,
            None => counts.push((v, 1)),
        }
    }
    counts
        .into_iter()
        .max_by(|(a, ca), (b, cb)| ca.cmp(cb).then_with(|| priority(*a).cmp(&priority(*b))))
        .map(|(v, _)| v)
}

/// Total order over every field that feeds an average, so even rows sharing
/// an id sum in the same sequence.
fn canonical_order(a: &Product, b: &Product) -> Ordering {
    let floats = |p: &Product| {
        [
            p.monthly_revenue,
            p.price,
            p.margin,
            p.rating,
            p.cogs,
            p.daily_revenue,
            p.fulfillment_fee,
            p.launch_budget,
            p.profit_per_unit,
            p.weight,
            product_cpc(p),
        ]
    };
    let ints = |p: &Product| [p.review_count, p.bsr, p.monthly_sales];

    a.id.cmp(&b.id)
        .then_with(|| {
            floats(a)
                .iter()
                .zip(floats(b).iter())
                .map(|(x, y)| x.total_cmp(y))
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| ints(a).cmp(&ints(b)))
        .then_with(|| a.risk_classification.severity().cmp(&b.risk_classification.severity()))
        .then_with(|| a.consistency_rating.severity().cmp(&b.consistency_rating.severity()))
}
