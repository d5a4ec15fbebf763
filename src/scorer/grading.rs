use serde::{Deserialize, Serialize};

use crate::config::{consistency_penalty, grade_norms, grade_weights, REVIEW_TIERS};
use crate::types::{ConsistencyRating, EffectiveProduct, GradeLabel, RiskClassification};

/// Scores below this map to F1; every 2 points above it is one bucket.
const F1_CEILING: f64 = 20.0;
const BUCKET_WIDTH: f64 = 2.0;

/// Inputs to [`grade`]. Used for single products and for market aggregates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoringInputs {
    pub monthly_profit: f64,
    pub price: f64,
    /// Percent.
    pub margin: f64,
    pub reviews: f64,
    pub avg_cpc: f64,
    pub risk_classification: RiskClassification,
    pub consistency_rating: ConsistencyRating,
    pub profit_per_unit: f64,
    pub bsr: f64,
    pub rating: f64,
    /// Prior 0..=100 score to blend in (e.g. mean of per-product scores).
    pub opportunity_score_seed: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradeResult {
    pub grade: GradeLabel,
    /// Composite in 0..=100 before bucketing.
    pub score: f64,
}

impl GradeResult {
    /// Normalized 0..=100 opportunity score, rounded to one decimal.
    pub fn opportunity_score(&self) -> f64 {
        (self.score.clamp(0.0, 100.0) * 10.0).round() / 10.0
    }
}

/// Highest bucket reachable under a risk classification.
pub fn risk_ceiling(risk: RiskClassification) -> GradeLabel {
    match risk {
        RiskClassification::NoRisk => GradeLabel::A10,
        RiskClassification::Breakable => GradeLabel::from_rank(35), // A5
        RiskClassification::Electric => GradeLabel::from_rank(30), // B10
        RiskClassification::Banned => GradeLabel::from_rank(10), // D10
    }
}

/// Grade a set of inputs. Pure: identical inputs give identical output.
pub fn grade(inputs: &ScoringInputs) -> GradeResult {
    if inputs.monthly_profit.is_nan() || inputs.monthly_profit <= 0.0 {
        return GradeResult { grade: GradeLabel::F1, score: 0.0 };
    }

    let mut score = composite(inputs);

    if let Some(seed) = inputs.opportunity_score_seed.filter(|s| s.is_finite()) {
        let blend = grade_weights::SEED_BLEND;
        score = score * (1.0 - blend) + seed.clamp(0.0, 100.0) * blend;
    }

    score *= match inputs.consistency_rating {
        ConsistencyRating::Consistent => 1.0,
        ConsistencyRating::Seasonal => consistency_penalty::SEASONAL,
        ConsistencyRating::Trendy => consistency_penalty::TRENDY,
    };

    let ceiling = risk_ceiling(inputs.risk_classification);
    score = score.clamp(0.0, upper_bound(ceiling));

    GradeResult { grade: bucket(score), score }
}

/// Grade one effective product, seeding nothing.
pub fn grade_product(product: &EffectiveProduct) -> GradeResult {
    grade(&ScoringInputs::from(product))
}

impl From<&EffectiveProduct> for ScoringInputs {
    fn from(e: &EffectiveProduct) -> Self {
        let p = &e.product;
        Self {
            monthly_profit: p.monthly_profit(),
            price: p.price,
            margin: p.margin,
            reviews: p.review_count as f64,
            avg_cpc: p.avg_cpc.unwrap_or(0.0),
            risk_classification: p.risk_classification,
            consistency_rating: p.consistency_rating,
            profit_per_unit: p.profit_per_unit,
            bsr: p.bsr as f64,
            rating: p.rating,
            opportunity_score_seed: None,
        }
    }
}

fn composite(i: &ScoringInputs) -> f64 {
    let profit = unit(i.monthly_profit / grade_norms::PROFIT_CEILING);

    // A unit that loses money drags margin to zero even when the stated margin is positive.
    let margin = if i.profit_per_unit < 0.0 {
        0.0
    } else {
        unit(i.margin / grade_norms::MARGIN_CEILING)
    };

    let reviews = review_tier(i.reviews);

    let cpc = if i.price > 0.0 && i.avg_cpc > 0.0 {
        1.0 - unit(i.avg_cpc / i.price / grade_norms::CPC_RATIO_CEILING)
    } else if i.price > 0.0 {
        1.0
    } else {
        0.0
    };

    let bsr = if i.bsr >= 1.0 {
        1.0 - unit(i.bsr.log10() / grade_norms::BSR_LOG_CEILING)
    } else {
        0.0
    };

    let rating = unit(i.rating / grade_norms::RATING_MAX);

    profit * grade_weights::PROFIT
        + margin * grade_weights::MARGIN
        + reviews * grade_weights::REVIEWS
        + cpc * grade_weights::CPC
        + bsr * grade_weights::BSR
        + rating * grade_weights::RATING
}

fn review_tier(reviews: f64) -> f64 {
    let reviews = reviews.max(0.0);
    REVIEW_TIERS
        .iter()
        .find(|(upper, _)| reviews < *upper as f64)
        .map(|(_, factor)| *factor)
        .unwrap_or(0.0)
}

/// Clamp to 0..=1, mapping NaN to 0.
fn unit(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

/// Map a composite score onto the 41 buckets.
pub fn bucket(score: f64) -> GradeLabel {
    if score.is_nan() || score < F1_CEILING {
        return GradeLabel::F1;
    }
    let steps = ((score - F1_CEILING) / BUCKET_WIDTH).floor() as u32;
    GradeLabel::from_rank((1 + steps).min(GradeLabel::MAX_RANK as u32) as u8)
}

/// Largest score that still lands in `label`.
fn upper_bound(label: GradeLabel) -> f64 {
    if label == GradeLabel::A10 {
        return 100.0;
    }
    let next_floor = F1_CEILING + BUCKET_WIDTH * label.rank() as f64;
    // Stay strictly below the next bucket's lower bound.
    next_floor - 1e-9
}
