use std::collections::HashMap;
use tracing::{debug, warn};

use crate::types::{EffectiveProduct, OverrideField, OverrideSource, Product, ProductOverride};

/// Apply `ov` to `base` field by field. A field set on the override wins;
/// an unset field keeps the base value, never zero or a display default.
///
/// An override that targets a different product is ignored and the base
/// product is returned unchanged.
pub fn merge(base: Product, ov: Option<&ProductOverride>) -> EffectiveProduct {
    let Some(ov) = ov else {
        return EffectiveProduct::from(base);
    };
    if ov.product_id != base.id {
        warn!(
            product_id = %base.id,
            override_target = %ov.product_id,
            "Override targets a different product, ignoring"
        );
        return EffectiveProduct::from(base);
    }

    let mut fields = Vec::new();
    let mut p = base;

    apply(&mut fields, OverrideField::Price, ov.price, &mut p.price);
    apply(&mut fields, OverrideField::ReviewCount, ov.review_count, &mut p.review_count);
    apply(&mut fields, OverrideField::Rating, ov.rating, &mut p.rating);
    apply(&mut fields, OverrideField::Bsr, ov.bsr, &mut p.bsr);
    apply(&mut fields, OverrideField::MonthlySales, ov.monthly_sales, &mut p.monthly_sales);
    apply(&mut fields, OverrideField::MonthlyRevenue, ov.monthly_revenue, &mut p.monthly_revenue);
    apply(&mut fields, OverrideField::Cogs, ov.cogs, &mut p.cogs);
    apply(&mut fields, OverrideField::Margin, ov.margin, &mut p.margin);
    apply(&mut fields, OverrideField::DailyRevenue, ov.daily_revenue, &mut p.daily_revenue);
    apply(&mut fields, OverrideField::FulfillmentFee, ov.fulfillment_fee, &mut p.fulfillment_fee);
    apply(&mut fields, OverrideField::LaunchBudget, ov.launch_budget, &mut p.launch_budget);
    apply(&mut fields, OverrideField::ProfitPerUnit, ov.profit_per_unit, &mut p.profit_per_unit);
    apply(&mut fields, OverrideField::Weight, ov.weight, &mut p.weight);
    apply(
        &mut fields,
        OverrideField::RiskClassification,
        ov.risk_classification,
        &mut p.risk_classification,
    );
    apply(
        &mut fields,
        OverrideField::ConsistencyRating,
        ov.consistency_rating,
        &mut p.consistency_rating,
    );
    if let Some(cpc) = ov.avg_cpc {
        p.avg_cpc = Some(cpc);
        fields.push(OverrideField::AvgCpc);
    }

    EffectiveProduct {
        product: p,
        has_overrides: true,
        overridden_fields: fields,
        override_source: Some(OverrideSource {
            owner_id: ov.owner_id.clone(),
            reason: ov.reason.clone(),
            updated_at_ns: ov.updated_at_ns,
        }),
    }
}

fn apply<T>(fields: &mut Vec<OverrideField>, field: OverrideField, value: Option<T>, slot: &mut T) {
    if let Some(v) = value {
        *slot = v;
        fields.push(field);
    }
}

/// Merge every product with its override. Overrides are indexed by product id
/// once, so this is linear in products + overrides. Overrides whose product is
/// not in `products` are skipped.
pub fn merge_all(products: Vec<Product>, overrides: &[ProductOverride]) -> Vec<EffectiveProduct> {
    let mut by_product: HashMap<&str, &ProductOverride> = HashMap::with_capacity(overrides.len());
    for ov in overrides {
        // Store guarantees one override per (owner, product); keep the newest if not.
        by_product
            .entry(ov.product_id.as_str())
            .and_modify(|cur| {
                if ov.updated_at_ns > cur.updated_at_ns {
                    *cur = ov;
                }
            })
            .or_insert(ov);
    }

    let mut matched = 0usize;
    let effective: Vec<EffectiveProduct> = products
        .into_iter()
        .map(|p| {
            let ov = by_product.get(p.id.as_str()).copied();
            if ov.is_some() {
                matched += 1;
            }
            merge(p, ov)
        })
        .collect();

    let unmatched = by_product.len() - matched.min(by_product.len());
    if unmatched > 0 {
        debug!(unmatched, "Skipped overrides with no matching product");
    }
    effective
}
