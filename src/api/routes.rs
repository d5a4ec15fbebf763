use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, State},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::health::{HealthReport, HealthState};
use crate::api::latency::{LatencyStats, LatencySummary};
use crate::error::AppError;
use crate::recalc::{DashboardReader, RecalculationOutcome, Recalculator};
use crate::state::InMemoryDashboardCache;
use crate::types::{now_ns, DashboardSnapshot, GradeLabel, MarketStatistics, ProductOverride};

#[derive(Clone)]
pub struct ApiState {
    pub recalculator: Recalculator,
    pub dashboard: DashboardReader,
    pub cache: Arc<InMemoryDashboardCache>,
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/stats/latency", get(get_stats_latency))
        .route("/owners/:owner_id/dashboard", get(get_dashboard))
        .route(
            "/owners/:owner_id/markets/:market_id/recalculate",
            post(post_recalculate),
        )
        .route(
            "/owners/:owner_id/markets/:market_id/products/:product_id/override",
            put(put_product_override).delete(delete_product_override),
        )
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Deserialize, Default)]
pub struct RecalculateRequest {
    pub reason: Option<String>,
}

#[derive(Serialize)]
pub struct GradeChange {
    pub previous_grade: Option<GradeLabel>,
    pub new_grade: GradeLabel,
}

#[derive(Serialize)]
pub struct RecalculateResponse {
    pub grade: GradeLabel,
    pub statistics: MarketStatistics,
    pub recalculated_at_ns: i64,
    pub debug: GradeChange,
}

impl From<RecalculationOutcome> for RecalculateResponse {
    fn from(o: RecalculationOutcome) -> Self {
        Self {
            grade: o.new_grade,
            recalculated_at_ns: o.market_override.recalculated_at_ns,
            statistics: o.market_override.statistics,
            debug: GradeChange { previous_grade: o.previous_grade, new_grade: o.new_grade },
        }
    }
}

#[derive(Serialize)]
pub struct OverrideResponse {
    /// The saved override; `None` after a delete.
    #[serde(rename = "override")]
    pub saved: Option<ProductOverride>,
    pub removed: bool,
    pub recalculation: RecalculateResponse,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Json<HealthReport> {
    Json(state.health.report(state.cache.len()))
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencySummary> {
    Json(state.latency.summary())
}

async fn get_dashboard(
    State(state): State<ApiState>,
    Path(owner_id): Path<String>,
) -> Result<Json<DashboardSnapshot>, AppError> {
    Ok(Json(state.dashboard.load(&owner_id).await?))
}

async fn post_recalculate(
    State(state): State<ApiState>,
    Path((owner_id, market_id)): Path<(String, String)>,
    body: Option<Json<RecalculateRequest>>,
) -> Result<Json<RecalculateResponse>, AppError> {
    let reason = body
        .and_then(|Json(r)| r.reason)
        .unwrap_or_else(|| "manual recalculation".to_string());
    Ok(Json(recalculate(&state, &market_id, &owner_id, &reason).await?))
}

async fn put_product_override(
    State(state): State<ApiState>,
    Path((owner_id, market_id, product_id)): Path<(String, String, String)>,
    Json(mut ov): Json<ProductOverride>,
) -> Result<Json<OverrideResponse>, AppError> {
    // Path identifies the target; body fields carry the patch only.
    ov.owner_id = owner_id.clone();
    ov.product_id = product_id;
    let reason = if ov.reason.is_empty() { "product override".to_string() } else { ov.reason.clone() };

    let saved = state.recalculator.apply_product_override(ov).await?;
    state.health.record_override_write();
    let recalculation = recalculate(&state, &market_id, &owner_id, &reason).await?;

    Ok(Json(OverrideResponse { saved: Some(saved), removed: false, recalculation }))
}

async fn delete_product_override(
    State(state): State<ApiState>,
    Path((owner_id, market_id, product_id)): Path<(String, String, String)>,
) -> Result<Json<OverrideResponse>, AppError> {
    let removed = state.recalculator.clear_product_override(&owner_id, &product_id).await?;
    if removed {
        state.health.record_override_write();
    }
    let recalculation = recalculate(&state, &market_id, &owner_id, "override removed").await?;

    Ok(Json(OverrideResponse { saved: None, removed, recalculation }))
}

async fn recalculate(
    state: &ApiState,
    market_id: &str,
    owner_id: &str,
    reason: &str,
) -> Result<RecalculateResponse, AppError> {
    let started = Instant::now();
    let result = state.recalculator.recalculate_market(market_id, owner_id, reason).await;
    state.latency.record(started.elapsed());
    state.health.record_recalculation(result.is_ok(), now_ns());
    Ok(result?.into())
}
