use crate::error::{AppError, Result};

/// Default dashboard cache TTL (seconds). Secondary staleness bound; explicit
/// invalidation on every override write is the primary one.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// How often the background sweeper evicts expired cache entries (seconds).
pub const DEFAULT_CACHE_SWEEP_INTERVAL_SECS: u64 = 60;

/// Fallback CPC estimate for products with neither an override nor keyword data.
/// estimate = price * PRICE_RATIO, clamped to [MIN, MAX].
pub mod cpc_estimate {
    pub const PRICE_RATIO: f64 = 0.03;
    pub const MIN: f64 = 0.25;
    pub const MAX: f64 = 3.00;
}

/// Composite score weights. Sum to 100 so the composite lands in 0..=100.
pub mod grade_weights {
    pub const PROFIT: f64 = 35.0;
    pub const MARGIN: f64 = 20.0;
    pub const REVIEWS: f64 = 15.0;
    pub const CPC: f64 = 10.0;
    pub const BSR: f64 = 10.0;
    pub const RATING: f64 = 10.0;

    /// Blend factor applied when an opportunity score seed is supplied.
    pub const SEED_BLEND: f64 = 0.10;
}

/// Normalization ceilings: an input at or above the ceiling earns the full weight.
pub mod grade_norms {
    /// Monthly profit in USD.
    pub const PROFIT_CEILING: f64 = 10_000.0;
    /// Margin in percent.
    pub const MARGIN_CEILING: f64 = 40.0;
    /// CPC / price ratio at which CPC efficiency hits zero.
    pub const CPC_RATIO_CEILING: f64 = 0.10;
    /// log10(bsr) at which the rank factor hits zero.
    pub const BSR_LOG_CEILING: f64 = 6.0;
    pub const RATING_MAX: f64 = 5.0;
}

/// Review-count tiers. Fewer reviews means less entrenched competition.
/// (upper bound exclusive, factor)
pub const REVIEW_TIERS: &[(i64, f64)] = &[(50, 1.0), (200, 0.75), (500, 0.5), (1000, 0.25)];

/// Multiplicative penalties relative to a Consistent demand profile.
pub mod consistency_penalty {
    pub const SEASONAL: f64 = 0.85;
    pub const TRENDY: f64 = 0.70;
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Dashboard cache TTL in seconds (CACHE_TTL_SECS). Must be positive.
    pub cache_ttl_secs: u64,
    /// Expired-entry sweep interval in seconds (CACHE_SWEEP_INTERVAL_SECS)
    pub cache_sweep_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let cache_ttl_secs = std::env::var("CACHE_TTL_SECS")
            .unwrap_or_else(|_| DEFAULT_CACHE_TTL_SECS.to_string())
            .parse::<u64>()
            .map_err(|_| AppError::Config("CACHE_TTL_SECS must be a whole number".to_string()))?;
        if cache_ttl_secs == 0 {
            return Err(AppError::Config("CACHE_TTL_SECS must be positive".to_string()));
        }

        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "listing_grader.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            cache_ttl_secs,
            cache_sweep_interval_secs: std::env::var("CACHE_SWEEP_INTERVAL_SECS")
                .unwrap_or_else(|_| DEFAULT_CACHE_SWEEP_INTERVAL_SECS.to_string())
                .parse::<u64>()
                .ok()
                .filter(|s| *s > 0)
                .unwrap_or(DEFAULT_CACHE_SWEEP_INTERVAL_SECS),
        })
    }
}
