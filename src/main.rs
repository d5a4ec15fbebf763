use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use listing_grader::api::health::HealthState;
use listing_grader::api::latency::LatencyStats;
use listing_grader::api::routes::{router, ApiState};
use listing_grader::config::Config;
use listing_grader::db::{ResearchStore, SqliteResearchStore};
use listing_grader::error::Result;
use listing_grader::recalc::{DashboardReader, Recalculator};
use listing_grader::state::{DashboardCache, InMemoryDashboardCache};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", cfg.db_path))?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database ready at {}", cfg.db_path);

    // --- Collaborators, constructed once and injected ---
    let store: Arc<dyn ResearchStore> = Arc::new(SqliteResearchStore::new(pool));
    let cache = InMemoryDashboardCache::new(Duration::from_secs(cfg.cache_ttl_secs));
    let cache_dyn: Arc<dyn DashboardCache> = cache.clone();

    let recalculator = Recalculator::new(Arc::clone(&store), Arc::clone(&cache_dyn));
    let dashboard = DashboardReader::new(store, cache_dyn);

    // Expired dashboard sweeper (background)
    let sweeper = Arc::clone(&cache);
    let sweep_every = Duration::from_secs(cfg.cache_sweep_interval_secs);
    tokio::spawn(async move { sweeper.run_sweeper(sweep_every).await });
    info!(
        "Dashboard cache ready (ttl={}s, sweep every {}s)",
        cfg.cache_ttl_secs, cfg.cache_sweep_interval_secs
    );

    // --- HTTP API server ---
    let api_state = ApiState {
        recalculator,
        dashboard,
        cache,
        health: Arc::new(HealthState::new()),
        latency: Arc::new(LatencyStats::new()),
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
