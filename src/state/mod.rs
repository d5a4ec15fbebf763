pub mod dashboard_cache;

pub use dashboard_cache::{invalidate_owner, owner_key, DashboardCache, InMemoryDashboardCache};
