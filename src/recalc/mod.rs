pub mod dashboard;
pub mod orchestrator;

pub use dashboard::DashboardReader;
pub use orchestrator::{RecalculationOutcome, Recalculator};
