pub mod grading;
pub mod market_aggregator;

pub use grading::{grade, grade_product, GradeResult, ScoringInputs};
pub use market_aggregator::aggregate;
