//! Override-aware market grading.
//!
//! Users patch individual product records; every derived statistic (market
//! averages, letter grade, opportunity score) is recomputed from the merged
//! "effective" products and persisted per (owner, market), with the owner's
//! cached dashboard dropped on every write.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod merge;
pub mod recalc;
pub mod scorer;
pub mod state;
pub mod types;

pub use error::{AppError, Result};
