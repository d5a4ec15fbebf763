pub mod override_merge;

pub use override_merge::{merge, merge_all};
