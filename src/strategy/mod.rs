// Cycle target math
pub mod thresholds;

pub use thresholds::{compute_quantity, compute_targets, Targets};
