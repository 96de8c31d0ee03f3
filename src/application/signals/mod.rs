pub mod engine;
pub mod sizing;

pub use engine::{SignalEngine, SignalTargets, TREND_EPSILON};
pub use sizing::{SizedPosition, SizingConfig, position_size};
