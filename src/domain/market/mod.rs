pub mod indicators;
pub mod timeframe;
pub mod types;

pub use timeframe::Timeframe;
pub use types::{Bar, BookLevel, L1Quote, L2Snapshot, Ranking, SymbolMeta, Tick};
