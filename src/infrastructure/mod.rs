pub mod execution;
pub mod kraken;
pub mod market_store;
pub mod observability;
pub mod persistence;
pub mod repositories;
