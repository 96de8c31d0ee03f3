mod bar_repository;
mod breaker_repository;
mod campaign_repository;
mod ranking_repository;
mod trading_repository;

pub use bar_repository::SqliteBarRepository;
pub use breaker_repository::{SqliteBreakerEventRepository, SqliteBreakerRepository};
pub use campaign_repository::SqliteCampaignRepository;
pub use ranking_repository::{SqliteRankingRepository, SqliteSymbolRepository};
pub use trading_repository::{
    SqliteOrderRepository, SqlitePositionRepository, SqliteSignalRepository,
    SqliteTradeRepository,
};
