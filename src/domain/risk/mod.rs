pub mod breaker;
pub mod state;

pub use breaker::{
    Breaker, BreakerEvent, BreakerEventType, BreakerLevel, StalenessSeverity, TradeGate,
};
pub use state::{Campaign, CampaignRiskState, CampaignStatus, DailyReport, InvestorProfile};
