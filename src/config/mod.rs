//! Configuration module for tidebot.
//!
//! Structured configuration loading from environment variables, organized
//! by domain: Exchange connectivity, Risk, Trading and Observability.

mod exchange_config;
mod observability_config;
mod risk_env_config;
mod trading_config;

pub use exchange_config::ExchangeEnvConfig;
pub use observability_config::ObservabilityEnvConfig;
pub use risk_env_config::RiskEnvConfig;
pub use trading_config::TradingEnvConfig;

use anyhow::Result;
use std::env;
use std::str::FromStr;

/// Execution mode for the order path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Paper,
    Live,
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "paper" => Ok(Mode::Paper),
            "live" => Ok(Mode::Live),
            other => anyhow::bail!("Invalid MODE: {}. Must be 'paper' or 'live'", other),
        }
    }
}

/// Main application configuration aggregated from the sub-modules.
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub exchange: ExchangeEnvConfig,
    pub risk: RiskEnvConfig,
    pub trading: TradingEnvConfig,
    pub observability: ObservabilityEnvConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let mode = env::var("MODE")
            .unwrap_or_else(|_| "paper".to_string())
            .parse::<Mode>()?;

        let exchange = ExchangeEnvConfig::from_env()?;
        if mode == Mode::Live {
            // Fail fast instead of at the first live order.
            exchange.require_credentials()?;
        }

        Ok(Self {
            mode,
            exchange,
            risk: RiskEnvConfig::from_env()?,
            trading: TradingEnvConfig::from_env()?,
            observability: ObservabilityEnvConfig::from_env()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("paper".parse::<Mode>().unwrap(), Mode::Paper);
        assert_eq!("LIVE".parse::<Mode>().unwrap(), Mode::Live);
        assert!("margin".parse::<Mode>().is_err());
    }
}
