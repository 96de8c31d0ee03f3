//! Observability configuration. Metrics are push-based: the reporter
//! serializes the prometheus registry to the log at a fixed interval.

use crate::config::risk_env_config::parse_u64;
use anyhow::Result;
use std::env;

#[derive(Debug, Clone)]
pub struct ObservabilityEnvConfig {
    pub enabled: bool,
    pub report_interval_secs: u64,
}

impl ObservabilityEnvConfig {
    pub fn from_env() -> Result<Self> {
        let enabled = env::var("OBSERVABILITY_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);
        Ok(Self {
            enabled,
            report_interval_secs: parse_u64("OBSERVABILITY_INTERVAL", 60)?,
        })
    }
}
