//! Push-based metrics. Counters and gauges live in a prometheus registry
//! and are periodically serialized to the log; there is no HTTP server
//! and no incoming connection.

use anyhow::{Context, Result};
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub ws_reconnects: IntCounter,
    /// Mirrored from the socket's validation counter each report tick.
    pub validation_drops: IntGauge,
    pub symbols_fresh: IntGauge,
    pub symbols_warn: IntGauge,
    pub symbols_hard: IntGauge,
    pub symbols_kill: IntGauge,
    pub symbols_quarantined: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let ws_reconnects = IntCounter::new("ws_reconnects_total", "WebSocket reconnects")?;
        let validation_drops =
            IntGauge::new("md_validation_drops", "Market data rejected by validation")?;
        let symbols_fresh = IntGauge::new("symbols_fresh", "Symbols in fresh state")?;
        let symbols_warn = IntGauge::new("symbols_warn", "Symbols in warn state")?;
        let symbols_hard = IntGauge::new("symbols_hard", "Symbols in hard state")?;
        let symbols_kill = IntGauge::new("symbols_kill", "Symbols above the kill threshold")?;
        let symbols_quarantined = IntGauge::new("symbols_quarantined", "Quarantined symbols")?;

        for collector in [
            Box::new(ws_reconnects.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(validation_drops.clone()),
            Box::new(symbols_fresh.clone()),
            Box::new(symbols_warn.clone()),
            Box::new(symbols_hard.clone()),
            Box::new(symbols_kill.clone()),
            Box::new(symbols_quarantined.clone()),
        ] {
            registry
                .register(collector)
                .context("Failed to register metric")?;
        }

        Ok(Self {
            registry,
            ws_reconnects,
            validation_drops,
            symbols_fresh,
            symbols_warn,
            symbols_hard,
            symbols_kill,
            symbols_quarantined,
        })
    }

    /// Renders the registry in the text exposition format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if encoder
            .encode(&self.registry.gather(), &mut buffer)
            .is_err()
        {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_and_render() {
        let metrics = Metrics::new().unwrap();
        metrics.validation_drops.set(3);
        metrics.symbols_fresh.set(42);

        let rendered = metrics.render();
        assert!(rendered.contains("md_validation_drops 3"));
        assert!(rendered.contains("symbols_fresh 42"));
    }
}
