use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Aggregation frames produced by the bar aggregator.
///
/// Short frames (1s/5s) live only in the hot store; 1m and 1h bars are
/// persisted durably and feed the indicator service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    OneSec,
    FiveSec,
    OneMin,
    OneHour,
}

impl Timeframe {
    pub fn seconds(&self) -> i64 {
        match self {
            Timeframe::OneSec => 1,
            Timeframe::FiveSec => 5,
            Timeframe::OneMin => 60,
            Timeframe::OneHour => 3600,
        }
    }

    pub fn millis(&self) -> i64 {
        self.seconds() * 1000
    }

    /// Aligns a unix timestamp (seconds) down to this frame's boundary.
    /// The result always satisfies `aligned % seconds() == 0`.
    pub fn align(&self, ts: i64) -> i64 {
        ts - ts.rem_euclid(self.seconds())
    }

    /// Key segment used in hot-store keys and log lines.
    pub fn label(&self) -> &'static str {
        match self {
            Timeframe::OneSec => "1s",
            Timeframe::FiveSec => "5s",
            Timeframe::OneMin => "1m",
            Timeframe::OneHour => "1h",
        }
    }

    /// Whether bars of this frame are persisted to the durable store
    /// (short frames stay in the hot store with a 24h TTL).
    pub fn is_durable(&self) -> bool {
        matches!(self, Timeframe::OneMin | Timeframe::OneHour)
    }

    /// Frames driven directly by tick-window timers. Hourly bars are rolled
    /// up from minute bars instead.
    pub fn tick_driven() -> [Timeframe; 3] {
        [Timeframe::OneSec, Timeframe::FiveSec, Timeframe::OneMin]
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for Timeframe {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1s" => Ok(Timeframe::OneSec),
            "5s" => Ok(Timeframe::FiveSec),
            "1m" => Ok(Timeframe::OneMin),
            "1h" => Ok(Timeframe::OneHour),
            other => Err(anyhow!("Unknown timeframe: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_lands_on_boundary() {
        for frame in [
            Timeframe::OneSec,
            Timeframe::FiveSec,
            Timeframe::OneMin,
            Timeframe::OneHour,
        ] {
            let aligned = frame.align(1_700_000_123);
            assert_eq!(aligned % frame.seconds(), 0);
            assert!(aligned <= 1_700_000_123);
            assert!(1_700_000_123 - aligned < frame.seconds());
        }
    }

    #[test]
    fn test_align_is_idempotent() {
        let ts = Timeframe::OneMin.align(1_700_000_123);
        assert_eq!(Timeframe::OneMin.align(ts), ts);
    }

    #[test]
    fn test_round_trip_labels() {
        for frame in [
            Timeframe::OneSec,
            Timeframe::FiveSec,
            Timeframe::OneMin,
            Timeframe::OneHour,
        ] {
            assert_eq!(frame.label().parse::<Timeframe>().unwrap(), frame);
        }
    }
}
