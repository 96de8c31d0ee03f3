//! EMA/ATR rule evaluation and OCO target construction.
//!
//! Long fires when price sits above EMA12, the EMA12/EMA36 gap clears the
//! whipsaw threshold (0.1% of EMA36) and the price extension beyond EMA12
//! exceeds the configured ATR multiple. Short is symmetric.

use crate::domain::trading::types::{SignalConfig, SignalType};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Whipsaw suppressor: the EMA gap must exceed this fraction of EMA36.
pub const TREND_EPSILON: Decimal = dec!(0.001);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalTargets {
    pub tp1: Decimal,
    pub tp2: Decimal,
    pub sl: Decimal,
}

pub struct SignalEngine;

impl SignalEngine {
    /// Evaluates the rules; returns the fired direction or `None`.
    pub fn evaluate(
        config: &SignalConfig,
        price: Decimal,
        ema12: Decimal,
        ema36: Decimal,
        atr: Decimal,
    ) -> Option<SignalType> {
        if !config.enabled || atr <= Decimal::ZERO {
            return None;
        }

        let trend_threshold = TREND_EPSILON * ema36;

        let long = price > ema12
            && (ema12 - ema36) > trend_threshold
            && (price - ema12) > config.long_atr_mult * atr;
        if long {
            return Some(SignalType::Long);
        }

        let short = price < ema12
            && (ema36 - ema12) > trend_threshold
            && (ema12 - price) > config.short_atr_mult * atr;
        if short {
            return Some(SignalType::Short);
        }

        None
    }

    /// TP/SL levels around the signal price, sign per side.
    pub fn targets(
        config: &SignalConfig,
        signal_type: SignalType,
        price: Decimal,
        atr: Decimal,
    ) -> SignalTargets {
        match signal_type {
            SignalType::Long => SignalTargets {
                tp1: price + config.tp1_atr_mult * atr,
                tp2: price + config.tp2_atr_mult * atr,
                sl: price - config.sl_atr_mult * atr,
            },
            SignalType::Short => SignalTargets {
                tp1: price - config.tp1_atr_mult * atr,
                tp2: price - config.tp2_atr_mult * atr,
                sl: price + config.sl_atr_mult * atr,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SignalConfig {
        SignalConfig {
            enabled: true,
            long_atr_mult: dec!(2),
            short_atr_mult: dec!(2),
            tp1_atr_mult: dec!(1.2),
            tp2_atr_mult: dec!(2.5),
            sl_atr_mult: dec!(1),
            risk_per_trade_bps: dec!(20),
        }
    }

    #[test]
    fn test_long_fires_on_uptrend_extension() {
        // price=30000, ema12=29700, ema36=29500, atr=100:
        // extension 300 > 2*100, gap 200 > 29.5.
        let fired = SignalEngine::evaluate(
            &config(),
            dec!(30_000),
            dec!(29_700),
            dec!(29_500),
            dec!(100),
        );
        assert_eq!(fired, Some(SignalType::Long));
    }

    #[test]
    fn test_long_targets() {
        let targets =
            SignalEngine::targets(&config(), SignalType::Long, dec!(30_000), dec!(100));
        assert_eq!(targets.sl, dec!(29_900));
        assert_eq!(targets.tp1, dec!(30_120));
        assert_eq!(targets.tp2, dec!(30_250));
    }

    #[test]
    fn test_whipsaw_gap_suppresses_signal() {
        // Gap of 10 against a threshold of 29.5: not an uptrend.
        let fired = SignalEngine::evaluate(
            &config(),
            dec!(30_000),
            dec!(29_510),
            dec!(29_500),
            dec!(100),
        );
        assert_eq!(fired, None);
    }

    #[test]
    fn test_insufficient_extension_suppresses_signal() {
        // Gap fine, but extension 150 <= 2*100.
        let fired = SignalEngine::evaluate(
            &config(),
            dec!(29_850),
            dec!(29_700),
            dec!(29_500),
            dec!(100),
        );
        assert_eq!(fired, None);
    }

    #[test]
    fn test_short_symmetric() {
        let fired = SignalEngine::evaluate(
            &config(),
            dec!(29_000),
            dec!(29_300),
            dec!(29_500),
            dec!(100),
        );
        assert_eq!(fired, Some(SignalType::Short));

        let targets =
            SignalEngine::targets(&config(), SignalType::Short, dec!(29_000), dec!(100));
        assert_eq!(targets.sl, dec!(29_100));
        assert_eq!(targets.tp1, dec!(28_880));
        assert_eq!(targets.tp2, dec!(28_750));
    }

    #[test]
    fn test_disabled_config_never_fires() {
        let mut cfg = config();
        cfg.enabled = false;
        let fired = SignalEngine::evaluate(
            &cfg,
            dec!(30_000),
            dec!(29_700),
            dec!(29_500),
            dec!(100),
        );
        assert_eq!(fired, None);
    }

    #[test]
    fn test_zero_atr_never_fires() {
        let fired = SignalEngine::evaluate(
            &config(),
            dec!(30_000),
            dec!(29_700),
            dec!(29_500),
            Decimal::ZERO,
        );
        assert_eq!(fired, None);
    }
}
