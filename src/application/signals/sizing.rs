//! Risk-based position sizing.
//!
//! The size is chosen so the loss when the stop is hit — including the
//! modeled fee and slippage cost — stays at the configured fraction of
//! equity. A per-pair capital cap and a minimum notional bound the result.

use crate::config::RiskEnvConfig;
use crate::domain::errors::RiskViolation;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

#[derive(Debug, Clone)]
pub struct SizingConfig {
    pub max_position_pct_capital_per_pair: Decimal,
    pub min_order_notional_usd: Decimal,
    pub fee_rate: Decimal,
    pub slippage_rate: Decimal,
}

impl SizingConfig {
    pub fn from_risk_config(cfg: &RiskEnvConfig) -> Self {
        Self {
            max_position_pct_capital_per_pair: cfg.max_position_pct_capital_per_pair,
            min_order_notional_usd: cfg.min_order_notional_usd,
            fee_rate: cfg.fee_rate,
            slippage_rate: cfg.slippage_rate,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SizedPosition {
    pub quantity: Decimal,
    pub risk_amount: Decimal,
    pub notional: Decimal,
}

/// Sizes a position for the given entry and stop.
pub fn position_size(
    config: &SizingConfig,
    equity: Decimal,
    risk_per_trade_bps: Decimal,
    entry: Decimal,
    sl: Decimal,
) -> Result<SizedPosition, RiskViolation> {
    let risk_amount = equity * risk_per_trade_bps / dec!(10_000);
    let sl_distance_pct = (entry - sl).abs() / entry;

    let cost_per_unit = entry * (sl_distance_pct + config.fee_rate + config.slippage_rate);
    let raw_size = if cost_per_unit > Decimal::ZERO {
        risk_amount / cost_per_unit
    } else {
        Decimal::ZERO
    };

    let cap = config.max_position_pct_capital_per_pair / dec!(100) * equity / entry;
    let quantity = raw_size.min(cap);
    let notional = quantity * entry;

    if notional < config.min_order_notional_usd {
        return Err(RiskViolation::BelowMinNotional {
            notional,
            min: config.min_order_notional_usd,
        });
    }

    Ok(SizedPosition {
        quantity,
        risk_amount,
        notional,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SizingConfig {
        SizingConfig {
            max_position_pct_capital_per_pair: dec!(10),
            min_order_notional_usd: dec!(10),
            fee_rate: dec!(0.0016),
            slippage_rate: dec!(0.0004),
        }
    }

    #[test]
    fn test_reference_sizing() {
        // $100k equity risking $20 per trade, entry 30000, sl 29900:
        // denominator 30000 * (1/300 + 0.002) = 160, size 0.125.
        let sized = position_size(
            &config(),
            dec!(100_000),
            dec!(2),
            dec!(30_000),
            dec!(29_900),
        )
        .unwrap();
        assert_eq!(sized.risk_amount, dec!(20));
        assert!((sized.quantity - dec!(0.125)).abs() < dec!(0.0001));
        assert!((sized.notional - dec!(3750)).abs() < dec!(1));
    }

    #[test]
    fn test_risk_bound_holds_with_cost_model() {
        let cfg = config();
        let equity = dec!(100_000);
        let entry = dec!(30_000);
        let sl = dec!(29_900);
        let sized = position_size(&cfg, equity, dec!(2), entry, sl).unwrap();

        // Worst-case loss if the stop fills: stop distance plus modeled
        // fee and slippage on the notional.
        let loss = sized.quantity * (entry - sl)
            + sized.notional * (cfg.fee_rate + cfg.slippage_rate);
        assert!(loss <= sized.risk_amount + dec!(0.0001), "loss = {}", loss);
    }

    #[test]
    fn test_capital_cap_applies() {
        // Tiny stop distance would imply a huge size; the 10% cap binds.
        let sized = position_size(
            &config(),
            dec!(100_000),
            dec!(20),
            dec!(30_000),
            dec!(29_999.9),
        )
        .unwrap();
        // Cap: 10% * 100k / 30k = 1/3.
        assert_eq!(sized.quantity, dec!(10_000) / dec!(30_000));
    }

    #[test]
    fn test_minimum_notional_rejected() {
        let result = position_size(&config(), dec!(100), dec!(5), dec!(30_000), dec!(29_000));
        assert!(matches!(
            result,
            Err(RiskViolation::BelowMinNotional { .. })
        ));
    }
}
