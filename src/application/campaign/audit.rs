//! Daily performance audit.
//!
//! Computes trade statistics over the day's closed trades: hit rate,
//! payoff, expectancy, VaR95/ES95 over R-multiples (historical percentile
//! with linear interpolation, floor of 5 samples) and average entry
//! slippage. Monetary sums stay in `Decimal`; the percentile math runs on
//! dimensionless R-multiples in f64.

use crate::domain::risk::DailyReport;
use crate::domain::trading::types::Trade;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};

/// Minimum samples before VaR95/ES95 are reported; below this they stay
/// `None` (persisted as NULL).
pub const VAR_SAMPLE_FLOOR: usize = 5;

/// Interpolated percentile of an ascending-sorted series, `p` in [0, 1].
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() || !(0.0..=1.0).contains(&p) {
        return None;
    }
    if sorted.len() == 1 {
        return Some(sorted[0]);
    }
    let position = p * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let frac = position - lower as f64;
    if lower + 1 >= sorted.len() {
        return Some(sorted[sorted.len() - 1]);
    }
    Some(sorted[lower] * (1.0 - frac) + sorted[lower + 1] * frac)
}

/// Historical VaR95 and ES95 over R-multiples. ES95 is the mean of the
/// worst 5% of observations (at least one).
pub fn var_es_95(returns_r: &[f64]) -> (Option<f64>, Option<f64>) {
    if returns_r.len() < VAR_SAMPLE_FLOOR {
        return (None, None);
    }
    let mut sorted = returns_r.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let var95 = percentile(&sorted, 0.05);

    let tail_len = ((sorted.len() as f64) * 0.05).floor().max(1.0) as usize;
    let es95 = Some(sorted[..tail_len].iter().sum::<f64>() / tail_len as f64);

    (var95, es95)
}

/// Builds the persisted daily report from the day's closed trades.
pub fn compute_daily_report(
    campaign_id: &str,
    report_date: NaiveDate,
    trades: &[Trade],
    daily_pnl: Decimal,
    now_ms: i64,
) -> DailyReport {
    let total = trades.len();

    let wins: Vec<&Trade> = trades
        .iter()
        .filter(|t| t.realized_pnl > Decimal::ZERO)
        .collect();
    let losses: Vec<&Trade> = trades
        .iter()
        .filter(|t| t.realized_pnl < Decimal::ZERO)
        .collect();

    let hit_rate = if total > 0 {
        Some(Decimal::from(wins.len()) / Decimal::from(total))
    } else {
        None
    };

    let avg = |list: &[&Trade]| -> Option<Decimal> {
        if list.is_empty() {
            return None;
        }
        let sum: Decimal = list.iter().map(|t| t.realized_pnl).sum();
        Some(sum / Decimal::from(list.len()))
    };

    let payoff = match (avg(&wins), avg(&losses)) {
        (Some(avg_win), Some(avg_loss)) if !avg_loss.is_zero() => Some(avg_win / avg_loss.abs()),
        _ => None,
    };

    let r_multiples: Vec<Decimal> = trades.iter().filter_map(|t| t.r_multiple()).collect();
    let expectancy_r = if r_multiples.is_empty() {
        None
    } else {
        Some(r_multiples.iter().copied().sum::<Decimal>() / Decimal::from(r_multiples.len()))
    };

    let returns_f64: Vec<f64> = r_multiples.iter().filter_map(|r| r.to_f64()).collect();
    let (var95, es95) = var_es_95(&returns_f64);

    let slippages: Vec<Decimal> = trades
        .iter()
        .filter_map(|t| t.entry_slippage_bps)
        .collect();
    let avg_slippage_bps = if slippages.is_empty() {
        None
    } else {
        Some(slippages.iter().copied().sum::<Decimal>() / Decimal::from(slippages.len()))
    };

    DailyReport {
        campaign_id: campaign_id.to_string(),
        report_date,
        trades: total as u32,
        hit_rate,
        payoff,
        expectancy_r,
        var95_r: var95.and_then(Decimal::from_f64),
        es95_r: es95.and_then(Decimal::from_f64),
        avg_slippage_bps,
        daily_pnl,
        created_at_ms: now_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trading::types::OrderSide;
    use rust_decimal_macros::dec;

    fn trade(pnl: Decimal, risk: Decimal) -> Trade {
        Trade {
            id: uuid::Uuid::new_v4().to_string(),
            campaign_id: "camp-1".to_string(),
            symbol: "BTC/USD".to_string(),
            side: OrderSide::Buy,
            entry_price: dec!(100),
            exit_price: dec!(100) + pnl,
            quantity: dec!(1),
            realized_pnl: pnl,
            fees: Decimal::ZERO,
            risk_amount: risk,
            entry_slippage_bps: Some(dec!(2)),
            opened_at_ms: 0,
            closed_at_ms: 1,
        }
    }

    #[test]
    fn test_percentile_interpolates() {
        let sorted = [10.0, 20.0, 30.0, 40.0, 50.0];
        assert_eq!(percentile(&sorted, 0.0), Some(10.0));
        assert_eq!(percentile(&sorted, 1.0), Some(50.0));
        assert_eq!(percentile(&sorted, 0.5), Some(30.0));
        // 0.05 * 4 = 0.2 -> between the first two values.
        assert_eq!(percentile(&sorted, 0.05), Some(12.0));
    }

    #[test]
    fn test_var_es_below_sample_floor() {
        let returns = [0.5, -1.0, 2.0, -0.3];
        assert_eq!(var_es_95(&returns), (None, None));
    }

    #[test]
    fn test_var_es_with_samples() {
        let returns = [-2.0, -1.0, 0.5, 1.0, 2.0];
        let (var95, es95) = var_es_95(&returns);
        // 5th percentile of 5 samples: position 0.2 between -2 and -1.
        assert!((var95.unwrap() - (-1.8)).abs() < 1e-9);
        // Worst 5% tail of 5 samples is the single worst observation.
        assert_eq!(es95, Some(-2.0));
    }

    #[test]
    fn test_report_statistics() {
        let trades = vec![
            trade(dec!(100), dec!(50)),  // +2R
            trade(dec!(-50), dec!(50)),  // -1R
            trade(dec!(100), dec!(50)),  // +2R
            trade(dec!(-50), dec!(50)),  // -1R
            trade(dec!(100), dec!(50)),  // +2R
        ];
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let report = compute_daily_report("camp-1", date, &trades, dec!(200), 99);

        assert_eq!(report.trades, 5);
        assert_eq!(report.hit_rate.unwrap(), dec!(0.6));
        assert_eq!(report.payoff.unwrap(), dec!(2)); // avg win 100 / avg loss 50
        assert_eq!(report.expectancy_r.unwrap(), dec!(0.8));
        assert!(report.var95_r.is_some());
        assert!(report.es95_r.is_some());
        assert_eq!(report.avg_slippage_bps.unwrap(), dec!(2));
        assert_eq!(report.daily_pnl, dec!(200));
    }

    #[test]
    fn test_empty_day() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let report = compute_daily_report("camp-1", date, &[], Decimal::ZERO, 0);
        assert_eq!(report.trades, 0);
        assert_eq!(report.hit_rate, None);
        assert_eq!(report.payoff, None);
        assert_eq!(report.var95_r, None);
        assert_eq!(report.es95_r, None);
    }
}
