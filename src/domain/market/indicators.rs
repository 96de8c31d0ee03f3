//! Indicator math over bar series.
//!
//! EMA uses smoothing `k = 2/(n+1)` seeded with the SMA of the first `n`
//! closes. ATR uses Wilder smoothing of true ranges seeded with the SMA of
//! the first `n` TR values. All price math stays in `Decimal`.

use crate::domain::market::types::Bar;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};

/// Latest EMA value over the series (oldest first), SMA-seeded.
pub fn ema(values: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || values.len() < period {
        return None;
    }

    let seed: Decimal = values[..period].iter().copied().sum::<Decimal>() / Decimal::from(period);
    let k = Decimal::from(2) / Decimal::from(period + 1);
    let one_minus_k = Decimal::ONE - k;

    let mut current = seed;
    for value in &values[period..] {
        current = *value * k + current * one_minus_k;
    }
    Some(current)
}

/// True range of a bar given the previous close:
/// `max(high-low, |high-prev_close|, |low-prev_close|)`.
fn true_range(bar: &Bar, prev_close: Decimal) -> Decimal {
    let hl = bar.high - bar.low;
    let hc = (bar.high - prev_close).abs();
    let lc = (bar.low - prev_close).abs();
    hl.max(hc).max(lc)
}

/// Wilder-smoothed ATR over `bars` (oldest first). Needs `period + 1` bars
/// since each true range requires a previous close.
pub fn atr(bars: &[Bar], period: usize) -> Option<Decimal> {
    if period == 0 || bars.len() < period + 1 {
        return None;
    }

    let tr_values: Vec<Decimal> = bars
        .windows(2)
        .map(|pair| true_range(&pair[1], pair[0].close))
        .collect();

    let seed: Decimal =
        tr_values[..period].iter().copied().sum::<Decimal>() / Decimal::from(period);

    let period_dec = Decimal::from(period);
    let mut current = seed;
    for tr in &tr_values[period..] {
        current = (current * (period_dec - Decimal::ONE) + *tr) / period_dec;
    }
    Some(current)
}

/// Standard deviation of close-to-close simple returns over the series.
/// A dimensionless statistic, so the math runs in f64 and converts back.
pub fn realized_volatility(closes: &[Decimal]) -> Option<Decimal> {
    if closes.len() < 3 {
        return None;
    }

    let mut returns = Vec::with_capacity(closes.len() - 1);
    for pair in closes.windows(2) {
        let prev = pair[0].to_f64()?;
        let curr = pair[1].to_f64()?;
        if prev == 0.0 {
            return None;
        }
        returns.push(curr / prev - 1.0);
    }

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Decimal::from_f64(variance.sqrt())
}
