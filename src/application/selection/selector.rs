//! Asset selection: tradability filter, multi-factor ranking and cluster
//! assignment.
//!
//! Survivors of the liquidity filter are scored on z-scored 24h volume and
//! 30d volatility plus EMA momentum and trend strength, ranked, and the
//! top N clustered by K-means on `[normalized_rank, score]`. Each cluster
//! keeps only its 10 members closest to the centroid; trimmed members stay
//! ranked but unclustered.

use crate::application::market_data::IndicatorSet;
use crate::application::selection::kmeans::{distance, kmeans, min_max_normalize};
use crate::config::TradingEnvConfig;
use crate::domain::market::{Ranking, SymbolMeta};
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use statrs::statistics::Statistics;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct SelectorConfig {
    pub min_volume_24h_usd: Decimal,
    pub min_real_volume_ratio: Decimal,
    pub max_spread_mid_pct: Decimal,
    pub min_depth_top10_usd: Decimal,
    pub min_atr_daily_pct: Decimal,
    pub top_n: usize,
    pub weight_volume: f64,
    pub weight_volatility: f64,
    pub weight_momentum: f64,
    pub weight_trend: f64,
    pub cluster_k: usize,
    pub cluster_max_members: usize,
}

impl SelectorConfig {
    pub fn from_trading_config(cfg: &TradingEnvConfig) -> Self {
        Self {
            min_volume_24h_usd: cfg.min_volume_24h_usd,
            min_real_volume_ratio: cfg.min_real_volume_ratio,
            max_spread_mid_pct: cfg.max_spread_mid_pct,
            min_depth_top10_usd: cfg.min_depth_top10_usd,
            min_atr_daily_pct: cfg.min_atr_daily_pct,
            top_n: cfg.selection_top_n,
            weight_volume: cfg.weight_volume,
            weight_volatility: cfg.weight_volatility,
            weight_momentum: cfg.weight_momentum,
            weight_trend: cfg.weight_trend,
            cluster_k: cfg.cluster_k,
            cluster_max_members: cfg.cluster_max_members,
        }
    }
}

pub struct AssetSelector {
    config: SelectorConfig,
}

struct ScoredSymbol {
    symbol_id: String,
    score: f64,
}

impl AssetSelector {
    pub fn new(config: SelectorConfig) -> Self {
        Self { config }
    }

    /// Every condition must pass; a missing real-volume ratio passes that
    /// check.
    pub fn is_tradable(&self, meta: &SymbolMeta) -> bool {
        if !meta.is_active {
            return false;
        }
        if meta.volume_24h_usd < self.config.min_volume_24h_usd {
            return false;
        }
        if let Some(ratio) = meta.real_volume_ratio
            && ratio < self.config.min_real_volume_ratio
        {
            return false;
        }
        meta.spread_mid_pct <= self.config.max_spread_mid_pct
            && meta.depth_top10_usd >= self.config.min_depth_top10_usd
            && meta.atr_daily_pct >= self.config.min_atr_daily_pct
    }

    /// Runs filter → rank → cluster and returns the persisted-ready
    /// ranking rows (ranks are a permutation of 1..=N).
    pub fn select<R: Rng>(
        &self,
        candidates: &[(SymbolMeta, IndicatorSet)],
        run_id: &str,
        rng: &mut R,
    ) -> Vec<Ranking> {
        let survivors: Vec<&(SymbolMeta, IndicatorSet)> = candidates
            .iter()
            .filter(|(meta, _)| self.is_tradable(meta))
            .collect();

        if survivors.is_empty() {
            info!("Selection run {}: no symbols pass the tradability filter", run_id);
            return Vec::new();
        }
        debug!(
            "Selection run {}: {} of {} symbols pass the filter",
            run_id,
            survivors.len(),
            candidates.len()
        );

        let volumes: Vec<f64> = survivors
            .iter()
            .map(|(meta, _)| meta.volume_24h_usd.to_f64().unwrap_or(0.0))
            .collect();
        let volatilities: Vec<f64> = survivors
            .iter()
            .map(|(meta, set)| {
                set.volatility_30d
                    .and_then(|v| v.to_f64())
                    .unwrap_or_else(|| meta.atr_daily_pct.to_f64().unwrap_or(0.0) / 100.0)
            })
            .collect();

        let vol_mean = volumes.iter().mean();
        let vol_std = volumes.iter().std_dev();
        let volat_mean = volatilities.iter().mean();
        let volat_std = volatilities.iter().std_dev();

        let z = |value: f64, mean: f64, std: f64| -> f64 {
            if std > 0.0 { (value - mean) / std } else { 0.0 }
        };

        let mut scored: Vec<ScoredSymbol> = survivors
            .iter()
            .enumerate()
            .map(|(i, (meta, set))| {
                let momentum = match (set.ema12, set.ema36) {
                    (Some(fast), Some(slow)) if !slow.is_zero() => {
                        ((fast - slow) / slow).to_f64().unwrap_or(0.0)
                    }
                    _ => 0.0,
                };
                let trend_strength = momentum.abs();
                let score = self.config.weight_volume * z(volumes[i], vol_mean, vol_std)
                    + self.config.weight_volatility * z(volatilities[i], volat_mean, volat_std)
                    + self.config.weight_momentum * momentum
                    + self.config.weight_trend * trend_strength;
                ScoredSymbol {
                    symbol_id: meta.id.clone(),
                    score,
                }
            })
            .collect();

        // Descending score, ties broken by symbol id.
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.symbol_id.cmp(&b.symbol_id))
        });
        scored.truncate(self.config.top_n);

        let mut rankings: Vec<Ranking> = scored
            .iter()
            .enumerate()
            .map(|(i, s)| Ranking {
                run_id: run_id.to_string(),
                symbol_id: s.symbol_id.clone(),
                rank: (i + 1) as u32,
                score: Decimal::from_f64(s.score).unwrap_or(Decimal::ZERO),
                cluster_number: None,
            })
            .collect();

        self.assign_clusters(&mut rankings, &scored, rng);
        rankings
    }

    /// K-means over `[normalized_rank, score]`, then trims every cluster
    /// to its closest members. Trimmed members keep `cluster_number = None`.
    fn assign_clusters<R: Rng>(
        &self,
        rankings: &mut [Ranking],
        scored: &[ScoredSymbol],
        rng: &mut R,
    ) {
        let n = rankings.len();
        if n == 0 {
            return;
        }

        let mut features: Vec<[f64; 2]> = rankings
            .iter()
            .enumerate()
            .map(|(i, _)| {
                let normalized_rank = if n > 1 { i as f64 / (n - 1) as f64 } else { 0.0 };
                [normalized_rank, scored[i].score]
            })
            .collect();
        min_max_normalize(&mut features);

        let result = kmeans(&features, self.config.cluster_k, rng);

        // Collect members per cluster with distance to centroid.
        let mut members: Vec<Vec<(usize, f64)>> = vec![Vec::new(); result.centroids.len()];
        for (i, cluster) in result.assignments.iter().enumerate() {
            let d = distance(features[i], result.centroids[*cluster]);
            members[*cluster].push((i, d));
        }

        for (cluster, list) in members.iter_mut().enumerate() {
            list.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
            for (index, _) in list.iter().take(self.config.cluster_max_members) {
                rankings[*index].cluster_number = Some(cluster as u32);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rust_decimal_macros::dec;

    fn config() -> SelectorConfig {
        SelectorConfig {
            min_volume_24h_usd: dec!(1_000_000),
            min_real_volume_ratio: dec!(0.5),
            max_spread_mid_pct: dec!(0.3),
            min_depth_top10_usd: dec!(50_000),
            min_atr_daily_pct: dec!(1),
            top_n: 50,
            weight_volume: 0.3,
            weight_volatility: 0.2,
            weight_momentum: 0.3,
            weight_trend: 0.2,
            cluster_k: 10,
            cluster_max_members: 10,
        }
    }

    fn meta(id: &str, volume: Decimal) -> SymbolMeta {
        SymbolMeta {
            id: id.to_string(),
            exchange_symbol: id.replace('/', ""),
            display_symbol: id.to_string(),
            volume_24h_usd: volume,
            spread_mid_pct: dec!(0.1),
            depth_top10_usd: dec!(100_000),
            atr_daily_pct: dec!(2),
            real_volume_ratio: Some(dec!(0.9)),
            is_active: true,
        }
    }

    fn indicators(ema12: Decimal, ema36: Decimal) -> IndicatorSet {
        IndicatorSet {
            atr14: Some(dec!(100)),
            ema12: Some(ema12),
            ema36: Some(ema36),
            volume_7d: Some(dec!(1000)),
            volatility_30d: Some(dec!(0.02)),
            synthetic: false,
        }
    }

    #[test]
    fn test_filter_rejects_each_dimension() {
        let selector = AssetSelector::new(config());

        let good = meta("BTC/USD", dec!(5_000_000));
        assert!(selector.is_tradable(&good));

        let mut thin = good.clone();
        thin.volume_24h_usd = dec!(500_000);
        assert!(!selector.is_tradable(&thin));

        let mut wide = good.clone();
        wide.spread_mid_pct = dec!(0.5);
        assert!(!selector.is_tradable(&wide));

        let mut shallow = good.clone();
        shallow.depth_top10_usd = dec!(10_000);
        assert!(!selector.is_tradable(&shallow));

        let mut flat = good.clone();
        flat.atr_daily_pct = dec!(0.5);
        assert!(!selector.is_tradable(&flat));

        let mut fake_volume = good.clone();
        fake_volume.real_volume_ratio = Some(dec!(0.2));
        assert!(!selector.is_tradable(&fake_volume));

        // Absent ratio passes that check.
        let mut no_ratio = good.clone();
        no_ratio.real_volume_ratio = None;
        assert!(selector.is_tradable(&no_ratio));
    }

    #[test]
    fn test_ranks_are_a_permutation() {
        let selector = AssetSelector::new(config());
        let mut rng = StdRng::seed_from_u64(42);

        let candidates: Vec<(SymbolMeta, IndicatorSet)> = (0..20)
            .map(|i| {
                (
                    meta(&format!("SYM{:02}/USD", i), dec!(2_000_000) + Decimal::from(i * 100_000)),
                    indicators(dec!(101) + Decimal::from(i), dec!(100)),
                )
            })
            .collect();

        let rankings = selector.select(&candidates, "run-1", &mut rng);
        assert_eq!(rankings.len(), 20);

        let mut ranks: Vec<u32> = rankings.iter().map(|r| r.rank).collect();
        ranks.sort_unstable();
        assert_eq!(ranks, (1..=20).collect::<Vec<u32>>());

        for r in &rankings {
            if let Some(c) = r.cluster_number {
                assert!(c < 10);
            }
        }
    }

    #[test]
    fn test_stronger_momentum_ranks_higher_all_else_equal() {
        let selector = AssetSelector::new(config());
        let mut rng = StdRng::seed_from_u64(1);

        let candidates = vec![
            (meta("AAA/USD", dec!(2_000_000)), indicators(dec!(110), dec!(100))),
            (meta("BBB/USD", dec!(2_000_000)), indicators(dec!(101), dec!(100))),
        ];
        let rankings = selector.select(&candidates, "run-2", &mut rng);
        assert_eq!(rankings[0].symbol_id, "AAA/USD");
        assert_eq!(rankings[0].rank, 1);
    }

    #[test]
    fn test_ties_break_by_symbol_id() {
        let selector = AssetSelector::new(config());
        let mut rng = StdRng::seed_from_u64(1);

        let candidates = vec![
            (meta("ZZZ/USD", dec!(2_000_000)), indicators(dec!(100), dec!(100))),
            (meta("AAA/USD", dec!(2_000_000)), indicators(dec!(100), dec!(100))),
        ];
        let rankings = selector.select(&candidates, "run-3", &mut rng);
        assert_eq!(rankings[0].symbol_id, "AAA/USD");
    }

    #[test]
    fn test_cluster_trim_caps_membership() {
        let mut cfg = config();
        cfg.cluster_k = 1;
        cfg.cluster_max_members = 5;
        let selector = AssetSelector::new(cfg);
        let mut rng = StdRng::seed_from_u64(9);

        let candidates: Vec<(SymbolMeta, IndicatorSet)> = (0..12)
            .map(|i| {
                (
                    meta(&format!("SYM{:02}/USD", i), dec!(2_000_000)),
                    indicators(dec!(100) + Decimal::from(i), dec!(100)),
                )
            })
            .collect();

        let rankings = selector.select(&candidates, "run-4", &mut rng);
        let clustered = rankings
            .iter()
            .filter(|r| r.cluster_number.is_some())
            .count();
        assert_eq!(clustered, 5);
    }
}
