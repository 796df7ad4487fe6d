//! Kelly divisor selection by bootstrap backtest.
//!
//! Every settled bet is re-sized with fractional Kelly at each candidate
//! divisor using its calibrated probability, then resampled to estimate ROI,
//! drawdown and Sharpe. The best-scoring divisor is blended toward the
//! configured fallback according to how many samples backed it.

pub mod kelly;
pub mod monte_carlo;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::calibration::{CalibrationContext, LegContext};
use crate::config::EngineConfig;
use crate::history::{
    normalize_unit, settled_bets, HistoricalBet, OutcomeStatus, DEFAULT_CONFIDENCE,
};
use crate::signal::{clamp_prob, derive_seed};

use kelly::kelly_stake;
use monte_carlo::{run_count, simulate, SimRow};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DivisorMetrics {
    pub divisor: f64,
    pub runs: usize,
    pub samples: usize,
    pub roi: f64,
    pub drawdown: f64,
    pub sharpe: f64,
    pub hit_rate: f64,
    pub score: f64,
    /// Expected drawdown is within the configured maximum
    pub within_drawdown_limit: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    /// False when too few settled bets were available; the fallback divisor is recommended
    pub ready: bool,
    pub sample_count: usize,
    pub required_samples: usize,
    pub seed_salt: String,
    pub per_divisor: Vec<DivisorMetrics>,
    pub best_divisor: Option<f64>,
    /// Trust in the swept divisor over the fallback, in [0, 1]
    pub reliability: f64,
    pub fallback_divisor: f64,
    pub recommended_divisor: f64,
}

/// Calibrated win probability of a whole (multi-leg) bet.
pub fn bet_probability(bet: &HistoricalBet, context: &CalibrationContext) -> f64 {
    if bet.legs.is_empty() {
        return clamp_prob(1.0 / bet.combined_odds.max(1.0 + 1e-9));
    }
    let p = bet.legs.iter().fold(1.0, |acc, leg| {
        let confidence = leg
            .confidence
            .and_then(normalize_unit)
            .unwrap_or(DEFAULT_CONFIDENCE);
        let ctx = LegContext::new(&leg.home_entity, &leg.away_entity, leg.odds);
        acc * context.calibrate(confidence, &ctx)
    });
    clamp_prob(p)
}

/// Simulation rows for one divisor. Bets with unusable combined odds are skipped.
pub fn build_rows(
    bets: &[&HistoricalBet],
    context: &CalibrationContext,
    config: &EngineConfig,
    divisor: f64,
) -> Vec<SimRow> {
    let risk_cap = config.default_risk_cap();
    bets.iter()
        .filter(|b| b.combined_odds.is_finite() && b.combined_odds > 1.0)
        .map(|bet| {
            let p = bet_probability(bet, context);
            SimRow {
                stake: kelly_stake(p, bet.combined_odds, config.initial_capital, divisor, risk_cap),
                unit_return: if bet.status == OutcomeStatus::Win {
                    bet.combined_odds - 1.0
                } else {
                    -1.0
                },
            }
        })
        .collect()
}

fn seed_values(rows: &[SimRow]) -> Vec<f64> {
    rows.iter().flat_map(|r| [r.stake, r.unit_return]).collect()
}

/// Sweep `divisors` (or the configured defaults when empty) over the settled history.
pub fn backtest_kelly_divisors(
    history: &[HistoricalBet],
    config: &EngineConfig,
    context: &CalibrationContext,
    divisors: &[f64],
    seed_salt: &str,
) -> BacktestReport {
    let bets = settled_bets(history);
    sweep(&bets, config, context, divisors, seed_salt)
}

/// Run the sweep separately for each leg mode tag (first tagged leg of each bet).
pub fn backtest_kelly_divisors_by_mode(
    history: &[HistoricalBet],
    config: &EngineConfig,
    context: &CalibrationContext,
    divisors: &[f64],
    seed_salt: &str,
) -> BTreeMap<String, BacktestReport> {
    let mut grouped: BTreeMap<String, Vec<&HistoricalBet>> = BTreeMap::new();
    for bet in settled_bets(history) {
        let mode = bet
            .legs
            .iter()
            .find_map(|l| l.mode.clone())
            .unwrap_or_else(|| "untagged".to_string());
        grouped.entry(mode).or_default().push(bet);
    }
    grouped
        .into_iter()
        .map(|(mode, bets)| {
            let salt = format!("{}:{}", seed_salt, mode);
            let report = sweep(&bets, config, context, divisors, &salt);
            (mode, report)
        })
        .collect()
}

fn sweep(
    bets: &[&HistoricalBet],
    config: &EngineConfig,
    context: &CalibrationContext,
    divisors: &[f64],
    seed_salt: &str,
) -> BacktestReport {
    let settings = &config.backtest;
    let fallback = config.kelly_divisor;
    let candidates: Vec<f64> = if divisors.is_empty() {
        settings.default_divisors.clone()
    } else {
        divisors.to_vec()
    }
    .into_iter()
    .filter(|d| d.is_finite() && *d > 0.0)
    .collect();

    let mut report = BacktestReport {
        ready: false,
        sample_count: bets.len(),
        required_samples: settings.min_samples,
        seed_salt: seed_salt.to_string(),
        per_divisor: Vec::new(),
        best_divisor: None,
        reliability: 0.0,
        fallback_divisor: fallback,
        recommended_divisor: fallback,
    };
    if bets.len() < settings.min_samples || candidates.is_empty() {
        warn!(
            "Kelly backtest not ready: {} settled bets, {} required; keeping divisor {:.2}",
            bets.len(),
            settings.min_samples,
            fallback
        );
        return report;
    }

    let sample_penalty = settings.sample_penalty_scale / (bets.len() as f64).sqrt();
    for divisor in candidates {
        let rows = build_rows(bets, context, config, divisor);
        let runs = run_count(rows.len(), settings);
        let seed = derive_seed(&seed_values(&rows), &format!("{}|{}", seed_salt, divisor));
        let summary = simulate(&rows, config.initial_capital, runs, seed);
        let score = summary.roi - settings.drawdown_weight * summary.drawdown
            + settings.sharpe_weight * summary.sharpe
            - sample_penalty;
        debug!(
            "Divisor {:.2}: runs={}, roi={:+.4}, drawdown={:.4}, sharpe={:.4}, score={:.4}",
            divisor, runs, summary.roi, summary.drawdown, summary.sharpe, score
        );
        report.per_divisor.push(DivisorMetrics {
            divisor,
            runs: summary.runs,
            samples: summary.samples,
            roi: summary.roi,
            drawdown: summary.drawdown,
            sharpe: summary.sharpe,
            hit_rate: summary.hit_rate,
            score,
            within_drawdown_limit: summary.drawdown <= config.max_drawdown,
        });
    }

    let any_within = report.per_divisor.iter().any(|m| m.within_drawdown_limit);
    let best = report
        .per_divisor
        .iter()
        .filter(|m| m.within_drawdown_limit || !any_within)
        .fold(None::<&DivisorMetrics>, |best, m| match best {
            Some(b) if b.score >= m.score => Some(b),
            _ => Some(m),
        })
        .map(|m| m.divisor);

    let reliability = if settings.reliable_samples == 0 {
        1.0
    } else {
        (bets.len() as f64 / settings.reliable_samples as f64).min(1.0)
    };
    report.ready = true;
    report.best_divisor = best;
    report.reliability = reliability;
    if let Some(best) = best {
        report.recommended_divisor = fallback + (best - fallback) * reliability;
    }
    info!(
        "Kelly sweep [{}]: samples={}, best={:?}, reliability={:.2}, recommended divisor={:.3}",
        seed_salt,
        bets.len(),
        report.best_divisor,
        reliability,
        report.recommended_divisor
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::fit_calibration;
    use crate::history::fixtures::synthetic_history;
    use crate::history::EntityAliases;
    use approx::assert_relative_eq;

    fn fast_config() -> EngineConfig {
        let mut cfg = EngineConfig::default();
        cfg.backtest.target_runs = 400;
        cfg.backtest.operation_budget = 40_000;
        cfg.backtest.min_runs = 50;
        cfg
    }

    #[test]
    fn sweep_is_reproducible() {
        let history = synthetic_history(80, 1.1);
        let cfg = fast_config();
        let ctx = fit_calibration(&history, &cfg, &EntityAliases::new());
        let a = backtest_kelly_divisors(&history, &cfg, &ctx, &[2.0, 4.0, 8.0], "s1");
        let b = backtest_kelly_divisors(&history, &cfg, &ctx, &[2.0, 4.0, 8.0], "s1");
        assert!(a.ready);
        assert_eq!(a.per_divisor.len(), 3);
        for (x, y) in a.per_divisor.iter().zip(&b.per_divisor) {
            assert_eq!(x.roi.to_bits(), y.roi.to_bits());
            assert_eq!(x.drawdown.to_bits(), y.drawdown.to_bits());
            assert_eq!(x.sharpe.to_bits(), y.sharpe.to_bits());
        }
        assert_eq!(a.recommended_divisor.to_bits(), b.recommended_divisor.to_bits());
    }

    #[test]
    fn thin_history_keeps_fallback_divisor() {
        let history = synthetic_history(5, 1.0);
        let cfg = fast_config();
        let ctx = fit_calibration(&history, &cfg, &EntityAliases::new());
        let report = backtest_kelly_divisors(&history, &cfg, &ctx, &[2.0, 8.0], "s");
        assert!(!report.ready);
        assert_relative_eq!(report.recommended_divisor, cfg.kelly_divisor);
        assert!(report.per_divisor.is_empty());
    }

    #[test]
    fn recommendation_blends_toward_fallback_by_reliability() {
        let history = synthetic_history(60, 1.1);
        let cfg = fast_config();
        let ctx = fit_calibration(&history, &cfg, &EntityAliases::new());
        let report = backtest_kelly_divisors(&history, &cfg, &ctx, &[2.0, 3.0, 6.0, 10.0], "s");
        let best = report.best_divisor.unwrap();
        assert_relative_eq!(report.reliability, 0.5);
        assert_relative_eq!(
            report.recommended_divisor,
            cfg.kelly_divisor + (best - cfg.kelly_divisor) * 0.5,
            epsilon = 1e-12
        );
    }

    #[test]
    fn default_divisors_used_when_none_given() {
        let history = synthetic_history(40, 1.0);
        let cfg = fast_config();
        let ctx = fit_calibration(&history, &cfg, &EntityAliases::new());
        let report = backtest_kelly_divisors(&history, &cfg, &ctx, &[], "s");
        assert_eq!(report.per_divisor.len(), cfg.backtest.default_divisors.len());
    }

    #[test]
    fn stakes_never_exceed_risk_cap() {
        let history = synthetic_history(50, 1.3);
        let cfg = fast_config();
        let ctx = fit_calibration(&history, &cfg, &EntityAliases::new());
        let bets = settled_bets(&history);
        let rows = build_rows(&bets, &ctx, &cfg, 0.5);
        assert!(rows
            .iter()
            .all(|r| r.stake >= 0.0 && r.stake <= cfg.default_risk_cap() + 1e-9));
    }

    #[test]
    fn by_mode_splits_history() {
        let mut history = synthetic_history(40, 1.0);
        for (i, bet) in history.iter_mut().enumerate() {
            bet.legs[0].mode = Some(if i % 2 == 0 { "live" } else { "pre" }.to_string());
        }
        let cfg = fast_config();
        let ctx = fit_calibration(&history, &cfg, &EntityAliases::new());
        let reports = backtest_kelly_divisors_by_mode(&history, &cfg, &ctx, &[2.0, 4.0], "s");
        assert_eq!(reports.len(), 2);
        assert_eq!(reports["live"].sample_count, 20);
        assert_ne!(reports["live"].seed_salt, reports["pre"].seed_salt);
    }
}
