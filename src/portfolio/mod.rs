//! Combinatorial portfolio construction.
//!
//! Candidates are calibrated, every subset up to the configured size is
//! scored as a parlay, the strategy mode filters the subsets into a pool, a
//! mean-variance optimizer weights the pool and the weights are rounded into
//! whole cash units under the risk cap.

pub mod allocation;
pub mod combos;
pub mod correlation;
pub mod filter;
pub mod optimizer;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::calibration::CalibrationContext;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::history::{normalize_unit, Candidate};

pub use allocation::{Layer, LayerSummary};
pub use combos::{ComboScore, ScoredLeg};
pub use filter::{QualityFilter, StrategyMode};

use allocation::{discretize, summarize_layers};
use combos::{enumerate_subsets, score_candidates, score_combo};
use correlation::{correlation_matrix, covariance_matrix};
use filter::apply_strategy;
use optimizer::optimize_weights;

/// One funded subset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub rank: usize,
    pub layer: Layer,
    pub combo_id: String,
    pub leg_ids: Vec<String>,
    pub joint_probability: f64,
    pub combined_odds: f64,
    pub expected_value: f64,
    pub sharpe: f64,
    pub utility: f64,
    pub penalty: f64,
    /// Optimizer weight before cash rounding
    pub weight: f64,
    pub cash: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticCounts {
    pub candidate_count: usize,
    /// Candidates dropped by the per-run candidate cap
    pub truncated_count: usize,
    pub evaluated_combos: usize,
    pub degenerate_excluded: usize,
    pub filtered_out: usize,
    pub coverage_injected: usize,
    pub pool_size: usize,
    /// Candidate legs that appear in no funded subset
    pub uncovered_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationReport {
    pub mode: StrategyMode,
    pub risk_preference: f64,
    pub risk_cap: f64,
    pub legs: Vec<ScoredLeg>,
    pub allocations: Vec<Allocation>,
    pub layer_summary: Vec<LayerSummary>,
    pub total_cash: f64,
    /// Σ cash · expected value per unit
    pub aggregate_ev: f64,
    pub weight_sum: f64,
    pub diagnostics: DiagnosticCounts,
}

/// Risk preference in `[0, 1]`; values above 1 are read as percent.
pub fn normalize_risk_preference(value: f64) -> f64 {
    normalize_unit(value).map(|v| v.clamp(0.0, 1.0)).unwrap_or(0.5)
}

/// Rank, weight and cash-allocate subsets of `candidates`.
pub fn generate_recommendations(
    candidates: &[Candidate],
    risk_preference: f64,
    risk_cap: f64,
    config: &EngineConfig,
    context: &CalibrationContext,
    filter: &QualityFilter,
    mode: StrategyMode,
) -> EngineResult<RecommendationReport> {
    config.validate()?;
    let settings = &config.portfolio;
    if candidates.is_empty() {
        return Err(EngineError::DegenerateInput("no candidates supplied".into()));
    }
    if !(risk_cap.is_finite() && risk_cap > 0.0) {
        return Err(EngineError::DegenerateInput(format!(
            "risk cap must be positive, got {}",
            risk_cap
        )));
    }
    let alpha = normalize_risk_preference(risk_preference);
    let mut diagnostics = DiagnosticCounts {
        candidate_count: candidates.len(),
        ..DiagnosticCounts::default()
    };

    let mut legs = score_candidates(candidates, config, context);
    if legs.len() > settings.max_candidates {
        legs.sort_by(|a, b| {
            b.edge()
                .partial_cmp(&a.edge())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.index.cmp(&b.index))
        });
        diagnostics.truncated_count = legs.len() - settings.max_candidates;
        legs.truncate(settings.max_candidates);
        legs.sort_by_key(|l| l.index);
        warn!(
            "Candidate cap: keeping {} of {} legs by single-leg edge",
            settings.max_candidates,
            candidates.len()
        );
    }

    let mut combos = Vec::new();
    for members in enumerate_subsets(legs.len(), settings.max_combo_size) {
        let combo = score_combo(&members, &legs, alpha);
        if combo.is_degenerate() {
            diagnostics.degenerate_excluded += 1;
        } else {
            combos.push(combo);
        }
    }
    diagnostics.evaluated_combos = combos.len() + diagnostics.degenerate_excluded;
    if combos.is_empty() {
        return Err(EngineError::DegenerateInput(
            "every subset had zero variance".into(),
        ));
    }

    let outcome = apply_strategy(mode, combos, filter, legs.len(), settings)?;
    diagnostics.filtered_out = outcome.filtered_out;
    diagnostics.coverage_injected = outcome.coverage_injected;
    let pool = outcome.pool;
    diagnostics.pool_size = pool.len();

    let correlation = correlation_matrix(&pool, &legs, settings);
    let covariance = covariance_matrix(&pool, &correlation);
    let mu: Vec<f64> = pool.iter().map(|c| c.expected_value - c.penalty).collect();
    let weights = optimize_weights(&mu, &covariance, alpha, settings);
    let weight_sum: f64 = weights.iter().sum();

    let cash = discretize(&weights, risk_cap, settings.cash_unit);
    let mut order: Vec<usize> = (0..pool.len()).collect();
    order.sort_by(|a, b| {
        weights[*b]
            .partial_cmp(&weights[*a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(
                pool[*b]
                    .adjusted_utility
                    .partial_cmp(&pool[*a].adjusted_utility)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
    });

    let mut funded: Vec<(usize, f64)> = order
        .iter()
        .filter(|i| cash[**i] > 0.0)
        .map(|i| (*i, cash[*i]))
        .collect();
    if funded.is_empty() {
        if let Some(top) = order.first() {
            let forced = settings.cash_unit.min(risk_cap);
            debug!("No subset survived rounding; forcing {} with {:.2}", pool[*top].id, forced);
            funded.push((*top, forced));
        }
    }

    let allocations: Vec<Allocation> = funded
        .into_iter()
        .enumerate()
        .map(|(pos, (i, cash))| {
            let combo = &pool[i];
            let rank = pos + 1;
            Allocation {
                rank,
                layer: Layer::for_rank(rank),
                combo_id: combo.id.clone(),
                leg_ids: combo.leg_ids.clone(),
                joint_probability: combo.joint_probability,
                combined_odds: combo.combined_odds,
                expected_value: combo.expected_value,
                sharpe: combo.sharpe,
                utility: combo.utility,
                penalty: combo.penalty,
                weight: weights[i],
                cash,
            }
        })
        .collect();

    diagnostics.uncovered_count = legs
        .iter()
        .filter(|l| !allocations.iter().any(|a| a.leg_ids.contains(&l.id)))
        .count();

    let total_cash: f64 = allocations.iter().map(|a| a.cash).sum();
    let aggregate_ev: f64 = allocations.iter().map(|a| a.cash * a.expected_value).sum();
    let layer_summary = summarize_layers(
        allocations
            .iter()
            .map(|a| (a.rank, a.cash, a.expected_value, a.sharpe)),
    );

    info!(
        "Recommendations [{:?}]: {} legs, {} subsets, pool {}, funded {}, cash {:.2}/{:.2}, EV {:+.2}",
        mode,
        legs.len(),
        diagnostics.evaluated_combos,
        diagnostics.pool_size,
        allocations.len(),
        total_cash,
        risk_cap,
        aggregate_ev
    );

    Ok(RecommendationReport {
        mode,
        risk_preference: alpha,
        risk_cap,
        legs,
        allocations,
        layer_summary,
        total_cash,
        aggregate_ev,
        weight_sum,
        diagnostics,
    })
}
