//! Quality thresholds and the three strategy modes that apply them.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::PortfolioSettings;
use crate::error::{EngineError, EngineResult};

use super::combos::ComboScore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyMode {
    /// Only subsets meeting every threshold; fails when none do
    ThresholdStrict,
    /// Passing subsets, plus the best subset containing each uncovered leg
    #[default]
    ManualCoverage,
    /// Every subset, with utility reduced by how far it misses each threshold
    SoftPenalty,
}

/// Optional per-subset thresholds. Unset thresholds always pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityFilter {
    pub min_ev: Option<f64>,
    pub min_win_rate: Option<f64>,
    pub max_correlation: Option<f64>,
}

impl QualityFilter {
    pub fn is_empty(&self) -> bool {
        self.min_ev.is_none() && self.min_win_rate.is_none() && self.max_correlation.is_none()
    }

    /// Total distance by which `combo` misses the thresholds (0 when it passes).
    pub fn shortfall(&self, combo: &ComboScore) -> f64 {
        let ev = self
            .min_ev
            .map(|m| (m - combo.expected_value).max(0.0))
            .unwrap_or(0.0);
        let win = self
            .min_win_rate
            .map(|m| (m - combo.joint_probability).max(0.0))
            .unwrap_or(0.0);
        let corr = self
            .max_correlation
            .map(|m| (combo.source_correlation - m).max(0.0))
            .unwrap_or(0.0);
        ev + win + corr
    }

    pub fn passes(&self, combo: &ComboScore) -> bool {
        self.shortfall(combo) <= 0.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterOutcome {
    /// Pool handed to the optimizer, best adjusted utility first
    pub pool: Vec<ComboScore>,
    pub filtered_out: usize,
    pub coverage_injected: usize,
}

fn by_adjusted_utility(a: &ComboScore, b: &ComboScore) -> std::cmp::Ordering {
    b.adjusted_utility
        .partial_cmp(&a.adjusted_utility)
        .unwrap_or(std::cmp::Ordering::Equal)
}

/// Apply `mode` to the scored subsets over `leg_count` legs.
pub fn apply_strategy(
    mode: StrategyMode,
    mut combos: Vec<ComboScore>,
    filter: &QualityFilter,
    leg_count: usize,
    settings: &PortfolioSettings,
) -> EngineResult<FilterOutcome> {
    let evaluated = combos.len();
    let max_pool = settings.max_pool.max(1);

    match mode {
        StrategyMode::ThresholdStrict => {
            combos.retain(|c| filter.passes(c));
            if combos.is_empty() {
                return Err(EngineError::NoQualifyingCombo { evaluated });
            }
            let filtered_out = evaluated - combos.len();
            combos.sort_by(by_adjusted_utility);
            combos.truncate(max_pool);
            Ok(FilterOutcome {
                pool: combos,
                filtered_out,
                coverage_injected: 0,
            })
        }
        StrategyMode::ManualCoverage => {
            combos.sort_by(by_adjusted_utility);
            let (mut pool, rest): (Vec<ComboScore>, Vec<ComboScore>) =
                combos.into_iter().partition(|c| filter.passes(c));
            let filtered_out = rest.len();
            let mut overflow = pool.split_off(pool.len().min(max_pool));
            overflow.extend(rest);
            overflow.sort_by(by_adjusted_utility);

            let mut injected = 0;
            for leg in 0..leg_count {
                if pool.iter().any(|c| c.contains(leg)) {
                    continue;
                }
                if let Some(pos) = overflow.iter().position(|c| c.contains(leg)) {
                    let combo = overflow.remove(pos);
                    debug!("Coverage: injecting {} for leg {}", combo.id, leg);
                    pool.push(combo);
                    injected += 1;
                }
            }
            pool.sort_by(by_adjusted_utility);
            Ok(FilterOutcome {
                pool,
                filtered_out,
                coverage_injected: injected,
            })
        }
        StrategyMode::SoftPenalty => {
            let mut missed = 0;
            for c in combos.iter_mut() {
                let shortfall = filter.shortfall(c);
                if shortfall > 0.0 {
                    missed += 1;
                }
                c.penalty = settings.soft_penalty_scale * shortfall;
                c.adjusted_utility = c.utility - c.penalty;
            }
            combos.sort_by(by_adjusted_utility);
            combos.truncate(max_pool);
            Ok(FilterOutcome {
                pool: combos,
                filtered_out: missed,
                coverage_injected: 0,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::combos::fixtures::scored;
    use super::super::combos::{enumerate_subsets, score_combo, ScoredLeg};
    use super::*;
    use approx::assert_relative_eq;

    fn legs() -> Vec<ScoredLeg> {
        vec![
            scored(0, "a", "arsenal", "chelsea", 0.7, 1.8),
            scored(1, "b", "leeds", "everton", 0.55, 2.0),
            scored(2, "c", "fulham", "spurs", 0.3, 2.5),
        ]
    }

    fn combos(legs: &[ScoredLeg]) -> Vec<ComboScore> {
        enumerate_subsets(legs.len(), 3)
            .iter()
            .map(|m| score_combo(m, legs, 0.5))
            .collect()
    }

    #[test]
    fn strict_mode_fails_without_qualifiers() {
        let legs = legs();
        let filter = QualityFilter {
            min_win_rate: Some(0.99),
            ..QualityFilter::default()
        };
        let err = apply_strategy(
            StrategyMode::ThresholdStrict,
            combos(&legs),
            &filter,
            legs.len(),
            &PortfolioSettings::default(),
        )
        .unwrap_err();
        assert_eq!(err, EngineError::NoQualifyingCombo { evaluated: 7 });
    }

    #[test]
    fn strict_mode_keeps_only_passing() {
        let legs = legs();
        let filter = QualityFilter {
            min_ev: Some(0.0),
            ..QualityFilter::default()
        };
        let out = apply_strategy(
            StrategyMode::ThresholdStrict,
            combos(&legs),
            &filter,
            legs.len(),
            &PortfolioSettings::default(),
        )
        .unwrap();
        assert!(out.pool.iter().all(|c| c.expected_value >= 0.0));
        assert_eq!(out.filtered_out + out.pool.len(), 7);
    }

    #[test]
    fn coverage_injects_best_subset_per_uncovered_leg() {
        let legs = legs();
        // only leg a clears 0.6 alone; b and c must be injected
        let filter = QualityFilter {
            min_win_rate: Some(0.6),
            ..QualityFilter::default()
        };
        let out = apply_strategy(
            StrategyMode::ManualCoverage,
            combos(&legs),
            &filter,
            legs.len(),
            &PortfolioSettings::default(),
        )
        .unwrap();
        assert_eq!(out.coverage_injected, 2);
        for leg in 0..legs.len() {
            assert!(out.pool.iter().any(|c| c.contains(leg)));
        }
    }

    #[test]
    fn coverage_mode_never_errors_when_nothing_passes() {
        let legs = legs();
        let filter = QualityFilter {
            min_win_rate: Some(0.99),
            ..QualityFilter::default()
        };
        let out = apply_strategy(
            StrategyMode::ManualCoverage,
            combos(&legs),
            &filter,
            legs.len(),
            &PortfolioSettings::default(),
        )
        .unwrap();
        assert_eq!(out.filtered_out, 7);
        assert!(!out.pool.is_empty());
    }

    #[test]
    fn soft_penalty_scales_with_shortfall() {
        let legs = legs();
        let filter = QualityFilter {
            min_win_rate: Some(0.6),
            ..QualityFilter::default()
        };
        let out = apply_strategy(
            StrategyMode::SoftPenalty,
            combos(&legs),
            &filter,
            legs.len(),
            &PortfolioSettings::default(),
        )
        .unwrap();
        assert_eq!(out.pool.len(), 7);
        let c = out.pool.iter().find(|c| c.id == "c").unwrap();
        assert_relative_eq!(c.penalty, 0.3, epsilon = 1e-12);
        assert_relative_eq!(c.adjusted_utility, c.utility - 0.3, epsilon = 1e-12);
        let a = out.pool.iter().find(|c| c.id == "a").unwrap();
        assert_relative_eq!(a.penalty, 0.0);
    }

    #[test]
    fn pool_is_capped() {
        let legs = legs();
        let settings = PortfolioSettings {
            max_pool: 3,
            ..PortfolioSettings::default()
        };
        let out = apply_strategy(
            StrategyMode::SoftPenalty,
            combos(&legs),
            &QualityFilter::default(),
            legs.len(),
            &settings,
        )
        .unwrap();
        assert_eq!(out.pool.len(), 3);
    }

    #[test]
    fn mode_names_are_kebab_case() {
        let m: StrategyMode = serde_json::from_str("\"threshold-strict\"").unwrap();
        assert_eq!(m, StrategyMode::ThresholdStrict);
        assert_eq!(
            serde_json::to_string(&StrategyMode::SoftPenalty).unwrap(),
            "\"soft-penalty\""
        );
    }
}
