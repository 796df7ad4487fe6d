//! Secondary correction layers fitted on calibration residuals
//! (`actual - calibrated`): per-entity shifts and per-odds-bucket shifts.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::config::CalibrationSettings;
use crate::signal::weighted_mean_var;

/// Shrunken additive shift for one group of residuals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ShiftStat {
    pub shift: f64,
    pub reliability: f64,
    pub samples: usize,
}

impl ShiftStat {
    /// Weighted mean residual, discounted by effective sample size and by
    /// residual variance, then clamped to `±cap`.
    pub fn fit(residuals: &[f64], weights: &[f64], cap: f64, settings: &CalibrationSettings) -> Self {
        let Some((mean, var)) = weighted_mean_var(residuals, weights) else {
            return ShiftStat::default();
        };
        let sw: f64 = weights.iter().sum();
        let sw2: f64 = weights.iter().map(|w| w * w).sum();
        let n_eff = if sw2 > 0.0 { sw * sw / sw2 } else { 0.0 };
        let stability = n_eff / (n_eff + settings.entity_prior_weight.max(0.0));
        let variance_discount = 1.0 / (1.0 + settings.variance_penalty.max(0.0) * var);
        let reliability = (stability * variance_discount).clamp(0.0, 1.0);
        ShiftStat {
            shift: (mean * reliability).clamp(-cap, cap),
            reliability,
            samples: residuals.len(),
        }
    }
}

/// Blended adjustment for a single match from its two entities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchAdjustment {
    pub shift: f64,
    pub reliability: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityShifts {
    pub by_entity: BTreeMap<String, ShiftStat>,
    /// Population average used for entities never seen in history
    pub fallback: ShiftStat,
}

impl EntityShifts {
    /// `rows` are `(home, away, residual, weight)`; each residual counts for both entities.
    pub fn fit<'a, I>(rows: I, settings: &CalibrationSettings) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str, f64, f64)>,
    {
        let mut grouped: HashMap<&str, (Vec<f64>, Vec<f64>)> = HashMap::new();
        for (home, away, residual, weight) in rows {
            for entity in [home, away] {
                if entity.is_empty() {
                    continue;
                }
                let slot = grouped.entry(entity).or_default();
                slot.0.push(residual);
                slot.1.push(weight);
            }
        }

        let by_entity: BTreeMap<String, ShiftStat> = grouped
            .into_iter()
            .map(|(entity, (residuals, weights))| {
                let stat = ShiftStat::fit(&residuals, &weights, settings.entity_shift_cap, settings);
                (entity.to_string(), stat)
            })
            .collect();

        let total: usize = by_entity.values().map(|s| s.samples).sum();
        let fallback = if total == 0 {
            ShiftStat::default()
        } else {
            let t = total as f64;
            ShiftStat {
                shift: by_entity.values().map(|s| s.shift * s.samples as f64).sum::<f64>() / t,
                reliability: by_entity
                    .values()
                    .map(|s| s.reliability * s.samples as f64)
                    .sum::<f64>()
                    / t,
                samples: 0,
            }
        };

        EntityShifts {
            by_entity,
            fallback,
        }
    }

    pub fn stat(&self, entity: &str) -> ShiftStat {
        self.by_entity.get(entity).copied().unwrap_or(self.fallback)
    }

    /// Reliability-weighted average of both entities' shifts.
    pub fn match_adjustment(&self, home: &str, away: &str) -> MatchAdjustment {
        let h = self.stat(home);
        let a = self.stat(away);
        let rel_sum = h.reliability + a.reliability;
        if rel_sum <= 0.0 {
            return MatchAdjustment::default();
        }
        MatchAdjustment {
            shift: (h.shift * h.reliability + a.shift * a.reliability) / rel_sum,
            reliability: rel_sum / 2.0,
        }
    }
}

pub const ODDS_BUCKETS: usize = 4;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OddsBuckets {
    /// Upper edges of the first three buckets
    pub edges: [f64; 3],
    pub buckets: [ShiftStat; ODDS_BUCKETS],
}

pub fn bucket_index(odds: f64, edges: &[f64; 3]) -> usize {
    edges.iter().position(|edge| odds < *edge).unwrap_or(ODDS_BUCKETS - 1)
}

impl OddsBuckets {
    pub fn neutral(edges: [f64; 3]) -> Self {
        OddsBuckets {
            edges,
            buckets: [ShiftStat::default(); ODDS_BUCKETS],
        }
    }

    /// `rows` are `(odds, residual, weight)`.
    pub fn fit<I>(rows: I, settings: &CalibrationSettings) -> Self
    where
        I: IntoIterator<Item = (f64, f64, f64)>,
    {
        let edges = settings.odds_bucket_edges;
        let mut residuals: [Vec<f64>; ODDS_BUCKETS] = Default::default();
        let mut weights: [Vec<f64>; ODDS_BUCKETS] = Default::default();
        for (odds, residual, weight) in rows {
            let idx = bucket_index(odds, &edges);
            residuals[idx].push(residual);
            weights[idx].push(weight);
        }
        let mut out = OddsBuckets::neutral(edges);
        for idx in 0..ODDS_BUCKETS {
            out.buckets[idx] =
                ShiftStat::fit(&residuals[idx], &weights[idx], settings.odds_shift_cap, settings);
        }
        out
    }

    pub fn shift_for(&self, odds: f64) -> f64 {
        self.buckets[bucket_index(odds, &self.edges)].shift
    }
}
