//! Candidate scoring, subset enumeration and per-subset statistics.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::calibration::{CalibrationContext, LegContext};
use crate::config::{EngineConfig, FactorWeights};
use crate::history::{normalize_unit, usable_odds, Candidate, DEFAULT_CONFIDENCE};
use crate::signal::clamp_prob;

/// A candidate after calibration, ready to be combined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredLeg {
    pub index: usize,
    pub id: String,
    pub probability: f64,
    pub odds: f64,
    pub home: String,
    pub away: String,
    pub mode: Option<String>,
}

impl ScoredLeg {
    pub fn edge(&self) -> f64 {
        self.probability * self.odds - 1.0
    }

    pub fn shares_entity(&self, other: &ScoredLeg) -> bool {
        let mine = [&self.home, &self.away];
        [&other.home, &other.away]
            .iter()
            .any(|t| !t.is_empty() && mine.contains(t))
    }
}

/// Probability nudge from the auxiliary `fid`/`tys`/`fse` scores (0.5 = neutral).
pub fn factor_adjustment(candidate: &Candidate, weights: &FactorWeights) -> f64 {
    let term = |value: Option<f64>, weight: f64| {
        value
            .and_then(normalize_unit)
            .map(|v| weight * (v - 0.5))
            .unwrap_or(0.0)
    };
    let total = term(candidate.fid, weights.fid)
        + term(candidate.tys, weights.tys)
        + term(candidate.fse, weights.fse);
    let cap = weights.adjust_cap.abs();
    total.clamp(-cap, cap)
}

pub fn score_candidates(
    candidates: &[Candidate],
    config: &EngineConfig,
    context: &CalibrationContext,
) -> Vec<ScoredLeg> {
    candidates
        .iter()
        .enumerate()
        .map(|(index, c)| {
            let confidence = c
                .confidence
                .and_then(normalize_unit)
                .unwrap_or(DEFAULT_CONFIDENCE);
            let odds = match usable_odds(c.odds) {
                Some(o) => o,
                None => {
                    if c.odds.is_some() {
                        warn!(
                            "Candidate {} has unusable odds {:?}; using default {:.2}",
                            c.id, c.odds, config.default_odds
                        );
                    }
                    config.default_odds
                }
            };
            let leg = LegContext::new(&c.home_entity, &c.away_entity, Some(odds));
            let calibrated = context.calibrate(confidence, &leg);
            ScoredLeg {
                index,
                id: c.id.clone(),
                probability: clamp_prob(calibrated + factor_adjustment(c, &config.factor_weights)),
                odds,
                home: context.canonical_entity(&c.home_entity),
                away: context.canonical_entity(&c.away_entity),
                mode: c.mode.clone(),
            }
        })
        .collect()
}

/// Every non-empty index subset of `0..n` with at most `max_size` members,
/// in lexicographic order, built with an explicit stack.
pub fn enumerate_subsets(n: usize, max_size: usize) -> Vec<Vec<usize>> {
    let mut out = Vec::new();
    if n == 0 || max_size == 0 {
        return out;
    }
    let mut stack: Vec<usize> = Vec::with_capacity(max_size);
    let mut next = 0usize;
    loop {
        if next < n && stack.len() < max_size {
            stack.push(next);
            out.push(stack.clone());
            next += 1;
        } else {
            match stack.pop() {
                Some(last) => next = last + 1,
                None => break,
            }
        }
    }
    out
}

/// Statistics of one subset treated as a single parlay bet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComboScore {
    pub id: String,
    /// Positions into the scored-leg list
    pub legs: Vec<usize>,
    pub leg_ids: Vec<String>,
    pub joint_probability: f64,
    pub combined_odds: f64,
    pub expected_value: f64,
    pub variance: f64,
    pub sharpe: f64,
    pub utility: f64,
    /// Share of leg pairs inside the subset that involve a common entity
    pub source_correlation: f64,
    /// Soft-penalty deduction (0 outside soft-penalty mode)
    pub penalty: f64,
    pub adjusted_utility: f64,
}

impl ComboScore {
    pub fn contains(&self, leg: usize) -> bool {
        self.legs.contains(&leg)
    }

    pub fn is_degenerate(&self) -> bool {
        self.legs.is_empty()
            || !self.variance.is_finite()
            || self.variance <= 1e-12
            || !self.expected_value.is_finite()
    }
}

pub fn score_combo(members: &[usize], legs: &[ScoredLeg], alpha: f64) -> ComboScore {
    let chosen: Vec<&ScoredLeg> = members.iter().filter_map(|i| legs.get(*i)).collect();
    let p: f64 = chosen.iter().map(|l| l.probability).product();
    let odds: f64 = chosen.iter().map(|l| l.odds).product();
    // win pays odds − 1, loss costs 1: outcomes are `odds` apart
    let ev = p * (odds - 1.0) - (1.0 - p);
    let variance = p * (1.0 - p) * odds * odds;
    let sd = variance.sqrt();
    let sharpe = if sd > 1e-12 { ev / sd } else { 0.0 };
    let utility = alpha * ev - (1.0 - alpha) * sd;

    let mut pairs = 0usize;
    let mut linked = 0usize;
    for (i, a) in chosen.iter().enumerate() {
        for b in chosen.iter().skip(i + 1) {
            pairs += 1;
            if a.shares_entity(b) {
                linked += 1;
            }
        }
    }
    let source_correlation = if pairs > 0 {
        linked as f64 / pairs as f64
    } else {
        0.0
    };

    let leg_ids: Vec<String> = chosen.iter().map(|l| l.id.clone()).collect();
    ComboScore {
        id: leg_ids.join("+"),
        legs: members.to_vec(),
        leg_ids,
        joint_probability: p,
        combined_odds: odds,
        expected_value: ev,
        variance,
        sharpe,
        utility,
        source_correlation,
        penalty: 0.0,
        adjusted_utility: utility,
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn candidate(id: &str, home: &str, away: &str, confidence: f64, odds: f64) -> Candidate {
        Candidate {
            id: id.into(),
            home_entity: home.into(),
            away_entity: away.into(),
            confidence: Some(confidence),
            odds: Some(odds),
            mode: None,
            fid: None,
            tys: None,
            fse: None,
        }
    }

    pub fn scored(index: usize, id: &str, home: &str, away: &str, p: f64, odds: f64) -> ScoredLeg {
        ScoredLeg {
            index,
            id: id.into(),
            probability: p,
            odds,
            home: home.into(),
            away: away.into(),
            mode: None,
        }
    }
}
