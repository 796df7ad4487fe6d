//! Read-only views over the settled bet history: entity name normalisation,
//! per-leg stake/profit allocation and calibration sample extraction.

pub mod models;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use models::{
    Candidate, HistoricalBet, LegRecord, OutcomeStatus, DEFAULT_CONFIDENCE, NEUTRAL_NOISE,
};

/// Lowercase, strip punctuation and collapse whitespace.
pub fn normalize_entity(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Read a probability-like field. Values above 1 are treated as percentages.
pub fn normalize_unit(x: f64) -> Option<f64> {
    if !x.is_finite() || x < 0.0 {
        return None;
    }
    let v = if x > 1.0 { x / 100.0 } else { x };
    Some(v.min(1.0))
}

/// Alias → canonical entity name table supplied by the profile collaborator.
#[derive(Debug, Clone, Default)]
pub struct EntityAliases {
    map: HashMap<String, String>,
}

impl EntityAliases {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, alias: &str, canonical: &str) {
        self.map
            .insert(normalize_entity(alias), normalize_entity(canonical));
    }

    /// Normalised canonical name for `name` (the normalised name itself when unknown).
    ///
    /// Alias chains are followed to their end, so the result is a fixed point:
    /// `canonical(canonical(x)) == canonical(x)`. A cycle resolves to its
    /// lexicographically smallest member.
    pub fn canonical(&self, name: &str) -> String {
        let mut seen = vec![normalize_entity(name)];
        while let Some(next) = seen.last().and_then(|current| self.map.get(current)) {
            if let Some(start) = seen.iter().position(|s| s == next) {
                return seen.split_off(start).into_iter().min().unwrap_or_default();
            }
            seen.push(next.clone());
        }
        seen.pop().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl From<HashMap<String, String>> for EntityAliases {
    fn from(raw: HashMap<String, String>) -> Self {
        let mut aliases = EntityAliases::new();
        for (alias, canonical) in raw {
            aliases.insert(&alias, &canonical);
        }
        aliases
    }
}

/// Share of the parent bet's stake and profit attributed to one leg.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LegAllocation {
    pub input_share: f64,
    pub profit_share: f64,
}

/// Split a bet's stake and profit across its legs proportionally to each leg's odds.
pub fn split_allocations(bet: &HistoricalBet, default_odds: f64) -> Vec<LegAllocation> {
    let odds: Vec<f64> = bet
        .legs
        .iter()
        .map(|leg| usable_odds(leg.odds).unwrap_or(default_odds))
        .collect();
    let total: f64 = odds.iter().sum();
    if bet.legs.is_empty() || total <= 0.0 {
        return Vec::new();
    }
    let stake = bet.stake.max(0.0);
    odds.iter()
        .map(|o| {
            let share = o / total;
            LegAllocation {
                input_share: stake * share,
                profit_share: bet.profit * share,
            }
        })
        .collect()
}

pub fn usable_odds(odds: Option<f64>) -> Option<f64> {
    odds.filter(|o| o.is_finite() && *o > 1.0)
}

/// One usable (confidence, actual) observation derived from a leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegSample {
    pub bet_id: String,
    pub confidence: f64,
    /// Outcome-derived target in [0, 1]: quality score when rated, else 1/0
    pub actual: f64,
    pub won: Option<bool>,
    pub odds: Option<f64>,
    pub noise: f64,
    pub home: String,
    pub away: String,
    pub mode: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub allocation: LegAllocation,
}

/// Extract calibration samples in chronological order (oldest first).
///
/// A leg is usable when it carries a confidence and an outcome signal: a
/// quality score, an explicit correctness flag, or a settled single-leg parent.
pub fn collect_samples(
    history: &[HistoricalBet],
    aliases: &EntityAliases,
    default_odds: f64,
) -> Vec<LegSample> {
    let mut samples = Vec::new();
    for bet in history {
        let allocations = split_allocations(bet, default_odds);
        let single_leg = bet.legs.len() == 1;
        for (leg, allocation) in bet.legs.iter().zip(allocations) {
            let Some(confidence) = leg.confidence.and_then(normalize_unit) else {
                continue;
            };
            let won = leg.outcome_correct.or_else(|| {
                if single_leg && bet.status.is_settled() {
                    Some(bet.status == OutcomeStatus::Win)
                } else {
                    None
                }
            });
            let actual = match leg.quality_score.and_then(normalize_unit) {
                Some(q) => q,
                None => match won {
                    Some(true) => 1.0,
                    Some(false) => 0.0,
                    None => continue,
                },
            };
            samples.push(LegSample {
                bet_id: bet.id.clone(),
                confidence,
                actual,
                won,
                odds: usable_odds(leg.odds),
                noise: leg
                    .noise
                    .and_then(normalize_unit)
                    .unwrap_or(NEUTRAL_NOISE),
                home: aliases.canonical(&leg.home_entity),
                away: aliases.canonical(&leg.away_entity),
                mode: leg.mode.clone(),
                timestamp: leg.timestamp.unwrap_or(bet.timestamp),
                allocation,
            });
        }
    }
    samples.sort_by_key(|s| s.timestamp);
    samples
}

/// Settled bets (win or lose) in chronological order.
pub fn settled_bets(history: &[HistoricalBet]) -> Vec<&HistoricalBet> {
    let mut bets: Vec<&HistoricalBet> = history
        .iter()
        .filter(|b| b.status.is_settled())
        .collect();
    bets.sort_by_key(|b| b.timestamp);
    bets
}
