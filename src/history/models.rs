use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Settlement state of a historical bet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Win,
    Lose,
    Pending,
}

impl OutcomeStatus {
    pub fn is_settled(self) -> bool {
        !matches!(self, OutcomeStatus::Pending)
    }
}

/// One leg of a (possibly multi-leg) historical bet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegRecord {
    pub home_entity: String,
    pub away_entity: String,
    /// Subjective pre-event win probability. Legs without one are not usable
    /// calibration samples.
    #[serde(default)]
    pub confidence: Option<f64>,
    /// Decimal odds of the leg (> 1). Defaults to the configured odds.
    #[serde(default)]
    pub odds: Option<f64>,
    #[serde(default)]
    pub outcome_correct: Option<bool>,
    /// Post-hoc quality rating in [0, 1]; values above 1 are read as percent
    #[serde(default)]
    pub quality_score: Option<f64>,
    /// REP noise parameter in [0, 1]; higher = noisier outcome. Neutral 0.5.
    #[serde(default, alias = "rep")]
    pub noise: Option<f64>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// A settled (or pending) bet as recorded by the settlement workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalBet {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// Amount staked (≥ 0)
    pub stake: f64,
    /// Realised profit, signed
    pub profit: f64,
    /// Combined decimal odds of all legs (> 1)
    pub combined_odds: f64,
    pub status: OutcomeStatus,
    #[serde(default)]
    pub legs: Vec<LegRecord>,
}

/// A not-yet-settled leg offered for this session's portfolio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub home_entity: String,
    pub away_entity: String,
    /// Defaults to 0.5 when absent
    #[serde(default)]
    pub confidence: Option<f64>,
    /// Defaults to the configured default odds when absent or ≤ 1
    #[serde(default)]
    pub odds: Option<f64>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub fid: Option<f64>,
    #[serde(default)]
    pub tys: Option<f64>,
    #[serde(default)]
    pub fse: Option<f64>,
}

pub const DEFAULT_CONFIDENCE: f64 = 0.5;
pub const NEUTRAL_NOISE: f64 = 0.5;
