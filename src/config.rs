use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::portfolio::StrategyMode;

/// Calibrated combo allocation engine
#[derive(Parser, Debug, Clone)]
#[command(name = "comboedge", version, about)]
pub struct Config {
    /// Engine tuning file (JSON). Built-in defaults are used when absent.
    #[arg(long, env = "COMBOEDGE_CONFIG")]
    pub engine_config: Option<PathBuf>,

    /// Settled bet history (JSON array of bets)
    #[arg(long, env = "COMBOEDGE_HISTORY", default_value = "history.json")]
    pub history_path: PathBuf,

    /// Entity alias table (JSON object alias -> canonical name)
    #[arg(long, env = "COMBOEDGE_ALIASES")]
    pub aliases_path: Option<PathBuf>,

    /// Salt mixed into the Monte Carlo seed
    #[arg(long, env = "COMBOEDGE_SEED_SALT", default_value = "default")]
    pub seed_salt: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Fit the calibration pipeline and print its diagnostics
    Calibrate,

    /// Sweep Kelly divisors with the bootstrap backtest
    Backtest {
        /// Candidate divisors, comma separated (defaults from the engine config)
        #[arg(long, value_delimiter = ',')]
        divisors: Vec<f64>,

        /// Also run the sweep separately for each leg mode tag
        #[arg(long, default_value = "false")]
        by_mode: bool,
    },

    /// Rank and cash-allocate combos over a candidate file
    Recommend {
        /// Candidate legs (JSON array)
        #[arg(long, env = "COMBOEDGE_CANDIDATES")]
        candidates_path: PathBuf,

        /// Risk preference, 0 = averse, 1 = seeking (values above 1 read as percent)
        #[arg(long, default_value = "0.5")]
        risk_preference: f64,

        /// Maximum total cash; defaults to capital × risk-cap ratio
        #[arg(long)]
        risk_cap: Option<f64>,

        #[arg(long, value_enum, default_value = "manual-coverage")]
        mode: StrategyMode,

        #[arg(long)]
        min_ev: Option<f64>,

        #[arg(long)]
        min_win_rate: Option<f64>,

        #[arg(long)]
        max_correlation: Option<f64>,
    },

    /// Serve the engine as a local JSON API
    Serve {
        #[arg(long, env = "COMBOEDGE_ADDR", default_value = "127.0.0.1:8080")]
        addr: String,
    },
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        match &self.command {
            Command::Backtest { divisors, .. } => {
                if divisors.iter().any(|d| !d.is_finite() || *d <= 0.0) {
                    anyhow::bail!("every Kelly divisor must be positive");
                }
            }
            Command::Recommend {
                risk_preference,
                risk_cap,
                ..
            } => {
                if !(0.0..=100.0).contains(risk_preference) {
                    anyhow::bail!("risk_preference must be between 0 and 1 (or 0 and 100 as percent)");
                }
                if let Some(cap) = risk_cap {
                    if *cap <= 0.0 {
                        anyhow::bail!("risk_cap must be positive");
                    }
                }
            }
            Command::Calibrate | Command::Serve { .. } => {}
        }
        if self.seed_salt.is_empty() {
            anyhow::bail!("seed_salt must not be empty");
        }
        Ok(())
    }
}

/// Engine configuration supplied by the host application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Capital base used for Kelly sizing (currency units)
    pub initial_capital: f64,
    /// Fraction of capital a single recommendation run may commit
    pub risk_cap_ratio: f64,
    /// Odds assumed when a candidate or leg carries none
    pub default_odds: f64,
    /// Fallback Kelly divisor
    pub kelly_divisor: f64,
    /// Maximum acceptable expected drawdown (fraction of peak)
    pub max_drawdown: f64,
    /// Base weight given to market-implied probability
    pub market_weight: f64,
    pub factor_weights: FactorWeights,
    pub calibration: CalibrationSettings,
    pub backtest: BacktestSettings,
    pub portfolio: PortfolioSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            initial_capital: 1000.0,
            risk_cap_ratio: 0.2,
            default_odds: 1.9,
            kelly_divisor: 4.0,
            max_drawdown: 0.35,
            market_weight: 0.25,
            factor_weights: FactorWeights::default(),
            calibration: CalibrationSettings::default(),
            backtest: BacktestSettings::default(),
            portfolio: PortfolioSettings::default(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Risk cap used when the caller does not pass one explicitly.
    pub fn default_risk_cap(&self) -> f64 {
        self.initial_capital * self.risk_cap_ratio
    }

    pub fn validate(&self) -> EngineResult<()> {
        let bad = |msg: &str| Err(EngineError::Config(msg.to_string()));
        if !(self.initial_capital.is_finite() && self.initial_capital > 0.0) {
            return bad("initial_capital must be positive");
        }
        if !(self.risk_cap_ratio > 0.0 && self.risk_cap_ratio <= 1.0) {
            return bad("risk_cap_ratio must be in (0, 1]");
        }
        if !(self.default_odds.is_finite() && self.default_odds > 1.0) {
            return bad("default_odds must be greater than 1");
        }
        if !(self.kelly_divisor.is_finite() && self.kelly_divisor > 0.0) {
            return bad("kelly_divisor must be positive");
        }
        if !(self.max_drawdown > 0.0 && self.max_drawdown <= 1.0) {
            return bad("max_drawdown must be in (0, 1]");
        }
        if !(0.0..=1.0).contains(&self.market_weight) {
            return bad("market_weight must be in [0, 1]");
        }
        if self.calibration.min_samples == 0 {
            return bad("calibration.min_samples must be at least 1");
        }
        if self.portfolio.max_candidates == 0 || self.portfolio.max_combo_size == 0 {
            return bad("portfolio.max_candidates and max_combo_size must be at least 1");
        }
        if !(self.portfolio.cash_unit.is_finite() && self.portfolio.cash_unit > 0.0) {
            return bad("portfolio.cash_unit must be positive");
        }
        Ok(())
    }
}

/// Weights for the auxiliary candidate factors. Each factor is a score in
/// `[0, 1]` where 0.5 is neutral.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactorWeights {
    pub fid: f64,
    pub tys: f64,
    pub fse: f64,
    /// Bound on the total probability nudge from all factors
    pub adjust_cap: f64,
}

impl Default for FactorWeights {
    fn default() -> Self {
        FactorWeights {
            fid: 0.04,
            tys: 0.03,
            fse: 0.03,
            adjust_cap: 0.06,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSettings {
    /// Below this many usable samples the pipeline reports not-ready
    pub min_samples: usize,
    /// Sample count at which the count term of reliability saturates
    pub full_reliability_samples: usize,
    pub max_reliability: f64,
    /// Recency tier unit is `ceil(total / recency_unit_divisor)`
    pub recency_unit_divisor: usize,
    pub recency_top_multiple: usize,
    pub recency_mid_multiple: usize,
    pub recency_top_weight: f64,
    pub recency_mid_weight: f64,
    pub recency_base_weight: f64,
    /// Low-noise samples get `1 + strength`, high-noise `1 - strength`
    pub rep_direction_strength: f64,
    /// Share of the linear fit inside the blended model (rest is the ratio estimate)
    pub linear_share: f64,
    pub ratio_min: f64,
    pub ratio_max: f64,
    pub isotonic_max_blend: f64,
    /// Isotonic block count at which its own reliability saturates
    pub isotonic_full_blocks: usize,
    pub entity_shift_cap: f64,
    /// Pseudo-count shrinking thin entities toward zero shift
    pub entity_prior_weight: f64,
    /// Residual variance discount strength
    pub variance_penalty: f64,
    pub odds_shift_cap: f64,
    /// Upper edges of the first three odds buckets; the fourth is open-ended
    pub odds_bucket_edges: [f64; 3],
    pub max_market_weight: f64,
    pub walk_forward_checkpoints: Vec<f64>,
    /// Test-minus-train Brier drift above which a window is "watch"
    pub drift_watch: f64,
    /// Test-minus-train Brier drift above which a window is "risk"
    pub drift_risk: f64,
    pub scatter_limit: usize,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        CalibrationSettings {
            min_samples: 24,
            full_reliability_samples: 240,
            max_reliability: 0.9,
            recency_unit_divisor: 50,
            recency_top_multiple: 6,
            recency_mid_multiple: 5,
            recency_top_weight: 1.6,
            recency_mid_weight: 1.25,
            recency_base_weight: 1.0,
            rep_direction_strength: 0.35,
            linear_share: 0.7,
            ratio_min: 0.7,
            ratio_max: 1.3,
            isotonic_max_blend: 0.6,
            isotonic_full_blocks: 6,
            entity_shift_cap: 0.18,
            entity_prior_weight: 8.0,
            variance_penalty: 6.0,
            odds_shift_cap: 0.12,
            odds_bucket_edges: [1.5, 2.0, 3.0],
            max_market_weight: 0.6,
            walk_forward_checkpoints: vec![0.55, 0.70, 0.82],
            drift_watch: 0.01,
            drift_risk: 0.03,
            scatter_limit: 400,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestSettings {
    pub target_runs: usize,
    /// Upper bound on samples × runs per divisor
    pub operation_budget: usize,
    pub min_runs: usize,
    pub min_samples: usize,
    pub drawdown_weight: f64,
    pub sharpe_weight: f64,
    pub sample_penalty_scale: f64,
    /// Sample count at which the swept divisor is trusted fully over the fallback
    pub reliable_samples: usize,
    pub default_divisors: Vec<f64>,
}

impl Default for BacktestSettings {
    fn default() -> Self {
        BacktestSettings {
            target_runs: 100_000,
            operation_budget: 4_000_000,
            min_runs: 200,
            min_samples: 12,
            drawdown_weight: 0.72,
            sharpe_weight: 8.0,
            sample_penalty_scale: 0.35,
            reliable_samples: 120,
            default_divisors: vec![2.0, 3.0, 4.0, 6.0, 8.0],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortfolioSettings {
    pub max_candidates: usize,
    pub max_combo_size: usize,
    /// Subsets admitted to the covariance optimizer
    pub max_pool: usize,
    pub iterations: usize,
    pub step_size: f64,
    /// λ in the concentration penalty `λ·Σw²`
    pub concentration_penalty: f64,
    /// Per-subset weight cap is `base + span·α`
    pub weight_cap_base: f64,
    pub weight_cap_span: f64,
    pub cash_unit: f64,
    pub soft_penalty_scale: f64,
    /// Correlation floor between any two subsets
    pub baseline_correlation: f64,
    pub max_pair_correlation: f64,
    /// Share of the overlap ratio (rest is Jaccard) in the shared-leg term
    pub overlap_share: f64,
    /// Extra correlation per shared entity across distinct legs
    pub entity_correlation: f64,
}

impl Default for PortfolioSettings {
    fn default() -> Self {
        PortfolioSettings {
            max_candidates: 12,
            max_combo_size: 5,
            max_pool: 40,
            iterations: 180,
            step_size: 0.05,
            concentration_penalty: 0.08,
            weight_cap_base: 0.35,
            weight_cap_span: 0.5,
            cash_unit: 10.0,
            soft_penalty_scale: 1.0,
            baseline_correlation: 0.05,
            max_pair_correlation: 0.95,
            overlap_share: 0.6,
            entity_correlation: 0.25,
        }
    }
}
