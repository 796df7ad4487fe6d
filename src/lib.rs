//! Calibrated win probabilities, Kelly divisor selection and risk-capped
//! combo allocation from a settled bet history.

pub mod api;
pub mod backtest;
pub mod cache;
pub mod calibration;
pub mod config;
pub mod error;
pub mod history;
pub mod portfolio;
pub mod signal;

pub use backtest::{backtest_kelly_divisors, backtest_kelly_divisors_by_mode, BacktestReport};
pub use calibration::{fit_calibration, CalibrationContext, LegContext};
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use history::{Candidate, EntityAliases, HistoricalBet};
pub use portfolio::{generate_recommendations, QualityFilter, RecommendationReport, StrategyMode};
