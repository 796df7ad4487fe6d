//! Chronological train/test checkpoints used to detect calibration drift.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{fit_samples, LegContext};
use crate::config::EngineConfig;
use crate::history::{EntityAliases, LegSample};
use crate::signal::LossMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stability {
    Stable,
    Watch,
    Risk,
}

impl Stability {
    pub fn from_drift(drift: f64, watch: f64, risk: f64) -> Self {
        if drift > risk {
            Stability::Risk
        } else if drift > watch {
            Stability::Watch
        } else {
            Stability::Stable
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkForwardWindow {
    /// Fraction of history used for training
    pub checkpoint: f64,
    pub train_size: usize,
    pub test_size: usize,
    /// False when the prefix was too short to fit
    pub ready: bool,
    pub train: LossMetrics,
    pub test: LossMetrics,
    /// Test Brier minus train Brier
    pub drift: f64,
    /// ROI of flat 1-unit bets on held-out legs the calibration priced at positive EV
    pub strategy_roi: f64,
    pub strategy_bets: usize,
    pub stability: Option<Stability>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WalkForwardReport {
    pub windows: Vec<WalkForwardWindow>,
    /// Worst stability across ready windows
    pub stability: Option<Stability>,
}

pub fn walk_forward(
    samples: &[LegSample],
    config: &EngineConfig,
    aliases: &EntityAliases,
) -> WalkForwardReport {
    let settings = &config.calibration;
    let n = samples.len();
    let windows: Vec<WalkForwardWindow> = settings
        .walk_forward_checkpoints
        .iter()
        .filter(|cp| cp.is_finite() && **cp > 0.0 && **cp < 1.0)
        .map(|&checkpoint| {
            let cut = ((n as f64) * checkpoint).floor() as usize;
            let (train, test) = samples.split_at(cut.min(n));
            evaluate_window(checkpoint, train, test, config, aliases)
        })
        .collect();
    let stability = windows.iter().filter_map(|w| w.stability).max();
    WalkForwardReport { windows, stability }
}

fn evaluate_window(
    checkpoint: f64,
    train: &[LegSample],
    test: &[LegSample],
    config: &EngineConfig,
    aliases: &EntityAliases,
) -> WalkForwardWindow {
    let mut window = WalkForwardWindow {
        checkpoint,
        train_size: train.len(),
        test_size: test.len(),
        ready: false,
        train: LossMetrics::default(),
        test: LossMetrics::default(),
        drift: 0.0,
        strategy_roi: 0.0,
        strategy_bets: 0,
        stability: None,
    };
    if test.is_empty() {
        return window;
    }
    let context = fit_samples(train, config, aliases);
    if !context.ready {
        return window;
    }

    let predict = |s: &LegSample| context.calibrate(s.confidence, &LegContext::new(&s.home, &s.away, s.odds));
    window.ready = true;
    window.train = LossMetrics::score(train.iter().map(|s| (predict(s), s.actual)));
    window.test = LossMetrics::score(test.iter().map(|s| (predict(s), s.actual)));
    window.drift = window.test.brier - window.train.brier;

    let mut staked = 0.0;
    let mut profit = 0.0;
    for s in test {
        let (Some(odds), Some(won)) = (s.odds, s.won) else {
            continue;
        };
        if predict(s) * odds <= 1.0 {
            continue;
        }
        staked += 1.0;
        profit += if won { odds - 1.0 } else { -1.0 };
    }
    window.strategy_bets = staked as usize;
    window.strategy_roi = if staked > 0.0 { profit / staked } else { 0.0 };

    let settings = &config.calibration;
    window.stability = Some(Stability::from_drift(
        window.drift,
        settings.drift_watch,
        settings.drift_risk,
    ));
    debug!(
        "Walk-forward {:.0}%: train={}, test={}, drift={:+.4}, roi={:+.3}",
        checkpoint * 100.0,
        window.train_size,
        window.test_size,
        window.drift,
        window.strategy_roi
    );
    window
}
