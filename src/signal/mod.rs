//! Numeric primitives shared by the calibration, backtest and portfolio layers.
//!
//! Everything here is pure and guards its inputs: non-finite values never
//! leave these helpers, and probabilities are kept inside `(PROB_EPS, 1 - PROB_EPS)`.

pub mod rng;

use serde::{Deserialize, Serialize};

pub use rng::{derive_seed, SeededRng};

/// Distance kept between any probability and the {0, 1} boundary.
pub const PROB_EPS: f64 = 1e-6;

/// Clamp `x` into `[lo, hi]`. NaN maps to `lo`.
pub fn clamp(x: f64, lo: f64, hi: f64) -> f64 {
    if x.is_nan() {
        return lo;
    }
    x.max(lo).min(hi)
}

pub fn clamp_prob(p: f64) -> f64 {
    if p.is_nan() {
        return 0.5;
    }
    p.clamp(PROB_EPS, 1.0 - PROB_EPS)
}

/// Probability implied by decimal odds, or `None` when the odds are unusable.
pub fn implied_probability(odds: f64) -> Option<f64> {
    if odds.is_finite() && odds > 1.0 {
        Some(clamp_prob(1.0 / odds))
    } else {
        None
    }
}

fn usable_weight(w: f64) -> bool {
    w.is_finite() && w > 0.0
}

/// Weighted Pearson correlation in `[-1, 1]`; `0.0` when either side has no variance.
pub fn weighted_pearson(xs: &[f64], ys: &[f64], weights: &[f64]) -> f64 {
    let mut sw = 0.0;
    let mut sx = 0.0;
    let mut sy = 0.0;
    for ((&x, &y), &w) in xs.iter().zip(ys).zip(weights) {
        if !usable_weight(w) || !x.is_finite() || !y.is_finite() {
            continue;
        }
        sw += w;
        sx += w * x;
        sy += w * y;
    }
    if sw <= 0.0 {
        return 0.0;
    }
    let mx = sx / sw;
    let my = sy / sw;

    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for ((&x, &y), &w) in xs.iter().zip(ys).zip(weights) {
        if !usable_weight(w) || !x.is_finite() || !y.is_finite() {
            continue;
        }
        cov += w * (x - mx) * (y - my);
        vx += w * (x - mx).powi(2);
        vy += w * (y - my).powi(2);
    }
    if vx <= f64::EPSILON || vy <= f64::EPSILON {
        return 0.0;
    }
    clamp(cov / (vx * vy).sqrt(), -1.0, 1.0)
}

/// Closed-form weighted least-squares fit of `y ≈ intercept + slope·x`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionFit {
    pub slope: f64,
    pub intercept: f64,
    /// Weighted coefficient of determination, clamped to `[0, 1]`.
    pub r2: f64,
    pub rmse: f64,
    /// Number of samples that carried a usable weight.
    pub n: usize,
}

impl RegressionFit {
    pub fn identity() -> Self {
        RegressionFit {
            slope: 1.0,
            intercept: 0.0,
            r2: 0.0,
            rmse: 0.0,
            n: 0,
        }
    }

    pub fn predict(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }
}

pub fn weighted_linear_regression(xs: &[f64], ys: &[f64], weights: &[f64]) -> RegressionFit {
    let rows: Vec<(f64, f64, f64)> = xs
        .iter()
        .zip(ys)
        .zip(weights)
        .filter(|((x, y), w)| usable_weight(**w) && x.is_finite() && y.is_finite())
        .map(|((x, y), w)| (*x, *y, *w))
        .collect();
    let n = rows.len();
    let sw: f64 = rows.iter().map(|r| r.2).sum();

    let mut fit = RegressionFit::identity();
    fit.n = n;
    if n == 0 || sw <= 0.0 {
        return fit;
    }

    let mx = rows.iter().map(|(x, _, w)| w * x).sum::<f64>() / sw;
    let my = rows.iter().map(|(_, y, w)| w * y).sum::<f64>() / sw;
    let sxx: f64 = rows.iter().map(|(x, _, w)| w * (x - mx).powi(2)).sum();
    let sxy: f64 = rows.iter().map(|(x, y, w)| w * (x - mx) * (y - my)).sum();

    if n >= 2 && sxx > 1e-12 {
        fit.slope = sxy / sxx;
        fit.intercept = my - fit.slope * mx;
    }

    let ss_res: f64 = rows
        .iter()
        .map(|(x, y, w)| w * (y - fit.predict(*x)).powi(2))
        .sum();
    let ss_tot: f64 = rows.iter().map(|(_, y, w)| w * (y - my).powi(2)).sum();
    fit.r2 = if n >= 2 && sxx > 1e-12 && ss_tot > 1e-12 {
        clamp(1.0 - ss_res / ss_tot, 0.0, 1.0)
    } else {
        0.0
    };
    fit.rmse = (ss_res / sw).sqrt();
    fit
}

pub fn brier(p: f64, y: f64) -> f64 {
    (p - y).powi(2)
}

pub fn log_loss(p: f64, y: f64) -> f64 {
    let p = clamp_prob(p);
    -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
}

/// Averaged error scores over `(prediction, actual)` pairs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LossMetrics {
    pub brier: f64,
    pub log_loss: f64,
    pub mae: f64,
    pub n: usize,
}

impl LossMetrics {
    pub fn score<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let mut out = LossMetrics::default();
        for (p, y) in pairs {
            if !p.is_finite() || !y.is_finite() {
                continue;
            }
            out.brier += brier(p, y);
            out.log_loss += log_loss(p, y);
            out.mae += (p - y).abs();
            out.n += 1;
        }
        if out.n > 0 {
            let n = out.n as f64;
            out.brier /= n;
            out.log_loss /= n;
            out.mae /= n;
        }
        out
    }
}

/// Weighted mean and variance; `None` when no weight survives.
pub fn weighted_mean_var(values: &[f64], weights: &[f64]) -> Option<(f64, f64)> {
    let sw: f64 = weights.iter().copied().filter(|w| usable_weight(*w)).sum();
    if sw <= 0.0 {
        return None;
    }
    let mean = values
        .iter()
        .zip(weights)
        .filter(|(_, w)| usable_weight(**w))
        .map(|(v, w)| v * w)
        .sum::<f64>()
        / sw;
    let var = values
        .iter()
        .zip(weights)
        .filter(|(_, w)| usable_weight(**w))
        .map(|(v, w)| w * (v - mean).powi(2))
        .sum::<f64>()
        / sw;
    Some((mean, var))
}
