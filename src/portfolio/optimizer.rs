//! Mean-variance weights over the subset pool.
//!
//! Maximises `α·wᵀμ − (1−α)·wᵀCw − λ·Σw²` over the capped simplex
//! `{w : Σw = 1, 0 ≤ w_i ≤ cap}` by projected gradient ascent from equal
//! weights. Deterministic: no randomness, fixed iteration count.

use crate::config::PortfolioSettings;

const BISECTION_STEPS: usize = 100;

/// Per-subset weight cap for risk preference `alpha`. Never below `1/n`,
/// otherwise the simplex would be empty.
pub fn weight_cap(alpha: f64, n: usize, settings: &PortfolioSettings) -> f64 {
    if n == 0 {
        return 1.0;
    }
    let floor = 1.0 / n as f64;
    (settings.weight_cap_base + settings.weight_cap_span * alpha.clamp(0.0, 1.0))
        .min(1.0)
        .max(floor)
}

/// Euclidean projection of `v` onto `{w : Σw = 1, 0 ≤ w_i ≤ cap}`.
///
/// Finds the shift `τ` with `Σ clamp(v_i − τ, 0, cap) = 1` by bisection.
pub fn project_capped_simplex(v: &[f64], cap: f64) -> Vec<f64> {
    let n = v.len();
    if n == 0 {
        return Vec::new();
    }
    let cap = cap.max(1.0 / n as f64);
    let clean: Vec<f64> = v.iter().map(|x| if x.is_finite() { *x } else { 0.0 }).collect();
    let total = |tau: f64| -> f64 { clean.iter().map(|x| (x - tau).clamp(0.0, cap)).sum() };

    let max = clean.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let min = clean.iter().cloned().fold(f64::INFINITY, f64::min);
    // total(lo) = n·cap ≥ 1, total(hi) = 0
    let mut lo = min - cap;
    let mut hi = max;
    for _ in 0..BISECTION_STEPS {
        let mid = 0.5 * (lo + hi);
        if total(mid) > 1.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    let tau = 0.5 * (lo + hi);
    clean.iter().map(|x| (x - tau).clamp(0.0, cap)).collect()
}

fn gradient(w: &[f64], mu: &[f64], cov: &[Vec<f64>], alpha: f64, lambda: f64) -> Vec<f64> {
    (0..w.len())
        .map(|i| {
            let cw: f64 = cov[i].iter().zip(w).map(|(c, wj)| c * wj).sum();
            alpha * mu[i] - 2.0 * (1.0 - alpha) * cw - 2.0 * lambda * w[i]
        })
        .collect()
}

pub fn objective(w: &[f64], mu: &[f64], cov: &[Vec<f64>], alpha: f64, lambda: f64) -> f64 {
    let ret: f64 = w.iter().zip(mu).map(|(a, b)| a * b).sum();
    let mut risk = 0.0;
    for (i, wi) in w.iter().enumerate() {
        for (j, wj) in w.iter().enumerate() {
            risk += wi * cov[i][j] * wj;
        }
    }
    let concentration: f64 = w.iter().map(|x| x * x).sum();
    alpha * ret - (1.0 - alpha) * risk - lambda * concentration
}

/// Optimal weights for expected values `mu` and covariance `cov`.
pub fn optimize_weights(
    mu: &[f64],
    cov: &[Vec<f64>],
    alpha: f64,
    settings: &PortfolioSettings,
) -> Vec<f64> {
    let n = mu.len();
    if n == 0 {
        return Vec::new();
    }
    let alpha = alpha.clamp(0.0, 1.0);
    let cap = weight_cap(alpha, n, settings);
    let lambda = settings.concentration_penalty.max(0.0);
    // keep the step stable when variances are large
    let scale = cov
        .iter()
        .enumerate()
        .map(|(i, row)| row.get(i).copied().unwrap_or(0.0))
        .fold(1.0f64, f64::max);
    let step = settings.step_size / scale;

    let mut w = project_capped_simplex(&vec![1.0 / n as f64; n], cap);
    let mut best = w.clone();
    let mut best_value = objective(&w, mu, cov, alpha, lambda);
    for _ in 0..settings.iterations {
        let g = gradient(&w, mu, cov, alpha, lambda);
        let moved: Vec<f64> = w.iter().zip(&g).map(|(wi, gi)| wi + step * gi).collect();
        w = project_capped_simplex(&moved, cap);
        let value = objective(&w, mu, cov, alpha, lambda);
        if value > best_value {
            best_value = value;
            best = w.clone();
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn diag(vars: &[f64]) -> Vec<Vec<f64>> {
        (0..vars.len())
            .map(|i| (0..vars.len()).map(|j| if i == j { vars[i] } else { 0.0 }).collect())
            .collect()
    }

    #[test]
    fn projection_lands_on_capped_simplex() {
        let w = project_capped_simplex(&[3.0, -1.0, 0.2, 0.5], 0.5);
        assert_relative_eq!(w.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
        assert!(w.iter().all(|x| (0.0..=0.5 + 1e-12).contains(x)));
        assert_relative_eq!(w[0], 0.5, epsilon = 1e-9);
        assert_relative_eq!(w[1], 0.0);
    }

    #[test]
    fn projection_with_tight_cap_is_uniform() {
        let w = project_capped_simplex(&[9.0, 0.0, -4.0], 1.0 / 3.0);
        for x in w {
            assert_relative_eq!(x, 1.0 / 3.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn cap_grows_with_risk_preference() {
        let s = PortfolioSettings::default();
        assert_relative_eq!(weight_cap(0.0, 10, &s), 0.35);
        assert_relative_eq!(weight_cap(1.0, 10, &s), 0.85);
        assert_relative_eq!(weight_cap(0.0, 2, &s), 0.5);
        assert_relative_eq!(weight_cap(1.0, 1, &s), 1.0);
    }

    #[test]
    fn weights_sum_to_one_and_respect_cap() {
        let s = PortfolioSettings::default();
        let mu = [0.2, 0.05, -0.1, 0.4, 0.0];
        let cov = diag(&[0.96, 0.5, 2.0, 3.0, 0.25]);
        for alpha in [0.0, 0.3, 0.5, 0.9, 1.0] {
            let w = optimize_weights(&mu, &cov, alpha, &s);
            assert_relative_eq!(w.iter().sum::<f64>(), 1.0, epsilon = 1e-6);
            let cap = weight_cap(alpha, mu.len(), &s);
            assert!(w.iter().all(|x| *x >= 0.0 && *x <= cap + 1e-9));
        }
    }

    #[test]
    fn risk_seeking_favours_higher_ev() {
        let s = PortfolioSettings::default();
        let mu = [0.05, 0.3];
        let cov = diag(&[0.5, 0.5]);
        let w = optimize_weights(&mu, &cov, 1.0, &s);
        assert!(w[1] > w[0]);
    }

    #[test]
    fn risk_averse_favours_lower_variance() {
        let s = PortfolioSettings::default();
        let mu = [0.1, 0.1];
        let cov = diag(&[0.2, 2.0]);
        let w = optimize_weights(&mu, &cov, 0.0, &s);
        assert!(w[0] > w[1]);
    }

    #[test]
    fn optimizer_never_worse_than_start() {
        let s = PortfolioSettings::default();
        let mu = [0.1, -0.2, 0.3];
        let cov = vec![
            vec![1.0, 0.4, 0.1],
            vec![0.4, 2.0, 0.2],
            vec![0.1, 0.2, 0.8],
        ];
        let start = vec![1.0 / 3.0; 3];
        let w = optimize_weights(&mu, &cov, 0.5, &s);
        assert!(objective(&w, &mu, &cov, 0.5, s.concentration_penalty)
            >= objective(&start, &mu, &cov, 0.5, s.concentration_penalty) - 1e-12);
    }

    #[test]
    fn single_subset_takes_everything() {
        let s = PortfolioSettings::default();
        let w = optimize_weights(&[0.2], &diag(&[0.96]), 0.5, &s);
        assert_relative_eq!(w[0], 1.0, epsilon = 1e-9);
    }
}
