//! Fractional Kelly sizing on decimal odds.
//!
//! Full Kelly for decimal odds `o` and win probability `p`:
//!   f* = (p·o − 1) / (o − 1)
//! which is the textbook `(b·p − q) / b` with net odds `b = o − 1`.
//!
//! The engine stakes `capital · f* / divisor`, so a divisor of 4 is
//! "quarter Kelly". Larger divisors trade growth for lower variance.

/// Full-Kelly fraction of capital. `0.0` when there is no edge or the odds are unusable.
pub fn kelly_fraction(win_prob: f64, odds: f64) -> f64 {
    if !win_prob.is_finite() || !odds.is_finite() || odds <= 1.0 {
        return 0.0;
    }
    let p = win_prob.clamp(0.0, 1.0);
    let f = (p * odds - 1.0) / (odds - 1.0);
    if f <= 0.0 {
        return 0.0; // no edge
    }
    f.min(1.0)
}

/// Cash stake for one bet: `capital · f* / divisor`, floored at 0 and
/// capped at `risk_cap`.
pub fn kelly_stake(win_prob: f64, odds: f64, capital: f64, divisor: f64, risk_cap: f64) -> f64 {
    if !capital.is_finite() || capital <= 0.0 || !divisor.is_finite() || divisor <= 0.0 {
        return 0.0;
    }
    let cap = if risk_cap.is_finite() { risk_cap.max(0.0) } else { 0.0 };
    (capital * kelly_fraction(win_prob, odds) / divisor).clamp(0.0, cap)
}

/// Expected profit per unit staked: `p·o − 1`.
///
/// Positive edge means the odds underprice the estimated probability.
pub fn edge(win_prob: f64, odds: f64) -> f64 {
    if !odds.is_finite() || odds <= 1.0 {
        return 0.0;
    }
    win_prob * odds - 1.0
}
