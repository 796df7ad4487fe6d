//! Turning continuous weights into whole cash units, and layering the result.

use serde::{Deserialize, Serialize};

/// Rank bands of the final allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Primary,
    Secondary,
    Tail,
}

impl Layer {
    /// Rank 1 is primary, ranks 2-3 secondary, everything after is tail.
    pub fn for_rank(rank: usize) -> Self {
        match rank {
            0 | 1 => Layer::Primary,
            2 | 3 => Layer::Secondary,
            _ => Layer::Tail,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSummary {
    pub layer: Layer,
    pub count: usize,
    pub cash: f64,
    /// Σ cash · expected value per unit
    pub expected_profit: f64,
    /// Cash-weighted mean Sharpe ratio
    pub sharpe: f64,
}

/// Split `risk_cap` into multiples of `unit` proportionally to `weights`
/// using largest-remainder rounding. The total never exceeds `risk_cap`.
pub fn discretize(weights: &[f64], risk_cap: f64, unit: f64) -> Vec<f64> {
    let n = weights.len();
    if n == 0 || !(unit.is_finite() && unit > 0.0) || !(risk_cap.is_finite() && risk_cap > 0.0) {
        return vec![0.0; n];
    }
    let units = (risk_cap / unit + 1e-9).floor() as usize;
    let total: f64 = weights
        .iter()
        .filter(|w| w.is_finite() && **w > 0.0)
        .sum();
    if units == 0 || total <= 0.0 {
        return vec![0.0; n];
    }

    let quotas: Vec<f64> = weights
        .iter()
        .map(|w| {
            if w.is_finite() && *w > 0.0 {
                w / total * units as f64
            } else {
                0.0
            }
        })
        .collect();
    let mut assigned: Vec<usize> = quotas.iter().map(|q| q.floor() as usize).collect();
    let remainder = units.saturating_sub(assigned.iter().sum());

    let mut order: Vec<usize> = (0..n).filter(|i| quotas[*i] > 0.0).collect();
    order.sort_by(|a, b| {
        let fa = quotas[*a] - quotas[*a].floor();
        let fb = quotas[*b] - quotas[*b].floor();
        fb.partial_cmp(&fa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(b))
    });
    for i in order.into_iter().take(remainder) {
        assigned[i] += 1;
    }
    assigned.into_iter().map(|u| u as f64 * unit).collect()
}

/// Per-layer totals for allocations given as `(rank, cash, expected_value, sharpe)`.
pub fn summarize_layers<I>(rows: I) -> Vec<LayerSummary>
where
    I: IntoIterator<Item = (usize, f64, f64, f64)>,
{
    let mut summaries: Vec<LayerSummary> = [Layer::Primary, Layer::Secondary, Layer::Tail]
        .into_iter()
        .map(|layer| LayerSummary {
            layer,
            count: 0,
            cash: 0.0,
            expected_profit: 0.0,
            sharpe: 0.0,
        })
        .collect();
    for (rank, cash, ev, sharpe) in rows {
        let idx = match Layer::for_rank(rank) {
            Layer::Primary => 0,
            Layer::Secondary => 1,
            Layer::Tail => 2,
        };
        let s = &mut summaries[idx];
        s.count += 1;
        s.cash += cash;
        s.expected_profit += cash * ev;
        s.sharpe += cash * sharpe;
    }
    summaries.retain(|s| s.count > 0);
    for s in summaries.iter_mut() {
        s.sharpe = if s.cash > 0.0 { s.sharpe / s.cash } else { 0.0 };
    }
    summaries
}
