//! Weighted isotonic regression (pool adjacent violators).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IsotonicNode {
    pub x: f64,
    pub y: f64,
    pub weight: f64,
}

/// Monotone non-decreasing map from confidence to actual, interpolated
/// linearly between pooled block centres.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IsotonicModel {
    pub nodes: Vec<IsotonicNode>,
}

struct Block {
    sum_wx: f64,
    sum_wy: f64,
    weight: f64,
}

impl Block {
    fn mean_y(&self) -> f64 {
        self.sum_wy / self.weight
    }
}

impl IsotonicModel {
    pub fn fit(xs: &[f64], ys: &[f64], weights: &[f64]) -> Self {
        let mut points: Vec<(f64, f64, f64)> = xs
            .iter()
            .zip(ys)
            .zip(weights)
            .filter(|((x, y), w)| x.is_finite() && y.is_finite() && w.is_finite() && **w > 0.0)
            .map(|((x, y), w)| (*x, *y, *w))
            .collect();
        points.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut blocks: Vec<Block> = Vec::with_capacity(points.len());
        for (x, y, w) in points {
            blocks.push(Block {
                sum_wx: w * x,
                sum_wy: w * y,
                weight: w,
            });
            while let [.., prev, last] = blocks.as_slice() {
                if prev.mean_y() <= last.mean_y() {
                    break;
                }
                let Some(tail) = blocks.pop() else { break };
                let Some(head) = blocks.last_mut() else { break };
                head.sum_wx += tail.sum_wx;
                head.sum_wy += tail.sum_wy;
                head.weight += tail.weight;
            }
        }

        IsotonicModel {
            nodes: blocks
                .into_iter()
                .map(|b| IsotonicNode {
                    x: b.sum_wx / b.weight,
                    y: b.mean_y(),
                    weight: b.weight,
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Interpolated value at `x`; identity when the model is empty.
    pub fn predict(&self, x: f64) -> f64 {
        let (Some(first), Some(last)) = (self.nodes.first(), self.nodes.last()) else {
            return x;
        };
        if x <= first.x {
            return first.y;
        }
        if x >= last.x {
            return last.y;
        }
        let idx = self.nodes.partition_point(|n| n.x <= x);
        let lo = self.nodes[idx - 1];
        let hi = self.nodes[idx];
        let dx = hi.x - lo.x;
        if dx <= 1e-12 {
            return hi.y;
        }
        lo.y + (hi.y - lo.y) * (x - lo.x) / dx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn pools_violators_into_monotone_blocks() {
        let xs = [0.1, 0.2, 0.3, 0.4];
        let ys = [0.2, 0.6, 0.4, 0.9];
        let model = IsotonicModel::fit(&xs, &ys, &[1.0; 4]);
        assert_eq!(model.nodes.len(), 3);
        assert_relative_eq!(model.nodes[1].y, 0.5, epsilon = 1e-12);
        assert_relative_eq!(model.nodes[1].x, 0.25, epsilon = 1e-12);
        for pair in model.nodes.windows(2) {
            assert!(pair[0].y <= pair[1].y);
        }
    }

    #[test]
    fn predict_interpolates_and_clamps_ends() {
        let xs = [0.2, 0.8];
        let ys = [0.3, 0.7];
        let model = IsotonicModel::fit(&xs, &ys, &[1.0, 1.0]);
        assert_relative_eq!(model.predict(0.5), 0.5, epsilon = 1e-12);
        assert_relative_eq!(model.predict(0.0), 0.3);
        assert_relative_eq!(model.predict(1.0), 0.7);
    }

    #[test]
    fn empty_model_is_identity() {
        let model = IsotonicModel::fit(&[], &[], &[]);
        assert!(model.is_empty());
        assert_relative_eq!(model.predict(0.42), 0.42);
    }

    #[test]
    fn heavier_weight_dominates_pooled_value() {
        let model = IsotonicModel::fit(&[0.4, 0.5], &[0.9, 0.1], &[3.0, 1.0]);
        assert_eq!(model.nodes.len(), 1);
        assert_relative_eq!(model.nodes[0].y, 0.7, epsilon = 1e-12);
    }
}
