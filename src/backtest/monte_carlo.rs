//! Bootstrap Monte Carlo over historical bet outcomes.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::BacktestSettings;
use crate::signal::SeededRng;

/// One historical bet re-sized for simulation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimRow {
    pub stake: f64,
    /// Profit per unit staked: `odds − 1` on a win, `−1` on a loss
    pub unit_return: f64,
}

/// Averages over all bootstrap runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationSummary {
    pub runs: usize,
    pub samples: usize,
    pub roi: f64,
    /// Peak-to-trough drawdown as a fraction of the peak balance
    pub drawdown: f64,
    pub sharpe: f64,
    pub hit_rate: f64,
}

/// Runs for `samples` rows: the target, scaled down to fit the operation
/// budget, never below the floor.
pub fn run_count(samples: usize, settings: &BacktestSettings) -> usize {
    if samples == 0 {
        return 0;
    }
    (settings.operation_budget / samples)
        .min(settings.target_runs)
        .max(settings.min_runs)
}

#[derive(Default)]
struct RunStats {
    roi: f64,
    drawdown: f64,
    sharpe: f64,
    hit_rate: f64,
}

fn single_run(rows: &[SimRow], capital: f64, rng: &mut SeededRng) -> RunStats {
    let n = rows.len();
    let mut balance = capital;
    let mut peak = capital;
    let mut max_drawdown = 0.0f64;
    let mut staked = 0.0;
    let mut profit = 0.0;
    let mut bets = 0usize;
    let mut wins = 0usize;
    let mut sum_r = 0.0;
    let mut sum_r2 = 0.0;

    for _ in 0..n {
        let row = rows[rng.gen_range(0..n)];
        let pnl = row.stake * row.unit_return;
        if row.stake > 0.0 {
            bets += 1;
            if row.unit_return > 0.0 {
                wins += 1;
            }
        }
        staked += row.stake;
        profit += pnl;
        balance += pnl;
        if balance > peak {
            peak = balance;
        }
        if peak > 0.0 {
            max_drawdown = max_drawdown.max((peak - balance) / peak);
        }
        let r = pnl / capital;
        sum_r += r;
        sum_r2 += r * r;
    }

    let nf = n as f64;
    let mean = sum_r / nf;
    let sharpe = if n > 1 {
        let var = ((sum_r2 - nf * mean * mean) / (nf - 1.0)).max(0.0);
        let sd = var.sqrt();
        if sd > 1e-12 {
            mean / sd
        } else {
            0.0
        }
    } else {
        0.0
    };

    RunStats {
        roi: if staked > 0.0 { profit / staked } else { 0.0 },
        drawdown: max_drawdown.min(1.0),
        sharpe,
        hit_rate: if bets > 0 {
            wins as f64 / bets as f64
        } else {
            0.0
        },
    }
}

/// Resample `rows` with replacement `runs` times and average the per-run metrics.
pub fn simulate(rows: &[SimRow], capital: f64, runs: usize, seed: u32) -> SimulationSummary {
    if rows.is_empty() || runs == 0 || !(capital.is_finite() && capital > 0.0) {
        return SimulationSummary {
            samples: rows.len(),
            ..SimulationSummary::default()
        };
    }
    let mut rng = SeededRng::new(seed);
    let mut total = RunStats::default();
    for _ in 0..runs {
        let run = single_run(rows, capital, &mut rng);
        total.roi += run.roi;
        total.drawdown += run.drawdown;
        total.sharpe += run.sharpe;
        total.hit_rate += run.hit_rate;
    }
    let r = runs as f64;
    SimulationSummary {
        runs,
        samples: rows.len(),
        roi: total.roi / r,
        drawdown: total.drawdown / r,
        sharpe: total.sharpe / r,
        hit_rate: total.hit_rate / r,
    }
}
