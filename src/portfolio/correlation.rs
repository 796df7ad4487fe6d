//! Pairwise correlation between subsets, from shared legs and shared entities.

use crate::config::PortfolioSettings;

use super::combos::{ComboScore, ScoredLeg};

fn legs_share_entity(a: &[usize], b: &[usize], legs: &[ScoredLeg]) -> usize {
    a.iter()
        .filter_map(|i| legs.get(*i))
        .map(|la| {
            b.iter()
                .filter_map(|j| legs.get(*j))
                .filter(|lb| la.shares_entity(lb))
                .count()
        })
        .sum()
}

/// Correlation proxy between two subsets.
///
/// Shared legs contribute a blend of the overlap ratio (shared / smaller size)
/// and the Jaccard ratio (shared / union). Distinct legs that involve the same
/// entity add a smaller term. The result never falls below the baseline.
pub fn pair_correlation(
    a: &ComboScore,
    b: &ComboScore,
    legs: &[ScoredLeg],
    settings: &PortfolioSettings,
) -> f64 {
    if a.legs == b.legs {
        return 1.0;
    }
    let baseline = settings.baseline_correlation.clamp(0.0, 1.0);
    let ceiling = settings.max_pair_correlation.clamp(baseline, 1.0);

    let shared = a.legs.iter().filter(|i| b.contains(**i)).count();
    let smaller = a.legs.len().min(b.legs.len());
    let union = a.legs.len() + b.legs.len() - shared;
    let leg_term = if shared == 0 || smaller == 0 || union == 0 {
        0.0
    } else {
        let overlap = shared as f64 / smaller as f64;
        let jaccard = shared as f64 / union as f64;
        settings.overlap_share * overlap + (1.0 - settings.overlap_share) * jaccard
    };

    let only_a: Vec<usize> = a.legs.iter().copied().filter(|i| !b.contains(*i)).collect();
    let only_b: Vec<usize> = b.legs.iter().copied().filter(|i| !a.contains(*i)).collect();
    let entity_term = if only_a.is_empty() || only_b.is_empty() {
        0.0
    } else {
        let linked = legs_share_entity(&only_a, &only_b, legs);
        settings.entity_correlation * linked as f64 / (only_a.len() * only_b.len()) as f64
    };

    (baseline + (1.0 - baseline) * leg_term + entity_term).clamp(baseline, ceiling)
}

pub fn correlation_matrix(
    combos: &[ComboScore],
    legs: &[ScoredLeg],
    settings: &PortfolioSettings,
) -> Vec<Vec<f64>> {
    let n = combos.len();
    let mut m = vec![vec![0.0; n]; n];
    for i in 0..n {
        m[i][i] = 1.0;
        for j in (i + 1)..n {
            let rho = pair_correlation(&combos[i], &combos[j], legs, settings);
            m[i][j] = rho;
            m[j][i] = rho;
        }
    }
    m
}

/// `C_ij = ρ_ij · σ_i · σ_j`
pub fn covariance_matrix(combos: &[ComboScore], correlation: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let sd: Vec<f64> = combos.iter().map(|c| c.variance.max(0.0).sqrt()).collect();
    correlation
        .iter()
        .enumerate()
        .map(|(i, row)| {
            row.iter()
                .enumerate()
                .map(|(j, rho)| rho * sd[i] * sd[j])
                .collect()
        })
        .collect()
}
