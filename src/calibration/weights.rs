use crate::config::CalibrationSettings;

/// Recency tier weight for a sample `rank` positions from the newest (0 = newest).
pub fn recency_weight(rank: usize, total: usize, settings: &CalibrationSettings) -> f64 {
    let divisor = settings.recency_unit_divisor.max(1);
    let unit = total.div_ceil(divisor).max(1);
    let top = unit * settings.recency_top_multiple;
    let mid = top + unit * settings.recency_mid_multiple;
    if rank < top {
        settings.recency_top_weight
    } else if rank < mid {
        settings.recency_mid_weight
    } else {
        settings.recency_base_weight
    }
}

/// Up-weights clean (low-noise) samples, down-weights noisy ones.
pub fn rep_direction_weight(noise: f64, settings: &CalibrationSettings) -> f64 {
    let noise = noise.clamp(0.0, 1.0);
    (1.0 + settings.rep_direction_strength * (1.0 - 2.0 * noise)).max(0.05)
}

/// Weights for samples given in chronological order (oldest first).
pub fn sample_weights(noises: &[f64], settings: &CalibrationSettings) -> Vec<f64> {
    let total = noises.len();
    noises
        .iter()
        .enumerate()
        .map(|(i, noise)| {
            let rank = total - 1 - i;
            recency_weight(rank, total, settings) * rep_direction_weight(*noise, settings)
        })
        .collect()
}
