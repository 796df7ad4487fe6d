//! Calibration pipeline: turns settled (confidence, outcome) history into an
//! immutable [`CalibrationContext`] whose [`CalibrationContext::calibrate`]
//! maps a raw confidence to an empirically corrected probability.
//!
//! Layers, applied in order:
//! 1. recency × REP-direction weighted linear fit, blended with a ratio estimate
//!    and an isotonic fit, then shrunk toward the raw confidence by reliability
//! 2. per-entity residual shift
//! 3. per-odds-bucket residual shift
//! 4. market blend with the odds-implied probability

pub mod isotonic;
pub mod residual;
pub mod walk_forward;
pub mod weights;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{CalibrationSettings, EngineConfig};
use crate::error::{EngineError, EngineResult};
use crate::history::{collect_samples, EntityAliases, HistoricalBet, LegSample};
use crate::signal::{
    clamp, clamp_prob, implied_probability, weighted_linear_regression, weighted_pearson,
    LossMetrics, RegressionFit,
};

use isotonic::IsotonicModel;
use residual::{EntityShifts, MatchAdjustment, OddsBuckets};
use walk_forward::{walk_forward, WalkForwardReport};
use weights::sample_weights;

/// What is known about the leg being calibrated besides its confidence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LegContext {
    pub home: Option<String>,
    pub away: Option<String>,
    pub odds: Option<f64>,
}

impl LegContext {
    pub fn new(home: &str, away: &str, odds: Option<f64>) -> Self {
        LegContext {
            home: Some(home.to_string()),
            away: Some(away.to_string()),
            odds,
        }
    }
}

/// One point of the confidence → actual scatter, with the fitted value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScatterPoint {
    pub confidence: f64,
    pub actual: f64,
    pub calibrated: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationDiagnostics {
    /// In-sample loss of the raw confidence
    pub raw_metrics: LossMetrics,
    /// In-sample loss of the full calibration
    pub calibrated_metrics: LossMetrics,
    /// Weighted correlation between raw confidence and outcome
    pub confidence_correlation: f64,
    pub scatter: Vec<ScatterPoint>,
    pub walk_forward: WalkForwardReport,
}

/// Frozen calibration state. Rebuilt from scratch whenever history changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationContext {
    pub ready: bool,
    pub sample_count: usize,
    pub required_samples: usize,
    pub regression: RegressionFit,
    /// Weighted mean(actual) / mean(confidence), clamped
    pub ratio: f64,
    pub linear_share: f64,
    pub reliability: f64,
    pub isotonic: IsotonicModel,
    pub isotonic_blend: f64,
    pub entities: EntityShifts,
    pub odds_buckets: OddsBuckets,
    pub base_market_weight: f64,
    pub max_market_weight: f64,
    /// Learned preference for the market price over the internal model, in [0.2, 0.8]
    pub market_lean: f64,
    pub diagnostics: CalibrationDiagnostics,
    #[serde(skip)]
    aliases: EntityAliases,
}

impl CalibrationContext {
    /// Identity calibration used below the sample threshold.
    pub fn not_ready(sample_count: usize, config: &EngineConfig, aliases: &EntityAliases) -> Self {
        let settings = &config.calibration;
        CalibrationContext {
            ready: false,
            sample_count,
            required_samples: settings.min_samples,
            regression: RegressionFit::identity(),
            ratio: 1.0,
            linear_share: settings.linear_share,
            reliability: 0.0,
            isotonic: IsotonicModel::default(),
            isotonic_blend: 0.0,
            entities: EntityShifts::default(),
            odds_buckets: OddsBuckets::neutral(settings.odds_bucket_edges),
            base_market_weight: config.market_weight,
            max_market_weight: settings.max_market_weight,
            market_lean: 0.5,
            diagnostics: CalibrationDiagnostics::default(),
            aliases: aliases.clone(),
        }
    }

    /// `Err(InsufficientSamples)` when the pipeline fell back to identity.
    pub fn require_ready(&self) -> EngineResult<&Self> {
        if self.ready {
            Ok(self)
        } else {
            Err(EngineError::InsufficientSamples {
                required: self.required_samples,
                available: self.sample_count,
            })
        }
    }

    /// Global calibration map, before any entity/odds/market correction.
    pub fn base_probability(&self, confidence: f64) -> f64 {
        let raw = clamp_prob(confidence);
        if !self.ready {
            return raw;
        }
        let linear = self.regression.predict(raw);
        let ratio_estimate = self.ratio * raw;
        let mix = self.linear_share * linear + (1.0 - self.linear_share) * ratio_estimate;
        let model = (1.0 - self.isotonic_blend) * mix + self.isotonic_blend * self.isotonic.predict(raw);
        clamp_prob((1.0 - self.reliability) * raw + self.reliability * model)
    }

    /// Entity name as the residual layer keys it (aliases applied).
    pub fn canonical_entity(&self, name: &str) -> String {
        self.aliases.canonical(name)
    }

    pub fn entity_adjustment(&self, home: &str, away: &str) -> MatchAdjustment {
        self.entities
            .match_adjustment(&self.aliases.canonical(home), &self.aliases.canonical(away))
    }

    /// Market weight for a leg whose entities carry `entity_reliability`.
    pub fn market_weight(&self, entity_reliability: f64) -> f64 {
        let lean_factor = 2.0 * self.market_lean;
        let deference = 0.5 + 0.5 * (1.0 - entity_reliability.clamp(0.0, 1.0));
        clamp(
            self.base_market_weight * lean_factor * deference,
            0.0,
            self.max_market_weight,
        )
    }

    /// Everything except the market blend.
    fn internal_probability(&self, confidence: f64, leg: &LegContext) -> (f64, MatchAdjustment) {
        let mut p = self.base_probability(confidence);
        let adjustment = match (&leg.home, &leg.away) {
            (Some(home), Some(away)) => self.entity_adjustment(home, away),
            _ => MatchAdjustment::default(),
        };
        p = clamp_prob(p + adjustment.shift);
        if let Some(odds) = leg.odds.filter(|o| o.is_finite() && *o > 1.0) {
            p = clamp_prob(p + self.odds_buckets.shift_for(odds));
        }
        (p, adjustment)
    }

    /// Calibrated probability for a leg. Returns the raw confidence (clamped)
    /// unchanged when the context is not ready.
    pub fn calibrate(&self, confidence: f64, leg: &LegContext) -> f64 {
        if !self.ready {
            return clamp_prob(confidence);
        }
        let (p, adjustment) = self.internal_probability(confidence, leg);
        match leg.odds.and_then(implied_probability) {
            Some(market) => {
                let w = self.market_weight(adjustment.reliability);
                clamp_prob((1.0 - w) * p + w * market)
            }
            None => p,
        }
    }
}

/// Fit the full pipeline from history, including walk-forward validation.
pub fn fit_calibration(
    history: &[HistoricalBet],
    config: &EngineConfig,
    aliases: &EntityAliases,
) -> CalibrationContext {
    let samples = collect_samples(history, aliases, config.default_odds);
    let mut context = fit_samples(&samples, config, aliases);
    if !context.ready {
        warn!(
            "Calibration not ready: {} usable samples, {} required; using raw confidence",
            context.sample_count, context.required_samples
        );
        return context;
    }
    context.diagnostics.walk_forward = walk_forward(&samples, config, aliases);
    info!(
        "Calibration fitted: samples={}, slope={:.4}, intercept={:.4}, r2={:.3}, reliability={:.3}, brier {:.4}->{:.4}, stability={:?}",
        context.sample_count,
        context.regression.slope,
        context.regression.intercept,
        context.regression.r2,
        context.reliability,
        context.diagnostics.raw_metrics.brier,
        context.diagnostics.calibrated_metrics.brier,
        context.diagnostics.walk_forward.stability,
    );
    context
}

fn sample_term(n: usize, settings: &CalibrationSettings) -> f64 {
    let min = settings.min_samples as f64;
    let full = settings.full_reliability_samples as f64;
    if full <= min {
        return 1.0;
    }
    clamp((n as f64 - min) / (full - min), 0.0, 1.0)
}

/// Fit on an already-extracted, chronological sample set (no walk-forward).
pub fn fit_samples(
    samples: &[LegSample],
    config: &EngineConfig,
    aliases: &EntityAliases,
) -> CalibrationContext {
    let settings = &config.calibration;
    let n = samples.len();
    if n < settings.min_samples {
        return CalibrationContext::not_ready(n, config, aliases);
    }

    let noises: Vec<f64> = samples.iter().map(|s| s.noise).collect();
    let weights = sample_weights(&noises, settings);
    let xs: Vec<f64> = samples.iter().map(|s| s.confidence).collect();
    let ys: Vec<f64> = samples.iter().map(|s| s.actual).collect();

    let regression = weighted_linear_regression(&xs, &ys, &weights);

    let swx: f64 = xs.iter().zip(&weights).map(|(x, w)| x * w).sum();
    let swy: f64 = ys.iter().zip(&weights).map(|(y, w)| y * w).sum();
    let ratio = if swx > 0.0 {
        clamp(swy / swx, settings.ratio_min, settings.ratio_max)
    } else {
        1.0
    };

    let count_term = sample_term(n, settings);
    let reliability =
        clamp(0.7 * count_term + 0.3 * regression.r2, 0.0, 1.0) * settings.max_reliability;

    let isotonic = IsotonicModel::fit(&xs, &ys, &weights);
    let full_blocks = settings.isotonic_full_blocks.max(1) as f64;
    let isotonic_reliability = count_term * (isotonic.nodes.len() as f64 / full_blocks).min(1.0);
    let isotonic_blend = settings.isotonic_max_blend.min(0.6) * isotonic_reliability;

    let mut context = CalibrationContext::not_ready(n, config, aliases);
    context.ready = true;
    context.regression = regression;
    context.ratio = ratio;
    context.reliability = reliability;
    context.isotonic = isotonic;
    context.isotonic_blend = isotonic_blend;

    let base: Vec<f64> = xs.iter().map(|x| context.base_probability(*x)).collect();
    context.entities = EntityShifts::fit(
        samples
            .iter()
            .zip(&base)
            .zip(&weights)
            .map(|((s, b), w)| (s.home.as_str(), s.away.as_str(), s.actual - b, *w)),
        settings,
    );

    // odds residuals are taken after the entity layer so the two do not double count
    let after_entity: Vec<f64> = samples
        .iter()
        .zip(&base)
        .map(|(s, b)| clamp_prob(b + context.entities.match_adjustment(&s.home, &s.away).shift))
        .collect();
    context.odds_buckets = OddsBuckets::fit(
        samples
            .iter()
            .zip(&after_entity)
            .zip(&weights)
            .filter_map(|((s, p), w)| s.odds.map(|o| (o, s.actual - p, *w))),
        settings,
    );

    context.market_lean = learn_market_lean(samples, &context);

    let calibrated: Vec<f64> = samples
        .iter()
        .map(|s| context.calibrate(s.confidence, &LegContext::new(&s.home, &s.away, s.odds)))
        .collect();
    context.diagnostics.raw_metrics = LossMetrics::score(samples.iter().map(|s| (s.confidence, s.actual)));
    context.diagnostics.calibrated_metrics =
        LossMetrics::score(calibrated.iter().zip(samples).map(|(p, s)| (*p, s.actual)));
    context.diagnostics.confidence_correlation = weighted_pearson(&xs, &ys, &weights);
    context.diagnostics.scatter = scatter(samples, &calibrated, settings.scatter_limit);

    debug!(
        "Calibration layers: ratio={:.3}, isotonic_nodes={}, isotonic_blend={:.3}, entities={}, market_lean={:.3}",
        context.ratio,
        context.isotonic.nodes.len(),
        context.isotonic_blend,
        context.entities.by_entity.len(),
        context.market_lean
    );
    context
}

/// Model Brier / (model Brier + market Brier) over samples with odds and a
/// known result. Higher means the market priced these legs better.
fn learn_market_lean(samples: &[LegSample], context: &CalibrationContext) -> f64 {
    let mut model = Vec::new();
    let mut market = Vec::new();
    for s in samples {
        let (Some(odds), Some(won)) = (s.odds, s.won) else {
            continue;
        };
        let Some(implied) = implied_probability(odds) else {
            continue;
        };
        let y = if won { 1.0 } else { 0.0 };
        let (p, _) = context.internal_probability(s.confidence, &LegContext::new(&s.home, &s.away, s.odds));
        model.push((p, y));
        market.push((implied, y));
    }
    if model.is_empty() {
        return 0.5;
    }
    let model_brier = LossMetrics::score(model).brier;
    let market_brier = LossMetrics::score(market).brier;
    let total = model_brier + market_brier;
    if total <= 1e-12 {
        return 0.5;
    }
    clamp(model_brier / total, 0.2, 0.8)
}

fn scatter(samples: &[LegSample], calibrated: &[f64], limit: usize) -> Vec<ScatterPoint> {
    if limit == 0 || samples.is_empty() {
        return Vec::new();
    }
    let step = samples.len().div_ceil(limit).max(1);
    samples
        .iter()
        .zip(calibrated)
        .step_by(step)
        .map(|(s, p)| ScatterPoint {
            confidence: s.confidence,
            actual: s.actual,
            calibrated: *p,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::fixtures::{leg, single_bet, synthetic_history};
    use approx::assert_relative_eq;

    #[test]
    fn empty_history_is_not_ready_and_identity() {
        let ctx = fit_calibration(&[], &EngineConfig::default(), &EntityAliases::new());
        assert!(!ctx.ready);
        assert!(ctx.require_ready().is_err());
        assert_relative_eq!(ctx.calibrate(0.6, &LegContext::default()), 0.6);
        assert_relative_eq!(
            ctx.calibrate(0.6, &LegContext::new("a", "b", Some(3.0))),
            0.6
        );
    }

    #[test]
    fn below_threshold_stays_raw() {
        let history = synthetic_history(10, 1.0);
        let ctx = fit_calibration(&history, &EngineConfig::default(), &EntityAliases::new());
        assert!(!ctx.ready);
        assert_eq!(ctx.sample_count, 10);
        assert_relative_eq!(ctx.calibrate(0.73, &LegContext::default()), 0.73);
    }

    #[test]
    fn overconfident_history_is_pulled_down() {
        let history = synthetic_history(300, 0.75);
        let ctx = fit_calibration(&history, &EngineConfig::default(), &EntityAliases::new());
        assert!(ctx.ready);
        assert!(ctx.reliability > 0.0 && ctx.reliability <= 0.9);
        let p = ctx.calibrate(0.8, &LegContext::default());
        assert!(p < 0.8, "calibrated {} should shrink overconfidence", p);
        assert!(ctx.diagnostics.calibrated_metrics.brier <= ctx.diagnostics.raw_metrics.brier);
        assert!(ctx.diagnostics.confidence_correlation > 0.0);
    }

    #[test]
    fn fit_is_pure() {
        let history = synthetic_history(120, 0.9);
        let cfg = EngineConfig::default();
        let a = fit_calibration(&history, &cfg, &EntityAliases::new());
        let b = fit_calibration(&history, &cfg, &EntityAliases::new());
        assert_eq!(a.regression, b.regression);
        assert_eq!(a.isotonic, b.isotonic);
        assert_eq!(a.entities, b.entities);
        assert_eq!(a.market_lean.to_bits(), b.market_lean.to_bits());
    }

    #[test]
    fn outputs_stay_inside_unit_interval() {
        let history = synthetic_history(200, 1.2);
        let ctx = fit_calibration(&history, &EngineConfig::default(), &EntityAliases::new());
        for i in 0..=20 {
            let c = i as f64 / 20.0;
            for odds in [None, Some(1.01), Some(1.9), Some(25.0)] {
                let p = ctx.calibrate(c, &LegContext::new("arsenal", "nobody", odds));
                assert!(p > 0.0 && p < 1.0);
            }
        }
    }

    #[test]
    fn market_blend_moves_toward_implied_price() {
        let history = synthetic_history(150, 1.0);
        let ctx = fit_calibration(&history, &EngineConfig::default(), &EntityAliases::new());
        let plain = ctx.calibrate(0.7, &LegContext::new("x", "y", None));
        let priced = ctx.calibrate(0.7, &LegContext::new("x", "y", Some(4.0)));
        assert!(priced < plain);
    }

    #[test]
    fn weak_entities_defer_more_to_market() {
        let ctx = fit_calibration(
            &synthetic_history(150, 1.0),
            &EngineConfig::default(),
            &EntityAliases::new(),
        );
        assert!(ctx.market_weight(0.0) >= ctx.market_weight(0.9));
        assert!(ctx.market_weight(0.0) <= ctx.max_market_weight);
    }

    #[test]
    fn entity_aliases_reach_the_residual_layer() {
        let mut history = synthetic_history(60, 1.0);
        // "Reds" always underperforms its confidence
        for i in 0..40u32 {
            let mut l = leg("The Reds", "Blues", 0.8, 1.3, false);
            l.quality_score = Some(0.1);
            history.push(single_bet(1000 + i, l, 10.0));
        }
        let mut aliases = EntityAliases::new();
        aliases.insert("Reds FC", "The Reds");
        let ctx = fit_calibration(&history, &EngineConfig::default(), &aliases);
        let adj = ctx.entity_adjustment("Reds FC", "Blues");
        assert!(adj.shift < 0.0);
        assert!(adj.reliability > 0.0);
    }

    #[test]
    fn chained_aliases_key_fit_and_lookup_alike() {
        let mut history = synthetic_history(60, 1.0);
        for i in 0..40u32 {
            let mut l = leg("Reds FC", "Blues", 0.8, 1.3, false);
            l.quality_score = Some(0.1);
            history.push(single_bet(1000 + i, l, 10.0));
        }
        let mut aliases = EntityAliases::new();
        aliases.insert("Reds FC", "The Reds");
        aliases.insert("The Reds", "Liverpool");
        let ctx = fit_calibration(&history, &EngineConfig::default(), &aliases);
        let by_alias = ctx.entity_adjustment("Reds FC", "Blues");
        let by_name = ctx.entity_adjustment("Liverpool", "Blues");
        assert_eq!(by_alias, by_name);
        assert!(by_alias.shift < 0.0);
        assert_eq!(ctx.canonical_entity("Reds FC"), "liverpool");
    }
}
