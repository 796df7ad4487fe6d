use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::backtest::{backtest_kelly_divisors_by_mode, BacktestReport};
use crate::cache::{run_blocking, EngineCache};
use crate::calibration::CalibrationContext;
use crate::error::EngineError;
use crate::history::{Candidate, HistoricalBet};
use crate::portfolio::{generate_recommendations, QualityFilter, RecommendationReport, StrategyMode};

#[derive(Clone)]
pub struct AppState {
    pub cache: EngineCache,
    /// Salt used when a backtest request does not name one
    pub seed_salt: String,
}

/// Build the Axum router for the engine API.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/calibration", get(calibration_handler))
        .route("/api/backtest", post(backtest_handler))
        .route("/api/recommendations", post(recommendations_handler))
        .route("/api/history", put(history_handler))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

fn engine_error(e: EngineError) -> (StatusCode, String) {
    let status = match e {
        EngineError::Config(_) => StatusCode::BAD_REQUEST,
        EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        EngineError::InsufficientSamples { .. }
        | EngineError::NoQualifyingCombo { .. }
        | EngineError::DegenerateInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
    };
    (status, e.to_string())
}

/// GET /api/calibration
pub async fn calibration_handler(
    State(state): State<Arc<AppState>>,
) -> ApiResult<CalibrationContext> {
    let ctx = state.cache.calibration().await.map_err(engine_error)?;
    Ok(Json(ctx.as_ref().clone()))
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BacktestRequest {
    pub divisors: Vec<f64>,
    pub seed_salt: Option<String>,
    pub by_mode: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktestResponse {
    pub revision: u64,
    pub overall: BacktestReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub by_mode: Option<BTreeMap<String, BacktestReport>>,
}

/// POST /api/backtest
pub async fn backtest_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BacktestRequest>,
) -> ApiResult<BacktestResponse> {
    if req.divisors.iter().any(|d| !d.is_finite() || *d <= 0.0) {
        return Err((
            StatusCode::BAD_REQUEST,
            "every Kelly divisor must be positive".to_string(),
        ));
    }
    let salt = req.seed_salt.unwrap_or_else(|| state.seed_salt.clone());
    let (snapshot, overall) = state
        .cache
        .backtest(&req.divisors, &salt)
        .await
        .map_err(engine_error)?;
    let revision = snapshot.revision;
    let by_mode = if req.by_mode {
        let config = state.cache.config();
        let divisors = req.divisors;
        let report = run_blocking(move || {
            backtest_kelly_divisors_by_mode(
                &snapshot.history,
                &config,
                &snapshot.calibration,
                &divisors,
                &salt,
            )
        })
        .await
        .map_err(engine_error)?;
        Some(report)
    } else {
        None
    };
    Ok(Json(BacktestResponse {
        revision,
        overall: overall.as_ref().clone(),
        by_mode,
    }))
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecommendationRequest {
    pub candidates: Vec<Candidate>,
    #[serde(default = "default_risk_preference")]
    pub risk_preference: f64,
    #[serde(default)]
    pub risk_cap: Option<f64>,
    #[serde(default)]
    pub mode: StrategyMode,
    #[serde(default)]
    pub filter: QualityFilter,
}

fn default_risk_preference() -> f64 {
    0.5
}

/// POST /api/recommendations
pub async fn recommendations_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RecommendationRequest>,
) -> ApiResult<RecommendationReport> {
    let config = state.cache.config();
    let ctx = state.cache.calibration().await.map_err(engine_error)?;
    let risk_cap = req.risk_cap.unwrap_or_else(|| config.default_risk_cap());
    run_blocking(move || {
        generate_recommendations(
            &req.candidates,
            req.risk_preference,
            risk_cap,
            &config,
            &ctx,
            &req.filter,
            req.mode,
        )
    })
    .await
    .and_then(|report| report)
    .map(Json)
    .map_err(engine_error)
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryResponse {
    pub revision: u64,
    pub bets: usize,
}

/// PUT /api/history
pub async fn history_handler(
    State(state): State<Arc<AppState>>,
    Json(history): Json<Vec<HistoricalBet>>,
) -> ApiResult<HistoryResponse> {
    let bets = history.len();
    let revision = state.cache.replace_history(history).await;
    info!("History replaced: {} bets, revision {}", bets, revision);
    Ok(Json(HistoryResponse { revision, bets }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::history::fixtures::synthetic_history;
    use crate::history::EntityAliases;
    use crate::portfolio::combos::fixtures::candidate;

    fn state(n: usize) -> Arc<AppState> {
        let mut cfg = EngineConfig::default();
        cfg.backtest.target_runs = 200;
        cfg.backtest.operation_budget = 20_000;
        cfg.backtest.min_runs = 50;
        Arc::new(AppState {
            cache: EngineCache::new(cfg, EntityAliases::new(), synthetic_history(n, 1.0)),
            seed_salt: "test".into(),
        })
    }

    #[tokio::test]
    async fn test_recommendations_endpoint() {
        let req: RecommendationRequest = serde_json::from_value(serde_json::json!({
            "candidates": [
                {"id": "a", "home_entity": "Arsenal", "away_entity": "Chelsea", "confidence": 0.6, "odds": 2.0}
            ]
        }))
        .unwrap();
        assert_eq!(req.mode, StrategyMode::ManualCoverage);
        let Json(report) = recommendations_handler(State(state(10)), Json(req)).await.unwrap();
        assert_eq!(report.allocations.len(), 1);
        assert!(report.total_cash <= 200.0);
    }

    #[tokio::test]
    async fn test_strict_failure_maps_to_422() {
        let req = RecommendationRequest {
            candidates: vec![candidate("a", "X", "Y", 0.6, 2.0)],
            risk_preference: 0.5,
            risk_cap: Some(100.0),
            mode: StrategyMode::ThresholdStrict,
            filter: QualityFilter {
                min_win_rate: Some(0.99),
                ..QualityFilter::default()
            },
        };
        let err = recommendations_handler(State(state(10)), Json(req))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_history_put_bumps_revision() {
        let s = state(30);
        let Json(before) = backtest_handler(State(s.clone()), Json(BacktestRequest::default()))
            .await
            .unwrap();
        assert_eq!(before.revision, 0);
        let Json(resp) = history_handler(State(s.clone()), Json(synthetic_history(50, 1.0)))
            .await
            .unwrap();
        assert_eq!(resp.revision, 1);
        let Json(after) = backtest_handler(State(s), Json(BacktestRequest::default()))
            .await
            .unwrap();
        assert_eq!(after.revision, 1);
        assert_eq!(after.overall.sample_count, 50);
    }

    #[tokio::test]
    async fn test_backtest_reports_one_revision() {
        let s = state(40);
        history_handler(State(s.clone()), Json(synthetic_history(70, 1.0)))
            .await
            .unwrap();
        let req = BacktestRequest {
            divisors: vec![2.0, 4.0],
            by_mode: true,
            ..BacktestRequest::default()
        };
        let Json(resp) = backtest_handler(State(s), Json(req)).await.unwrap();
        assert_eq!(resp.revision, 1);
        assert_eq!(resp.overall.sample_count, 70);
        assert!(resp.by_mode.is_some());
    }

    #[tokio::test]
    async fn test_backtest_rejects_bad_divisor() {
        let req = BacktestRequest {
            divisors: vec![2.0, -1.0],
            ..BacktestRequest::default()
        };
        let err = backtest_handler(State(state(20)), Json(req)).await.unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }
}
