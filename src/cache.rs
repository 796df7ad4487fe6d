//! Derived-state cache keyed by history revision.
//!
//! Calibration and backtest results depend only on the history, the alias
//! table and the engine config. The cache owns the history; replacing it bumps
//! the revision and drops every derived result, so the next request refits.
//!
//! Fits and sweeps run on the blocking pool with no lock held. A result is
//! stored only if the revision it was computed for is still current.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::backtest::{backtest_kelly_divisors, BacktestReport};
use crate::calibration::{fit_calibration, CalibrationContext};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::history::{EntityAliases, HistoricalBet};

/// Thread-safe engine state shared by the API handlers.
#[derive(Clone)]
pub struct EngineCache {
    config: Arc<EngineConfig>,
    aliases: Arc<EntityAliases>,
    inner: Arc<RwLock<CacheInner>>,
}

struct CacheInner {
    revision: u64,
    history: Arc<Vec<HistoricalBet>>,
    calibration: Option<Arc<CalibrationContext>>,
    /// "salt|divisors" → report
    backtests: HashMap<String, Arc<BacktestReport>>,
}

impl CacheInner {
    fn invalidate(&mut self) -> u64 {
        self.revision += 1;
        self.calibration = None;
        self.backtests.clear();
        self.revision
    }
}

/// History and its calibration, both taken at the same revision.
#[derive(Clone)]
pub struct Snapshot {
    pub revision: u64,
    pub history: Arc<Vec<HistoricalBet>>,
    pub calibration: Arc<CalibrationContext>,
}

fn backtest_key(divisors: &[f64], seed_salt: &str) -> String {
    let list: Vec<String> = divisors.iter().map(|d| d.to_string()).collect();
    format!("{}|{}", seed_salt, list.join(","))
}

/// Run CPU-bound engine work on tokio's blocking pool.
pub async fn run_blocking<T, F>(work: F) -> EngineResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| EngineError::Internal(format!("engine task failed: {}", e)))
}

impl EngineCache {
    pub fn new(config: EngineConfig, aliases: EntityAliases, history: Vec<HistoricalBet>) -> Self {
        EngineCache {
            config: Arc::new(config),
            aliases: Arc::new(aliases),
            inner: Arc::new(RwLock::new(CacheInner {
                revision: 0,
                history: Arc::new(history),
                calibration: None,
                backtests: HashMap::new(),
            })),
        }
    }

    pub fn config(&self) -> Arc<EngineConfig> {
        self.config.clone()
    }

    pub async fn revision(&self) -> u64 {
        self.inner.read().await.revision
    }

    pub async fn history(&self) -> Arc<Vec<HistoricalBet>> {
        self.inner.read().await.history.clone()
    }

    /// Drop every derived result and bump the revision. Returns the new revision.
    pub async fn invalidate(&self) -> u64 {
        let revision = self.inner.write().await.invalidate();
        debug!("EngineCache: invalidated, revision {}", revision);
        revision
    }

    /// Swap in a new history and invalidate everything derived from the old one.
    pub async fn replace_history(&self, history: Vec<HistoricalBet>) -> u64 {
        let mut inner = self.inner.write().await;
        inner.history = Arc::new(history);
        inner.invalidate();
        debug!(
            "EngineCache: revision {} with {} bets",
            inner.revision,
            inner.history.len()
        );
        inner.revision
    }

    /// Current history with its calibration, fitted on first use.
    pub async fn snapshot(&self) -> EngineResult<Snapshot> {
        let (revision, history, cached) = {
            let inner = self.inner.read().await;
            (inner.revision, inner.history.clone(), inner.calibration.clone())
        };
        if let Some(calibration) = cached {
            return Ok(Snapshot {
                revision,
                history,
                calibration,
            });
        }

        let (config, aliases, bets) = (self.config.clone(), self.aliases.clone(), history.clone());
        let fitted = run_blocking(move || fit_calibration(&bets, &config, &aliases)).await?;
        let calibration = self.store_calibration(revision, Arc::new(fitted)).await;
        Ok(Snapshot {
            revision,
            history,
            calibration,
        })
    }

    /// Calibration for the current history.
    pub async fn calibration(&self) -> EngineResult<Arc<CalibrationContext>> {
        Ok(self.snapshot().await?.calibration)
    }

    /// Backtest for the current history, computed once per (divisors, salt).
    /// The returned snapshot is the data the report was computed on.
    pub async fn backtest(
        &self,
        divisors: &[f64],
        seed_salt: &str,
    ) -> EngineResult<(Snapshot, Arc<BacktestReport>)> {
        let key = backtest_key(divisors, seed_salt);
        let snapshot = self.snapshot().await?;
        {
            let inner = self.inner.read().await;
            if inner.revision == snapshot.revision {
                if let Some(report) = inner.backtests.get(&key).cloned() {
                    return Ok((snapshot, report));
                }
            }
        }

        let config = self.config.clone();
        let (bets, context) = (snapshot.history.clone(), snapshot.calibration.clone());
        let (divisors, salt) = (divisors.to_vec(), seed_salt.to_string());
        let report = run_blocking(move || {
            backtest_kelly_divisors(&bets, &config, &context, &divisors, &salt)
        })
        .await?;
        let report = self
            .store_backtest(snapshot.revision, key, Arc::new(report))
            .await;
        Ok((snapshot, report))
    }

    async fn store_calibration(
        &self,
        revision: u64,
        fitted: Arc<CalibrationContext>,
    ) -> Arc<CalibrationContext> {
        let mut inner = self.inner.write().await;
        if inner.revision != revision {
            debug!(
                "EngineCache: calibration for revision {} not kept, now at {}",
                revision, inner.revision
            );
            return fitted;
        }
        inner.calibration.get_or_insert(fitted).clone()
    }

    async fn store_backtest(
        &self,
        revision: u64,
        key: String,
        report: Arc<BacktestReport>,
    ) -> Arc<BacktestReport> {
        let mut inner = self.inner.write().await;
        if inner.revision != revision {
            debug!(
                "EngineCache: backtest for revision {} not kept, now at {}",
                revision, inner.revision
            );
            return report;
        }
        inner.backtests.entry(key).or_insert(report).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::fixtures::synthetic_history;

    fn fast_config() -> EngineConfig {
        let mut cfg = EngineConfig::default();
        cfg.backtest.target_runs = 200;
        cfg.backtest.operation_budget = 20_000;
        cfg.backtest.min_runs = 50;
        cfg
    }

    #[tokio::test]
    async fn test_calibration_is_reused_within_revision() {
        let cache = EngineCache::new(fast_config(), EntityAliases::new(), synthetic_history(60, 1.0));
        let a = cache.calibration().await.unwrap();
        let b = cache.calibration().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_replace_history_invalidates() {
        let cache = EngineCache::new(fast_config(), EntityAliases::new(), synthetic_history(60, 1.0));
        let before = cache.calibration().await.unwrap();
        let (_, report_before) = cache.backtest(&[2.0, 4.0], "s").await.unwrap();
        let rev = cache.replace_history(synthetic_history(80, 1.0)).await;
        assert_eq!(rev, 1);
        assert_eq!(cache.revision().await, 1);
        let after = cache.calibration().await.unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.sample_count, 80);
        let (snapshot, report_after) = cache.backtest(&[2.0, 4.0], "s").await.unwrap();
        assert!(!Arc::ptr_eq(&report_before, &report_after));
        assert_eq!(snapshot.revision, 1);
        assert_eq!(report_after.sample_count, 80);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refit() {
        let cache = EngineCache::new(fast_config(), EntityAliases::new(), synthetic_history(40, 1.0));
        let a = cache.calibration().await.unwrap();
        assert_eq!(cache.invalidate().await, 1);
        let b = cache.calibration().await.unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a.regression, b.regression);
    }

    #[tokio::test]
    async fn test_backtests_keyed_by_salt_and_divisors() {
        let cache = EngineCache::new(fast_config(), EntityAliases::new(), synthetic_history(40, 1.0));
        let (_, a) = cache.backtest(&[2.0, 4.0], "s").await.unwrap();
        let (_, b) = cache.backtest(&[2.0, 4.0], "s").await.unwrap();
        let (_, c) = cache.backtest(&[2.0, 4.0], "t").await.unwrap();
        let (_, d) = cache.backtest(&[3.0], "s").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(d.per_divisor.len(), 1);
    }

    #[tokio::test]
    async fn test_results_from_an_old_revision_are_not_stored() {
        let cache = EngineCache::new(fast_config(), EntityAliases::new(), synthetic_history(60, 1.0));
        let stale = cache.snapshot().await.unwrap();
        let (_, stale_report) = cache.backtest(&[2.0], "s").await.unwrap();
        cache.replace_history(synthetic_history(80, 1.0)).await;

        // a fit or sweep that finishes after the swap must not land in the new revision
        let key = backtest_key(&[2.0], "s");
        cache.store_calibration(stale.revision, stale.calibration.clone()).await;
        cache.store_backtest(stale.revision, key, stale_report.clone()).await;

        let fresh = cache.snapshot().await.unwrap();
        assert_eq!(fresh.revision, 1);
        assert!(!Arc::ptr_eq(&fresh.calibration, &stale.calibration));
        assert_eq!(fresh.calibration.sample_count, 80);
        let (snapshot, report) = cache.backtest(&[2.0], "s").await.unwrap();
        assert!(!Arc::ptr_eq(&report, &stale_report));
        assert_eq!(snapshot.revision, 1);
        assert_eq!(report.sample_count, 80);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_swaps_keep_reports_consistent() {
        let cache = EngineCache::new(fast_config(), EntityAliases::new(), synthetic_history(40, 1.0));
        let sizes = [40usize, 50, 60, 70, 80];
        let mut tasks = Vec::new();
        for round in 0..8 {
            let c = cache.clone();
            tasks.push(tokio::spawn(async move {
                let (snapshot, report) = c.backtest(&[2.0, 4.0], "s").await.unwrap();
                assert_eq!(report.sample_count, snapshot.history.len());
                assert_eq!(snapshot.calibration.sample_count, snapshot.history.len());
            }));
            let c = cache.clone();
            let n = sizes[(round + 1) % sizes.len()];
            tasks.push(tokio::spawn(async move {
                c.replace_history(synthetic_history(n, 1.0)).await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        let history_len = cache.history().await.len();
        let (snapshot, report) = cache.backtest(&[2.0, 4.0], "s").await.unwrap();
        assert_eq!(snapshot.revision, 8);
        assert_eq!(report.sample_count, history_len);
    }
}
