use anyhow::{Context, Result};
use clap::Parser;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use tracing::info;

use comboedge::api::{self, AppState};
use comboedge::cache::EngineCache;
use comboedge::config::{Command, Config};
use comboedge::{
    backtest_kelly_divisors, backtest_kelly_divisors_by_mode, fit_calibration,
    generate_recommendations, Candidate, EngineConfig, EntityAliases, HistoricalBet,
    QualityFilter,
};

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays clean JSON
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    let engine = match &config.engine_config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let aliases = match &config.aliases_path {
        Some(path) => EntityAliases::from(read_json::<HashMap<String, String>>(path)?),
        None => EntityAliases::new(),
    };
    let history: Vec<HistoricalBet> = if config.history_path.exists() {
        read_json(&config.history_path)?
    } else {
        info!(
            "No history at {}; starting empty",
            config.history_path.display()
        );
        Vec::new()
    };
    info!(
        "Loaded {} bets, {} entity aliases",
        history.len(),
        aliases.len()
    );

    match config.command {
        Command::Calibrate => {
            let ctx = fit_calibration(&history, &engine, &aliases);
            print_json(&ctx)?;
        }
        Command::Backtest { divisors, by_mode } => {
            let ctx = fit_calibration(&history, &engine, &aliases);
            if by_mode {
                let reports =
                    backtest_kelly_divisors_by_mode(&history, &engine, &ctx, &divisors, &config.seed_salt);
                print_json(&reports)?;
            } else {
                let report =
                    backtest_kelly_divisors(&history, &engine, &ctx, &divisors, &config.seed_salt);
                print_json(&report)?;
            }
        }
        Command::Recommend {
            candidates_path,
            risk_preference,
            risk_cap,
            mode,
            min_ev,
            min_win_rate,
            max_correlation,
        } => {
            let candidates: Vec<Candidate> = read_json(&candidates_path)?;
            let ctx = fit_calibration(&history, &engine, &aliases);
            let filter = QualityFilter {
                min_ev,
                min_win_rate,
                max_correlation,
            };
            let cap = risk_cap.unwrap_or_else(|| engine.default_risk_cap());
            let report = generate_recommendations(
                &candidates,
                risk_preference,
                cap,
                &engine,
                &ctx,
                &filter,
                mode,
            )?;
            print_json(&report)?;
        }
        Command::Serve { addr } => {
            let state = AppState {
                cache: EngineCache::new(engine, aliases, history),
                seed_salt: config.seed_salt.clone(),
            };
            let app = api::router(state);
            let addr: SocketAddr = addr.parse()?;
            info!("API listening on http://{}", addr);
            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}
