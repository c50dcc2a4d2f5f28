// =============================================================================
// Transaction Risk Scoring Engine — Main Entry Point
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod beneficiary_graph;
mod config;
mod error;
mod live_counters;
mod notifier;
mod pipeline;
mod profile;
mod review;
mod rule_cache;
mod rules;
mod scoring;
mod silence;
mod store;
mod stats;
mod types;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::config::{RiskEngineConfig, CONFIG_PATH};
use crate::review::weight_adjust::{adjust_weights, compute_precision_by_rule};
use crate::rules::{AnomalyRule, RuleType};

fn seed_rules() -> Vec<AnomalyRule> {
    let rule = |rule_id: &str, name: &str, rule_type: RuleType, weight: f64| AnomalyRule {
        rule_id: rule_id.to_string(),
        name: name.to_string(),
        rule_type,
        risk_weight: weight,
        variance_pct: 0.0,
        params: HashMap::new(),
        active: true,
    };

    vec![
        rule("amount-anomaly", "Amount Anomaly (z-score)", RuleType::AmountAnomaly, 1.0),
        rule("amount-per-type", "Amount Per Transaction Type", RuleType::AmountPerType, 1.0),
        rule("hourly-amount", "Hourly Cumulative Amount", RuleType::HourlyAmount, 1.0),
        rule("tps-spike", "Transactions-Per-Second Spike", RuleType::TpsSpike, 1.2),
        rule("transaction-type", "Unusual Transaction Type", RuleType::TransactionType, 0.6),
        rule("beneficiary-concentration", "Beneficiary Concentration", RuleType::BeneficiaryConcentration, 1.0),
        rule("daily-cumulative", "Daily Cumulative Amount", RuleType::DailyCumulative, 1.0),
        rule("new-bene-velocity", "New Beneficiary Velocity", RuleType::NewBeneVelocity, 1.1),
        rule("dormancy-break", "Dormancy Break", RuleType::DormancyBreak, 1.3),
        rule("cross-channel-bene", "Cross-Channel Beneficiary Reuse", RuleType::CrossChannelBene, 1.0),
        rule("seasonal-deviation", "Seasonal Deviation", RuleType::SeasonalDeviation, 0.8),
        rule("cv-stability", "Coefficient of Variation Stability", RuleType::CvStability, 0.7),
        rule("isolation-forest", "Isolation Forest Anomaly Score", RuleType::IsolationForest, 1.5),
    ]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Transaction Risk Scoring Engine — Starting Up     ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config = RiskEngineConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load risk engine config, using defaults");
        RiskEngineConfig::default()
    });

    info!(
        alert_threshold = config.alert_threshold,
        block_threshold = config.block_threshold,
        min_profile_txns = config.min_profile_txns,
        "risk engine configured"
    );

    let state = Arc::new(AppState::new(config, seed_rules()));

    // ── Auto-accept sweep loop ───────────────────────────────────────────
    let sweep_state = state.clone();
    tokio::spawn(async move {
        let interval_secs = sweep_state.config.read().feedback.auto_accept_sweep_interval_secs;
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_secs.max(1)));
        loop {
            interval.tick().await;
            let count = sweep_state.review_queue.auto_accept_sweep(Utc::now());
            if count > 0 {
                sweep_state.increment_version();
            }
        }
    });

    // ── Weight-adjustment loop ───────────────────────────────────────────
    // Runs on its own timer, reading accumulated review feedback. This is a
    // control dependency only — it never short-circuits the evaluation path.
    let weight_state = state.clone();
    tokio::spawn(async move {
        let interval_secs = weight_state.config.read().feedback.weight_adjust_interval_secs;
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_secs.max(1)));
        loop {
            interval.tick().await;

            let cfg = weight_state.config.read().feedback.clone();
            let since = Utc::now() - chrono::Duration::seconds(interval_secs as i64 * 10);
            let precision = compute_precision_by_rule(&weight_state.review_queue, since);

            let mut weights: HashMap<String, f64> = weight_state
                .rule_cache
                .all_rules()
                .into_iter()
                .map(|r| (r.rule_id, r.risk_weight))
                .collect();

            let changed = adjust_weights(
                &mut weights,
                &precision,
                &weight_state.weight_log,
                cfg.weight_min_samples,
                cfg.high_precision,
                cfg.low_precision,
                cfg.weight_up_factor,
                cfg.weight_down_factor,
                cfg.weight_min,
                cfg.weight_max,
                cfg.weight_epsilon,
            );

            if !changed.is_empty() {
                let changed_weights: HashMap<String, f64> = changed
                    .iter()
                    .filter_map(|id| weights.get(id).map(|w| (id.clone(), *w)))
                    .collect();
                weight_state.rule_cache.apply_weight_changes(&changed_weights);
                weight_state.increment_version();
            }
        }
    });

    // ── Beneficiary graph refresh loop ───────────────────────────────────
    let graph_state = state.clone();
    tokio::spawn(async move {
        let interval_secs = graph_state.config.read().graph_refresh_secs;
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_secs.max(1)));
        loop {
            interval.tick().await;
            let history = graph_state.persistence.transaction_history();
            graph_state.beneficiary_graph.refresh(&history);
        }
    });

    // ── Silence detection sweep loop ─────────────────────────────────────
    let silence_state = state.clone();
    tokio::spawn(async move {
        let interval_minutes = silence_state.config.read().silence_detection.check_interval_minutes;
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(interval_minutes.max(1) * 60));
        loop {
            interval.tick().await;
            let cfg = silence_state.config.read().silence_detection.clone();
            let alerts = silence_state.silence_detector.sweep(&silence_state.profiles, &cfg, Utc::now());
            for alert in &alerts {
                warn!(
                    client_id = %alert.client_id,
                    expected_gap_secs = alert.expected_gap_secs,
                    actual_gap_secs = alert.actual_gap_secs,
                    "client went silent"
                );
            }
        }
    });

    // ── API server ────────────────────────────────────────────────────────
    let bind_addr = std::env::var("RISK_ENGINE_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "API server listening");
    let app = api::rest::router(state.clone());

    info!("All subsystems running. Press Ctrl+C to stop.");

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    if let Err(e) = server.await {
        error!(error = %e, "API server failed");
    }

    if let Err(e) = state.config.read().save(CONFIG_PATH) {
        error!(error = %e, "failed to save risk engine config on shutdown");
    }

    info!("Transaction risk scoring engine shut down complete.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to install Ctrl+C handler");
        return;
    }
    warn!("shutdown signal received — stopping gracefully");
}
