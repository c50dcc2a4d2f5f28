// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. Public endpoints (health) require no
// authentication. All other endpoints require a valid Bearer token checked via
// the `AuthBearer` extractor.
//
// CORS is configured permissively for development; tighten `allowed_origins`
// in production.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::api::auth::AuthBearer;
use crate::app_state::AppState;
use crate::config::RiskEngineConfig;
use crate::review::queue::FeedbackStatus;
use crate::rules::AnomalyRule;
use crate::types::{Action, Transaction};

// =============================================================================
// Router construction
// =============================================================================

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        // ── Transactions ────────────────────────────────────────────
        .route("/api/v1/transactions/evaluate", post(evaluate_transaction))
        .route("/api/v1/transactions/:txn_id", get(get_transaction))
        .route("/api/v1/transactions/client/:client_id", get(list_client_transactions))
        .route("/api/v1/transactions/results/:txn_id", get(get_result))
        .route("/api/v1/transactions/results/client/:client_id", get(list_client_results))
        // ── Profiles ─────────────────────────────────────────────────
        .route("/api/v1/profiles/:client_id", get(get_profile))
        // ── Config ───────────────────────────────────────────────────
        .route("/api/v1/config", get(get_config).put(update_config))
        // ── Rules CRUD ───────────────────────────────────────────────
        .route("/api/v1/rules", get(list_rules).post(create_rule))
        .route("/api/v1/rules/:rule_id", get(get_rule).put(update_rule).delete(delete_rule))
        // ── Review queue ─────────────────────────────────────────────
        .route("/api/v1/review/queue", get(review_queue_list))
        .route("/api/v1/review/queue/:txn_id", get(review_queue_item))
        .route("/api/v1/review/queue/:txn_id/feedback", post(submit_feedback))
        .route("/api/v1/review/queue/bulk-feedback", post(submit_bulk_feedback))
        .route("/api/v1/review/stats", get(review_stats))
        .route("/api/v1/review/weight-history", get(weight_history))
        // ── Beneficiary graph ────────────────────────────────────────
        .route("/api/v1/graph/status", get(graph_status))
        .route("/api/v1/graph/beneficiary/:ifsc/:account", get(graph_beneficiary))
        .route("/api/v1/graph/client/:client_id", get(graph_client))
        // ── Silence detection ────────────────────────────────────────
        .route("/api/v1/silence", get(silence_status))
        .route("/api/v1/silence/check", post(silence_check))
        // ── Analytics ─────────────────────────────────────────────────
        .route("/api/v1/analytics/rules/performance", get(rules_performance))
        .route("/api/v1/analytics/graph/client/:client_id/network", get(client_network))
        .layer(cors)
        .with_state(state)
}

fn err(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<serde_json::Value>) {
    (status, Json(json!({ "error": message.into() })))
}

// =============================================================================
// Health (public)
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    uptime_secs: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        state_version: state.current_state_version(),
        uptime_secs: state.uptime_secs(),
        server_time: Utc::now().timestamp_millis(),
    })
}

// =============================================================================
// Transactions
// =============================================================================

async fn evaluate_transaction(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(txn): Json<Transaction>,
) -> impl IntoResponse {
    match state.pipeline.evaluate(txn).await {
        Ok(evaluation) => Json(evaluation).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn get_transaction(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(txn_id): Path<String>,
) -> impl IntoResponse {
    let found = state
        .persistence
        .transaction_history()
        .into_iter()
        .rev()
        .find(|t| t.txn_id == txn_id);
    match found {
        Some(txn) => Json(txn).into_response(),
        None => err(StatusCode::NOT_FOUND, format!("transaction {txn_id} not found")).into_response(),
    }
}

#[derive(Deserialize)]
struct ClientTxnQuery {
    limit: Option<usize>,
    #[allow(dead_code)]
    before: Option<String>,
}

#[derive(Serialize)]
struct PagedResponse<T> {
    data: Vec<T>,
    has_more: bool,
    next_cursor: Option<String>,
}

async fn list_client_transactions(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
    Query(q): Query<ClientTxnQuery>,
) -> impl IntoResponse {
    let limit = q.limit.unwrap_or(50).min(500);
    let mut matching: Vec<Transaction> = state
        .persistence
        .transaction_history()
        .into_iter()
        .filter(|t| t.client_id == client_id)
        .collect();
    matching.reverse();
    let has_more = matching.len() > limit;
    matching.truncate(limit);
    let next_cursor = if has_more {
        matching.last().map(|t| t.txn_id.clone())
    } else {
        None
    };
    Json(PagedResponse { data: matching, has_more, next_cursor })
}

async fn get_result(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(txn_id): Path<String>,
) -> impl IntoResponse {
    match state.persistence.result(&txn_id) {
        Some(result) => Json(result).into_response(),
        None => err(StatusCode::NOT_FOUND, format!("result for {txn_id} not found")).into_response(),
    }
}

async fn list_client_results(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
    Query(q): Query<ClientTxnQuery>,
) -> impl IntoResponse {
    let limit = q.limit.unwrap_or(50).min(500);
    let results = state.persistence.results_for_client(&client_id, limit);
    Json(PagedResponse { has_more: false, next_cursor: None, data: results })
}

// =============================================================================
// Profiles
// =============================================================================

async fn get_profile(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
) -> impl IntoResponse {
    match state.profiles.get(&client_id) {
        Some(profile) if profile.total_txn_count > 0 => Json(profile).into_response(),
        _ => err(StatusCode::NOT_FOUND, format!("no profile for client {client_id}")).into_response(),
    }
}

// =============================================================================
// Config
// =============================================================================

async fn get_config(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.config.read().clone())
}

/// Replace the live configuration. Takes effect on the next transaction
/// evaluated — in-flight evaluations keep running against the config they
/// already snapshotted. Persisted to disk immediately so a restart doesn't
/// revert it.
async fn update_config(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(new_config): Json<RiskEngineConfig>,
) -> impl IntoResponse {
    *state.config.write() = new_config.clone();
    if let Err(e) = new_config.save(crate::config::CONFIG_PATH) {
        warn!(error = %e, "failed to persist updated config to disk");
    }
    state.increment_version();
    info!("risk engine config updated via API");
    Json(new_config).into_response()
}

// =============================================================================
// Rules CRUD
// =============================================================================

async fn list_rules(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.rule_cache.all_rules())
}

async fn get_rule(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(rule_id): Path<String>,
) -> impl IntoResponse {
    match state.rule_cache.get(&rule_id) {
        Some(rule) => Json(rule).into_response(),
        None => err(StatusCode::NOT_FOUND, format!("rule {rule_id} not found")).into_response(),
    }
}

async fn create_rule(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(rule): Json<AnomalyRule>,
) -> impl IntoResponse {
    if rule.name.trim().is_empty() {
        return err(StatusCode::BAD_REQUEST, "name is required").into_response();
    }
    state.rule_cache.upsert(rule.clone());
    state.increment_version();
    info!(rule_id = %rule.rule_id, "rule created");
    (StatusCode::CREATED, Json(rule)).into_response()
}

async fn update_rule(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(rule_id): Path<String>,
    Json(mut rule): Json<AnomalyRule>,
) -> impl IntoResponse {
    rule.rule_id = rule_id;
    state.rule_cache.upsert(rule.clone());
    state.increment_version();
    Json(rule).into_response()
}

async fn delete_rule(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(rule_id): Path<String>,
) -> impl IntoResponse {
    if state.rule_cache.remove(&rule_id) {
        state.increment_version();
        StatusCode::NO_CONTENT.into_response()
    } else {
        err(StatusCode::NOT_FOUND, format!("rule {rule_id} not found")).into_response()
    }
}

// =============================================================================
// Review queue
// =============================================================================

#[derive(Deserialize)]
struct ReviewQueueQuery {
    action: Option<String>,
    client_id: Option<String>,
    status: Option<String>,
    limit: Option<usize>,
}

async fn review_queue_list(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Query(q): Query<ReviewQueueQuery>,
) -> impl IntoResponse {
    let action = q.action.as_deref().and_then(parse_action);
    let status = q.status.as_deref().and_then(parse_status);
    let limit = q.limit.unwrap_or(50).min(500);
    let items = state
        .review_queue
        .list(q.client_id.as_deref(), action, status, limit);
    Json(items)
}

fn parse_action(s: &str) -> Option<Action> {
    match s.to_uppercase().as_str() {
        "PASS" => Some(Action::Pass),
        "ALERT" => Some(Action::Alert),
        "BLOCK" => Some(Action::Block),
        _ => None,
    }
}

fn parse_status(s: &str) -> Option<FeedbackStatus> {
    match s.to_uppercase().as_str() {
        "PENDING" => Some(FeedbackStatus::Pending),
        "TRUE_POSITIVE" => Some(FeedbackStatus::TruePositive),
        "FALSE_POSITIVE" => Some(FeedbackStatus::FalsePositive),
        "AUTO_ACCEPTED" => Some(FeedbackStatus::AutoAccepted),
        _ => None,
    }
}

async fn review_queue_item(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(txn_id): Path<String>,
) -> impl IntoResponse {
    match state.review_queue.get(&txn_id) {
        Some(item) => Json(item).into_response(),
        None => err(StatusCode::NOT_FOUND, format!("review item {txn_id} not found")).into_response(),
    }
}

#[derive(Deserialize)]
struct FeedbackRequest {
    status: Option<String>,
    feedback_by: Option<String>,
}

async fn submit_feedback(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(txn_id): Path<String>,
    Json(req): Json<FeedbackRequest>,
) -> impl IntoResponse {
    let Some(status) = req.status.as_deref().and_then(|s| match s.to_uppercase().as_str() {
        "TRUE_POSITIVE" => Some(FeedbackStatus::TruePositive),
        "FALSE_POSITIVE" => Some(FeedbackStatus::FalsePositive),
        _ => None,
    }) else {
        return err(
            StatusCode::BAD_REQUEST,
            "status is required and must be TRUE_POSITIVE or FALSE_POSITIVE",
        )
        .into_response();
    };
    let by = req.feedback_by.unwrap_or_else(|| "unknown".to_string());
    match state.review_queue.submit_feedback(&txn_id, status, by) {
        Ok(item) => Json(item).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Deserialize)]
struct BulkFeedbackRequest {
    txn_ids: Vec<String>,
    status: String,
    feedback_by: Option<String>,
}

async fn submit_bulk_feedback(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(req): Json<BulkFeedbackRequest>,
) -> impl IntoResponse {
    let Some(status) = parse_status(&req.status).filter(|s| {
        matches!(s, FeedbackStatus::TruePositive | FeedbackStatus::FalsePositive)
    }) else {
        return err(StatusCode::BAD_REQUEST, "status must be TRUE_POSITIVE or FALSE_POSITIVE")
            .into_response();
    };
    let by = req.feedback_by.unwrap_or_else(|| "unknown".to_string());
    let (requested, updated) = state.review_queue.submit_bulk_feedback(&req.txn_ids, status, &by);
    Json(json!({ "requested": requested, "updated": updated })).into_response()
}

async fn review_stats(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let items = state.review_queue.list(None, None, None, usize::MAX);
    let total = items.len();
    let pending = items.iter().filter(|i| i.feedback_status == FeedbackStatus::Pending).count();
    let true_positive = items.iter().filter(|i| i.feedback_status == FeedbackStatus::TruePositive).count();
    let false_positive = items.iter().filter(|i| i.feedback_status == FeedbackStatus::FalsePositive).count();
    let auto_accepted = items.iter().filter(|i| i.feedback_status == FeedbackStatus::AutoAccepted).count();
    Json(json!({
        "total": total,
        "pending": pending,
        "true_positive": true_positive,
        "false_positive": false_positive,
        "auto_accepted": auto_accepted,
    }))
}

#[derive(Deserialize)]
struct WeightHistoryQuery {
    rule_id: Option<String>,
}

async fn weight_history(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Query(q): Query<WeightHistoryQuery>,
) -> impl IntoResponse {
    Json(state.weight_log.history(q.rule_id.as_deref()))
}

// =============================================================================
// Beneficiary graph
// =============================================================================

async fn graph_status(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "ready": state.beneficiary_graph.is_ready(),
        "built_at": state.beneficiary_graph.built_at(),
    }))
}

async fn graph_beneficiary(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path((ifsc, account)): Path<(String, String)>,
) -> impl IntoResponse {
    let key = format!("{ifsc}:{account}");
    let fan_in = state.beneficiary_graph.get_fan_in_count(&key);
    Json(json!({ "beneficiary_key": key, "fan_in_count": fan_in }))
}

async fn graph_client(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
) -> impl IntoResponse {
    Json(json!({
        "client_id": client_id,
        "total_beneficiaries": state.beneficiary_graph.get_total_beneficiary_count(&client_id),
        "shared_beneficiaries": state.beneficiary_graph.get_shared_beneficiary_count(&client_id),
        "network_density": state.beneficiary_graph.get_network_density(&client_id),
    }))
}

// =============================================================================
// Silence detection
// =============================================================================

async fn silence_status(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "alerted_clients": state.silence_detector.alerted_clients() }))
}

async fn silence_check(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let config = state.config.read().silence_detection.clone();
    let alerts = state.silence_detector.sweep(&state.profiles, &config, Utc::now());
    Json(json!({ "new_alerts": alerts }))
}

// =============================================================================
// Analytics
// =============================================================================

async fn rules_performance(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let since = Utc::now() - chrono::Duration::days(30);
    let precision = crate::review::weight_adjust::compute_precision_by_rule(&state.review_queue, since);
    let mut by_rule: HashMap<String, serde_json::Value> = HashMap::new();
    for (rule_id, (tp, fp)) in precision {
        let total = tp + fp;
        let precision = if total > 0 { tp as f64 / total as f64 } else { 0.0 };
        by_rule.insert(rule_id, json!({ "true_positive": tp, "false_positive": fp, "precision": precision }));
    }
    Json(by_rule)
}

async fn client_network(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
) -> impl IntoResponse {
    Json(json!({
        "client_id": client_id,
        "network_density": state.beneficiary_graph.get_network_density(&client_id),
        "shared_beneficiaries": state.beneficiary_graph.get_shared_beneficiary_count(&client_id),
        "total_beneficiaries": state.beneficiary_graph.get_total_beneficiary_count(&client_id),
    }))
}
