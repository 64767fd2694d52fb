use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use tower::limit::ConcurrencyLimitLayer;
use tracing::debug;

use crate::{
    error_handling::ApiError,
    structs::{AppState, PaymentDTO, PaymentSummaryQuery, PaymentTask, PaymentsSummaryResponseDTO},
};

pub fn app(state: AppState) -> Router {
    let priority_route = Router::new()
        .route("/payments", post(payments))
        .layer(ConcurrencyLimitLayer::new(1024));

    Router::new()
        .route("/payments-summary", get(payments_summary))
        .route("/purge-payments", post(purge_payments))
        .route("/health", get(health))
        .layer(ConcurrencyLimitLayer::new(32))
        .merge(priority_route)
        .with_state(state)
}

fn validate(payload: PaymentDTO) -> Result<PaymentTask, ApiError> {
    let correlation_id = payload
        .correlation_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing correlationId".to_string()))?;
    let amount = payload
        .amount
        .filter(|amount| *amount > Decimal::ZERO)
        .ok_or_else(|| ApiError::BadRequest("Missing or non-positive amount".to_string()))?;
    Ok(PaymentTask::new(correlation_id, amount))
}

pub async fn payments(
    State(state): State<AppState>,
    payload: Result<Json<PaymentDTO>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let task = validate(payload)?;

    state.queue.push(&task).await?;
    debug!(correlation_id = %task.correlation_id, "payment accepted");

    Ok(StatusCode::CREATED)
}

/// Accepts an RFC 3339 timestamp or a bare date (midnight UTC).
fn parse_bound(name: &str, raw: Option<&str>) -> Result<Option<DateTime<Utc>>, ApiError> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(None);
    };
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(at.with_timezone(&Utc)));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(Some(midnight.and_utc()));
        }
    }
    Err(ApiError::BadRequest(format!("Invalid {name} timestamp: {raw}")))
}

pub async fn payments_summary(
    State(state): State<AppState>,
    Query(query_params): Query<PaymentSummaryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let from = parse_bound("from", query_params.from.as_deref())?;
    let to = parse_bound("to", query_params.to.as_deref())?;

    let summary = state.ledger.summary(from, to).await?;

    Ok(Json(PaymentsSummaryResponseDTO::from(summary)))
}

pub async fn purge_payments(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let rows_affected = state.ledger.purge().await?;
    state.queue.clear().await?;

    Ok((
        StatusCode::OK,
        Json(json!({ "message": format!("Purged {} payments", rows_affected) })),
    ))
}

pub async fn health() -> impl IntoResponse {
    Json(json!({ "ping": "pong" }))
}
