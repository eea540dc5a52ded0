use crate::clock::Clock;
use crate::record::AccessLogRecord;
use crate::service::Service;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Shared by the handlers and the access interceptor.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<Service<AccessLogRecord>>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub instance_id: String,
    /// `false` when the instance has no quota or the pipeline is off.
    pub accounted: bool,
    pub used: Option<u64>,
    pub amount: Option<u64>,
    /// `None` means unlimited.
    pub remaining: Option<u64>,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
}

/// GET /health
pub async fn health_check() -> &'static str {
    "OK"
}

/// GET /api/usage/:instance
pub async fn get_usage(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
) -> Result<Json<UsageResponse>, ApiError> {
    let status = state
        .service
        .quota_status(&instance_id)
        .await
        .map_err(|e| ApiError::Unavailable(e.to_string()))?;

    let response = match status {
        Some(status) => UsageResponse {
            instance_id,
            accounted: true,
            used: Some(status.used),
            amount: Some(status.quota.amount),
            remaining: status.remaining(),
            period_start: Some(status.quota.period_start),
            period_end: Some(status.quota.period_end),
        },
        None => UsageResponse {
            instance_id,
            accounted: false,
            used: None,
            amount: None,
            remaining: None,
            period_start: None,
            period_end: None,
        },
    };

    Ok(Json(response))
}

#[derive(Debug)]
pub enum ApiError {
    Unavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
