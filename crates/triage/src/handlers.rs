use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use shared_types::{NotificationBatch, RenewResponse, StatusResponse};

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
pub struct WebhookParams {
    #[serde(rename = "validationToken")]
    pub validation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RenewParams {
    #[serde(rename = "clientState")]
    pub client_state: Option<String>,
}

pub async fn root() -> Json<StatusResponse> {
    Json(StatusResponse::alive())
}

pub async fn health_check() -> StatusCode {
    StatusCode::OK
}

/// Subscription handshake or notification delivery.
///
/// Notifications are acknowledged with 202 as soon as they pass the gate;
/// processing continues in the background.
pub async fn webhook(
    State(state): State<AppState>,
    Query(params): Query<WebhookParams>,
    body: Bytes,
) -> ApiResult<Response> {
    if let Some(token) = params.validation_token {
        let echoed = state.gate.handle_validation(&token)?;
        return Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain")],
            echoed,
        )
            .into_response());
    }

    if body.is_empty() {
        return Err(ApiError::bad_request("Empty notification body"));
    }

    let batch: NotificationBatch = serde_json::from_slice(&body)?;
    let report = state.gate.handle_notification(&batch).await?;

    tracing::debug!(
        forwarded = report.forwarded,
        duplicates = report.duplicates,
        "Notification batch accepted"
    );

    Ok(StatusCode::ACCEPTED.into_response())
}

/// Extend every subscription; guarded by the shared client state
pub async fn renew(
    State(state): State<AppState>,
    Query(params): Query<RenewParams>,
) -> ApiResult<Json<RenewResponse>> {
    match params.client_state.as_deref() {
        Some(provided) if provided == &*state.client_state => {}
        _ => {
            tracing::warn!("Rejected renewal request with missing or wrong clientState");
            return Err(ApiError::Unauthorized);
        }
    }

    tracing::info!("Renewing subscriptions");
    let renewed = state.subscriptions.renew_all_subscriptions().await?;

    Ok(Json(RenewResponse {
        status: "success".to_string(),
        renewed,
    }))
}
