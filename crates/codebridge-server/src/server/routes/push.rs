//! Verification code push endpoint.
//!
//! The phone posts `{code, device_id?}` to `/push/{account}`. The endpoint is
//! authenticated only by knowledge of the account name.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use codebridge_core::{DeliveryOutcome, PushError, PushRequest};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::ErrorResponse;
use crate::server::AppState;

/// Create the push router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/push/:account", post(push_handler))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
pub struct PushBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PushResponse {
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered: Option<usize>,
}

fn push_error_to_response(err: PushError) -> (StatusCode, Json<ErrorResponse>) {
    let (status, error, message) = match &err {
        PushError::UnknownAccount(_) => (StatusCode::FORBIDDEN, "invalid_account", "Invalid account"),
        PushError::CodeRequired => (StatusCode::BAD_REQUEST, "code_required", "Code is required"),
        PushError::AccountLookup(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "account_lookup_failed",
            "Account lookup failed",
        ),
    };

    (status, Json(ErrorResponse::new(error, message)))
}

/// POST /push/:account
///
/// The body may omit the content type; an empty body counts as `{}`.
#[instrument(skip(state, body))]
pub async fn push_handler(
    State(state): State<Arc<AppState>>,
    Path(account): Path<String>,
    body: Bytes,
) -> Response {
    let body: PushBody = if body.is_empty() {
        PushBody::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "Push rejected: malformed body");
                return (
                    StatusCode::BAD_REQUEST,
                    Json(ErrorResponse::new("invalid_body", "Body must be a JSON object")),
                )
                    .into_response();
            }
        }
    };

    let request = PushRequest {
        code: body.code,
        device_id: body.device_id,
    };

    match state.delivery.push(&account, request).await {
        Ok(DeliveryOutcome::Delivered { count }) => {
            info!(count, "Push delivered");
            (
                StatusCode::OK,
                Json(PushResponse {
                    status: "success".to_string(),
                    message: "verification code sent".to_string(),
                    delivered: Some(count),
                }),
            )
                .into_response()
        }
        Ok(DeliveryOutcome::NoListeners) => (
            StatusCode::OK,
            Json(PushResponse {
                status: "error".to_string(),
                message: "no active listener".to_string(),
                delivered: None,
            }),
        )
            .into_response(),
        Err(err) => push_error_to_response(err).into_response(),
    }
}
