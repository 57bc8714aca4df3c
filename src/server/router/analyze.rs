use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use tracing::{debug, error};

use crate::errors::AnalyzeError;
use crate::server::ServeState;

/// `POST /analyze` with `{"url": "..."}`.
pub(crate) async fn analyze_handler(
    State(state): State<ServeState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Response {
    let url = match body {
        Ok(Json(payload)) => payload
            .get("url")
            .and_then(Value::as_str)
            .map(str::to_string),
        Err(rejection) => {
            debug!(error = %rejection, "rejected analyze body");
            None
        }
    };
    let Some(url) = url else {
        return invalid_input();
    };

    match state.service.analyze(&url).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(AnalyzeError::InvalidInput) => invalid_input(),
        Err(err) => {
            error!(url = %url, error = %err, "analyze request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "Failed to analyze URL",
                    "details": err.to_string(),
                })),
            )
                .into_response()
        }
    }
}

fn invalid_input() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": AnalyzeError::InvalidInput.to_string() })),
    )
        .into_response()
}
