use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Serialize;

use crate::middleware::RequestId;

use super::{ApiError, ApiResponse, AppState, ResponseMeta};

#[derive(Debug, Serialize)]
pub(super) struct CancelAccepted {
    session_id: i64,
    cancel_requested: bool,
}

/// POST /api/v1/sessions/{session_id}/cancel - stop the session's running job
/// at its next checkpoint.
pub(super) async fn cancel_session_job(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(session_id): Path<i64>,
) -> Result<(StatusCode, Json<ApiResponse<CancelAccepted>>), ApiError> {
    if !state.scheduler.request_cancel(session_id) {
        return Err(ApiError::new(
            req_id.0,
            "not_found",
            format!("no scheduled order is running for session {session_id}"),
        ));
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse {
            data: CancelAccepted {
                session_id,
                cancel_requested: true,
            },
            meta: ResponseMeta::new(req_id.0),
        }),
    ))
}
