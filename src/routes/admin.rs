use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State},
    http::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post, put},
};
use axum_valid::Valid;

use crate::{
    dto::admin::{
        ActionResponse, ConferenceSyncRequest, EndConferenceResponse, FinalResultResponse,
        QuestionInput,
    },
    error::AppError,
    services::admin_service,
    state::SharedState,
};

const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Operator endpoints used by the conference-management system.
pub fn router(state: SharedState) -> Router<SharedState> {
    Router::new()
        .route("/admin/conferences/{id}", put(sync_conference))
        .route("/admin/conferences/{id}/end", post(end_conference))
        .route("/admin/questions/{id}", put(register_question))
        .route("/admin/questions/{id}/result", get(get_result))
        .route_layer(middleware::from_fn_with_state(state, require_admin_token))
}

/// Sync the cached host and status of a conference.
#[utoipa::path(
    put,
    path = "/admin/conferences/{id}",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Operator token configured at startup"),
    ("id" = String, Path, description = "Conference identifier")),
    request_body = ConferenceSyncRequest,
    responses(
        (status = 200, description = "Conference cache updated", body = ActionResponse),
        (status = 400, description = "Invalid payload")
    )
)]
pub async fn sync_conference(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Valid(Json(payload)): Valid<Json<ConferenceSyncRequest>>,
) -> Result<Json<ActionResponse>, AppError> {
    Ok(Json(
        admin_service::sync_conference(&state, &id, payload).await?,
    ))
}

/// End a conference, closing its live question and notifying every connection.
#[utoipa::path(
    post,
    path = "/admin/conferences/{id}/end",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Operator token configured at startup"),
    ("id" = String, Path, description = "Conference identifier")),
    responses(
        (status = 200, description = "Conference ended", body = EndConferenceResponse),
        (status = 409, description = "Conference unknown")
    )
)]
pub async fn end_conference(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<EndConferenceResponse>, AppError> {
    Ok(Json(admin_service::end_conference(&state, &id).await?))
}

/// Register or replace a question definition.
#[utoipa::path(
    put,
    path = "/admin/questions/{id}",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Operator token configured at startup"),
    ("id" = String, Path, description = "Question identifier")),
    request_body = QuestionInput,
    responses(
        (status = 200, description = "Question registered", body = ActionResponse),
        (status = 400, description = "Invalid definition"),
        (status = 409, description = "Question already closed")
    )
)]
pub async fn register_question(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Valid(Json(payload)): Valid<Json<QuestionInput>>,
) -> Result<Json<ActionResponse>, AppError> {
    Ok(Json(
        admin_service::register_question(&state, &id, payload).await?,
    ))
}

/// Fetch the durable final result of a closed question.
#[utoipa::path(
    get,
    path = "/admin/questions/{id}/result",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Operator token configured at startup"),
    ("id" = String, Path, description = "Question identifier")),
    responses(
        (status = 200, description = "Final result", body = FinalResultResponse),
        (status = 404, description = "Question not closed yet")
    )
)]
pub async fn get_result(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<FinalResultResponse>, AppError> {
    Ok(Json(admin_service::get_result(&state, &id).await?))
}

async fn require_admin_token(
    State(state): State<SharedState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let Some(expected) = state.admin_token() else {
        return Err(AppError::Unauthorized(
            "admin routes are disabled (no ADMIN_TOKEN configured)".into(),
        ));
    };

    let provided = req
        .headers()
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            AppError::Unauthorized("missing admin token header `X-Admin-Token`".into())
        })?;

    if provided == expected {
        Ok(next.run(req).await)
    } else {
        Err(AppError::Unauthorized("invalid admin token".into()))
    }
}
