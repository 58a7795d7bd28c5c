use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};

use crate::{
    dto::public::AudienceCountResponse, error::AppError, services::presence_service,
    state::SharedState,
};

/// Public read-only endpoints for dashboards.
pub fn router() -> Router<SharedState> {
    Router::new().route("/conferences/{id}/audience", get(get_audience_count))
}

#[utoipa::path(
    get,
    path = "/conferences/{id}/audience",
    tag = "public",
    params(("id" = String, Path, description = "Conference identifier")),
    responses((status = 200, description = "Current audience size", body = AudienceCountResponse))
)]
/// Return the number of distinct participants joined to a conference.
pub async fn get_audience_count(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<AudienceCountResponse>, AppError> {
    let count = presence_service::cached_audience_count(&state, &id).await?;
    Ok(Json(AudienceCountResponse {
        conference_id: id,
        count,
    }))
}
