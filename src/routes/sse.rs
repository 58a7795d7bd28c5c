use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use tracing::info;

use crate::{error::AppError, services::sse_service, state::SharedState};

#[utoipa::path(
    get,
    path = "/sse/conferences/{id}",
    tag = "public",
    params(("id" = String, Path, description = "Conference identifier")),
    responses(
        (status = 200, description = "Conference display stream", content_type = "text/event-stream", body = String),
        (status = 409, description = "Conference unknown or ended")
    )
)]
/// Mirror a conference room to a read-only display such as a projector screen.
pub async fn conference_stream(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let subscription = sse_service::subscribe_display(&state, &id).await?;
    info!(conference_id = %id, "new display SSE connection");
    Ok(sse_service::to_sse_stream(state, subscription))
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/sse/conferences/{id}", get(conference_stream))
}
