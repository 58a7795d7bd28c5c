use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the live polling backend.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::public::get_audience_count,
        crate::routes::sse::conference_stream,
        crate::routes::websocket::ws_handler,
        crate::routes::admin::sync_conference,
        crate::routes::admin::end_conference,
        crate::routes::admin::register_question,
        crate::routes::admin::get_result,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::health::StoreHealth,
            crate::dto::public::AudienceCountResponse,
            crate::dto::sse::Handshake,
            crate::dto::ws::ClientMessage,
            crate::dto::ws::ServerMessage,
            crate::dto::ws::Role,
            crate::dto::admin::ConferenceSyncRequest,
            crate::dto::admin::QuestionInput,
            crate::dto::admin::OptionInput,
            crate::dto::admin::ActionResponse,
            crate::dto::admin::EndConferenceResponse,
            crate::dto::admin::FinalResultResponse,
            crate::dao::models::ConferenceStatus,
            crate::dao::models::CloseReason,
            crate::error::ErrorCode,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "public", description = "Read-only conference views and display streams"),
        (name = "admin", description = "Operator endpoints guarded by the admin token"),
        (name = "participants", description = "WebSocket protocol for hosts and audience"),
    )
)]
pub struct ApiDoc;
