use serde::Serialize;
use utoipa::ToSchema;

/// Audience size of a conference as served to public dashboards.
#[derive(Debug, Serialize, ToSchema)]
pub struct AudienceCountResponse {
    pub conference_id: String,
    pub count: u64,
}
