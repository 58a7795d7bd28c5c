/// Admin service for conference and question management.
pub mod admin_service;
/// Host role derivation from the conference cache.
pub mod authority;
/// Recovery sweep closing questions whose countdown was lost.
pub mod deadline_supervisor;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Room broadcasts of lifecycle and tally events.
pub mod poll_events;
/// Conference membership and audience counts.
pub mod presence_service;
/// Question push, countdown and close.
pub mod question_service;
/// Display-screen Server-Sent Events streams.
pub mod sse_service;
/// Durable store reconnection and degraded mode.
pub mod storage_supervisor;
/// Vote recording and tally publication.
pub mod vote_service;
/// WebSocket connection and message handling service.
pub mod websocket_service;

#[cfg(test)]
pub(crate) mod test_support;
