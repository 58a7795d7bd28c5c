//! Live poll backend entrypoint wiring REST, WebSocket, SSE and the two stores.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use live_poll_back::{
    config::AppConfig,
    dao::{
        atomic::{AtomicStore, MemoryAtomicStore},
        poll_store::{MemoryPollStore, PollStore},
    },
    routes,
    services::{deadline_supervisor, storage_supervisor},
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let atomic = connect_atomic_store().await?;
    let admin_token = env::var("ADMIN_TOKEN").ok().filter(|token| !token.is_empty());
    if admin_token.is_none() {
        warn!("ADMIN_TOKEN not set; admin routes are disabled");
    }

    let app_state = AppState::new(config, atomic, admin_token);
    start_durable_store(&app_state).await;
    tokio::spawn(deadline_supervisor::run(app_state.clone()));

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Shared Redis store when `REDIS_URL` is set, otherwise a single-process memory store.
async fn connect_atomic_store() -> anyhow::Result<Arc<dyn AtomicStore>> {
    #[cfg(feature = "redis-store")]
    if let Ok(url) = env::var("REDIS_URL") {
        let store = live_poll_back::dao::atomic::redis::RedisAtomicStore::connect(&url)
            .await
            .context("connecting to Redis")?;
        info!("using Redis atomic store");
        return Ok(Arc::new(store));
    }

    warn!("REDIS_URL not set; live state is local to this process");
    Ok(Arc::new(MemoryAtomicStore::new()))
}

/// Install the durable store: MongoDB under supervision when `MONGO_URI` is set.
async fn start_durable_store(state: &SharedState) {
    #[cfg(feature = "mongo-store")]
    if let Ok(uri) = env::var("MONGO_URI") {
        use live_poll_back::dao::{
            poll_store::mongodb::{MongoConfig, MongoPollStore},
            storage::StorageError,
        };

        let db_name = env::var("MONGO_DB").ok();
        tokio::spawn(storage_supervisor::run(state.clone(), move || {
            let uri = uri.clone();
            let db_name = db_name.clone();
            async move {
                let config = MongoConfig::from_uri(&uri, db_name.as_deref())
                    .await
                    .map_err(StorageError::from)?;
                let store = MongoPollStore::connect(config)
                    .await
                    .map_err(StorageError::from)?;
                Ok(Arc::new(store) as Arc<dyn PollStore>)
            }
        }));
        return;
    }

    warn!("MONGO_URI not set; final results are kept in memory");
    let store: Arc<dyn PollStore> = Arc::new(MemoryPollStore::new());
    state.set_poll_store(store).await;
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
