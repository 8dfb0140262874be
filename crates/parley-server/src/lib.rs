//! Parley worker library logic.
//!
//! The worker hosts one [`parley_session::run_call`] task per active room
//! and feeds it events arriving over HTTP: LiveKit room webhooks, and the
//! media pipeline's transcript, speech and capability callbacks.

pub mod api;
pub mod config;
pub mod registry;
pub mod webhook;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Router,
};
use config::Config;
use parley_db::{DbPool, SqliteDatastore};
use parley_session::{run_call, CallOutcome, Services, SessionSettings};
use parley_voice::{
    HttpIntegrations, LiveKitConfig, LiveKitRooms, PipelineEngine, SignalWireGateway, VoiceError,
};
use registry::SessionRegistry;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

/// Maximum request body size (1 MiB).
const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Collaborators shared by every call.
    pub services: Services,
    pub settings: Arc<SessionSettings>,
    pub registry: SessionRegistry,
    /// Credentials used to verify LiveKit webhooks.
    pub livekit: LiveKitConfig,
    /// Start a session when LiveKit reports a new room.
    pub auto_dispatch: bool,
    pub event_buffer: usize,
}

impl AppState {
    pub fn new(services: Services, settings: SessionSettings, livekit: LiveKitConfig) -> Self {
        Self {
            services,
            settings: Arc::new(settings),
            registry: SessionRegistry::new(),
            livekit,
            auto_dispatch: true,
            event_buffer: 256,
        }
    }
}

/// Constructs every collaborator from configuration.
///
/// No adapter contacts its vendor here; misconfiguration surfaces on first
/// use.
pub fn build_services(config: &Config, pool: DbPool) -> Result<Services, VoiceError> {
    Ok(Services {
        rooms: Arc::new(LiveKitRooms::new(config.livekit.clone())),
        engine: Arc::new(PipelineEngine::new(
            config.engine.clone(),
            config.livekit.clone(),
        )?),
        store: Arc::new(SqliteDatastore::new(pool)),
        telephony: Arc::new(SignalWireGateway::new(config.telephony.clone())?),
        integrations: Arc::new(HttpIntegrations::new(config.integrations.clone())?),
    })
}

/// Starts handling the call in `room_name` on its own task.
///
/// Returns `false` without spawning when a session is already running for
/// the room.
pub fn spawn_call(state: &AppState, room_name: String, metadata: String) -> bool {
    let Some((generation, events)) = state.registry.register(&room_name, state.event_buffer)
    else {
        return false;
    };

    let services = state.services.clone();
    let settings = state.settings.clone();
    let registry = state.registry.clone();
    let span = tracing::info_span!("call", room = %room_name);

    tokio::spawn(
        async move {
            let outcome = run_call(services, settings, room_name.clone(), &metadata, events).await;
            registry.remove(&room_name, generation);
            match outcome {
                CallOutcome::Rejected => tracing::info!("call rejected"),
                CallOutcome::Abandoned(reason) => {
                    tracing::info!(?reason, "call ended before it started")
                }
                CallOutcome::Settled(report) => tracing::info!(
                    call_record_id = report.call_record_id.as_deref().unwrap_or("-"),
                    duration_seconds = report.duration_seconds,
                    content_written = report.content_written,
                    failed_steps = ?report.failed_steps,
                    "call settled"
                ),
            }
        }
        .instrument(span),
    );
    true
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/dispatch", post(api::dispatch_handler))
        .route("/api/sessions", get(api::list_sessions_handler))
        .route(
            "/api/sessions/{room}/events",
            post(api::session_event_handler),
        )
        .route(
            "/api/sessions/{room}/capabilities/{name}",
            post(api::capability_handler),
        )
        .route("/livekit/webhook", post(webhook::livekit_webhook_handler))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
