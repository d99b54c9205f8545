//! In-process stand-in for the remote service.
//!
//! Implements the same routes, credential check and error body convention as
//! the hosted service so the client can be exercised end to end without
//! network access. Runs produce a fixed number of phases whose bytes are a
//! truncated copy of the uploaded model.

mod handlers;
pub mod middleware;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::config::Credential;
use crate::models::{Configuration, ModelId, PhaseId, SessionId};

/// Behaviour knobs for the loopback service.
#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    /// `None` accepts every request.
    pub credential: Option<Credential>,
    pub phases_per_run: usize,
    /// Artificial latency of `POST /run`.
    pub run_delay: Duration,
    pub version: String,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            credential: None,
            phases_per_run: 3,
            run_delay: Duration::ZERO,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl LoopbackConfig {
    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn with_run_delay(mut self, delay: Duration) -> Self {
        self.run_delay = delay;
        self
    }

    pub fn with_phases_per_run(mut self, count: usize) -> Self {
        self.phases_per_run = count;
        self
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RemotePhase {
    pub id: PhaseId,
    pub bytes: Arc<Vec<u8>>,
    pub rating: Option<f64>,
}

#[derive(Debug, Clone)]
pub(crate) struct RemoteSession {
    pub model: Arc<Vec<u8>>,
    pub configuration: Option<Configuration>,
    pub phases: Vec<RemotePhase>,
    pub running: bool,
}

impl RemoteSession {
    fn new(model: Arc<Vec<u8>>) -> Self {
        Self {
            model,
            configuration: None,
            phases: Vec::new(),
            running: false,
        }
    }
}

/// Shared state of the loopback service.
#[derive(Debug, Clone)]
pub struct LoopbackState {
    pub(crate) config: Arc<LoopbackConfig>,
    pub(crate) sessions: Arc<Mutex<HashMap<SessionId, RemoteSession>>>,
}

impl LoopbackState {
    pub fn new(config: LoopbackConfig) -> Self {
        Self {
            config: Arc::new(config),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a model as if it had been uploaded. Returns its id.
    pub fn insert_model(&self, bytes: Vec<u8>) -> ModelId {
        let id = uuid::Uuid::new_v4().to_string();
        let mut sessions = self.sessions.lock().expect("loopback lock poisoned");
        sessions.insert(id.clone(), RemoteSession::new(Arc::new(bytes)));
        id
    }

    /// Number of phases the service has not seen a rating for.
    pub fn unrated(&self, session_id: &str) -> Option<usize> {
        let sessions = self.sessions.lock().expect("loopback lock poisoned");
        sessions
            .get(session_id)
            .map(|s| s.phases.iter().filter(|p| p.rating.is_none()).count())
    }
}

pub fn create_router(state: LoopbackState) -> Router {
    let auth = axum::middleware::from_fn_with_state(
        state.config.credential.clone(),
        middleware::auth_middleware,
    );

    Router::new()
        .route("/health", get(handlers::health))
        .route("/upload", post(handlers::upload))
        .route("/config/{id}", post(handlers::configure))
        .route("/run/{id}", post(handlers::run))
        .route("/download/{id}", get(handlers::download_model))
        .route("/download/{session_id}/{phase_id}", get(handlers::download_phase))
        .route(
            "/evaluate/{id}",
            get(handlers::inspect).put(handlers::evaluate),
        )
        .route("/reset/{id}", post(handlers::reset))
        .route("/copy/{id}", post(handlers::copy))
        .layer(auth)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve the loopback service until the process exits.
pub async fn serve(addr: &str, state: LoopbackState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("polyred loopback service listening on http://{}", listener.local_addr()?);
    axum::serve(listener, create_router(state)).await?;
    Ok(())
}
