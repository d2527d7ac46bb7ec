//! HTTP surface (enabled by the `server` feature).
//!
//! | Route | Input | Output |
//! |-------|-------|--------|
//! | `POST /api/process-input` | header `anthropic-api-key`, JSON `{"user_input"}` | event stream from one agent-loop run |
//! | `POST /api/process_input_api_using_model` | form field `user_input` | event stream from the supervisory loop |
//! | `GET /health` | | `ok` |
//!
//! Each streaming request gets its own [`SessionState`] and its own task; the response
//! body is fed through a channel from that task.

use std::error::Error;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::wirtual::agent_loop::AgentLoop;
use crate::wirtual::config::RelayConfig;
use crate::wirtual::orchestrator::{Orchestrator, PlannerClient};
use crate::wirtual::relay::{relay_turn, stream_body};
use crate::wirtual::session_state::SessionState;
use crate::wirtual::storage::ConfigStore;

/// Header carrying the caller's Anthropic key on the direct relay route.
pub const API_KEY_HEADER: &str = "anthropic-api-key";

const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared, read-only handler state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RelayConfig>,
    pub store: Arc<ConfigStore>,
    pub agent: Arc<dyn AgentLoop>,
    pub planner: Arc<dyn PlannerClient>,
}

impl AppState {
    pub fn new(
        config: RelayConfig,
        agent: Arc<dyn AgentLoop>,
        planner: Arc<dyn PlannerClient>,
    ) -> Self {
        let store = ConfigStore::new(config.config_dir.clone());
        Self {
            config: Arc::new(config),
            store: Arc::new(store),
            agent,
            planner,
        }
    }

    fn fresh_session(&self) -> SessionState {
        SessionState::new(&self.config, &self.store)
    }
}

#[derive(Debug, Deserialize)]
pub struct UserInput {
    pub user_input: String,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/process-input", post(process_input))
        .route(
            "/api/process_input_api_using_model",
            post(process_input_using_model),
        )
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
}

fn detail(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "detail": message }))).into_response()
}

fn event_stream(rx: mpsc::UnboundedReceiver<String>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(stream_body(rx)),
    )
        .into_response()
}

async fn process_input(State(app): State<AppState>, req: Request) -> Response {
    // Checked before the body is touched.
    let api_key = match req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        Some(key) => key.to_string(),
        None => return detail(StatusCode::UNAUTHORIZED, "API Key missing"),
    };

    let bytes = match to_bytes(req.into_body(), MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            log::warn!("could not read request body: {}", e);
            return detail(StatusCode::BAD_REQUEST, "Could not read request body");
        }
    };
    let input: UserInput = match serde_json::from_slice(&bytes) {
        Ok(input) => input,
        Err(e) => {
            log::warn!("invalid request body: {}", e);
            return detail(StatusCode::UNPROCESSABLE_ENTITY, "Expected {\"user_input\": string}");
        }
    };
    log::info!("Processing input... {}", input.user_input);

    let mut session = app.fresh_session();
    session.api_key = Some(api_key);
    session.push_user_text(input.user_input);

    let (sink, rx) = mpsc::unbounded_channel();
    let agent = app.agent.clone();
    tokio::spawn(async move {
        if let Ok(count) = relay_turn(agent.as_ref(), &mut session, &sink).await {
            log::info!("relay finished after {} messages", count);
        }
    });
    event_stream(rx)
}

async fn process_input_using_model(
    State(app): State<AppState>,
    Form(input): Form<UserInput>,
) -> Response {
    let session = app.fresh_session();
    let orchestrator = Orchestrator::new(
        app.agent.clone(),
        app.planner.clone(),
        app.config.max_subtasks,
    );

    let (sink, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let outcome = orchestrator.run(&input.user_input, session, &sink).await;
        log::info!(
            "orchestration ended in {:?} after {} sub-tasks",
            outcome.phase,
            outcome.subtasks
        );
    });
    event_stream(rx)
}

/// Bind to `state.config.bind_addr` and serve until the process stops.
pub async fn serve(state: AppState) -> Result<(), Box<dyn Error + Send + Sync>> {
    let addr = state.config.bind_addr;
    let listener = TcpListener::bind(addr).await?;
    log::info!("wirtual relay listening on http://{}", listener.local_addr()?);
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}
