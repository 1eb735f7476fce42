//! Webhook orchestration: immediate acknowledgment, detached turn
//! processing, and the operational endpoints.

use std::{
    sync::Arc,
    time::Instant,
};

use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use tokio::{sync::Mutex, task::JoinHandle};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::{
    assistant::{AssistantClient, RunPollPolicy},
    config::Config,
    escalation,
    platform::PlatformClient,
    store::ConversationStore,
    types::{BridgeError, UserMessage},
};

const FOLLOW_UP_MESSAGE: &str = "A team member will be with you shortly.";
const APOLOGY_MESSAGE: &str =
    "Sorry, I'm having trouble responding right now. Let me get a team member to help you.";

pub struct AppState {
    pub assistant: AssistantClient,
    pub platform: PlatformClient,
    pub store: ConversationStore,
    pub config: Config,
    started_at: Instant,
    /// Handles of in-flight turn tasks, so tests (and shutdown) can await
    /// them instead of racing the detached work.
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self::with_poll_policy(config, RunPollPolicy::default())
    }

    pub fn with_poll_policy(config: Config, poll: RunPollPolicy) -> Self {
        let http = reqwest::Client::new();
        let assistant = AssistantClient::new(
            http.clone(),
            config.assistant_base_url.clone(),
            config.openai_api_key.clone(),
            config.assistant_id.clone(),
            poll,
        );
        let platform = PlatformClient::new(
            http,
            config.chat_platform_base_url.clone(),
            config.chat_platform_api_key.clone(),
        );
        Self {
            assistant,
            platform,
            store: ConversationStore::new(),
            config,
            started_at: Instant::now(),
            tasks: Mutex::new(Vec::new()),
        }
    }
}

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/webhook", post(webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Pulls a user-authored message out of a webhook event. Anything that is
/// not a `message_create` from a user with a conversation id and text is
/// ignored by returning `None`.
fn user_message_from_event(event: &Value) -> Option<UserMessage> {
    if event.get("action").and_then(Value::as_str) != Some("message_create") {
        return None;
    }
    let actor_type = event
        .get("actor")
        .and_then(|actor| actor.get("actor_type"))
        .and_then(Value::as_str);
    if actor_type != Some("user") {
        return None;
    }

    let message = event.get("data")?.get("message")?;
    let conversation_id = message
        .get("conversation_id")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or("");
    let text = message
        .get("message_parts")
        .and_then(Value::as_array)
        .and_then(|parts| parts.first())
        .and_then(|part| part.get("text"))
        .and_then(|text| text.get("content"))
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or("");
    if conversation_id.is_empty() || text.is_empty() {
        return None;
    }

    Some(UserMessage {
        conversation_id: conversation_id.to_string(),
        text: text.to_string(),
    })
}

/// Webhook entry point. Acknowledges every structurally-parseable event
/// before any downstream work happens; the turn itself runs detached so the
/// platform never waits on assistant latency.
async fn webhook(State(state): State<Arc<AppState>>, Json(event): Json<Value>) -> impl IntoResponse {
    let Some(message) = user_message_from_event(&event) else {
        return Json(json!({ "success": true }));
    };

    info!(
        "[webhook] user message for {}: {} chars",
        message.conversation_id,
        message.text.len()
    );

    let handle = tokio::spawn(process_turn(state.clone(), message));
    let mut tasks = state.tasks.lock().await;
    tasks.retain(|task| !task.is_finished());
    tasks.push(handle);

    Json(json!({ "success": true, "message": "Webhook received" }))
}

/// Awaits every turn task spawned so far. Used by tests to observe detached
/// work deterministically; panicked tasks are swallowed here because the
/// routine already logged its own failure.
pub async fn await_active_turns(state: &AppState) {
    let handles: Vec<JoinHandle<()>> = state.tasks.lock().await.drain(..).collect();
    for handle in handles {
        let _ = handle.await;
    }
}

/// Terminal handler for one user turn. Never propagates an error: any
/// failure falls back to a best-effort apology plus escalation, and failures
/// in the fallback are only logged.
pub async fn process_turn(state: Arc<AppState>, message: UserMessage) {
    let conversation_id = message.conversation_id.clone();
    if let Err(err) = run_turn(&state, &message).await {
        error!("[turn] processing failed for {conversation_id}: {err}");
        if let Err(send_err) = state
            .platform
            .send_message(&conversation_id, APOLOGY_MESSAGE)
            .await
        {
            error!("[turn] apology delivery failed for {conversation_id}: {send_err}");
        }
        if let Err(assign_err) = state.platform.escalate(&conversation_id).await {
            error!("[turn] fallback escalation failed for {conversation_id}: {assign_err}");
        }
    }
}

async fn run_turn(state: &Arc<AppState>, message: &UserMessage) -> Result<(), BridgeError> {
    let existing = state.store.thread_for(&message.conversation_id).await;
    let turn = state.assistant.get_reply(&message.text, existing).await?;
    let parsed = escalation::parse(&turn.raw_reply);

    state
        .store
        .remember(&message.conversation_id, &turn.thread_id)
        .await;
    state
        .platform
        .send_message(&message.conversation_id, &parsed.reply)
        .await?;

    if parsed.needs_escalation {
        info!(
            "[turn] escalating {}: {}",
            message.conversation_id, parsed.reason
        );
        state.platform.escalate(&message.conversation_id).await?;
        state
            .platform
            .send_message(&message.conversation_id, FOLLOW_UP_MESSAGE)
            .await?;
    }

    Ok(())
}

async fn root() -> impl IntoResponse {
    Json(json!({
        "service": "support-bridge",
        "endpoints": {
            "webhook": "POST /webhook",
            "health": "GET /health",
            "status": "GET /status"
        }
    }))
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "now": now_iso(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "active_conversations": state.store.len().await,
    }))
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "chat_platform_api_key": !state.config.chat_platform_api_key.is_empty(),
        "openai_api_key": !state.config.openai_api_key.is_empty(),
        "assistant_id": !state.config.assistant_id.is_empty(),
        "active_conversations": state.store.len().await,
    }))
}
