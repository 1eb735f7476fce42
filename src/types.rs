use thiserror::Error;

/// Failure categories for the bridge pipeline. Each outbound dependency maps
/// its own transport and status failures into exactly one of these, so the
/// orchestrator can log which stage broke without inspecting messages.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("assistant error: {0}")]
    Assistant(String),

    #[error("delivery error: {0}")]
    Delivery(String),

    #[error("escalation error: {0}")]
    Escalation(String),
}

/// A user-authored message extracted from an inbound webhook event.
#[derive(Debug, Clone)]
pub struct UserMessage {
    pub conversation_id: String,
    pub text: String,
}

/// Raw outcome of one assistant round-trip. The reply still carries any
/// escalation marker; stripping it is the escalation parser's job.
#[derive(Debug, Clone)]
pub struct AssistantTurn {
    pub raw_reply: String,
    pub thread_id: String,
}
