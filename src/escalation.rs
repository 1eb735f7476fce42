//! Detection of the assistant's in-band escalation directive.
//!
//! The assistant is prompted to append `ESCALATE_TO_HUMAN: <reason>` when it
//! cannot help. That marker is a contract between the assistant's prompt and
//! this module; orchestration only sees the parsed result, so the marker
//! format can change here without touching the pipeline.

use std::sync::OnceLock;

use regex::Regex;

pub const ESCALATION_MARKER: &str = "ESCALATE_TO_HUMAN";

const DEFAULT_REASON: &str = "Customer needs human assistance";
const HANDOFF_MESSAGE: &str = "Let me connect you with a member of our team.";

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReply {
    pub reply: String,
    pub needs_escalation: bool,
    pub reason: String,
}

fn marker_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // The leading `\n?[ \t]*` swallows the line break in front of a
        // marker-only line, so stripping it never leaves a blank line behind.
        Regex::new(r"\n?[ \t]*ESCALATE_TO_HUMAN:?[ \t]*([^\n]*)")
            .expect("escalation marker pattern")
    })
}

/// Splits a raw assistant reply into the text to deliver and the escalation
/// decision. Replies without the marker pass through unchanged.
pub fn parse(raw_reply: &str) -> ParsedReply {
    if !raw_reply.contains(ESCALATION_MARKER) {
        return ParsedReply {
            reply: raw_reply.to_string(),
            needs_escalation: false,
            reason: String::new(),
        };
    }

    let extracted = marker_pattern()
        .captures(raw_reply)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();
    let reason = if extracted.is_empty() {
        DEFAULT_REASON.to_string()
    } else {
        extracted
    };

    let cleaned = marker_pattern().replace_all(raw_reply, "").trim().to_string();
    let reply = if cleaned.is_empty() {
        HANDOFF_MESSAGE.to_string()
    } else {
        cleaned
    };

    ParsedReply {
        reply,
        needs_escalation: true,
        reason,
    }
}
