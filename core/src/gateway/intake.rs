//! Turn intake: input hygiene, readiness detection and intake extraction.

use crate::llm::structured::{extract_json_object, str_field};
use crate::llm::{prompts, ChatMessage, TextGenerator};
use crate::session::{IntakeFields, StoredMessage};
use crate::{AgroError, Result};
use std::time::Duration;
use tracing::{debug, warn};

pub const MAX_MESSAGE_CHARS: usize = 2000;

/// Log entries handed to the extraction prompt
const EXTRACTION_WINDOW: usize = 10;

/// Substrings in the assistant's own reply that start a diagnosis run.
/// Matched case-insensitively against the reply text, nothing smarter.
pub const READINESS_PHRASES: [&str; 4] = [
    "detailed analysis",
    "expert system",
    "comprehensive recommendations",
    "detailed recommendations",
];

const STRIPPED_PATTERNS: [&str; 4] = ["<script", "javascript:", "onerror=", "onclick="];

pub fn is_ready_for_diagnosis(reply: &str) -> bool {
    let reply = reply.to_lowercase();
    READINESS_PHRASES.iter().any(|p| reply.contains(p))
}

/// Length check, then strip markup-injection patterns and trim
pub fn sanitize_message(raw: &str) -> Result<String> {
    let len = raw.chars().count();
    if len == 0 || len > MAX_MESSAGE_CHARS {
        return Err(AgroError::Validation(format!(
            "message must be 1..={} characters, got {}",
            MAX_MESSAGE_CHARS, len
        )));
    }

    let mut cleaned = raw.to_string();
    for pattern in STRIPPED_PATTERNS {
        cleaned = cleaned.replace(pattern, "");
    }
    let cleaned = cleaned.trim().to_string();

    if cleaned.is_empty() {
        return Err(AgroError::Validation("message is empty".into()));
    }
    Ok(cleaned)
}

/// Pull intake fields from the recent log. Never fails; falls back to defaults.
pub async fn extract_intake(
    generator: &dyn TextGenerator,
    log: &[StoredMessage],
    timeout: Duration,
) -> IntakeFields {
    let last_user = log
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.as_str());

    let window: Vec<ChatMessage> = log
        .iter()
        .skip(log.len().saturating_sub(EXTRACTION_WINDOW))
        .map(|m| ChatMessage::new(m.role.clone(), m.content.clone()))
        .collect();

    let text = match tokio::time::timeout(timeout, generator.generate(prompts::extraction(&window))).await {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            warn!(target: "gateway", error = %e, "Intake extraction failed; using defaults");
            return IntakeFields::defaults(last_user);
        }
        Err(_) => {
            warn!(target: "gateway", timeout_ms = timeout.as_millis() as u64, "Intake extraction timed out; using defaults");
            return IntakeFields::defaults(last_user);
        }
    };

    let Some(fields) = extract_json_object(&text) else {
        warn!(target: "gateway", "Intake extraction returned no JSON; using defaults");
        return IntakeFields::defaults(last_user);
    };

    let intake = IntakeFields {
        crop_or_livestock: str_field(&fields, "crop_or_livestock"),
        region: str_field(&fields, "region"),
        issue: str_field(&fields, "issue"),
        additional_details: str_field(&fields, "additional_details"),
    };
    debug!(target: "gateway", intake = ?intake, "Intake extracted");
    intake
}
