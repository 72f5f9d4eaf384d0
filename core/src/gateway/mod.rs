//! Conversation Gateway
//!
//! Chat-turn handling in front of the diagnosis pipeline. A turn either
//! gets a conversational reply, a fixed status reply, or the finished
//! diagnosis (exactly once). When the assistant's reply signals readiness,
//! intake is extracted and a job is queued; the turn never waits on it.

pub mod intake;
pub mod jobs;
pub mod memory;
pub mod rate_limit;
pub mod types;

pub use jobs::{DeferredQueue, DiagnosisJob, DiagnosisRunner, JobQueue, WorkerPool};
pub use memory::ConversationMemory;
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use types::{ChatRequest, ChatResponse, RegionalSnapshot, StatusResponse};

use crate::context::ContextBus;
use crate::llm::{prompts, TextGenerator};
use crate::providers::RegionalDataFetch;
use crate::session::{GatewaySession, SessionConfig, SessionManager, SessionStatus, StoredMessage};
use crate::{AgroError, Result};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

pub const PROCESSING_REPLY: &str =
    "⏳ Your comprehensive diagnosis is still being prepared. Please check back in a moment.";

pub const MESSAGE_CAP_REPLY: &str =
    "You've reached the maximum number of messages for this session. Please start a new conversation.";

pub const CONVERSATION_ERROR_REPLY: &str = "I apologize, I'm experiencing technical difficulties. \
Please try rephrasing your question or contact support if the issue persists.";

pub const FAILURE_ERROR: &str =
    "We encountered an issue processing your request. Please try again or contact support.";

pub const FAILURE_DIAGNOSIS: &str = "I apologize, but I encountered an issue while analyzing your farm situation.

Please try:
1. Providing more specific details about your problem
2. Starting a new conversation
3. Contacting our support team if the issue persists

We're here to help!";

pub const DIAGNOSIS_STARTED: &str = "diagnosis_started";

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub max_session_messages: usize,
    /// Exchanges of history fed to the conversation prompt
    pub memory_exchanges: usize,
    pub session_ttl_secs: u64,
    /// Cap on each conversation or extraction call made under the session lock
    pub generation_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let sessions = SessionConfig::default();
        Self {
            max_session_messages: sessions.max_messages,
            memory_exchanges: 10,
            session_ttl_secs: sessions.ttl_secs,
            generation_timeout_ms: std::env::var("GATEWAY_GENERATION_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|ms| *ms > 0)
                .unwrap_or(30_000),
        }
    }
}

impl GatewayConfig {
    pub fn generation_timeout(&self) -> Duration {
        Duration::from_millis(self.generation_timeout_ms)
    }
}

/// Collaborators the gateway is built from
pub struct GatewayParts {
    pub sessions: Arc<SessionManager>,
    pub memory: Arc<ConversationMemory>,
    pub generator: Arc<dyn TextGenerator>,
    pub queue: Arc<dyn JobQueue>,
    pub bus: Arc<ContextBus>,
    pub regional: Arc<dyn RegionalDataFetch>,
    pub rate_limiter: Arc<RateLimiter>,
}

/// Counts from one maintenance sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub sessions: usize,
    pub context_records: usize,
    pub rate_limit_clients: usize,
    pub memory_buffers: usize,
    pub session_locks: usize,
}

pub struct ConversationGateway {
    sessions: Arc<SessionManager>,
    memory: Arc<ConversationMemory>,
    generator: Arc<dyn TextGenerator>,
    queue: Arc<dyn JobQueue>,
    bus: Arc<ContextBus>,
    regional: Arc<dyn RegionalDataFetch>,
    rate_limiter: Arc<RateLimiter>,
    config: GatewayConfig,
}

impl ConversationGateway {
    pub fn new(parts: GatewayParts, config: GatewayConfig) -> Self {
        Self {
            sessions: parts.sessions,
            memory: parts.memory,
            generator: parts.generator,
            queue: parts.queue,
            bus: parts.bus,
            regional: parts.regional,
            rate_limiter: parts.rate_limiter,
            config,
        }
    }

    /// Handle one chat turn from `client_ip`.
    ///
    /// Errors only for rate limiting, invalid input and store failures;
    /// generation trouble yields a fixed apology reply instead.
    #[instrument(skip(self, request), fields(session = ?request.session_id), target = "gateway")]
    pub async fn handle_turn(&self, request: ChatRequest, client_ip: &str) -> Result<ChatResponse> {
        self.rate_limiter.check(client_ip)?;
        let message = intake::sanitize_message(&request.message)?;

        let session_id = request
            .session_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let guard = self.sessions.lock(&session_id).await;
        let mut session = match self.sessions.get(&session_id).await? {
            Some(s) => s,
            None => {
                debug!(target: "gateway", session = %session_id, "New gateway session");
                GatewaySession::new(session_id.clone(), request.farmer_id, Some(client_ip.to_string()))
            }
        };

        if session.messages.len() >= self.config.max_session_messages {
            info!(target: "gateway", session = %session_id, "Message cap reached");
            return Ok(ChatResponse::reply(&session_id, MESSAGE_CAP_REPLY));
        }

        let history = self.memory.history(&session_id, &session.messages);
        session.messages.push(StoredMessage::user(&message));
        self.memory.add_user_message(&session_id, &message);

        if session.status == SessionStatus::Processing {
            self.sessions.save(&session).await?;
            return Ok(ChatResponse::reply(&session_id, PROCESSING_REPLY));
        }

        if session.status == SessionStatus::Completed {
            if let Some(diagnosis) = session.diagnosis.take() {
                info!(target: "gateway", session = %session_id, "Returning completed diagnosis");
                session.last_diagnosis = Some(diagnosis.clone());
                session.status = SessionStatus::Chatting;
                session.messages.push(StoredMessage::assistant(&diagnosis));
                self.memory.add_agent_response(&session_id, &diagnosis);
                self.sessions.save(&session).await?;

                return Ok(ChatResponse {
                    message: diagnosis,
                    session_id,
                    requires_action: false,
                    action_type: None,
                    classification: session.classification.clone(),
                    alert_triggered: session.alert_triggered,
                    alert_severity: session.alert_severity.map(|s| s.as_str().to_string()),
                });
            }
        }

        let reply = self.converse(&session_id, &history, &message).await;
        session.messages.push(StoredMessage::assistant(&reply.text));
        self.memory.add_agent_response(&session_id, &reply.text);

        if !reply.ready {
            self.sessions.save(&session).await?;
            return Ok(ChatResponse::reply(&session_id, reply.text));
        }

        let intake = intake::extract_intake(
            self.generator.as_ref(),
            &session.messages,
            self.config.generation_timeout(),
        )
        .await;
        session.intake = Some(intake.clone());
        session.status = SessionStatus::Processing;
        session.diagnosis = None;
        session.error = None;
        self.sessions.save(&session).await?;
        drop(guard);

        let job = DiagnosisJob {
            session_id: session_id.clone(),
            intake,
        };
        if let Err(e) = self.queue.enqueue(job).await {
            error!(target: "gateway", session = %session_id, error = %e, "Could not queue diagnosis");
            self.sessions
                .update(&session_id, |s| {
                    s.status = SessionStatus::Failed;
                    s.error = Some(FAILURE_ERROR.to_string());
                    s.diagnosis = Some(FAILURE_DIAGNOSIS.to_string());
                })
                .await?;
        } else {
            info!(target: "gateway", session = %session_id, "Diagnosis queued");
        }

        Ok(ChatResponse {
            message: reply.text,
            session_id,
            requires_action: true,
            action_type: Some(DIAGNOSIS_STARTED.to_string()),
            classification: None,
            alert_triggered: false,
            alert_severity: None,
        })
    }

    async fn converse(
        &self,
        session_id: &str,
        history: &[crate::llm::ChatMessage],
        message: &str,
    ) -> Reply {
        let keep = self.config.memory_exchanges * 2;
        let history = &history[history.len().saturating_sub(keep)..];
        let timeout = self.config.generation_timeout();
        let generated = tokio::time::timeout(
            timeout,
            self.generator.generate(prompts::conversation(history, message)),
        )
        .await
        .unwrap_or_else(|_| {
            Err(AgroError::Generation(format!(
                "conversation reply timed out after {}ms",
                timeout.as_millis()
            )))
        });

        match generated {
            Ok(text) => Reply {
                ready: intake::is_ready_for_diagnosis(&text),
                text,
            },
            Err(e) => {
                warn!(target: "gateway", session = %session_id, error = %e, "Conversation generation failed");
                Reply {
                    text: CONVERSATION_ERROR_REPLY.to_string(),
                    ready: false,
                }
            }
        }
    }

    /// Poll view of a session. Does not consume the diagnosis.
    pub async fn status(&self, session_id: &str) -> Result<StatusResponse> {
        let Some(session) = self.sessions.get(session_id).await? else {
            return Ok(StatusResponse::unknown(session_id));
        };

        let mut response = StatusResponse {
            session_id: session_id.to_string(),
            status: session.status.as_str().to_string(),
            message: format!("Status: {}", session.status),
            diagnosis: None,
            classification: None,
            alert_triggered: None,
            alert_severity: None,
            error: None,
        };

        match session.status {
            SessionStatus::Completed => match session.diagnosis {
                Some(diagnosis) => {
                    response.diagnosis = Some(diagnosis);
                    response.classification = session.classification;
                    response.alert_triggered = Some(session.alert_triggered);
                    response.alert_severity = session.alert_severity.map(|s| s.as_str().to_string());
                    response.message = "Diagnosis ready!".to_string();
                }
                None => {
                    response.status = SessionStatus::Processing.as_str().to_string();
                    response.message = "Still processing...".to_string();
                }
            },
            SessionStatus::Failed => {
                response.message = "Analysis failed".to_string();
                response.error = Some(session.error.unwrap_or_else(|| "Unknown error".to_string()));
            }
            SessionStatus::Chatting | SessionStatus::Processing => {}
        }

        Ok(response)
    }

    /// Remove gateway state, short-term memory and any context record. Idempotent.
    pub async fn end_session(&self, session_id: &str) -> Result<()> {
        self.sessions.remove(session_id).await?;
        self.memory.remove(session_id);
        self.bus.clear(session_id).await?;
        info!(target: "gateway", session = %session_id, "Session ended");
        Ok(())
    }

    /// One-off weather and price lookup through a throwaway context session
    pub async fn regional_snapshot(&self, region: &str) -> RegionalSnapshot {
        let region = region.trim();
        if region.is_empty() {
            return RegionalSnapshot::unavailable("Data unavailable");
        }

        let scratch_id = uuid::Uuid::new_v4().to_string();
        let snapshot = self.snapshot_inner(&scratch_id, region).await;
        if let Err(e) = self.bus.clear(&scratch_id).await {
            warn!(target: "gateway", error = %e, "Could not clear snapshot context");
        }

        match snapshot {
            Ok(Some(s)) => s,
            Ok(None) => RegionalSnapshot::unavailable("Data unavailable"),
            Err(e) => {
                warn!(target: "gateway", region = %region, error = %e, "Regional snapshot failed");
                RegionalSnapshot::unavailable("Service unavailable")
            }
        }
    }

    async fn snapshot_inner(&self, scratch_id: &str, region: &str) -> Result<Option<RegionalSnapshot>> {
        self.bus.create_session(scratch_id, "weather check", region).await?;
        self.regional.fetch(scratch_id, region, Some("general")).await?;
        let record = self
            .bus
            .get(scratch_id)
            .await?
            .ok_or_else(|| AgroError::SessionNotFound(scratch_id.to_string()))?;

        let (Some(weather), market) = (
            record.regional_data.get("weather").map(|p| &p.data),
            record.regional_data.get("market_prices").map(|p| &p.data),
        ) else {
            return Ok(None);
        };

        let number = |v: Option<&Value>, default: f64| v.and_then(Value::as_f64).unwrap_or(default);
        let price = number(market.and_then(|m| m.get("current_price")), 0.0);
        let market_price = if price > 0.0 {
            format!(
                "{}: {} {}",
                market
                    .and_then(|m| m.get("commodity"))
                    .and_then(Value::as_str)
                    .unwrap_or("General"),
                market
                    .and_then(|m| m.get("currency"))
                    .and_then(Value::as_str)
                    .unwrap_or("KES"),
                group_thousands(price)
            )
        } else {
            "Price unavailable".to_string()
        };

        Ok(Some(RegionalSnapshot {
            temperature: number(weather.get("current_temp"), 25.0),
            humidity: number(weather.get("humidity"), 70.0),
            condition: weather
                .get("condition")
                .and_then(Value::as_str)
                .unwrap_or("Clear")
                .to_string(),
            market_price,
        }))
    }

    /// Purge expired sessions and every per-session structure they leave behind
    pub async fn sweep(&self) -> Result<SweepStats> {
        let ttl = Duration::from_secs(self.config.session_ttl_secs);
        let sessions = self.sessions.purge_expired().await?;

        let mut memory_buffers = 0;
        for session_id in self.memory.session_ids() {
            let _guard = self.sessions.lock(&session_id).await;
            if self.sessions.get(&session_id).await?.is_none() {
                self.memory.remove(&session_id);
                memory_buffers += 1;
            }
        }

        let stats = SweepStats {
            sessions,
            context_records: self.bus.purge_expired(ttl).await?,
            rate_limit_clients: self.rate_limiter.prune(),
            memory_buffers,
            session_locks: self.sessions.prune_locks().await?,
        };
        if stats != SweepStats::default() {
            debug!(target: "gateway", ?stats, "Sweep complete");
        }
        Ok(stats)
    }

    pub fn session_backend(&self) -> &'static str {
        self.sessions.backend()
    }

    pub fn model_name(&self) -> String {
        self.generator.model_name()
    }

    pub async fn context_records(&self) -> Result<usize> {
        self.bus.len().await
    }
}

struct Reply {
    text: String,
    ready: bool,
}

/// Whole-number rendering with comma grouping
fn group_thousands(value: f64) -> String {
    let digits = format!("{:.0}", value.abs());
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    if value < 0.0 {
        out.insert(0, '-');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_thousands() {
        assert_eq!(group_thousands(40.0), "40");
        assert_eq!(group_thousands(300.0), "300");
        assert_eq!(group_thousands(60_000.0), "60,000");
        assert_eq!(group_thousands(1_234_567.4), "1,234,567");
    }
}
