// AgroSense Core Library
// Conversational agricultural advisory runtime

pub mod context;
pub mod gateway;
pub mod llm;
pub mod locks;
pub mod pipeline;
pub mod providers;
pub mod schema;
pub mod session;

// Export core types
pub use context::{ContextBus, ContextRecord, ContextUpdate};
pub use gateway::{ConversationGateway, GatewayConfig};
pub use llm::{ChatMessage, GenerationRequest, TextGenerator};
pub use pipeline::{DiagnosisPipeline, PipelineReport, Stage};
pub use schema::{AssetCategory, AutomationPayload, Intent, Severity, SourceDocument};
pub use session::{GatewaySession, SessionManager, SessionStatus, SessionStore};

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgroError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Capability unavailable: {0}")]
    CapabilityUnavailable(String),

    #[error("Generation failure: {0}")]
    Generation(String),

    #[error("Rate limit exceeded: {limit} requests per {window_secs}s")]
    RateLimited { limit: u32, window_secs: u64 },

    #[error("Store error: {0}")]
    Store(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AgroError {
    /// Fixed, user-safe text for this error class. Internal detail stays in logs.
    pub fn user_message(&self) -> String {
        match self {
            AgroError::Validation(_) => {
                "Your request could not be processed. Please check the input and try again."
                    .to_string()
            }
            AgroError::SessionNotFound(_) => "Session not found or expired".to_string(),
            AgroError::RateLimited { limit, window_secs } => {
                if *window_secs == 60 {
                    format!("Rate limit exceeded. Maximum {} requests per minute.", limit)
                } else {
                    format!(
                        "Rate limit exceeded. Maximum {} requests per {} seconds.",
                        limit, window_secs
                    )
                }
            }
            _ => "An unexpected error occurred. Our team has been notified.".to_string(),
        }
    }

    /// Short machine-readable kind used in API error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            AgroError::Validation(_) => "validation_error",
            AgroError::SessionNotFound(_) => "not_found",
            AgroError::CapabilityUnavailable(_) => "capability_unavailable",
            AgroError::Generation(_) => "generation_failure",
            AgroError::RateLimited { .. } => "rate_limited",
            _ => "internal_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, AgroError>;
