//! Text generation: the `TextGenerator` seam, an OpenAI-compatible HTTP
//! client, the prompt library and structured-output parsing.

mod client;
pub mod prompts;
pub mod structured;

pub use client::{LlmClient, LlmClientConfig};

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One chat turn in a generation request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }
}

/// What a generation call is for. Each kind has its own sampling defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Conversation,
    Classification,
    Diagnosis,
    AlertDecision,
    Extraction,
}

impl TaskKind {
    pub fn temperature(&self) -> f32 {
        match self {
            TaskKind::Conversation => 0.7,
            TaskKind::Classification => 0.1,
            TaskKind::Diagnosis => 0.3,
            TaskKind::AlertDecision => 0.0,
            TaskKind::Extraction => 0.1,
        }
    }

    pub fn max_output_tokens(&self) -> u32 {
        match self {
            TaskKind::Conversation => 512,
            TaskKind::Classification => 256,
            TaskKind::Diagnosis => 2048,
            TaskKind::AlertDecision => 256,
            TaskKind::Extraction => 256,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Conversation => "conversation",
            TaskKind::Classification => "classification",
            TaskKind::Diagnosis => "diagnosis",
            TaskKind::AlertDecision => "alert_decision",
            TaskKind::Extraction => "extraction",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub task: TaskKind,
    pub messages: Vec<ChatMessage>,
    /// Overrides the task default when set
    pub temperature: Option<f32>,
    pub max_output_tokens: u32,
}

impl GenerationRequest {
    pub fn new(task: TaskKind, messages: Vec<ChatMessage>) -> Self {
        Self {
            task,
            messages,
            temperature: None,
            max_output_tokens: task.max_output_tokens(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn effective_temperature(&self) -> f32 {
        self.temperature.unwrap_or_else(|| self.task.temperature())
    }
}

/// Opaque text generation capability
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<String>;

    /// Model label for health reporting
    fn model_name(&self) -> String {
        "unknown".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_temperatures() {
        let req = GenerationRequest::new(TaskKind::AlertDecision, vec![ChatMessage::user("x")]);
        assert_eq!(req.effective_temperature(), 0.0);
        assert_eq!(req.with_temperature(0.5).effective_temperature(), 0.5);
        assert!(TaskKind::Diagnosis.temperature() > TaskKind::Classification.temperature());
    }
}
