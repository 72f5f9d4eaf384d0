use super::{ChatMessage, GenerationRequest, TaskKind, TextGenerator};
use crate::{AgroError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Configuration for LlmClient loaded from environment variables
#[derive(Debug, Clone)]
pub struct LlmClientConfig {
    pub base_url: String, // e.g., https://api.openai.com/v1
    pub model: String,
    pub api_key: Option<String>,
    pub request_timeout_ms: u64,
    /// Conversation temperature; structured tasks use their own
    pub temperature: f32,
}

impl Default for LlmClientConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var("LLM_BASE_URL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "http://localhost:8000/v1".to_string()),
            model: std::env::var("LLM_MODEL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            api_key: std::env::var("LLM_API_KEY").ok().filter(|s| !s.is_empty()),
            request_timeout_ms: std::env::var("LLM_REQUEST_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30_000),
            temperature: std::env::var("LLM_TEMPERATURE")
                .ok()
                .and_then(|v| v.parse::<f32>().ok())
                .unwrap_or(0.7),
        }
    }
}

/// HTTP client that prefers the OpenAI Responses API and falls back to Chat Completions
#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    cfg: LlmClientConfig,
}

impl LlmClient {
    pub fn new(cfg: LlmClientConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .build()
            .map_err(|e| AgroError::Generation(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { http, cfg })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(LlmClientConfig::default())
    }

    pub fn config(&self) -> &LlmClientConfig {
        &self.cfg
    }

    fn temperature_for(&self, request: &GenerationRequest) -> f32 {
        match (request.temperature, request.task) {
            (Some(t), _) => t,
            (None, TaskKind::Conversation) => self.cfg.temperature,
            (None, task) => task.temperature(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.cfg.base_url.trim_end_matches('/'), path)
    }

    async fn try_responses(&self, request: &GenerationRequest, temperature: f32) -> Option<String> {
        let url = self.endpoint("responses");
        debug!(target: "llm_client", task = request.task.as_str(), "POST {} via Responses API", url);

        let (instructions, input) = split_for_responses(&request.messages);
        let mut body = json!({
            "model": self.cfg.model,
            "input": input,
            "max_output_tokens": request.max_output_tokens,
            "temperature": temperature,
        });
        if !instructions.is_empty() {
            body["instructions"] = Value::String(instructions);
        }

        let mut req = self.http.post(&url).header("content-type", "application/json");
        if let Some(key) = &self.cfg.api_key {
            req = req.bearer_auth(key);
        }

        match req.json(&body).send().await {
            Ok(resp) if resp.status().is_success() => match resp.json::<Value>().await {
                Ok(val) => extract_text_from_responses(&val),
                Err(e) => {
                    warn!(target: "llm_client", error = %e, "Failed to parse Responses JSON; trying chat.completions fallback");
                    None
                }
            },
            // Endpoint missing; try chat fallback
            Ok(resp) if resp.status() == StatusCode::NOT_FOUND => None,
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                warn!(target: "llm_client", %status, body = %body, "Responses API error; trying chat.completions fallback");
                None
            }
            Err(err) => {
                warn!(target: "llm_client", error = %err, "Responses API request failed; trying chat.completions fallback");
                None
            }
        }
    }

    async fn chat_completions(&self, request: &GenerationRequest, temperature: f32) -> Result<String> {
        let url = self.endpoint("chat/completions");
        debug!(target: "llm_client", task = request.task.as_str(), "POST {} via Chat Completions", url);

        let mut req = self.http.post(&url).header("content-type", "application/json");
        if let Some(key) = &self.cfg.api_key {
            req = req.bearer_auth(key);
        }

        let body = json!({
            "model": self.cfg.model,
            "messages": request.messages,
            "max_tokens": request.max_output_tokens,
            "temperature": temperature,
        });

        let resp = req
            .json(&body)
            .send()
            .await
            .map_err(|e| AgroError::Generation(format!("Chat Completions HTTP error: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            error!(target: "llm_client", %status, body = %text, "Chat Completions error");
            return Err(AgroError::Generation(format!(
                "Chat Completions error: status={}",
                status
            )));
        }

        let val: Value = resp.json().await.map_err(|e| {
            AgroError::Generation(format!("Failed to parse Chat Completions JSON: {e}"))
        })?;
        extract_text_from_chat_completions(&val).ok_or_else(|| {
            AgroError::Generation("Missing choices[0].message.content in chat completions".into())
        })
    }
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn generate(&self, request: GenerationRequest) -> Result<String> {
        let temperature = self.temperature_for(&request);
        if let Some(text) = self.try_responses(&request, temperature).await {
            return Ok(text);
        }
        self.chat_completions(&request, temperature).await
    }

    fn model_name(&self) -> String {
        self.cfg.model.clone()
    }
}

/// System messages become Responses `instructions`; the rest becomes the input list
fn split_for_responses(messages: &[ChatMessage]) -> (String, Vec<Value>) {
    let mut instructions = Vec::new();
    let mut input = Vec::new();
    for m in messages {
        if m.role == "system" {
            instructions.push(m.content.as_str());
        } else {
            input.push(json!({ "role": m.role, "content": m.content }));
        }
    }
    (instructions.join("\n\n"), input)
}

fn extract_text_from_chat_completions(v: &Value) -> Option<String> {
    v.get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
        .map(|s| s.to_string())
}

fn extract_text_from_responses(v: &Value) -> Option<String> {
    if let Some(s) = v.get("output_text").and_then(|x| x.as_str()) {
        if !s.is_empty() {
            return Some(s.to_string());
        }
    }
    if let Some(arr) = v.get("output").and_then(|x| x.as_array()) {
        let mut acc = String::new();
        for item in arr {
            if let Some(contents) = item.get("content").and_then(|c| c.as_array()) {
                for c in contents {
                    if let Some(t) = c
                        .get("text")
                        .and_then(|t| t.get("value"))
                        .and_then(|v| v.as_str())
                    {
                        acc.push_str(t);
                    } else if let Some(t) = c.get("text").and_then(|v| v.as_str()) {
                        acc.push_str(t);
                    }
                }
            }
        }
        if !acc.is_empty() {
            return Some(acc);
        }
    }
    extract_text_from_chat_completions(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_responses_output_array() {
        let v = json!({
            "output": [
                {"type": "message", "content": [
                    {"type": "output_text", "text": "Apply "},
                    {"type": "output_text", "text": {"value": "fungicide."}}
                ]}
            ]
        });
        assert_eq!(extract_text_from_responses(&v).as_deref(), Some("Apply fungicide."));
    }

    #[test]
    fn test_extract_chat_completions() {
        let v = json!({"choices": [{"message": {"role": "assistant", "content": "Hello"}}]});
        assert_eq!(extract_text_from_chat_completions(&v).as_deref(), Some("Hello"));
        assert!(extract_text_from_chat_completions(&json!({"choices": []})).is_none());
    }

    #[test]
    fn test_split_for_responses() {
        let (instructions, input) = split_for_responses(&[
            ChatMessage::system("be brief"),
            ChatMessage::user("hi"),
            ChatMessage::assistant("hello"),
        ]);
        assert_eq!(instructions, "be brief");
        assert_eq!(input.len(), 2);
        assert_eq!(input[1]["role"], "assistant");
    }

    #[test]
    fn test_conversation_uses_configured_temperature() {
        let client = LlmClient::new(LlmClientConfig {
            base_url: "http://localhost:1/v1".into(),
            model: "m".into(),
            api_key: None,
            request_timeout_ms: 100,
            temperature: 0.9,
        })
        .unwrap();
        let conv = GenerationRequest::new(TaskKind::Conversation, vec![]);
        let alert = GenerationRequest::new(TaskKind::AlertDecision, vec![]);
        assert_eq!(client.temperature_for(&conv), 0.9);
        assert_eq!(client.temperature_for(&alert), 0.0);
    }
}
