use std::fs;
use std::path::Path;

use agrosense_core::gateway::RateLimitConfig;
use agrosense_core::llm::LlmClientConfig;
use agrosense_core::pipeline::PipelineConfig;
use agrosense_core::providers::{AlertConfig, KnowledgeConfig, WeatherConfig};
use agrosense_core::session::SessionConfig;

/// Listener, CORS and worker settings
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Empty means any origin
    pub allowed_origins: Vec<String>,
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub redis_url: Option<String>,
    pub sweep_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("AGROSENSE_HOST")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            port: std::env::var("AGROSENSE_PORT")
                .ok()
                .and_then(|v| v.parse::<u16>().ok())
                .unwrap_or(8000),
            allowed_origins: std::env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|v| parse_origins(&v))
                .unwrap_or_default(),
            worker_count: std::env::var("WORKER_COUNT")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(4),
            queue_capacity: std::env::var("JOB_QUEUE_CAPACITY")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(256),
            redis_url: std::env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
            sweep_interval_secs: std::env::var("SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(60),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Comma-separated origins; `*` alone means any
fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty() && *o != "*")
        .map(str::to_string)
        .collect()
}

/// Everything the server wires together
#[derive(Clone, Debug, Default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub llm: LlmClientConfig,
    pub knowledge: KnowledgeConfig,
    pub weather: WeatherConfig,
    pub alert: AlertConfig,
    pub session: SessionConfig,
    pub pipeline: PipelineConfig,
    pub rate_limit: RateLimitConfig,
}

impl AppConfig {
    /// Env-driven defaults overlaid with the TOML file at `AGROSENSE_CONFIG`
    /// or ./agrosense.toml when present. Load `.env` before calling.
    pub fn load() -> Self {
        let default = Self::default();
        let path = std::env::var("AGROSENSE_CONFIG").unwrap_or_else(|_| "agrosense.toml".into());
        let p = Path::new(&path);
        if !p.exists() {
            tracing::info!(target: "bridge", path = %path, "No TOML config found; using defaults/env");
            return default;
        }
        match fs::read_to_string(p) {
            Ok(s) => match Self::overlay_toml(default.clone(), &s) {
                Ok(cfg) => {
                    tracing::info!(target: "bridge", path = %path, "Loaded TOML config");
                    cfg
                }
                Err(e) => {
                    tracing::warn!(target: "bridge", error = %e, "Failed to parse TOML; using defaults");
                    default
                }
            },
            Err(e) => {
                tracing::warn!(target: "bridge", error = %e, "Failed to read TOML; using defaults");
                default
            }
        }
    }

    pub fn overlay_toml(base: Self, raw: &str) -> Result<Self, toml::de::Error> {
        let parsed = toml::from_str::<AppToml>(raw)?;
        Ok(parsed.overlay(base))
    }
}

// =========================
// TOML overlay definitions
// =========================

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct AppToml {
    pub server: Option<ServerToml>,
    pub llm: Option<LlmToml>,
    pub knowledge: Option<KnowledgeToml>,
    pub alert: Option<AlertToml>,
    pub session: Option<SessionToml>,
    pub pipeline: Option<PipelineToml>,
    pub rate_limit: Option<RateLimitToml>,
}

impl AppToml {
    fn overlay(self, mut base: AppConfig) -> AppConfig {
        if let Some(s) = self.server {
            s.apply(&mut base.server);
        }
        if let Some(l) = self.llm {
            l.apply(&mut base.llm);
        }
        if let Some(k) = self.knowledge {
            k.apply(&mut base.knowledge);
        }
        if let Some(a) = self.alert {
            a.apply(&mut base.alert);
        }
        if let Some(s) = self.session {
            s.apply(&mut base.session);
        }
        if let Some(p) = self.pipeline {
            p.apply(&mut base.pipeline);
        }
        if let Some(r) = self.rate_limit {
            r.apply(&mut base.rate_limit);
        }
        base
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct ServerToml {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub allowed_origins: Option<Vec<String>>,
    pub worker_count: Option<usize>,
    pub queue_capacity: Option<usize>,
    pub redis_url: Option<String>,
    pub sweep_interval_secs: Option<u64>,
}

impl ServerToml {
    fn apply(self, cfg: &mut ServerConfig) {
        if let Some(v) = self.host {
            cfg.host = v;
        }
        if let Some(v) = self.port {
            cfg.port = v;
        }
        if let Some(v) = self.allowed_origins {
            cfg.allowed_origins = parse_origins(&v.join(","));
        }
        if let Some(v) = self.worker_count.filter(|n| *n > 0) {
            cfg.worker_count = v;
        }
        if let Some(v) = self.queue_capacity.filter(|n| *n > 0) {
            cfg.queue_capacity = v;
        }
        if let Some(v) = self.redis_url.filter(|s| !s.is_empty()) {
            cfg.redis_url = Some(v);
        }
        if let Some(v) = self.sweep_interval_secs.filter(|n| *n > 0) {
            cfg.sweep_interval_secs = v;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct LlmToml {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub request_timeout_ms: Option<u64>,
    pub temperature: Option<f32>,
}

impl LlmToml {
    fn apply(self, cfg: &mut LlmClientConfig) {
        if let Some(v) = self.base_url {
            cfg.base_url = v;
        }
        if let Some(v) = self.model {
            cfg.model = v;
        }
        if let Some(v) = self.api_key.filter(|s| !s.is_empty()) {
            cfg.api_key = Some(v);
        }
        if let Some(v) = self.request_timeout_ms {
            cfg.request_timeout_ms = v;
        }
        if let Some(v) = self.temperature {
            cfg.temperature = v;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct KnowledgeToml {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub timeout_ms: Option<u64>,
}

impl KnowledgeToml {
    fn apply(self, cfg: &mut KnowledgeConfig) {
        if let Some(v) = self.endpoint.filter(|s| !s.is_empty()) {
            cfg.endpoint = Some(v);
        }
        if let Some(v) = self.api_key.filter(|s| !s.is_empty()) {
            cfg.api_key = Some(v);
        }
        if let Some(v) = self.timeout_ms {
            cfg.timeout_ms = v;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct AlertToml {
    pub webhook_url: Option<String>,
    pub timeout_ms: Option<u64>,
}

impl AlertToml {
    fn apply(self, cfg: &mut AlertConfig) {
        if let Some(v) = self.webhook_url.filter(|s| !s.is_empty()) {
            cfg.webhook_url = Some(v);
        }
        if let Some(v) = self.timeout_ms {
            cfg.timeout_ms = v;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct SessionToml {
    pub ttl_secs: Option<u64>,
    pub max_messages: Option<usize>,
}

impl SessionToml {
    fn apply(self, cfg: &mut SessionConfig) {
        if let Some(v) = self.ttl_secs {
            cfg.ttl_secs = v;
        }
        if let Some(v) = self.max_messages {
            cfg.max_messages = v;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct PipelineToml {
    pub stage_timeout_ms: Option<u64>,
    pub knowledge_top_k: Option<usize>,
}

impl PipelineToml {
    fn apply(self, cfg: &mut PipelineConfig) {
        if let Some(v) = self.stage_timeout_ms {
            cfg.stage_timeout_ms = v;
        }
        if let Some(v) = self.knowledge_top_k.filter(|k| *k > 0) {
            cfg.knowledge_top_k = v;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct RateLimitToml {
    pub requests: Option<u32>,
    pub window_secs: Option<u64>,
}

impl RateLimitToml {
    fn apply(self, cfg: &mut RateLimitConfig) {
        if let Some(v) = self.requests {
            cfg.requests = v;
        }
        if let Some(v) = self.window_secs {
            cfg.window_secs = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlay_replaces_only_given_keys() {
        let mut base = AppConfig::default();
        base.server.port = 8000;
        base.session.max_messages = 100;

        let cfg = AppConfig::overlay_toml(
            base,
            r#"
            [server]
            port = 9090
            allowed_origins = ["https://farm.example", "*"]

            [rate_limit]
            requests = 5

            [llm]
            model = "local-model"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.server.port, 9090);
        assert_eq!(cfg.server.allowed_origins, vec!["https://farm.example".to_string()]);
        assert_eq!(cfg.rate_limit.requests, 5);
        assert_eq!(cfg.llm.model, "local-model");
        assert_eq!(cfg.session.max_messages, 100);
    }

    #[test]
    fn test_bad_toml_is_error() {
        assert!(AppConfig::overlay_toml(AppConfig::default(), "[server\nport=").is_err());
    }

    #[test]
    fn test_parse_origins() {
        assert!(parse_origins("*").is_empty());
        assert_eq!(parse_origins(" a.com , b.com,"), vec!["a.com", "b.com"]);
    }
}
