//! Shared test doubles for the integration suites.
#![allow(dead_code)]

use agrosense_core::gateway::{
    ConversationMemory, DeferredQueue, DiagnosisRunner, GatewayConfig, GatewayParts, RateLimitConfig,
    RateLimiter,
};
use agrosense_core::llm::TaskKind;
use agrosense_core::pipeline::PipelineConfig;
use agrosense_core::providers::{
    AlertConfig, RagRetrieval, RegionalDataProvider, SearchBackend, WebhookAlertDispatcher,
};
use agrosense_core::session::InMemorySessionStore;
use agrosense_core::{
    AgroError, AssetCategory, ContextBus, ConversationGateway, DiagnosisPipeline, GenerationRequest,
    Result, SessionManager, TextGenerator,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const READY_REPLY: &str =
    "I have enough information to provide detailed analysis. Let me consult our expert system...";

pub const MAIZE_CLASSIFICATION: &str =
    r#"{"asset_category": "CROP", "asset_name": "maize", "intent": "disease_diagnosis"}"#;

pub const MAIZE_DIAGNOSIS: &str =
    "Primary diagnosis: Maize Lethal Necrosis. Remove affected plants within 48 hours.";

pub const HIGH_ALERT: &str =
    r#"{"alert_triggered": true, "severity": "HIGH", "reason": "Rapidly spreading maize disease"}"#;

pub const NO_ALERT: &str = r#"{"alert_triggered": false, "severity": "LOW", "reason": "routine"}"#;

pub const MAIZE_INTAKE: &str = r#"{"crop_or_livestock": "maize", "region": "Eldoret", "issue": "yellow leaves", "additional_details": null}"#;

// =============================================================================
// Scripted generator
// =============================================================================

/// Answers each task kind with a fixed reply. Kinds without a script fail.
#[derive(Default)]
pub struct ScriptedGenerator {
    replies: Mutex<HashMap<TaskKind, String>>,
    calls: Mutex<Vec<TaskKind>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// A generator that walks the maize/Eldoret happy path
    pub fn maize() -> Self {
        Self::new()
            .with(TaskKind::Conversation, READY_REPLY)
            .with(TaskKind::Extraction, MAIZE_INTAKE)
            .with(TaskKind::Classification, MAIZE_CLASSIFICATION)
            .with(TaskKind::Diagnosis, MAIZE_DIAGNOSIS)
            .with(TaskKind::AlertDecision, HIGH_ALERT)
    }

    pub fn with(self, task: TaskKind, reply: &str) -> Self {
        self.set(task, reply);
        self
    }

    pub fn set(&self, task: TaskKind, reply: &str) {
        self.replies.lock().unwrap().insert(task, reply.to_string());
    }

    pub fn unset(&self, task: TaskKind) {
        self.replies.lock().unwrap().remove(&task);
    }

    pub fn calls(&self, task: TaskKind) -> usize {
        self.calls.lock().unwrap().iter().filter(|t| **t == task).count()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String> {
        self.calls.lock().unwrap().push(request.task);
        self.replies
            .lock()
            .unwrap()
            .get(&request.task)
            .cloned()
            .ok_or_else(|| AgroError::Generation(format!("no script for {}", request.task.as_str())))
    }

    fn model_name(&self) -> String {
        "scripted".to_string()
    }
}

// =============================================================================
// Search backends
// =============================================================================

pub struct FailingSearchBackend;

#[async_trait]
impl SearchBackend for FailingSearchBackend {
    async fn query(&self, _query: &str, _category: AssetCategory, _top_k: usize) -> Result<Vec<Value>> {
        Err(AgroError::CapabilityUnavailable("search index offline".into()))
    }
}

/// Returns the same raw matches for every query
pub struct StaticSearchBackend(pub Vec<Value>);

#[async_trait]
impl SearchBackend for StaticSearchBackend {
    async fn query(&self, _query: &str, _category: AssetCategory, top_k: usize) -> Result<Vec<Value>> {
        Ok(self.0.iter().take(top_k).cloned().collect())
    }
}

// =============================================================================
// Wiring
// =============================================================================

pub fn pipeline_with(
    bus: Arc<ContextBus>,
    generator: Arc<dyn TextGenerator>,
    backend: Option<Arc<dyn SearchBackend>>,
) -> DiagnosisPipeline {
    let knowledge = Arc::new(RagRetrieval::new(bus.clone(), backend, Duration::from_secs(2)));
    let regional = Arc::new(RegionalDataProvider::new(bus.clone(), None, Duration::from_secs(2)));
    let alerts = Arc::new(
        WebhookAlertDispatcher::new(
            bus.clone(),
            AlertConfig {
                webhook_url: None,
                timeout_ms: 1000,
            },
        )
        .unwrap(),
    );
    DiagnosisPipeline::new(
        bus,
        generator,
        knowledge,
        regional,
        alerts,
        PipelineConfig {
            stage_timeout_ms: 5000,
            knowledge_top_k: 5,
        },
    )
}

/// Fully wired gateway over in-memory stores with a hand-drained job queue
pub struct Harness {
    pub bus: Arc<ContextBus>,
    pub generator: Arc<ScriptedGenerator>,
    pub sessions: Arc<SessionManager>,
    pub memory: Arc<ConversationMemory>,
    pub queue: Arc<DeferredQueue>,
    pub runner: Arc<DiagnosisRunner>,
    pub gateway: ConversationGateway,
}

impl Harness {
    pub fn new(generator: ScriptedGenerator) -> Self {
        Self::with_config(
            generator,
            GatewayConfig {
                max_session_messages: 100,
                memory_exchanges: 10,
                session_ttl_secs: 3600,
                generation_timeout_ms: 5000,
            },
            RateLimitConfig {
                requests: 1000,
                window_secs: 60,
            },
        )
    }

    pub fn with_config(generator: ScriptedGenerator, config: GatewayConfig, limits: RateLimitConfig) -> Self {
        let bus = Arc::new(ContextBus::new());
        let generator = Arc::new(generator);
        let sessions = Arc::new(SessionManager::new(
            Arc::new(InMemorySessionStore::new()),
            Duration::from_secs(config.session_ttl_secs),
        ));
        let memory = Arc::new(ConversationMemory::new(config.memory_exchanges));
        let queue = Arc::new(DeferredQueue::new());

        let pipeline = Arc::new(pipeline_with(bus.clone(), generator.clone(), None));
        let runner = Arc::new(DiagnosisRunner::new(pipeline, sessions.clone(), memory.clone()));
        let regional = Arc::new(RegionalDataProvider::new(bus.clone(), None, Duration::from_secs(2)));

        let gateway = ConversationGateway::new(
            GatewayParts {
                sessions: sessions.clone(),
                memory: memory.clone(),
                generator: generator.clone(),
                queue: queue.clone(),
                bus: bus.clone(),
                regional,
                rate_limiter: Arc::new(RateLimiter::new(limits)),
            },
            config,
        );

        Self {
            bus,
            generator,
            sessions,
            memory,
            queue,
            runner,
            gateway,
        }
    }

    pub async fn drain(&self) -> Vec<agrosense_core::PipelineReport> {
        self.queue.drain(&self.runner).await
    }
}
