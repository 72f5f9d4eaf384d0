use super::Stage;
use crate::context::{ContextBus, ContextRecord, ContextUpdate, DIAGNOSIS_UNAVAILABLE};
use crate::llm::prompts::{self, DiagnosisInputs};
use crate::llm::structured::{extract_json_object, str_field};
use crate::llm::{GenerationRequest, TextGenerator};
use crate::providers::{AlertDispatch, AlertOutcome, KnowledgeRetrieval, RegionalDataFetch};
use crate::schema::{Classification, Severity};
use crate::{AgroError, Result};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

const ALERT_MESSAGE_CHARS: usize = 280;

/// Configuration for the diagnosis pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Upper bound for each generation call
    pub stage_timeout_ms: u64,
    /// Documents requested from knowledge retrieval
    pub knowledge_top_k: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stage_timeout_ms: std::env::var("PIPELINE_STAGE_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60_000),
            knowledge_top_k: std::env::var("KNOWLEDGE_TOP_K")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|k| *k > 0)
                .unwrap_or(5),
        }
    }
}

/// Result of one pipeline run
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub session_id: String,
    /// `Done` or `Failed`
    pub final_stage: Stage,
    pub failed_stage: Option<Stage>,
    /// Operator-facing detail; never shown to farmers
    pub error: Option<String>,
    pub diagnosis: Option<String>,
    pub classification: Option<Classification>,
    pub alert_triggered: bool,
    pub alert_severity: Option<Severity>,
    pub documents_retrieved: usize,
}

impl PipelineReport {
    pub fn is_success(&self) -> bool {
        self.final_stage == Stage::Done
    }

    fn from_record(record: Option<ContextRecord>, session_id: &str, final_stage: Stage) -> Self {
        match record {
            Some(r) => Self {
                session_id: session_id.to_string(),
                final_stage,
                failed_stage: None,
                error: None,
                diagnosis: r.is_diagnosis_complete().then(|| r.final_diagnosis.clone()),
                classification: Some(r.classification()),
                alert_triggered: r.alert_triggered,
                alert_severity: r.alert_severity,
                documents_retrieved: r.retrieved_documents.len(),
            },
            None => Self {
                session_id: session_id.to_string(),
                final_stage,
                failed_stage: None,
                error: None,
                diagnosis: None,
                classification: None,
                alert_triggered: false,
                alert_severity: None,
                documents_retrieved: 0,
            },
        }
    }
}

/// Strictly sequential stage runner over the Context Bus
pub struct DiagnosisPipeline {
    bus: Arc<ContextBus>,
    generator: Arc<dyn TextGenerator>,
    knowledge: Arc<dyn KnowledgeRetrieval>,
    regional: Arc<dyn RegionalDataFetch>,
    alerts: Arc<dyn AlertDispatch>,
    config: PipelineConfig,
}

impl DiagnosisPipeline {
    pub fn new(
        bus: Arc<ContextBus>,
        generator: Arc<dyn TextGenerator>,
        knowledge: Arc<dyn KnowledgeRetrieval>,
        regional: Arc<dyn RegionalDataFetch>,
        alerts: Arc<dyn AlertDispatch>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            bus,
            generator,
            knowledge,
            regional,
            alerts,
            config,
        }
    }

    pub fn bus(&self) -> &Arc<ContextBus> {
        &self.bus
    }

    /// Run every stage from CLASSIFY. The first failing stage ends the run;
    /// fields already written to the record stay in place.
    #[instrument(skip(self, query, region), fields(session = %session_id), target = "pipeline")]
    pub async fn run(&self, session_id: &str, query: &str, region: &str) -> PipelineReport {
        if let Err(e) = self.bus.create_session(session_id, query, region).await {
            error!(target: "pipeline", session = %session_id, error = %e, "Could not open context session");
            return self.failed(session_id, Stage::Classify, e).await;
        }

        info!(target: "pipeline", session = %session_id, "Pipeline started");

        let mut stage = Stage::Classify;
        while !stage.is_terminal() {
            debug!(target: "pipeline", session = %session_id, stage = %stage, "Entering stage");
            if let Err(e) = self.run_stage(stage, session_id).await {
                error!(target: "pipeline", session = %session_id, stage = %stage, error = %e, "Stage failed");
                return self.failed(session_id, stage, e).await;
            }
            stage = stage.next();
        }

        let record = self.bus.get(session_id).await.ok().flatten();
        let report = PipelineReport::from_record(record, session_id, Stage::Done);
        info!(
            target: "pipeline",
            session = %session_id,
            documents = report.documents_retrieved,
            alert = report.alert_triggered,
            "Pipeline complete"
        );
        report
    }

    async fn run_stage(&self, stage: Stage, session_id: &str) -> Result<()> {
        match stage {
            Stage::Classify => self.classify(session_id).await,
            Stage::RetrieveKnowledge => self.retrieve(session_id).await,
            Stage::FetchRegional => self.fetch_regional(session_id).await,
            Stage::SynthesizeDiagnosis => self.synthesize(session_id).await,
            Stage::EvaluateAlert => self.evaluate_alert(session_id).await,
            Stage::Done | Stage::Failed => Ok(()),
        }
    }

    async fn failed(&self, session_id: &str, stage: Stage, err: AgroError) -> PipelineReport {
        let record = self.bus.get(session_id).await.ok().flatten();
        let mut report = PipelineReport::from_record(record, session_id, Stage::Failed);
        report.failed_stage = Some(stage);
        report.error = Some(err.to_string());
        report
    }

    async fn record(&self, session_id: &str) -> Result<ContextRecord> {
        self.bus
            .get(session_id)
            .await?
            .ok_or_else(|| AgroError::SessionNotFound(session_id.to_string()))
    }

    async fn generate(&self, request: GenerationRequest) -> Result<String> {
        let task = request.task;
        let timeout = Duration::from_millis(self.config.stage_timeout_ms);
        match tokio::time::timeout(timeout, self.generator.generate(request)).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(AgroError::Generation(msg))) => Err(AgroError::Generation(msg)),
            Ok(Err(e)) => Err(AgroError::Generation(format!("{}: {}", task.as_str(), e))),
            Err(_) => Err(AgroError::Generation(format!(
                "{} timed out after {}ms",
                task.as_str(),
                self.config.stage_timeout_ms
            ))),
        }
    }

    async fn classify(&self, session_id: &str) -> Result<()> {
        let record = self.record(session_id).await?;
        let text = self
            .generate(prompts::classification(&record.query, &record.region))
            .await?;
        let fields = extract_json_object(&text).ok_or_else(|| {
            AgroError::Generation("classification output contained no JSON object".into())
        })?;

        let mut update = ContextUpdate::new().asset_name(str_field(&fields, "asset_name"));
        if let Some(category) =
            str_field(&fields, "asset_category").or_else(|| str_field(&fields, "asset_type"))
        {
            update = update.asset_category_raw(category);
        }
        if let Some(intent) = str_field(&fields, "intent") {
            update = update.intent_raw(intent);
        }

        let record = self.bus.update(session_id, update).await?;
        info!(
            target: "pipeline",
            session = %session_id,
            category = %record.asset_category,
            asset = record.asset_name.as_deref().unwrap_or("N/A"),
            intent = %record.intent,
            "Query classified"
        );
        Ok(())
    }

    async fn retrieve(&self, session_id: &str) -> Result<()> {
        let record = self.record(session_id).await?;
        let count = self
            .knowledge
            .search(
                session_id,
                &record.query,
                record.asset_category,
                self.config.knowledge_top_k,
            )
            .await?;
        debug!(target: "pipeline", session = %session_id, count, "Knowledge retrieved");
        Ok(())
    }

    async fn fetch_regional(&self, session_id: &str) -> Result<()> {
        let record = self.record(session_id).await?;
        let summary = self
            .regional
            .fetch(session_id, &record.region, record.asset_name.as_deref())
            .await?;
        debug!(target: "pipeline", session = %session_id, summary = %summary, "Regional data fetched");
        Ok(())
    }

    async fn synthesize(&self, session_id: &str) -> Result<()> {
        let record = self.record(session_id).await?;
        let inputs = DiagnosisInputs {
            query: &record.query,
            region: &record.region,
            asset_category: record.asset_category,
            asset_name: record.asset_name.as_deref(),
            intent: record.intent,
            documents: &record.retrieved_documents,
            weather: describe_weather(record.regional_data.get("weather").map(|p| &p.data)),
            market: describe_market(record.regional_data.get("market_prices").map(|p| &p.data)),
        };

        let text = self.generate(prompts::diagnosis(&inputs)).await?;
        let diagnosis = match text.trim() {
            "" => {
                warn!(target: "pipeline", session = %session_id, "Empty diagnosis from generator; using fallback text");
                DIAGNOSIS_UNAVAILABLE.to_string()
            }
            t => t.to_string(),
        };

        self.bus
            .update(session_id, ContextUpdate::new().final_diagnosis(diagnosis))
            .await?;
        Ok(())
    }

    async fn evaluate_alert(&self, session_id: &str) -> Result<()> {
        let record = self.record(session_id).await?;
        let text = self
            .generate(prompts::alert_decision(
                &record.final_diagnosis,
                record.asset_category,
                record.asset_name.as_deref(),
            ))
            .await?;
        let decision = extract_json_object(&text).ok_or_else(|| {
            AgroError::Generation("alert decision output contained no JSON object".into())
        })?;

        let triggered = match decision.get("alert_triggered") {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        };
        if !triggered {
            debug!(target: "pipeline", session = %session_id, "No alert required");
            return Ok(());
        }

        let severity = str_field(&decision, "severity").unwrap_or_else(|| "LOW".to_string());
        let message = str_field(&decision, "reason")
            .unwrap_or_else(|| record.final_diagnosis.chars().take(ALERT_MESSAGE_CHARS).collect());

        // Dispatch problems never fail the run
        match self.alerts.send(session_id, &severity, &message).await {
            Ok(AlertOutcome::Dispatched { severity, simulated }) => {
                info!(target: "pipeline", session = %session_id, severity = %severity, simulated, "Alert dispatched");
            }
            Ok(outcome) => {
                warn!(target: "pipeline", session = %session_id, outcome = ?outcome, "Alert not dispatched");
            }
            Err(e) => {
                warn!(target: "pipeline", session = %session_id, error = %e, "Alert dispatch errored");
            }
        }
        Ok(())
    }
}

fn describe_weather(data: Option<&Value>) -> String {
    let Some(data) = data else {
        return "No weather data.".to_string();
    };
    let summary = data
        .get("forecast_summary")
        .and_then(Value::as_str)
        .unwrap_or("No forecast");
    let risk = data
        .get("next_48h_risk")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let source = data.get("source").and_then(Value::as_str).unwrap_or("unknown");
    format!("{} Risk: {} (source: {})", summary, risk, source)
}

fn describe_market(data: Option<&Value>) -> String {
    let Some(data) = data else {
        return "No market data.".to_string();
    };
    let commodity = data
        .get("commodity")
        .and_then(Value::as_str)
        .unwrap_or("Commodity");
    let price = data
        .get("current_price")
        .map(|v| v.to_string())
        .unwrap_or_else(|| "?".to_string());
    let currency = data.get("currency").and_then(Value::as_str).unwrap_or("");
    let trend = data.get("trend").and_then(Value::as_str).unwrap_or("unknown");
    format!("{}: {} {}, trend {}", commodity, price, currency, trend)
}
