//! Alert escalation to an automation webhook.

use super::AlertDispatch;
use crate::context::{ContextBus, ContextUpdate};
use crate::schema::{AutomationPayload, Severity};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Unset means dispatch is simulated and logged
    pub webhook_url: Option<String>,
    pub timeout_ms: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            webhook_url: std::env::var("ALERT_WEBHOOK_URL")
                .ok()
                .filter(|s| !s.is_empty()),
            timeout_ms: std::env::var("ALERT_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(10_000),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlertOutcome {
    Dispatched { severity: Severity, simulated: bool },
    /// Nothing was written to the bus
    Failed { reason: String },
    SessionNotFound,
}

impl AlertOutcome {
    pub fn is_dispatched(&self) -> bool {
        matches!(self, AlertOutcome::Dispatched { .. })
    }
}

pub struct WebhookAlertDispatcher {
    bus: Arc<ContextBus>,
    http: reqwest::Client,
    config: AlertConfig,
}

impl WebhookAlertDispatcher {
    pub fn new(bus: Arc<ContextBus>, config: AlertConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self { bus, http, config })
    }

    async fn post(&self, url: &str, payload: &AutomationPayload) -> std::result::Result<(), String> {
        let resp = self
            .http
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| format!("webhook request failed: {}", e))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(format!("webhook returned status {}", resp.status()))
        }
    }
}

#[async_trait]
impl AlertDispatch for WebhookAlertDispatcher {
    async fn send(&self, session_id: &str, severity: &str, message: &str) -> Result<AlertOutcome> {
        let Some(record) = self.bus.get(session_id).await? else {
            warn!(target: "alert", session = %session_id, "Alert requested for unknown session");
            return Ok(AlertOutcome::SessionNotFound);
        };

        let severity = match severity.parse::<Severity>() {
            Ok(s) => s,
            Err(_) => {
                warn!(target: "alert", session = %session_id, value = %severity, "Invalid alert severity; defaulting to LOW");
                Severity::Low
            }
        };

        let payload = match AutomationPayload::new(severity, record.region.clone(), record.asset_category, message) {
            Ok(p) => p,
            Err(e) => {
                warn!(target: "alert", session = %session_id, error = %e, "Alert payload rejected");
                return Ok(AlertOutcome::Failed {
                    reason: e.to_string(),
                });
            }
        };

        let simulated = match &self.config.webhook_url {
            Some(url) => {
                if let Err(reason) = self.post(url, &payload).await {
                    error!(target: "alert", session = %session_id, reason = %reason, "Alert dispatch failed; context not updated");
                    return Ok(AlertOutcome::Failed { reason });
                }
                info!(target: "alert", session = %session_id, severity = %severity, "Alert sent to webhook");
                false
            }
            None => {
                info!(
                    target: "alert",
                    session = %session_id,
                    severity = %severity,
                    region = %payload.region,
                    message = %payload.message,
                    "Alert simulated (no webhook configured)"
                );
                true
            }
        };

        self.bus
            .update(session_id, ContextUpdate::new().alert(severity, payload))
            .await?;

        Ok(AlertOutcome::Dispatched {
            severity,
            simulated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher(bus: Arc<ContextBus>, webhook_url: Option<String>) -> WebhookAlertDispatcher {
        WebhookAlertDispatcher::new(
            bus,
            AlertConfig {
                webhook_url,
                timeout_ms: 500,
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_invalid_severity_coerces_to_low() {
        let bus = Arc::new(ContextBus::new());
        bus.create_session("s1", "q", "Nakuru").await.unwrap();

        let outcome = dispatcher(bus.clone(), None)
            .send("s1", "urgent", "Armyworm outbreak")
            .await
            .unwrap();

        assert_eq!(
            outcome,
            AlertOutcome::Dispatched {
                severity: Severity::Low,
                simulated: true
            }
        );
        let record = bus.get("s1").await.unwrap().unwrap();
        assert!(record.alert_triggered);
        assert_eq!(record.alert_severity, Some(Severity::Low));
        assert_eq!(record.alert_payload.unwrap().region, "Nakuru");
    }

    #[tokio::test]
    async fn test_unknown_session_outcome() {
        let bus = Arc::new(ContextBus::new());
        let outcome = dispatcher(bus, None).send("ghost", "HIGH", "m").await.unwrap();
        assert_eq!(outcome, AlertOutcome::SessionNotFound);
    }

    #[tokio::test]
    async fn test_failed_dispatch_leaves_context_untouched() {
        let bus = Arc::new(ContextBus::new());
        bus.create_session("s1", "q", "r").await.unwrap();

        // Nothing listens on port 9
        let outcome = dispatcher(bus.clone(), Some("http://127.0.0.1:9/hook".into()))
            .send("s1", "CRITICAL", "Foot and mouth suspected")
            .await
            .unwrap();

        assert!(matches!(outcome, AlertOutcome::Failed { .. }));
        let record = bus.get("s1").await.unwrap().unwrap();
        assert!(!record.alert_triggered);
        assert!(record.alert_severity.is_none());
        assert!(record.alert_payload.is_none());
    }
}
