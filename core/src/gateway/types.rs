use crate::schema::Classification;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub farmer_id: Option<String>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            session_id: None,
            farmer_id: None,
        }
    }

    pub fn in_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatResponse {
    pub message: String,
    pub session_id: String,
    pub requires_action: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,
    pub alert_triggered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_severity: Option<String>,
}

impl ChatResponse {
    pub fn reply(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            session_id: session_id.into(),
            requires_action: false,
            action_type: None,
            classification: None,
            alert_triggered: false,
            alert_severity: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusResponse {
    pub session_id: String,
    /// chatting, processing, completed, failed or unknown
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_triggered: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_severity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusResponse {
    pub fn unknown(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            status: "unknown".to_string(),
            message: "Session not found or expired".to_string(),
            diagnosis: None,
            classification: None,
            alert_triggered: None,
            alert_severity: None,
            error: None,
        }
    }

    pub fn is_known(&self) -> bool {
        self.status != "unknown"
    }
}

/// Point-in-time weather and price for a region
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegionalSnapshot {
    pub temperature: f64,
    pub humidity: f64,
    pub condition: String,
    pub market_price: String,
}

impl RegionalSnapshot {
    pub fn unavailable(reason: &str) -> Self {
        Self {
            temperature: 25.0,
            humidity: 70.0,
            condition: reason.to_string(),
            market_price: reason.to_string(),
        }
    }
}
