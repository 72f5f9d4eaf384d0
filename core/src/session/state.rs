use crate::schema::{Classification, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Chatting,
    Processing,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Chatting => "chatting",
            SessionStatus::Processing => "processing",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredMessage {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl StoredMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Structured intake pulled from the conversation before a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntakeFields {
    pub crop_or_livestock: Option<String>,
    pub region: Option<String>,
    pub issue: Option<String>,
    pub additional_details: Option<String>,
}

impl IntakeFields {
    pub const DEFAULT_ASSET: &'static str = "general crop";
    pub const DEFAULT_REGION: &'static str = "Kenya";
    pub const DEFAULT_ISSUE: &'static str = "farming concern";
    pub const FALLBACK_QUERY: &'static str = "General farming advice needed";

    /// Used when extraction produced nothing usable
    pub fn defaults(last_message: Option<&str>) -> Self {
        Self {
            crop_or_livestock: Some(Self::DEFAULT_ASSET.to_string()),
            region: Some(Self::DEFAULT_REGION.to_string()),
            issue: Some(
                last_message
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .unwrap_or(Self::DEFAULT_ISSUE)
                    .to_string(),
            ),
            additional_details: None,
        }
    }

    /// Pipeline query: issue, asset and details joined by ". "
    pub fn query(&self) -> String {
        let mut parts = Vec::new();
        if let Some(issue) = &self.issue {
            parts.push(issue.clone());
        }
        if let Some(asset) = &self.crop_or_livestock {
            parts.push(format!("Crop/Livestock: {}", asset));
        }
        if let Some(details) = &self.additional_details {
            parts.push(details.clone());
        }

        if parts.is_empty() {
            Self::FALLBACK_QUERY.to_string()
        } else {
            parts.join(". ")
        }
    }

    pub fn region(&self) -> &str {
        self.region.as_deref().unwrap_or(Self::DEFAULT_REGION)
    }
}

/// Per-conversation state held by the Session Store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewaySession {
    pub session_id: String,
    pub farmer_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub client_ip: Option<String>,
    pub messages: Vec<StoredMessage>,
    pub status: SessionStatus,
    /// One-shot; cleared when returned on a chat turn
    pub diagnosis: Option<String>,
    pub last_diagnosis: Option<String>,
    pub classification: Option<Classification>,
    pub intake: Option<IntakeFields>,
    pub alert_triggered: bool,
    pub alert_severity: Option<Severity>,
    pub error: Option<String>,
}

impl GatewaySession {
    pub fn new(session_id: impl Into<String>, farmer_id: Option<String>, client_ip: Option<String>) -> Self {
        Self {
            session_id: session_id.into(),
            farmer_id,
            created_at: Utc::now(),
            client_ip,
            messages: Vec::new(),
            status: SessionStatus::Chatting,
            diagnosis: None,
            last_diagnosis: None,
            classification: None,
            intake: None,
            alert_triggered: false,
            alert_severity: None,
            error: None,
        }
    }

    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intake_query_assembly() {
        let intake = IntakeFields {
            crop_or_livestock: Some("maize".into()),
            region: Some("Eldoret".into()),
            issue: Some("White spots on leaves".into()),
            additional_details: Some("Started last week".into()),
        };
        assert_eq!(
            intake.query(),
            "White spots on leaves. Crop/Livestock: maize. Started last week"
        );

        let empty = IntakeFields {
            crop_or_livestock: None,
            region: None,
            issue: None,
            additional_details: None,
        };
        assert_eq!(empty.query(), "General farming advice needed");
        assert_eq!(empty.region(), "Kenya");
    }

    #[test]
    fn test_intake_defaults() {
        let d = IntakeFields::defaults(Some("my cows are coughing"));
        assert_eq!(d.issue.as_deref(), Some("my cows are coughing"));
        assert_eq!(d.crop_or_livestock.as_deref(), Some("general crop"));
        assert_eq!(IntakeFields::defaults(None).issue.as_deref(), Some("farming concern"));
    }

    #[test]
    fn test_status_wire_strings() {
        assert_eq!(serde_json::to_value(SessionStatus::Processing).unwrap(), "processing");
    }
}
