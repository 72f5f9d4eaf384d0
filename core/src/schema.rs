//! Schema/type registry.
//!
//! Closed domain enumerations (asset category, intent, severity) and the
//! structured records exchanged between pipeline stages:
//! - `SourceDocument`: one ranked knowledge-base hit
//! - `AutomationPayload`: snapshot sent to the alert webhook
//!
//! Enum coercion is soft (unknown values fall back to a defined member).
//! Structured record validation is hard (missing fields are errors).

use crate::{AgroError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// What the farmer's question is about
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum AssetCategory {
    Crop,
    Livestock,
    #[default]
    General,
}

impl AssetCategory {
    pub const ALL: [AssetCategory; 3] = [
        AssetCategory::Crop,
        AssetCategory::Livestock,
        AssetCategory::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetCategory::Crop => "CROP",
            AssetCategory::Livestock => "LIVESTOCK",
            AssetCategory::General => "GENERAL",
        }
    }

    /// Match a raw value, falling back to `General`
    pub fn coerce(raw: &str) -> Self {
        raw.parse().unwrap_or_else(|_| {
            warn!(target: "schema", value = %raw, "Unknown asset category; using GENERAL");
            AssetCategory::General
        })
    }
}

impl FromStr for AssetCategory {
    type Err = AgroError;

    fn from_str(s: &str) -> Result<Self> {
        let needle = s.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(needle))
            .ok_or_else(|| AgroError::Validation(format!("invalid asset category: {}", s)))
    }
}

impl fmt::Display for AssetCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routing decision made by classification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    DiseaseDiagnosis,
    PestManagement,
    MarketInfo,
    WeatherAdvisory,
    #[default]
    GeneralAdvice,
}

impl Intent {
    pub const ALL: [Intent; 5] = [
        Intent::DiseaseDiagnosis,
        Intent::PestManagement,
        Intent::MarketInfo,
        Intent::WeatherAdvisory,
        Intent::GeneralAdvice,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::DiseaseDiagnosis => "disease_diagnosis",
            Intent::PestManagement => "pest_management",
            Intent::MarketInfo => "market_info",
            Intent::WeatherAdvisory => "weather_advisory",
            Intent::GeneralAdvice => "general_advice",
        }
    }

    /// Match a raw value, falling back to `GeneralAdvice`
    pub fn coerce(raw: &str) -> Self {
        raw.parse().unwrap_or_else(|_| {
            warn!(target: "schema", value = %raw, "Unknown intent; using general_advice");
            Intent::GeneralAdvice
        })
    }
}

impl FromStr for Intent {
    type Err = AgroError;

    fn from_str(s: &str) -> Result<Self> {
        let needle = s.trim();
        Self::ALL
            .into_iter()
            .find(|i| i.as_str().eq_ignore_ascii_case(needle))
            .ok_or_else(|| AgroError::Validation(format!("invalid intent: {}", s)))
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert severity
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }

    /// Match a raw value, falling back to `Low`
    pub fn coerce(raw: &str) -> Self {
        raw.parse().unwrap_or_else(|_| {
            warn!(target: "schema", value = %raw, "Unknown severity; using LOW");
            Severity::Low
        })
    }
}

impl FromStr for Severity {
    type Err = AgroError;

    fn from_str(s: &str) -> Result<Self> {
        let needle = s.trim();
        Self::ALL
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(needle))
            .ok_or_else(|| AgroError::Validation(format!("invalid severity: {}", s)))
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A ranked knowledge-base hit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceDocument {
    pub content: String,
    pub source: String,
    pub page: u32,
    pub asset_category: AssetCategory,
    /// Relevance score in [0, 1]
    pub score: f64,
}

impl SourceDocument {
    pub fn new(
        content: impl Into<String>,
        source: impl Into<String>,
        page: u32,
        asset_category: AssetCategory,
        score: f64,
    ) -> Result<Self> {
        validate_score(score)?;
        Ok(Self {
            content: content.into(),
            source: source.into(),
            page,
            asset_category,
            score,
        })
    }

    /// Validate a raw JSON mapping into a document.
    ///
    /// `content`, `source` and `score` are required. `page` defaults to 0 and
    /// `asset_category` (or the older `asset_type` key) is soft-coerced.
    pub fn from_value(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| AgroError::Validation("source document must be an object".into()))?;

        let content = required_str(obj, "content", "source document")?;
        let source = required_str(obj, "source", "source document")?;

        let score = match obj.get("score") {
            Some(Value::Number(n)) => n.as_f64().ok_or_else(|| {
                AgroError::Validation("source document score is not a float".into())
            })?,
            Some(other) => {
                return Err(AgroError::Validation(format!(
                    "source document score must be a number, got {}",
                    other
                )))
            }
            None => {
                return Err(AgroError::Validation(
                    "source document missing required field: score".into(),
                ))
            }
        };

        let page = match obj.get("page") {
            None | Some(Value::Null) => 0,
            Some(v) => v
                .as_u64()
                .and_then(|p| u32::try_from(p).ok())
                .ok_or_else(|| {
                    AgroError::Validation(format!("source document page is invalid: {}", v))
                })?,
        };

        let asset_category = obj
            .get("asset_category")
            .or_else(|| obj.get("asset_type"))
            .and_then(|v| v.as_str())
            .map(AssetCategory::coerce)
            .unwrap_or_default();

        Self::new(content, source, page, asset_category, score)
    }

    /// True when produced by the fallback result set
    pub fn is_mock(&self) -> bool {
        self.source == crate::providers::knowledge::MOCK_SOURCE
    }
}

/// Routing outcome surfaced to the chat front-end
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Classification {
    pub asset_category: AssetCategory,
    pub asset_name: String,
    pub intent: Intent,
}

/// Snapshot handed to the alert webhook
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AutomationPayload {
    pub severity: Severity,
    pub region: String,
    pub asset_category: AssetCategory,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl AutomationPayload {
    pub fn new(
        severity: Severity,
        region: impl Into<String>,
        asset_category: AssetCategory,
        message: impl Into<String>,
    ) -> Result<Self> {
        let message = message.into();
        if message.trim().is_empty() {
            return Err(AgroError::Validation(
                "automation payload message cannot be empty".into(),
            ));
        }
        Ok(Self {
            severity,
            region: region.into(),
            asset_category,
            message,
            created_at: Utc::now(),
        })
    }

    /// Validate a raw JSON mapping into a payload. All four fields are required.
    pub fn from_value(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| AgroError::Validation("automation payload must be an object".into()))?;

        let severity = Severity::coerce(&required_str(obj, "severity", "automation payload")?);
        let region = required_str(obj, "region", "automation payload")?;
        let asset_category = AssetCategory::coerce(&required_str(
            obj,
            "asset_category",
            "automation payload",
        )?);
        let message = required_str(obj, "message", "automation payload")?;

        Self::new(severity, region, asset_category, message)
    }
}

fn validate_score(score: f64) -> Result<()> {
    if !score.is_finite() || !(0.0..=1.0).contains(&score) {
        return Err(AgroError::Validation(format!(
            "score must be within [0, 1], got {}",
            score
        )));
    }
    Ok(())
}

fn required_str(
    obj: &serde_json::Map<String, Value>,
    field: &str,
    record: &str,
) -> Result<String> {
    match obj.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(AgroError::Validation(format!(
            "{} field '{}' must be a string, got {}",
            record, field, other
        ))),
        None => Err(AgroError::Validation(format!(
            "{} missing required field: {}",
            record, field
        ))),
    }
}
