//! Context record and sparse updates.

use crate::schema::{
    AssetCategory, AutomationPayload, Classification, Intent, Severity, SourceDocument,
};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

/// Placeholder diagnosis until synthesis writes a real one
pub const PENDING_DIAGNOSIS: &str = "pending";

/// Substituted when synthesis yields no text
pub const DIAGNOSIS_UNAVAILABLE: &str = "I'm sorry, a diagnosis could not be generated for this query right now. \
Please share a few more details about the symptoms and try again, or contact your local extension officer.";

/// One named regional sub-payload (weather, market prices, ...)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegionalPayload {
    pub data: Value,
    pub fetched_at: DateTime<Utc>,
}

impl RegionalPayload {
    pub fn now(data: Value) -> Self {
        Self {
            data,
            fetched_at: Utc::now(),
        }
    }
}

/// The per-session working memory shared by pipeline stages
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextRecord {
    pub session_id: String,
    pub query: String,
    pub region: String,
    pub asset_category: AssetCategory,
    pub asset_name: Option<String>,
    pub intent: Intent,
    /// Ordered by retrieval rank
    pub retrieved_documents: Vec<SourceDocument>,
    pub regional_data: BTreeMap<String, RegionalPayload>,
    pub final_diagnosis: String,
    pub alert_triggered: bool,
    pub alert_severity: Option<Severity>,
    pub alert_payload: Option<AutomationPayload>,
    pub created_at: DateTime<Utc>,
}

impl ContextRecord {
    pub fn new(
        session_id: impl Into<String>,
        query: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            query: query.into(),
            region: region.into(),
            asset_category: AssetCategory::default(),
            asset_name: None,
            intent: Intent::default(),
            retrieved_documents: Vec::new(),
            regional_data: BTreeMap::new(),
            final_diagnosis: PENDING_DIAGNOSIS.to_string(),
            alert_triggered: false,
            alert_severity: None,
            alert_payload: None,
            created_at: Utc::now(),
        }
    }

    /// A diagnosis is complete once it holds real, non-placeholder text
    pub fn is_diagnosis_complete(&self) -> bool {
        !self.final_diagnosis.trim().is_empty() && self.final_diagnosis != PENDING_DIAGNOSIS
    }

    pub fn classification(&self) -> Classification {
        Classification {
            asset_category: self.asset_category,
            asset_name: self
                .asset_name
                .clone()
                .unwrap_or_else(|| "Unknown".to_string()),
            intent: self.intent,
        }
    }
}

/// Either an already-typed enum member or a raw string to coerce
#[derive(Debug, Clone, PartialEq)]
pub enum EnumField<T> {
    Known(T),
    Raw(String),
}

impl<T> From<T> for EnumField<T> {
    fn from(value: T) -> Self {
        EnumField::Known(value)
    }
}

/// Either a validated document or a raw mapping to validate
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentInput {
    Valid(SourceDocument),
    Raw(Value),
}

impl DocumentInput {
    fn validate(self) -> Result<SourceDocument> {
        match self {
            DocumentInput::Valid(doc) => SourceDocument::new(
                doc.content,
                doc.source,
                doc.page,
                doc.asset_category,
                doc.score,
            ),
            DocumentInput::Raw(value) => SourceDocument::from_value(&value),
        }
    }
}

impl From<SourceDocument> for DocumentInput {
    fn from(doc: SourceDocument) -> Self {
        DocumentInput::Valid(doc)
    }
}

/// Sparse field-level update. Only the fields set here are touched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextUpdate {
    pub region: Option<String>,
    pub asset_category: Option<EnumField<AssetCategory>>,
    /// `Some(None)` clears the asset name
    pub asset_name: Option<Option<String>>,
    pub intent: Option<EnumField<Intent>>,
    pub retrieved_documents: Option<Vec<DocumentInput>>,
    /// Merged per top-level key
    pub regional_data: Option<BTreeMap<String, RegionalPayload>>,
    pub final_diagnosis: Option<String>,
    pub alert_triggered: Option<bool>,
    pub alert_severity: Option<EnumField<Severity>>,
    pub alert_payload: Option<AutomationPayload>,
}

impl ContextUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn asset_category(mut self, category: impl Into<EnumField<AssetCategory>>) -> Self {
        self.asset_category = Some(category.into());
        self
    }

    pub fn asset_category_raw(mut self, raw: impl Into<String>) -> Self {
        self.asset_category = Some(EnumField::Raw(raw.into()));
        self
    }

    pub fn asset_name(mut self, name: Option<String>) -> Self {
        self.asset_name = Some(name);
        self
    }

    pub fn intent(mut self, intent: impl Into<EnumField<Intent>>) -> Self {
        self.intent = Some(intent.into());
        self
    }

    pub fn intent_raw(mut self, raw: impl Into<String>) -> Self {
        self.intent = Some(EnumField::Raw(raw.into()));
        self
    }

    pub fn documents<I, D>(mut self, docs: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<DocumentInput>,
    {
        self.retrieved_documents = Some(docs.into_iter().map(Into::into).collect());
        self
    }

    pub fn regional(mut self, key: impl Into<String>, data: Value) -> Self {
        self.regional_data
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), RegionalPayload::now(data));
        self
    }

    pub fn final_diagnosis(mut self, text: impl Into<String>) -> Self {
        self.final_diagnosis = Some(text.into());
        self
    }

    pub fn alert(mut self, severity: Severity, payload: AutomationPayload) -> Self {
        self.alert_triggered = Some(true);
        self.alert_severity = Some(EnumField::Known(severity));
        self.alert_payload = Some(payload);
        self
    }

    pub fn alert_severity_raw(mut self, raw: impl Into<String>) -> Self {
        self.alert_severity = Some(EnumField::Raw(raw.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Build an update from a raw JSON mapping (e.g. structured model output).
    ///
    /// Unknown keys and immutable keys are logged and skipped. A malformed
    /// alert payload is a validation error; documents are validated on apply.
    pub fn from_fields(fields: &Map<String, Value>) -> Result<Self> {
        let mut update = Self::new();

        for (key, value) in fields {
            match (key.as_str(), value) {
                ("region", Value::String(s)) => update.region = Some(s.clone()),
                ("asset_category" | "asset_type", Value::String(s)) => {
                    update.asset_category = Some(EnumField::Raw(s.clone()))
                }
                ("asset_name", Value::String(s)) => update.asset_name = Some(Some(s.clone())),
                ("asset_name", Value::Null) => update.asset_name = Some(None),
                ("intent", Value::String(s)) => update.intent = Some(EnumField::Raw(s.clone())),
                ("retrieved_documents" | "retrieved_context", Value::Array(items)) => {
                    update.retrieved_documents =
                        Some(items.iter().cloned().map(DocumentInput::Raw).collect())
                }
                ("regional_data", Value::Object(entries)) => {
                    let merged = update.regional_data.get_or_insert_with(BTreeMap::new);
                    for (k, v) in entries {
                        merged.insert(k.clone(), RegionalPayload::now(v.clone()));
                    }
                }
                ("final_diagnosis", Value::String(s)) => update.final_diagnosis = Some(s.clone()),
                ("alert_triggered", Value::Bool(b)) => update.alert_triggered = Some(*b),
                ("alert_severity", Value::String(s)) => {
                    update.alert_severity = Some(EnumField::Raw(s.clone()))
                }
                ("alert_payload", v @ Value::Object(_)) => {
                    update.alert_payload = Some(AutomationPayload::from_value(v)?)
                }
                ("session_id" | "query" | "created_at", _) => {
                    warn!(target: "context_bus", key = %key, "Ignoring update to immutable field");
                }
                (
                    "region" | "asset_category" | "asset_type" | "asset_name" | "intent"
                    | "retrieved_documents" | "retrieved_context" | "regional_data"
                    | "final_diagnosis" | "alert_triggered" | "alert_severity" | "alert_payload",
                    other,
                ) => {
                    warn!(target: "context_bus", key = %key, value = %other, "Ignoring update with unexpected value type");
                }
                _ => {
                    warn!(target: "context_bus", key = %key, "Ignoring update to unknown field");
                }
            }
        }

        Ok(update)
    }

    /// Apply onto a record. Validation happens before any field is written,
    /// so a rejected update leaves the record untouched.
    pub(crate) fn apply_to(self, record: &mut ContextRecord) -> Result<()> {
        let documents = match self.retrieved_documents {
            Some(inputs) => Some(
                inputs
                    .into_iter()
                    .map(DocumentInput::validate)
                    .collect::<Result<Vec<_>>>()?,
            ),
            None => None,
        };

        if let Some(region) = self.region {
            record.region = region;
        }
        if let Some(category) = self.asset_category {
            record.asset_category = match category {
                EnumField::Known(c) => c,
                EnumField::Raw(raw) => AssetCategory::coerce(&raw),
            };
        }
        if let Some(name) = self.asset_name {
            record.asset_name = name.filter(|n| !n.trim().is_empty());
        }
        if let Some(intent) = self.intent {
            record.intent = match intent {
                EnumField::Known(i) => i,
                EnumField::Raw(raw) => Intent::coerce(&raw),
            };
        }
        if let Some(docs) = documents {
            record.retrieved_documents = docs;
        }
        if let Some(entries) = self.regional_data {
            record.regional_data.extend(entries);
        }
        if let Some(diagnosis) = self.final_diagnosis {
            record.final_diagnosis = diagnosis;
        }
        if let Some(triggered) = self.alert_triggered {
            record.alert_triggered = triggered;
        }
        if let Some(severity) = self.alert_severity {
            record.alert_severity = Some(match severity {
                EnumField::Known(s) => s,
                EnumField::Raw(raw) => Severity::coerce(&raw),
            });
        }
        if let Some(payload) = self.alert_payload {
            record.alert_payload = Some(payload);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AgroError;
    use serde_json::json;

    #[test]
    fn test_new_record_defaults() {
        let record = ContextRecord::new("s123", "When should I plant maize?", "Nakuru");
        assert_eq!(record.asset_category, AssetCategory::General);
        assert_eq!(record.intent, Intent::GeneralAdvice);
        assert_eq!(record.final_diagnosis, PENDING_DIAGNOSIS);
        assert!(!record.alert_triggered);
        assert!(!record.is_diagnosis_complete());
    }

    #[test]
    fn test_short_diagnosis_counts_as_complete() {
        let mut record = ContextRecord::new("s1", "q", "r");
        record.final_diagnosis = "Leaf rust.".into();
        assert!(record.is_diagnosis_complete());
        record.final_diagnosis = "   ".into();
        assert!(!record.is_diagnosis_complete());
    }

    #[test]
    fn test_from_fields_skips_unknown_and_immutable() {
        let fields = json!({
            "intent": "pest_management",
            "query": "overwritten?",
            "favourite_colour": "green",
            "asset_name": "maize"
        });
        let update = ContextUpdate::from_fields(fields.as_object().unwrap()).unwrap();

        let mut record = ContextRecord::new("s1", "original", "Eldoret");
        update.apply_to(&mut record).unwrap();

        assert_eq!(record.query, "original");
        assert_eq!(record.intent, Intent::PestManagement);
        assert_eq!(record.asset_name.as_deref(), Some("maize"));
    }

    #[test]
    fn test_invalid_document_leaves_record_untouched() {
        let mut record = ContextRecord::new("s1", "q", "r");
        let update = ContextUpdate::new()
            .final_diagnosis("should not land")
            .documents(vec![
                DocumentInput::Raw(json!({"content": "ok", "source": "a", "score": 0.5})),
                DocumentInput::Raw(json!({"content": "bad", "source": "b", "score": 3.0})),
            ]);

        let err = update.apply_to(&mut record).unwrap_err();
        assert!(matches!(err, AgroError::Validation(_)));
        assert_eq!(record.final_diagnosis, PENDING_DIAGNOSIS);
        assert!(record.retrieved_documents.is_empty());
    }

    #[test]
    fn test_regional_data_merges_keys() {
        let mut record = ContextRecord::new("s1", "q", "r");
        ContextUpdate::new()
            .regional("weather", json!({"current_temp": 22}))
            .apply_to(&mut record)
            .unwrap();
        ContextUpdate::new()
            .regional("market_prices", json!({"current_price": 40}))
            .apply_to(&mut record)
            .unwrap();
        ContextUpdate::new()
            .regional("weather", json!({"current_temp": 25}))
            .apply_to(&mut record)
            .unwrap();

        assert_eq!(record.regional_data.len(), 2);
        assert_eq!(record.regional_data["weather"].data["current_temp"], 25);
    }

    #[test]
    fn test_malformed_alert_payload_rejected() {
        let fields = json!({"alert_payload": {"severity": "HIGH"}});
        assert!(ContextUpdate::from_fields(fields.as_object().unwrap()).is_err());
    }
}
