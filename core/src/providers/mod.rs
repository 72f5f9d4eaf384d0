//! Capability ports
//!
//! Narrow interfaces to external data and action sources. Each port writes
//! its result into the Context Bus for the given session and holds no
//! session-scoped state of its own.

pub mod alert;
pub mod knowledge;
pub mod regional;
pub mod weather;

pub use alert::{AlertConfig, AlertOutcome, WebhookAlertDispatcher};
pub use knowledge::{HttpSearchBackend, KnowledgeConfig, RagRetrieval, SearchBackend, MOCK_SOURCE};
pub use regional::RegionalDataProvider;
pub use weather::{OpenMeteoWeather, WeatherConfig, WeatherSource};

use crate::schema::AssetCategory;
use crate::Result;
use async_trait::async_trait;

/// Knowledge-base search. Writes `retrieved_documents`; returns the count.
#[async_trait]
pub trait KnowledgeRetrieval: Send + Sync {
    async fn search(
        &self,
        session_id: &str,
        query: &str,
        asset_category: AssetCategory,
        top_k: usize,
    ) -> Result<usize>;
}

/// Weather and market lookup. Writes `regional_data`; returns a one-line summary.
#[async_trait]
pub trait RegionalDataFetch: Send + Sync {
    async fn fetch(&self, session_id: &str, region: &str, asset_name: Option<&str>)
        -> Result<String>;
}

/// Alert escalation. `severity` is raw and coerced by the dispatcher.
#[async_trait]
pub trait AlertDispatch: Send + Sync {
    async fn send(&self, session_id: &str, severity: &str, message: &str) -> Result<AlertOutcome>;
}
