use super::weather::{mock_weather_now, WeatherSource};
use super::RegionalDataFetch;
use crate::context::{ContextBus, ContextUpdate};
use crate::{AgroError, Result};
use async_trait::async_trait;
use chrono::{Datelike, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const MOCK_MARKET_SOURCE: &str = "Mock Data (Regional Estimates)";

/// Regional price bands in KES: (asset, min, max, unit)
const PRICE_TABLE: &[(&str, f64, f64, &str)] = &[
    ("maize", 30.0, 50.0, "per kg"),
    ("wheat", 40.0, 65.0, "per kg"),
    ("beans", 80.0, 120.0, "per kg"),
    ("potatoes", 25.0, 45.0, "per kg"),
    ("tomatoes", 40.0, 100.0, "per kg"),
    ("coffee", 120.0, 180.0, "per kg"),
    ("tea", 200.0, 300.0, "per kg"),
    ("cattle", 40_000.0, 80_000.0, "per head"),
    ("goat", 8_000.0, 15_000.0, "per head"),
    ("sheep", 7_000.0, 14_000.0, "per head"),
    ("chicken", 400.0, 800.0, "per bird"),
    ("milk", 45.0, 65.0, "per litre"),
];

const FALLBACK_BAND: (f64, f64, &str) = (100.0, 500.0, "per unit");

/// Market estimate for an asset in a given month (1-12)
pub fn market_prices(asset_name: &str, month: u32) -> Value {
    let key = asset_name.trim().to_lowercase();
    let (min, max, unit) = PRICE_TABLE
        .iter()
        .find(|(name, ..)| *name == key)
        .map(|(_, min, max, unit)| (*min, *max, *unit))
        .unwrap_or(FALLBACK_BAND);

    let trend = match month {
        3..=5 | 10..=12 => "Increasing due to planting season",
        1 | 2 | 6 | 7 => "Stable to decreasing due to harvest",
        _ => "Stable",
    };

    json!({
        "commodity": format!("{} ({})", title_case(asset_name), unit),
        "current_price": (min + max) / 2.0,
        "currency": "KES",
        "trend": trend,
        "last_updated": Utc::now().to_rfc3339(),
        "source": MOCK_MARKET_SOURCE,
    })
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Writes `weather` and `market_prices` for a session
pub struct RegionalDataProvider {
    bus: Arc<ContextBus>,
    weather: Option<Arc<dyn WeatherSource>>,
    timeout: Duration,
}

impl RegionalDataProvider {
    pub fn new(bus: Arc<ContextBus>, weather: Option<Arc<dyn WeatherSource>>, timeout: Duration) -> Self {
        Self {
            bus,
            weather,
            timeout,
        }
    }

    async fn weather_for(&self, session_id: &str, region: &str) -> Value {
        let Some(source) = &self.weather else {
            return mock_weather_now(region);
        };
        match tokio::time::timeout(self.timeout, source.current(region)).await {
            Ok(Ok(data)) => data,
            Ok(Err(e)) => {
                warn!(target: "regional", session = %session_id, region = %region, error = %e, "Weather source failed; using climate estimates");
                mock_weather_now(region)
            }
            Err(_) => {
                warn!(target: "regional", session = %session_id, region = %region, "Weather source timed out; using climate estimates");
                mock_weather_now(region)
            }
        }
    }
}

#[async_trait]
impl RegionalDataFetch for RegionalDataProvider {
    async fn fetch(&self, session_id: &str, region: &str, asset_name: Option<&str>) -> Result<String> {
        if self.bus.get(session_id).await?.is_none() {
            return Err(AgroError::SessionNotFound(session_id.to_string()));
        }

        let asset = asset_name
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .unwrap_or("general produce");
        let weather = self.weather_for(session_id, region).await;
        let market = market_prices(asset, Utc::now().month());

        let summary = format!(
            "Fetched environmental and market data for {} on {}. Temp: {}°C, Rainfall: {}mm.",
            region,
            asset,
            weather.get("current_temp").cloned().unwrap_or(Value::Null),
            weather
                .get("last_24h_rainfall_mm")
                .cloned()
                .unwrap_or_else(|| json!(0)),
        );

        self.bus
            .update(
                session_id,
                ContextUpdate::new()
                    .regional("weather", weather)
                    .regional("market_prices", market),
            )
            .await?;

        info!(target: "regional", session = %session_id, region = %region, "Regional data stored");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_prices_known_asset() {
        let prices = market_prices("Maize", 4);
        assert_eq!(prices["current_price"], 40.0);
        assert_eq!(prices["commodity"], "Maize (per kg)");
        assert_eq!(prices["currency"], "KES");
        assert_eq!(prices["trend"], "Increasing due to planting season");
    }

    #[test]
    fn test_market_prices_unknown_asset_and_trend() {
        let prices = market_prices("dragon fruit", 8);
        assert_eq!(prices["current_price"], 300.0);
        assert_eq!(prices["commodity"], "Dragon Fruit (per unit)");
        assert_eq!(prices["trend"], "Stable");
        assert_eq!(market_prices("goat", 1)["trend"], "Stable to decreasing due to harvest");
    }
}
