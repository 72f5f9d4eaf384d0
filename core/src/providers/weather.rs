//! Weather lookup.
//!
//! Open-Meteo (free, no API key required) for live conditions, and a
//! climate-zone estimate used when the live source is unavailable.

use crate::{AgroError, Result};
use async_trait::async_trait;
use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

pub const MOCK_WEATHER_SOURCE: &str = "Mock Data (Climate Estimates)";

/// Configuration for the Open-Meteo weather source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    /// API endpoint (default: Open-Meteo)
    pub api_endpoint: String,
    /// Geocoding API endpoint
    pub geocoding_endpoint: String,
    /// ISO country code used to disambiguate region names
    pub country_code: String,
    pub timeout_ms: u64,
    pub user_agent: String,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            api_endpoint: "https://api.open-meteo.com/v1/forecast".to_string(),
            geocoding_endpoint: "https://geocoding-api.open-meteo.com/v1/search".to_string(),
            country_code: "KE".to_string(),
            timeout_ms: std::env::var("WEATHER_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(10_000),
            user_agent: "agrosense/0.1".to_string(),
        }
    }
}

/// Current conditions for a region, as a `weather` regional payload
#[async_trait]
pub trait WeatherSource: Send + Sync {
    async fn current(&self, region: &str) -> Result<Value>;
}

/// Geocoding response from Open-Meteo
#[derive(Debug, Deserialize)]
struct GeocodingResponse {
    results: Option<Vec<GeoLocation>>,
}

#[derive(Debug, Deserialize)]
struct GeoLocation {
    latitude: f64,
    longitude: f64,
}

/// Weather response from Open-Meteo
#[derive(Debug, Deserialize)]
struct WeatherResponse {
    current: CurrentWeather,
    daily: Option<DailyWeather>,
}

#[derive(Debug, Deserialize)]
struct CurrentWeather {
    temperature_2m: f64,
    relative_humidity_2m: f64,
    wind_speed_10m: f64,
    weather_code: i32,
    #[serde(default)]
    surface_pressure: Option<f64>,
    #[serde(default)]
    precipitation: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct DailyWeather {
    #[serde(default)]
    precipitation_sum: Vec<Option<f64>>,
}

pub struct OpenMeteoWeather {
    config: WeatherConfig,
    http_client: reqwest::Client,
}

impl OpenMeteoWeather {
    pub fn new() -> Result<Self> {
        Self::with_config(WeatherConfig::default())
    }

    pub fn with_config(config: WeatherConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self {
            config,
            http_client,
        })
    }

    /// Geocode region name to coordinates
    async fn geocode(&self, region: &str) -> Result<(f64, f64)> {
        debug!(target: "regional", region = %region, "Geocoding region");

        let response = self
            .http_client
            .get(&self.config.geocoding_endpoint)
            .query(&[
                ("name", region),
                ("count", "1"),
                ("language", "en"),
                ("format", "json"),
                ("countryCode", self.config.country_code.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            warn!(target: "regional", status = %status, "Geocoding API returned error");
            return Err(AgroError::CapabilityUnavailable(format!(
                "Geocoding API returned status: {}",
                status
            )));
        }

        let geo: GeocodingResponse = response.json().await?;
        let location = geo
            .results
            .and_then(|mut r| r.pop())
            .ok_or_else(|| AgroError::CapabilityUnavailable(format!("Region not found: {}", region)))?;

        Ok((location.latitude, location.longitude))
    }

    async fn fetch(&self, lat: f64, lon: f64) -> Result<WeatherResponse> {
        debug!(target: "regional", lat = %lat, lon = %lon, "Fetching weather data");

        let response = self
            .http_client
            .get(&self.config.api_endpoint)
            .query(&[
                ("latitude", lat.to_string()),
                ("longitude", lon.to_string()),
                (
                    "current",
                    "temperature_2m,relative_humidity_2m,wind_speed_10m,weather_code,surface_pressure,precipitation"
                        .to_string(),
                ),
                ("daily", "precipitation_sum".to_string()),
                ("past_days", "1".to_string()),
                ("forecast_days", "1".to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            warn!(target: "regional", status = %status, "Weather API returned error");
            return Err(AgroError::CapabilityUnavailable(format!(
                "Weather API returned status: {}",
                status
            )));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl WeatherSource for OpenMeteoWeather {
    async fn current(&self, region: &str) -> Result<Value> {
        let (lat, lon) = self.geocode(region).await?;
        let weather = self.fetch(lat, lon).await?;
        let current = weather.current;

        // past_days=1 puts yesterday's total first
        let rainfall = weather
            .daily
            .and_then(|d| d.precipitation_sum.into_iter().next().flatten())
            .or(current.precipitation.map(|p| p * 24.0))
            .unwrap_or(0.0);
        let rainfall = (rainfall * 10.0).round() / 10.0;
        let temp = (current.temperature_2m * 10.0).round() / 10.0;

        Ok(json!({
            "current_temp": temp,
            "humidity": current.relative_humidity_2m,
            "condition": weather_code_to_description(current.weather_code),
            "last_24h_rainfall_mm": rainfall,
            "forecast_summary": format!("Current temp {:.1}°C, humidity {}%.", temp, current.relative_humidity_2m),
            "next_48h_risk": assess_weather_risk(temp, current.relative_humidity_2m, rainfall),
            "wind_speed": current.wind_speed_10m,
            "pressure": current.surface_pressure,
            "source": "Open-Meteo",
        }))
    }
}

/// Agricultural risk note from current conditions
pub fn assess_weather_risk(temp: f64, humidity: f64, rainfall_mm: f64) -> String {
    let mut risks = Vec::new();
    if temp > 30.0 {
        risks.push("High temperature stress on crops");
    } else if temp < 15.0 {
        risks.push("Low temperature may slow growth");
    }
    if humidity > 80.0 {
        risks.push("High humidity increases fungal disease risk");
    }
    if rainfall_mm > 20.0 {
        risks.push("Heavy rainfall expected");
    }

    if risks.is_empty() {
        "Favorable conditions for farming".to_string()
    } else {
        risks.join("; ")
    }
}

/// Climate-zone estimate for a region in a given month (1-12)
pub fn mock_weather(region: &str, month: u32) -> Value {
    let (temp, humidity) = match region.trim().to_lowercase().as_str() {
        "mombasa" | "malindi" | "lamu" => (28, 80),
        "nairobi" | "nakuru" | "eldoret" => (22, 62),
        _ => (25, 68),
    };

    let rainfall = match month {
        3..=5 => 12,
        10..=12 => 9,
        _ => 2,
    };

    let risk = if rainfall > 10 {
        "High chance of thunderstorms"
    } else if humidity > 75 {
        "Moderate risk of fungal diseases"
    } else {
        "Clear conditions"
    };

    json!({
        "current_temp": temp,
        "humidity": humidity,
        "condition": if rainfall > 5 { "Partly cloudy" } else { "Clear" },
        "last_24h_rainfall_mm": rainfall,
        "forecast_summary": format!("Current temp {}°C, humidity {}%.", temp, humidity),
        "next_48h_risk": risk,
        "wind_speed": 12,
        "pressure": 1015,
        "source": MOCK_WEATHER_SOURCE,
    })
}

pub fn mock_weather_now(region: &str) -> Value {
    mock_weather(region, Utc::now().month())
}

/// Convert WMO weather code to human-readable description
pub fn weather_code_to_description(code: i32) -> String {
    match code {
        0 => "clear sky",
        1 => "mainly clear",
        2 => "partly cloudy",
        3 => "overcast",
        45 | 48 => "foggy",
        51 | 53 | 55 => "drizzle",
        61 | 63 | 65 => "rain",
        71 | 73 | 75 => "snow",
        77 => "snow grains",
        80..=82 => "rain showers",
        85 | 86 => "snow showers",
        95 => "thunderstorm",
        96 | 99 => "thunderstorm with hail",
        _ => "unknown",
    }
    .to_string()
}
