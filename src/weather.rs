//! Current-weather lookups.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::WeatherConfig;
use crate::error::{BotError, Result};

/// What the dispatcher needs from a weather answer.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherReport {
    pub city: String,
    pub description: String,
    pub temperature_kelvin: Option<f64>,
    pub humidity: Option<u8>,
}

impl WeatherReport {
    pub fn new(city: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            city: city.into(),
            description: description.into(),
            temperature_kelvin: None,
            humidity: None,
        }
    }

    pub fn temperature_celsius(&self) -> Option<f64> {
        self.temperature_kelvin.map(|kelvin| kelvin - 273.15)
    }
}

#[async_trait]
pub trait WeatherLookup: Send + Sync {
    /// `Ok(None)` when the service has no data for `city` (unknown city or a
    /// non-success status). Transport failures are `Err`.
    async fn current(&self, city: &str) -> Result<Option<WeatherReport>>;
}

#[derive(Clone)]
pub struct OpenWeatherMapClient {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl OpenWeatherMapClient {
    pub fn from_config(cfg: &WeatherConfig) -> Result<Self> {
        let api_key = cfg
            .api_key
            .clone()
            .ok_or_else(|| BotError::Weather("missing OpenWeatherMap API key".into()))?;
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(cfg.timeout_secs))
                .build()
                .map_err(|err| BotError::Weather(format!("http client error: {err}")))?,
            api_key,
            endpoint: cfg.endpoint.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl WeatherLookup for OpenWeatherMapClient {
    async fn current(&self, city: &str) -> Result<Option<WeatherReport>> {
        let response = self
            .http
            .get(format!("{}/weather", self.endpoint))
            .query(&[("appid", self.api_key.as_str()), ("q", city)])
            .send()
            .await
            .map_err(|err| BotError::Weather(format!("OpenWeatherMap request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, city, body = %body, "weather lookup returned no data");
            return Ok(None);
        }

        let parsed: OwmResponse = response
            .json()
            .await
            .map_err(|err| BotError::Weather(format!("failed to parse weather response: {err}")))?;
        debug!(city, "weather lookup succeeded");
        Ok(parsed.into_report(city))
    }
}

/// Fixed answers keyed by city name (case-insensitive), for tests and demos.
#[derive(Default)]
pub struct StubWeather {
    reports: HashMap<String, WeatherReport>,
    fail: bool,
    calls: AtomicUsize,
}

impl StubWeather {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_report(mut self, report: WeatherReport) -> Self {
        self.reports.insert(report.city.to_lowercase(), report);
        self
    }

    /// Every lookup fails as if the service were unreachable.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WeatherLookup for StubWeather {
    async fn current(&self, city: &str) -> Result<Option<WeatherReport>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(BotError::Weather("stub weather service unreachable".into()));
        }
        Ok(self.reports.get(&city.to_lowercase()).cloned())
    }
}

#[derive(Debug, Deserialize)]
struct OwmResponse {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    weather: Vec<OwmCondition>,
    #[serde(default)]
    main: Option<OwmMain>,
}

#[derive(Debug, Deserialize)]
struct OwmCondition {
    description: String,
}

#[derive(Debug, Deserialize)]
struct OwmMain {
    #[serde(default)]
    temp: Option<f64>,
    #[serde(default)]
    humidity: Option<u8>,
}

impl OwmResponse {
    fn into_report(self, requested_city: &str) -> Option<WeatherReport> {
        let description = self.weather.into_iter().next()?.description;
        let main = self.main;
        Some(WeatherReport {
            city: self
                .name
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| requested_city.to_string()),
            description,
            temperature_kelvin: main.as_ref().and_then(|m| m.temp),
            humidity: main.as_ref().and_then(|m| m.humidity),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_openweathermap_payload() {
        let raw = r#"{
            "weather": [{"id": 500, "main": "Rain", "description": "light rain", "icon": "10d"}],
            "main": {"temp": 283.15, "humidity": 81},
            "name": "London",
            "cod": 200
        }"#;
        let parsed: OwmResponse = serde_json::from_str(raw).unwrap();
        let report = parsed.into_report("london").unwrap();
        assert_eq!(report.city, "London");
        assert_eq!(report.description, "light rain");
        assert_eq!(report.humidity, Some(81));
        let celsius = report.temperature_celsius().unwrap();
        assert!((celsius - 10.0).abs() < 1e-9);
    }

    #[test]
    fn payload_without_conditions_is_absent() {
        let parsed: OwmResponse = serde_json::from_str(r#"{"weather": [], "name": "X"}"#).unwrap();
        assert!(parsed.into_report("X").is_none());
    }

    #[test]
    fn requires_api_key() {
        assert!(OpenWeatherMapClient::from_config(&WeatherConfig::default()).is_err());
    }

    #[tokio::test]
    async fn stub_matches_case_insensitively_and_counts_calls() {
        let stub = StubWeather::new().with_report(WeatherReport::new("Paris", "clear sky"));
        assert!(stub.current("paris").await.unwrap().is_some());
        assert!(stub.current("Nowhereland").await.unwrap().is_none());
        assert_eq!(stub.calls(), 2);
        assert!(StubWeather::failing().current("Paris").await.is_err());
    }
}
