//! OpenWeatherMap measurement source
//!
//! Current conditions supply the observed fields; the first slot of the 3-hour
//! forecast supplies the precipitation probability, which the current-weather
//! endpoint does not report.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use shared::{Location, Measurement};

use crate::config::WeatherConfig;
use crate::error::{AppError, AppResult};
use crate::services::sources::MeasurementSource;

pub const SOURCE_ID: &str = "openweathermap";

/// OpenWeatherMap API client
#[derive(Clone)]
pub struct OpenWeatherClient {
    client: Client,
    api_key: String,
    base_url: String,
}

/// OpenWeatherMap API response for current weather
#[derive(Debug, Deserialize)]
struct OWMCurrentResponse {
    weather: Vec<OWMWeather>,
    main: OWMMain,
    wind: Option<OWMWind>,
    rain: Option<OWMPrecipitation>,
    snow: Option<OWMPrecipitation>,
    dt: i64,
}

#[derive(Debug, Deserialize)]
struct OWMWeather {
    main: String,
}

#[derive(Debug, Deserialize)]
struct OWMMain {
    temp: Option<f64>,
    pressure: Option<f64>,
    humidity: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OWMWind {
    speed: Option<f64>,
    deg: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OWMPrecipitation {
    #[serde(rename = "1h")]
    one_hour: Option<f64>,
    #[serde(rename = "3h")]
    three_hour: Option<f64>,
}

impl OWMPrecipitation {
    fn hourly(&self) -> Option<f64> {
        self.one_hour.or(self.three_hour.map(|v| v / 3.0))
    }
}

/// OpenWeatherMap API response for forecast
#[derive(Debug, Deserialize)]
struct OWMForecastResponse {
    list: Vec<OWMForecastItem>,
}

#[derive(Debug, Deserialize)]
struct OWMForecastItem {
    dt: i64,
    pop: Option<f64>,
}

impl OpenWeatherClient {
    pub fn new(config: &WeatherConfig, api_key: String) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| AppError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            base_url: config.api_endpoint.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        location: &Location,
    ) -> AppResult<T> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("lat", location.latitude.to_string()),
                ("lon", location.longitude.to_string()),
                ("appid", self.api_key.clone()),
                ("units", "metric".to_string()),
            ])
            .send()
            .await
            .map_err(|e| AppError::MeasurementSource(format!("Weather API request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::MeasurementSource(format!(
                "Weather API error: {} - {}",
                status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::MeasurementSource(format!("Failed to parse weather response: {}", e)))
    }

    /// Precipitation probability (percent) of the forecast slot nearest `at`
    async fn precipitation_probability(
        &self,
        location: &Location,
        at: DateTime<Utc>,
    ) -> AppResult<Option<f64>> {
        let data: OWMForecastResponse = self.get_json("forecast", location).await?;
        Ok(nearest_probability(&data, at))
    }
}

fn nearest_probability(data: &OWMForecastResponse, at: DateTime<Utc>) -> Option<f64> {
    data.list
        .iter()
        .filter(|item| item.pop.is_some())
        .min_by_key(|item| (item.dt - at.timestamp()).abs())
        .and_then(|item| item.pop)
        .map(|pop| (pop * 100.0).clamp(0.0, 100.0))
}

/// Convert an OpenWeatherMap current response into a measurement
fn convert_current_response(data: OWMCurrentResponse) -> Measurement {
    let timestamp = DateTime::from_timestamp(data.dt, 0).unwrap_or_else(Utc::now);
    let precipitation = match (&data.rain, &data.snow) {
        (None, None) => Some(0.0),
        (rain, snow) => {
            let total: f64 = [rain, snow]
                .into_iter()
                .flatten()
                .filter_map(OWMPrecipitation::hourly)
                .sum();
            Some(total)
        }
    };

    Measurement {
        timestamp,
        source_id: SOURCE_ID.to_string(),
        temperature_c: data.main.temp,
        humidity_pct: data.main.humidity,
        pressure_hpa: data.main.pressure,
        wind_speed_ms: data.wind.as_ref().and_then(|w| w.speed),
        wind_direction_deg: data.wind.as_ref().and_then(|w| w.deg),
        precipitation_mm: precipitation,
        precipitation_probability_pct: None,
        condition: data.weather.first().map(|w| w.main.clone()),
    }
}

#[async_trait]
impl MeasurementSource for OpenWeatherClient {
    async fn fetch_latest(&self, location: &Location) -> AppResult<Vec<Measurement>> {
        let current: OWMCurrentResponse = self.get_json("weather", location).await?;
        let mut measurement = convert_current_response(current);

        match self.precipitation_probability(location, measurement.timestamp).await {
            Ok(probability) => measurement.precipitation_probability_pct = probability,
            Err(e) => tracing::warn!(error = %e, "Precipitation probability unavailable"),
        }

        Ok(vec![measurement])
    }

    fn source_id(&self) -> &str {
        SOURCE_ID
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_current_response() {
        let data: OWMCurrentResponse = serde_json::from_str(
            r#"{
                "weather": [{"main": "Thunderstorm", "description": "heavy thunderstorm"}],
                "main": {"temp": 21.5, "pressure": 1001, "humidity": 88},
                "wind": {"speed": 12.4, "deg": 240},
                "rain": {"1h": 6.2},
                "dt": 1719835200
            }"#,
        )
        .unwrap();
        let m = convert_current_response(data);

        assert_eq!(m.source_id, SOURCE_ID);
        assert_eq!(m.temperature_c, Some(21.5));
        assert_eq!(m.pressure_hpa, Some(1001.0));
        assert_eq!(m.precipitation_mm, Some(6.2));
        assert_eq!(m.condition.as_deref(), Some("Thunderstorm"));
        assert_eq!(m.timestamp.timestamp(), 1719835200);
    }

    #[test]
    fn test_missing_blocks_stay_absent() {
        let data: OWMCurrentResponse =
            serde_json::from_str(r#"{"weather": [], "main": {"temp": 10.0}, "dt": 0}"#).unwrap();
        let m = convert_current_response(data);
        assert_eq!(m.humidity_pct, None);
        assert_eq!(m.wind_speed_ms, None);
        assert_eq!(m.condition, None);
    }

    #[test]
    fn test_nearest_probability_slot() {
        let data: OWMForecastResponse = serde_json::from_str(
            r#"{"list": [{"dt": 1000, "pop": 0.2}, {"dt": 11800, "pop": 0.9}]}"#,
        )
        .unwrap();
        let at = DateTime::from_timestamp(10000, 0).unwrap();
        assert_eq!(nearest_probability(&data, at), Some(90.0));
    }
}
