//! Configuration management for the Stormcast engine
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Configuration files (development.toml, production.toml)
//! 3. Environment variable overrides with STORMCAST__ prefix

use chrono::Duration;
use config::{ConfigError, Environment, File};
use serde::Deserialize;
use shared::{ForecastField, ForecastMethod, Location, Severity};

use crate::error::{AppError, AppResult};

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    /// Log output format ("pretty" or "json")
    pub log_format: String,

    /// Server configuration
    pub server: ServerConfig,

    /// Monitored location
    pub location: LocationConfig,

    /// Optional Postgres persistence
    pub database: DatabaseConfig,

    /// Measurement source
    pub weather: WeatherConfig,

    /// Severity warning feed
    pub warnings: WarningFeedConfig,

    /// Reasoning service
    pub reasoning: ReasoningConfig,

    /// Outbound notifications
    pub delivery: DeliveryConfig,

    /// Trigger thresholds
    pub trigger: TriggerConfig,

    /// Analysis cache
    pub cache: CacheConfig,

    /// Physical forecast model
    pub physical: PhysicalConfig,

    /// Ensemble blending
    pub ensemble: EnsembleConfig,

    /// Accuracy tracking
    pub accuracy: AccuracyConfig,

    /// Loop cadences and retention
    pub schedule: ScheduleConfig,

    /// Storm alert gating
    pub alerts: AlertConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    /// Server port
    pub port: u16,

    /// Server host
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LocationConfig {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL; the in-memory store is used when unset
    pub url: Option<String>,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WeatherConfig {
    /// Weather API endpoint
    pub api_endpoint: String,

    /// Weather API key; ingestion is disabled when unset
    pub api_key: Option<String>,

    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WarningFeedConfig {
    /// URL returning a JSON array of warnings
    pub feed_url: Option<String>,

    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReasoningConfig {
    /// Base URL of an OpenAI-compatible API
    pub api_endpoint: String,

    /// Bearer key; reasoning-based forecasts are disabled when unset
    pub api_key: Option<String>,

    pub model: String,

    pub temperature: f64,

    pub max_tokens: u32,

    /// Hard timeout for one call
    pub timeout_seconds: u64,

    /// Most recent history points placed in the prompt
    pub max_history_points: usize,

    /// Prompt size ceiling in characters
    pub max_prompt_chars: usize,

    /// Warnings placed in the prompt
    pub max_warnings: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Webhook receiving JSON notifications; notifications are only logged when unset
    pub webhook_url: Option<String>,

    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TriggerConfig {
    /// Precipitation probability (%) above which an analysis fires
    pub precipitation_probability_threshold: f64,

    /// Precipitation amount per interval (mm) above which an analysis fires
    pub precipitation_rate_threshold: f64,

    /// Humidity (%) of the humid low-pressure signature
    pub storm_humidity_threshold: f64,

    /// Pressure (hPa) of the humid low-pressure signature
    pub storm_pressure_threshold: f64,

    /// Gale-force wind speed (m/s)
    pub wind_speed_gale: f64,

    /// Condition label keywords, matched case-insensitively
    pub storm_keywords: Vec<String>,

    /// Lowest warning severity that fires
    pub min_warning_severity: Severity,

    /// How far ahead a warning window may start
    pub warning_lookahead_hours: i64,

    /// Longest period without an analysis
    pub max_idle_minutes: i64,

    /// Longest gap between observations of a sustained condition
    pub continuity_gap_minutes: i64,

    /// Decisions retained for inspection
    pub decision_log_capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub warning_ttl_minutes: i64,
    pub condition_ttl_minutes: i64,

    /// Bucket widths of the condition key
    pub wind_band: f64,
    pub pressure_band: f64,
    pub humidity_band: f64,
    pub probability_band: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PhysicalConfig {
    /// Forecast points produced, one per hour
    pub horizon_hours: usize,

    /// Trailing history window used for fitting
    pub history_hours: i64,

    /// Nominal sampling interval; larger gaps lower confidence
    pub expected_interval_minutes: i64,

    /// Baseline the wind relaxes toward (m/s)
    pub climatological_wind_speed: f64,

    /// Wind relaxation time constant (hours)
    pub wind_decay_hours: f64,

    /// Half the daily temperature range used when the history is too short to fit
    pub default_diurnal_amplitude: f64,

    /// Relative confidence lost per hour of horizon
    pub confidence_decay_per_hour: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EnsembleConfig {
    pub physical_weight: f64,
    pub reasoning_weight: f64,

    /// Spread beyond which blended confidence is reduced
    pub temperature_spread: f64,
    pub humidity_spread: f64,
    pub pressure_spread: f64,
    pub wind_spread: f64,
    pub precipitation_spread: f64,
    pub probability_spread: f64,

    /// Floor of the disagreement factor
    pub min_disagreement_factor: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AccuracyConfig {
    /// Matching tolerance between forecast target and actual
    pub tolerance_minutes: i64,

    /// Trailing window of the rolling error
    pub window_days: i64,

    /// Score assumed before any samples exist
    pub prior_score: f64,

    /// Samples' worth of weight given to the prior
    pub prior_strength: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScheduleConfig {
    pub ingest_interval_minutes: u64,
    pub reconcile_interval_minutes: u64,
    pub retention_days: i64,

    /// Time granted to an in-flight reasoning call at shutdown
    pub shutdown_grace_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AlertConfig {
    /// Minimum assessment confidence for an outbound storm alert
    pub storm_confidence_threshold: f64,

    /// Minimum time between storm alerts
    pub min_interval_minutes: i64,
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let environment =
            std::env::var("STORMCAST_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let config = config::Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Override with environment variables (STORMCAST__ prefix)
            .add_source(
                Environment::with_prefix("STORMCAST")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> AppResult<()> {
        let invalid = |msg: &str| -> AppResult<()> { Err(AppError::Configuration(msg.to_string())) };

        if !(0.0..=100.0).contains(&self.trigger.precipitation_probability_threshold) {
            return invalid("trigger.precipitation_probability_threshold must be within 0..=100");
        }
        if !(0.0..=100.0).contains(&self.trigger.storm_humidity_threshold) {
            return invalid("trigger.storm_humidity_threshold must be within 0..=100");
        }
        if self.cache.warning_ttl_minutes <= 0 || self.cache.condition_ttl_minutes <= 0 {
            return invalid("cache TTLs must be positive");
        }
        if [
            self.cache.wind_band,
            self.cache.pressure_band,
            self.cache.humidity_band,
            self.cache.probability_band,
        ]
        .iter()
        .any(|band| *band <= 0.0)
        {
            return invalid("cache bands must be positive");
        }
        if self.trigger.max_idle_minutes < self.cache.condition_ttl_minutes {
            return invalid("trigger.max_idle_minutes must not be shorter than the condition TTL");
        }
        if self.physical.horizon_hours == 0 {
            return invalid("physical.horizon_hours must be at least 1");
        }
        if self.ensemble.physical_weight < 0.0
            || self.ensemble.reasoning_weight < 0.0
            || self.ensemble.physical_weight + self.ensemble.reasoning_weight <= 0.0
        {
            return invalid("ensemble base weights must be non-negative and not all zero");
        }
        if ForecastField::ALL
            .iter()
            .any(|f| self.ensemble.spread_limit(*f) <= 0.0)
        {
            return invalid("ensemble spreads must be positive");
        }
        if !(0.0..=1.0).contains(&self.accuracy.prior_score) || self.accuracy.prior_strength < 0.0
        {
            return invalid("accuracy prior must be a score in 0..=1 with non-negative strength");
        }
        if self.reasoning.timeout_seconds == 0 {
            return invalid("reasoning.timeout_seconds must be positive");
        }
        if self.schedule.ingest_interval_minutes == 0 || self.schedule.reconcile_interval_minutes == 0
        {
            return invalid("schedule intervals must be positive");
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            log_format: "pretty".to_string(),
            server: ServerConfig::default(),
            location: LocationConfig::default(),
            database: DatabaseConfig::default(),
            weather: WeatherConfig::default(),
            warnings: WarningFeedConfig::default(),
            reasoning: ReasoningConfig::default(),
            delivery: DeliveryConfig::default(),
            trigger: TriggerConfig::default(),
            cache: CacheConfig::default(),
            physical: PhysicalConfig::default(),
            ensemble: EnsembleConfig::default(),
            accuracy: AccuracyConfig::default(),
            schedule: ScheduleConfig::default(),
            alerts: AlertConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            host: "0.0.0.0".to_string(),
        }
    }
}

impl LocationConfig {
    pub fn to_location(&self) -> Location {
        Location::new(self.name.clone(), self.latitude, self.longitude)
    }
}

impl Default for LocationConfig {
    fn default() -> Self {
        let location = Location::default();
        Self {
            name: location.name,
            latitude: location.latitude,
            longitude: location.longitude,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            min_connections: 2,
        }
    }
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            api_endpoint: "https://api.openweathermap.org/data/2.5".to_string(),
            api_key: None,
            timeout_seconds: 30,
        }
    }
}

impl Default for WarningFeedConfig {
    fn default() -> Self {
        Self {
            feed_url: None,
            timeout_seconds: 30,
        }
    }
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            api_endpoint: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            temperature: 0.1,
            max_tokens: 2000,
            timeout_seconds: 120,
            max_history_points: 24,
            max_prompt_chars: 16_000,
            max_warnings: 10,
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_seconds: 10,
        }
    }
}

impl TriggerConfig {
    pub fn warning_lookahead(&self) -> Duration {
        Duration::hours(self.warning_lookahead_hours)
    }

    pub fn max_idle(&self) -> Duration {
        Duration::minutes(self.max_idle_minutes)
    }

    pub fn continuity_gap(&self) -> Duration {
        Duration::minutes(self.continuity_gap_minutes)
    }
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            precipitation_probability_threshold: 85.0,
            precipitation_rate_threshold: 8.0,
            storm_humidity_threshold: 80.0,
            storm_pressure_threshold: 1005.0,
            wind_speed_gale: 17.2,
            storm_keywords: ["thunderstorm", "storm", "hail", "squall", "tornado", "bouřka"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            min_warning_severity: Severity::Moderate,
            warning_lookahead_hours: 24,
            max_idle_minutes: 180,
            continuity_gap_minutes: 20,
            decision_log_capacity: 500,
        }
    }
}

impl CacheConfig {
    pub fn warning_ttl(&self) -> Duration {
        Duration::minutes(self.warning_ttl_minutes)
    }

    pub fn condition_ttl(&self) -> Duration {
        Duration::minutes(self.condition_ttl_minutes)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            warning_ttl_minutes: 360,
            condition_ttl_minutes: 60,
            wind_band: 5.0,
            pressure_band: 5.0,
            humidity_band: 10.0,
            probability_band: 10.0,
        }
    }
}

impl Default for PhysicalConfig {
    fn default() -> Self {
        Self {
            horizon_hours: 6,
            history_hours: 24,
            expected_interval_minutes: 10,
            climatological_wind_speed: 3.0,
            wind_decay_hours: 6.0,
            default_diurnal_amplitude: 3.0,
            confidence_decay_per_hour: 0.08,
        }
    }
}

impl EnsembleConfig {
    /// Configured base weight; the ensemble itself never weighs in
    pub fn base_weight(&self, method: ForecastMethod) -> f64 {
        match method {
            ForecastMethod::Physical => self.physical_weight,
            ForecastMethod::ReasoningBased => self.reasoning_weight,
            ForecastMethod::Ensemble => 0.0,
        }
    }

    pub fn spread_limit(&self, field: ForecastField) -> f64 {
        match field {
            ForecastField::Temperature => self.temperature_spread,
            ForecastField::Humidity => self.humidity_spread,
            ForecastField::Pressure => self.pressure_spread,
            ForecastField::WindSpeed => self.wind_spread,
            ForecastField::Precipitation => self.precipitation_spread,
            ForecastField::PrecipitationProbability => self.probability_spread,
        }
    }
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            physical_weight: 0.4,
            reasoning_weight: 0.6,
            temperature_spread: 3.0,
            humidity_spread: 15.0,
            pressure_spread: 3.0,
            wind_spread: 4.0,
            precipitation_spread: 2.0,
            probability_spread: 25.0,
            min_disagreement_factor: 0.3,
        }
    }
}

impl AccuracyConfig {
    pub fn tolerance(&self) -> Duration {
        Duration::minutes(self.tolerance_minutes)
    }

    pub fn window(&self) -> Duration {
        Duration::days(self.window_days)
    }
}

impl Default for AccuracyConfig {
    fn default() -> Self {
        Self {
            tolerance_minutes: 15,
            window_days: 30,
            prior_score: 0.5,
            prior_strength: 5.0,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            ingest_interval_minutes: 10,
            reconcile_interval_minutes: 30,
            retention_days: 30,
            shutdown_grace_seconds: 5,
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            storm_confidence_threshold: 0.99,
            min_interval_minutes: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_idle_shorter_than_condition_ttl_rejected() {
        let mut config = Config::default();
        config.trigger.max_idle_minutes = 30;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_base_weights_rejected() {
        let mut config = Config::default();
        config.ensemble.physical_weight = 0.0;
        config.ensemble.reasoning_weight = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ensemble_never_has_base_weight() {
        let config = EnsembleConfig::default();
        assert_eq!(config.base_weight(ForecastMethod::Ensemble), 0.0);
        assert_eq!(config.base_weight(ForecastMethod::Physical), 0.4);
    }
}
