//! Physical forecast generator
//!
//! Deterministic short-range forecast from recent measurements alone:
//! - pressure: least-squares tendency, extrapolated
//! - temperature: diurnal cosine fit plus damped residual trend
//! - humidity: constant absolute moisture (Magnus saturation pressure)
//! - wind: exponential decay toward a climatological baseline
//! - precipitation: pressure tendency, humidity excess and current rain
//!
//! Works from as few as one usable sample; confidence reflects how thin or
//! gappy the history is and decays with lead time.

use std::collections::BTreeSet;
use std::f64::consts::PI;

use chrono::{DateTime, Duration, Timelike, Utc};
use shared::{
    clamp_to_range, floor_to_hour, hours_between, ForecastField, ForecastMethod, ForecastPoint,
    Location, Measurement, MethodForecast,
};

use crate::config::PhysicalConfig;
use crate::error::{AppError, AppResult};

/// Hour of the diurnal temperature maximum, local solar time
const DIURNAL_PEAK_HOUR: f64 = 14.0;

/// Fallback precipitation probability the forecast relaxes toward (%)
const CLIMATOLOGICAL_PRECIPITATION_PROBABILITY: f64 = 20.0;

/// Physically plausible pressure change (hPa per hour)
const MAX_PRESSURE_SLOPE: f64 = 3.0;

/// Window used for tendencies (hours)
const TENDENCY_WINDOW_HOURS: f64 = 3.0;

/// E-folding time of an extrapolated pressure trend (hours)
const PRESSURE_TREND_DAMPING_HOURS: f64 = 12.0;

/// E-folding time of the residual temperature trend (hours)
const TEMPERATURE_TREND_DAMPING_HOURS: f64 = 6.0;

/// Physical forecast generator for one location
#[derive(Debug, Clone)]
pub struct PhysicalForecastGenerator {
    config: PhysicalConfig,
    /// Offset of local solar time from UTC, in hours
    solar_offset_hours: f64,
}

/// Time series of one field, in hours relative to the newest sample
#[derive(Debug, Clone, Default)]
struct Series {
    points: Vec<(f64, f64)>,
}

impl Series {
    fn last(&self) -> Option<f64> {
        self.points.last().map(|(_, v)| *v)
    }

    fn len(&self) -> usize {
        self.points.len()
    }

    fn span_hours(&self) -> f64 {
        match (self.points.first(), self.points.last()) {
            (Some((first, _)), Some((last, _))) => last - first,
            _ => 0.0,
        }
    }

    fn trailing(&self, hours: f64) -> Series {
        Series {
            points: self
                .points
                .iter()
                .filter(|(t, _)| *t >= -hours)
                .copied()
                .collect(),
        }
    }

    /// Least-squares slope (units per hour)
    fn slope(&self) -> Option<f64> {
        linear_fit(&self.points).map(|(slope, _)| slope)
    }
}

impl PhysicalForecastGenerator {
    pub fn new(location: &Location, config: PhysicalConfig) -> Self {
        Self {
            config,
            solar_offset_hours: location.longitude / 15.0,
        }
    }

    pub fn horizon(&self) -> usize {
        self.config.horizon_hours
    }

    /// Produce one point per hour over the configured horizon
    pub fn generate(
        &self,
        history: &[Measurement],
        issued_at: DateTime<Utc>,
    ) -> AppResult<MethodForecast> {
        let window = self.usable_window(history);
        let latest = window.last().ok_or_else(|| {
            AppError::InsufficientHistory("no usable measurements in the history window".into())
        })?;

        let latest_at = latest.timestamp;
        let anchor = floor_to_hour(latest_at);
        let series = |field: ForecastField| Series {
            points: window
                .iter()
                .filter_map(|m| m.value(field).map(|v| (hours_between(latest_at, m.timestamp), v)))
                .collect(),
        };

        let temperature = series(ForecastField::Temperature);
        let humidity = series(ForecastField::Humidity);
        let pressure = series(ForecastField::Pressure);
        let wind = series(ForecastField::WindSpeed);
        let precipitation = series(ForecastField::Precipitation);
        let probability = series(ForecastField::PrecipitationProbability);

        let gap_factor = self.gap_factor(&window);
        let pressure_slope = pressure_slope(&pressure);
        let pressure_tendency = pressure_slope.map(|s| s * TENDENCY_WINDOW_HOURS);
        let (amplitude, temperature_trend) = self.fit_temperature(&temperature, latest_at);

        let confidence = |field: ForecastField, samples: usize, hour: usize| {
            base_confidence(field)
                * sample_factor(samples)
                * gap_factor
                * self.horizon_decay(hour)
        };

        let mut points = Vec::with_capacity(self.config.horizon_hours);
        for hour in 1..=self.config.horizon_hours {
            let target = anchor + Duration::hours(hour as i64);
            let lead = hours_between(latest_at, target).max(0.0);
            let mut point = ForecastPoint::new(ForecastMethod::Physical, target, issued_at);

            let set = |point: &mut ForecastPoint, field, value: Option<f64>, samples| {
                if let Some(value) = value.and_then(|v| clamp_to_range(field, v)) {
                    point.set(field, value, confidence(field, samples, hour));
                }
            };

            // Pressure
            let p = pressure
                .last()
                .map(|last| {
                    last + pressure_slope.unwrap_or(0.0)
                        * damped_lead(lead, PRESSURE_TREND_DAMPING_HOURS)
                });
            set(&mut point, ForecastField::Pressure, p, pressure.len());

            // Temperature
            let t_last = temperature.last();
            let t = t_last.map(|last| {
                let diurnal = amplitude
                    * (self.phase_at(latest_at, lead) - self.phase_at(latest_at, 0.0));
                let trend =
                    temperature_trend * damped_lead(lead, TEMPERATURE_TREND_DAMPING_HOURS);
                last + diurnal + trend
            });
            set(&mut point, ForecastField::Temperature, t, temperature.len());

            // Humidity at constant absolute moisture
            let rh = humidity.last().map(|last| match (t_last, t) {
                (Some(from), Some(to)) => {
                    last * saturation_vapour_pressure(from) / saturation_vapour_pressure(to)
                }
                _ => last,
            });
            set(&mut point, ForecastField::Humidity, rh, humidity.len());

            // Wind
            let baseline = self.config.climatological_wind_speed;
            let tau = self.config.wind_decay_hours.max(0.1);
            let w = wind
                .last()
                .map(|last| baseline + (last - baseline) * (-lead / tau).exp());
            set(&mut point, ForecastField::WindSpeed, w, wind.len());

            // Precipitation probability and amount
            let rh_forecast = point.humidity_pct;
            let pp = precipitation_probability(
                probability.last(),
                pressure_tendency,
                rh_forecast,
                precipitation.last(),
                lead,
            );
            let pp = pp.map(|v| v.clamp(0.0, 100.0));
            let pp_samples = probability.len().max(pressure.len().min(humidity.len()));
            set(&mut point, ForecastField::PrecipitationProbability, pp, pp_samples);

            let amount = precipitation_amount(
                precipitation.last(),
                point.precipitation_probability_pct,
                lead,
            );
            let amount_samples = precipitation.len().max(probability.len());
            set(&mut point, ForecastField::Precipitation, amount, amount_samples);

            point.condition = derive_condition(
                point.precipitation_probability_pct,
                point.precipitation_mm,
                point.humidity_pct,
                pressure_tendency,
            );

            points.push(point);
        }

        let sources: BTreeSet<String> = window.iter().map(|m| m.source_id.clone()).collect();

        tracing::debug!(
            samples = window.len(),
            gap_factor,
            pressure_tendency = ?pressure_tendency,
            "Physical forecast generated"
        );

        Ok(MethodForecast {
            method: ForecastMethod::Physical,
            issued_at,
            points,
            sources: sources.into_iter().collect(),
            assessment: None,
        })
    }

    /// Usable samples within the history window, oldest first
    fn usable_window<'a>(&self, history: &'a [Measurement]) -> Vec<&'a Measurement> {
        let mut usable: Vec<&Measurement> = history.iter().filter(|m| m.is_usable()).collect();
        usable.sort_by_key(|m| m.timestamp);

        let Some(latest) = usable.last().map(|m| m.timestamp) else {
            return usable;
        };
        let start = latest - Duration::hours(self.config.history_hours);
        usable.retain(|m| m.timestamp >= start);
        usable
    }

    /// 1.0 for a gapless history, lowered by 0.1 per gap down to 0.5
    fn gap_factor(&self, window: &[&Measurement]) -> f64 {
        let limit = Duration::minutes(self.config.expected_interval_minutes.max(1) * 2);
        let gaps = window
            .windows(2)
            .filter(|pair| pair[1].timestamp - pair[0].timestamp > limit)
            .count();
        (1.0 - 0.1 * gaps as f64).max(0.5)
    }

    fn horizon_decay(&self, hour: usize) -> f64 {
        (-self.config.confidence_decay_per_hour.max(0.0) * (hour as f64 - 1.0)).exp()
    }

    /// Diurnal amplitude and residual trend (°C per hour)
    fn fit_temperature(&self, series: &Series, reference: DateTime<Utc>) -> (f64, f64) {
        let default_amplitude = self.config.default_diurnal_amplitude.max(0.0);

        let amplitude = if series.len() >= 4 && series.span_hours() >= 6.0 {
            self.fit_amplitude(series, reference).unwrap_or(default_amplitude)
        } else {
            default_amplitude
        };

        let residuals: Vec<(f64, f64)> = series
            .trailing(TENDENCY_WINDOW_HOURS)
            .points
            .iter()
            .map(|(t, v)| (*t, v - amplitude * self.phase_at(reference, *t)))
            .collect();
        let trend = linear_fit(&residuals)
            .map(|(slope, _)| slope.clamp(-2.0, 2.0))
            .unwrap_or(0.0);

        (amplitude, trend)
    }

    fn fit_amplitude(&self, series: &Series, reference: DateTime<Utc>) -> Option<f64> {
        let regressors: Vec<(f64, f64)> = series
            .points
            .iter()
            .map(|(t, v)| (self.phase_at(reference, *t), *v))
            .collect();
        let (amplitude, _) = linear_fit(&regressors)?;
        // A negative amplitude means the fit picked up weather, not the daily cycle
        (amplitude.is_finite() && amplitude > 0.0).then(|| amplitude.min(8.0))
    }

    /// Diurnal phase `offset_hours` away from `reference`
    fn phase_at(&self, reference: DateTime<Utc>, offset_hours: f64) -> f64 {
        let utc_hours = reference.hour() as f64 + reference.minute() as f64 / 60.0;
        let local = utc_hours + offset_hours + self.solar_offset_hours;
        (2.0 * PI * (local - DIURNAL_PEAK_HOUR) / 24.0).cos()
    }
}

fn pressure_slope(pressure: &Series) -> Option<f64> {
    pressure
        .trailing(TENDENCY_WINDOW_HOURS)
        .slope()
        .or_else(|| pressure.slope())
        .map(|s| s.clamp(-MAX_PRESSURE_SLOPE, MAX_PRESSURE_SLOPE))
}

fn base_confidence(field: ForecastField) -> f64 {
    match field {
        ForecastField::Pressure => 0.85,
        ForecastField::Temperature => 0.8,
        ForecastField::Humidity => 0.7,
        ForecastField::WindSpeed => 0.65,
        ForecastField::PrecipitationProbability => 0.55,
        ForecastField::Precipitation => 0.5,
    }
}

/// 0.5 for a single sample, rising to 1.0 at twelve samples
fn sample_factor(samples: usize) -> f64 {
    let extra = samples.saturating_sub(1) as f64 / 11.0;
    0.5 + 0.5 * extra.clamp(0.0, 1.0)
}

/// Least-squares line through `(x, y)` pairs: (slope, intercept)
fn linear_fit(points: &[(f64, f64)]) -> Option<(f64, f64)> {
    if points.len() < 2 {
        return None;
    }
    let n = points.len() as f64;
    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;
    let sxx: f64 = points.iter().map(|(x, _)| (x - mean_x).powi(2)).sum();
    if sxx < 1e-9 {
        return None;
    }
    let sxy: f64 = points
        .iter()
        .map(|(x, y)| (x - mean_x) * (y - mean_y))
        .sum();
    let slope = sxy / sxx;
    Some((slope, mean_y - slope * mean_x))
}

/// Magnus formula, hPa
fn saturation_vapour_pressure(temperature_c: f64) -> f64 {
    6.112 * (17.67 * temperature_c / (temperature_c + 243.5)).exp()
}

fn precipitation_probability(
    current: Option<f64>,
    pressure_tendency: Option<f64>,
    humidity: Option<f64>,
    current_rate: Option<f64>,
    lead: f64,
) -> Option<f64> {
    if current.is_none() && pressure_tendency.is_none() && humidity.is_none() && current_rate.is_none()
    {
        return None;
    }

    let base = current.unwrap_or(CLIMATOLOGICAL_PRECIPITATION_PROBABILITY);
    let persistence = (-lead / 6.0).exp();
    let relaxed = base * persistence + CLIMATOLOGICAL_PRECIPITATION_PROBABILITY * (1.0 - persistence);

    // Falling pressure raises the chance of rain, rising pressure lowers it
    let pressure_term = pressure_tendency
        .map(|tendency| if tendency < 0.0 { -tendency * 6.0 } else { -tendency * 3.0 })
        .unwrap_or(0.0);
    let humidity_term = humidity.map(|rh| (rh - 80.0).max(0.0) * 1.5).unwrap_or(0.0);
    let rain_term = current_rate
        .filter(|rate| *rate > 0.1)
        .map(|_| 15.0 * persistence)
        .unwrap_or(0.0);

    Some((relaxed + pressure_term + humidity_term + rain_term).clamp(0.0, 100.0))
}

fn precipitation_amount(current: Option<f64>, probability: Option<f64>, lead: f64) -> Option<f64> {
    if current.is_none() && probability.is_none() {
        return None;
    }
    let carried = current.unwrap_or(0.0).max(0.0) * (-lead / 3.0).exp();
    let expected = probability
        .filter(|p| *p > 60.0)
        .map(|p| (p - 60.0) / 40.0 * 2.0)
        .unwrap_or(0.0);
    Some((carried + expected).max(0.0))
}

/// Condition label implied by forecast values
pub fn derive_condition(
    probability: Option<f64>,
    amount: Option<f64>,
    humidity: Option<f64>,
    pressure_tendency: Option<f64>,
) -> Option<String> {
    if probability.is_none() && amount.is_none() {
        return None;
    }
    let probability = probability.unwrap_or(0.0);
    let amount = amount.unwrap_or(0.0);
    let humidity = humidity.unwrap_or(0.0);

    let label = if amount > 0.5 || probability > 80.0 {
        if humidity > 85.0 && pressure_tendency.is_some_and(|t| t < -1.5) {
            "thunderstorm"
        } else {
            "rain"
        }
    } else if probability > 40.0 || humidity > 90.0 {
        "clouds"
    } else {
        "clear"
    };
    Some(label.to_string())
}

/// Effective hours of a trend that decays with e-folding time `tau`
fn damped_lead(lead: f64, tau: f64) -> f64 {
    tau * (1.0 - (-lead / tau).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_damped_lead_trails_linear() {
        assert_eq!(damped_lead(0.0, 12.0), 0.0);
        let one = damped_lead(1.0, 12.0);
        let six = damped_lead(6.0, 12.0);
        assert!(one < 1.0 && one > 0.95);
        assert!(six < 6.0 && six > one);
        assert!(damped_lead(1000.0, 12.0) <= 12.0);
    }

    #[test]
    fn test_linear_fit_recovers_line() {
        let points: Vec<(f64, f64)> = (0..5).map(|i| (i as f64, 2.0 * i as f64 + 1.0)).collect();
        let (slope, intercept) = linear_fit(&points).unwrap();
        assert!((slope - 2.0).abs() < 1e-9);
        assert!((intercept - 1.0).abs() < 1e-9);
        assert!(linear_fit(&[(1.0, 3.0)]).is_none());
        assert!(linear_fit(&[(1.0, 3.0), (1.0, 4.0)]).is_none());
    }

    #[test]
    fn test_warming_lowers_relative_humidity() {
        let ratio = saturation_vapour_pressure(20.0) / saturation_vapour_pressure(25.0);
        assert!(ratio < 1.0);
        assert!((saturation_vapour_pressure(0.0) - 6.112).abs() < 1e-9);
    }

    #[test]
    fn test_sample_factor_bounds() {
        assert_eq!(sample_factor(0), 0.5);
        assert_eq!(sample_factor(1), 0.5);
        assert_eq!(sample_factor(12), 1.0);
        assert_eq!(sample_factor(500), 1.0);
    }

    #[test]
    fn test_falling_pressure_raises_precipitation_probability() {
        let steady = precipitation_probability(Some(30.0), Some(0.0), Some(70.0), None, 1.0).unwrap();
        let falling = precipitation_probability(Some(30.0), Some(-3.0), Some(70.0), None, 1.0).unwrap();
        assert!(falling > steady);
        assert_eq!(precipitation_probability(None, None, None, None, 1.0), None);
    }

    #[test]
    fn test_derive_condition() {
        assert_eq!(derive_condition(Some(90.0), None, Some(90.0), Some(-2.0)).as_deref(), Some("thunderstorm"));
        assert_eq!(derive_condition(Some(90.0), None, Some(60.0), None).as_deref(), Some("rain"));
        assert_eq!(derive_condition(Some(50.0), Some(0.0), None, None).as_deref(), Some("clouds"));
        assert_eq!(derive_condition(Some(10.0), None, None, None).as_deref(), Some("clear"));
        assert_eq!(derive_condition(None, None, Some(95.0), None), None);
    }
}
