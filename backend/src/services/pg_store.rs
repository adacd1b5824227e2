//! Postgres-backed forecast store

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{
    ForecastField, ForecastMethod, ForecastPoint, Location, Measurement, MethodForecast,
    TriggerDecision,
};
use sqlx::{types::Json, FromRow, PgPool};

use crate::error::{AppError, AppResult};
use crate::services::store::ForecastStore;

/// Store persisting to Postgres, scoped to one location
#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
    location_key: String,
}

#[derive(Debug, FromRow)]
struct MeasurementRow {
    source_id: String,
    measured_at: DateTime<Utc>,
    temperature_c: Option<f64>,
    humidity_pct: Option<f64>,
    pressure_hpa: Option<f64>,
    wind_speed_ms: Option<f64>,
    wind_direction_deg: Option<f64>,
    precipitation_mm: Option<f64>,
    precipitation_probability_pct: Option<f64>,
    condition: Option<String>,
}

impl From<MeasurementRow> for Measurement {
    fn from(row: MeasurementRow) -> Self {
        Measurement {
            timestamp: row.measured_at,
            source_id: row.source_id,
            temperature_c: row.temperature_c,
            humidity_pct: row.humidity_pct,
            pressure_hpa: row.pressure_hpa,
            wind_speed_ms: row.wind_speed_ms,
            wind_direction_deg: row.wind_direction_deg,
            precipitation_mm: row.precipitation_mm,
            precipitation_probability_pct: row.precipitation_probability_pct,
            condition: row.condition,
        }
    }
}

#[derive(Debug, FromRow)]
struct ForecastPointRow {
    method: String,
    target_at: DateTime<Utc>,
    issued_at: DateTime<Utc>,
    temperature_c: Option<f64>,
    humidity_pct: Option<f64>,
    pressure_hpa: Option<f64>,
    wind_speed_ms: Option<f64>,
    precipitation_mm: Option<f64>,
    precipitation_probability_pct: Option<f64>,
    condition: Option<String>,
    confidence: Json<BTreeMap<ForecastField, f64>>,
}

impl TryFrom<ForecastPointRow> for ForecastPoint {
    type Error = AppError;

    fn try_from(row: ForecastPointRow) -> Result<Self, Self::Error> {
        let method = row
            .method
            .parse::<ForecastMethod>()
            .map_err(|e| AppError::Storage(e.to_string()))?;
        Ok(ForecastPoint {
            method,
            target: row.target_at,
            issued_at: row.issued_at,
            temperature_c: row.temperature_c,
            humidity_pct: row.humidity_pct,
            pressure_hpa: row.pressure_hpa,
            wind_speed_ms: row.wind_speed_ms,
            precipitation_mm: row.precipitation_mm,
            precipitation_probability_pct: row.precipitation_probability_pct,
            condition: row.condition,
            confidence: row.confidence.0,
        })
    }
}

impl PgStore {
    pub fn new(db: PgPool, location: &Location) -> Self {
        Self {
            db,
            location_key: location.scope_key(),
        }
    }
}

#[async_trait]
impl ForecastStore for PgStore {
    async fn append_measurement(&self, m: &Measurement) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO measurements (
                location_key, source_id, measured_at, temperature_c, humidity_pct,
                pressure_hpa, wind_speed_ms, wind_direction_deg, precipitation_mm,
                precipitation_probability_pct, condition
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(&self.location_key)
        .bind(&m.source_id)
        .bind(m.timestamp)
        .bind(m.temperature_c)
        .bind(m.humidity_pct)
        .bind(m.pressure_hpa)
        .bind(m.wind_speed_ms)
        .bind(m.wind_direction_deg)
        .bind(m.precipitation_mm)
        .bind(m.precipitation_probability_pct)
        .bind(&m.condition)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn append_forecast(&self, forecast: &MethodForecast) -> AppResult<()> {
        let mut tx = self.db.begin().await?;

        for p in &forecast.points {
            sqlx::query(
                r#"
                INSERT INTO forecast_points (
                    location_key, method, target_at, issued_at, temperature_c, humidity_pct,
                    pressure_hpa, wind_speed_ms, precipitation_mm,
                    precipitation_probability_pct, condition, confidence
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(&self.location_key)
            .bind(p.method.as_str())
            .bind(p.target)
            .bind(p.issued_at)
            .bind(p.temperature_c)
            .bind(p.humidity_pct)
            .bind(p.pressure_hpa)
            .bind(p.wind_speed_ms)
            .bind(p.precipitation_mm)
            .bind(p.precipitation_probability_pct)
            .bind(&p.condition)
            .bind(Json(&p.confidence))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn append_decision(&self, decision: &TriggerDecision) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO trigger_decisions (id, location_key, evaluated_at, fired, decision)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(decision.id)
        .bind(&self.location_key)
        .bind(decision.evaluated_at)
        .bind(decision.fired())
        .bind(Json(decision))
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn recent_history(&self, since: DateTime<Utc>) -> AppResult<Vec<Measurement>> {
        let rows = sqlx::query_as::<_, MeasurementRow>(
            r#"
            SELECT source_id, measured_at, temperature_c, humidity_pct, pressure_hpa,
                   wind_speed_ms, wind_direction_deg, precipitation_mm,
                   precipitation_probability_pct, condition
            FROM measurements
            WHERE location_key = $1 AND measured_at >= $2
            ORDER BY measured_at ASC
            "#,
        )
        .bind(&self.location_key)
        .bind(since)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(Measurement::from).collect())
    }

    async fn pending_reconciliation(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> AppResult<Vec<ForecastPoint>> {
        let rows = sqlx::query_as::<_, ForecastPointRow>(
            r#"
            SELECT method, target_at, issued_at, temperature_c, humidity_pct, pressure_hpa,
                   wind_speed_ms, precipitation_mm, precipitation_probability_pct,
                   condition, confidence
            FROM forecast_points
            WHERE location_key = $1
              AND NOT reconciled
              AND target_at >= $2
              AND target_at <= $3
            ORDER BY target_at ASC, issued_at ASC
            "#,
        )
        .bind(&self.location_key)
        .bind(since)
        .bind(until)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(ForecastPoint::try_from).collect()
    }

    async fn mark_reconciled(&self, keys: &[(ForecastMethod, DateTime<Utc>)]) -> AppResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let methods: Vec<String> = keys.iter().map(|(m, _)| m.as_str().to_string()).collect();
        let targets: Vec<DateTime<Utc>> = keys.iter().map(|(_, t)| *t).collect();

        sqlx::query(
            r#"
            UPDATE forecast_points fp
            SET reconciled = TRUE
            FROM UNNEST($2::text[], $3::timestamptz[]) AS k(method, target_at)
            WHERE fp.location_key = $1
              AND fp.method = k.method
              AND fp.target_at = k.target_at
            "#,
        )
        .bind(&self.location_key)
        .bind(&methods)
        .bind(&targets)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn prune(&self, cutoff: DateTime<Utc>) -> AppResult<usize> {
        let mut removed = 0u64;
        for statement in [
            "DELETE FROM measurements WHERE location_key = $1 AND measured_at < $2",
            "DELETE FROM forecast_points WHERE location_key = $1 AND target_at < $2",
            "DELETE FROM trigger_decisions WHERE location_key = $1 AND evaluated_at < $2",
        ] {
            removed += sqlx::query(statement)
                .bind(&self.location_key)
                .bind(cutoff)
                .execute(&self.db)
                .await?
                .rows_affected();
        }
        Ok(removed as usize)
    }

    fn kind(&self) -> &'static str {
        "postgres"
    }
}
