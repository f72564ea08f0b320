use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use super::models::{ErrorRecord, ForecastRecord, ObservationRecord};
use crate::config::Location;
use crate::helpers::f64_to_decimal;

/// Parameters for inserting a new forecast record (canonical units applied).
pub struct InsertForecastParams {
    pub source: String,
    pub latitude: Decimal,
    pub longitude: Decimal,
    pub variable: String,
    pub issue_time: Option<DateTime<Utc>>,
    pub valid_time: DateTime<Utc>,
    pub horizon_hours: Option<i32>,
    pub value: f64,
    pub unit: String,
}

/// Parameters for inserting a new observation record.
pub struct InsertObservationParams {
    pub latitude: Decimal,
    pub longitude: Decimal,
    pub variable: String,
    pub obs_time: DateTime<Utc>,
    pub value: f64,
    pub unit: String,
}

/// Insert a new forecast record (append-only).
pub async fn insert_forecast(pool: &PgPool, params: InsertForecastParams) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO forecasts (
            id, source, latitude, longitude, variable,
            issue_time, valid_time, horizon_hours, value, unit, created_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW())",
    )
    .bind(Uuid::new_v4())
    .bind(&params.source)
    .bind(params.latitude)
    .bind(params.longitude)
    .bind(&params.variable)
    .bind(params.issue_time)
    .bind(params.valid_time)
    .bind(params.horizon_hours)
    .bind(params.value)
    .bind(&params.unit)
    .execute(pool)
    .await?;
    Ok(())
}

/// Insert a new observation record (append-only).
pub async fn insert_observation(
    pool: &PgPool,
    params: InsertObservationParams,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO observations (
            id, latitude, longitude, variable, obs_time, value, unit, created_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())",
    )
    .bind(Uuid::new_v4())
    .bind(params.latitude)
    .bind(params.longitude)
    .bind(&params.variable)
    .bind(params.obs_time)
    .bind(params.value)
    .bind(&params.unit)
    .execute(pool)
    .await?;
    Ok(())
}

/// All forecast records for a variable from the given vendor sources.
pub async fn get_forecasts(
    pool: &PgPool,
    variable: &str,
    sources: &[String],
) -> Result<Vec<ForecastRecord>, sqlx::Error> {
    sqlx::query_as::<_, ForecastRecord>(
        "SELECT id, source, latitude, longitude, variable,
                issue_time, valid_time, horizon_hours, value, unit, created_at
         FROM forecasts
         WHERE variable = $1 AND source = ANY($2)
         ORDER BY latitude, longitude, valid_time",
    )
    .bind(variable)
    .bind(sources)
    .fetch_all(pool)
    .await
}

/// All observation records for a variable.
pub async fn get_observations(
    pool: &PgPool,
    variable: &str,
) -> Result<Vec<ObservationRecord>, sqlx::Error> {
    sqlx::query_as::<_, ObservationRecord>(
        "SELECT id, latitude, longitude, variable, obs_time, value, unit, created_at
         FROM observations
         WHERE variable = $1
         ORDER BY latitude, longitude, obs_time",
    )
    .bind(variable)
    .fetch_all(pool)
    .await
}

/// Error records with valid_time at or after `since`, in insertion order.
/// The stable ordering matters: leaderboard tie-breaking is
/// earliest-encountered-source.
pub async fn get_errors_since(
    pool: &PgPool,
    since: DateTime<Utc>,
) -> Result<Vec<ErrorRecord>, sqlx::Error> {
    sqlx::query_as::<_, ErrorRecord>(
        "SELECT id, source, variable, horizon_hours, valid_time,
                rmse, mae, mape, created_at
         FROM errors
         WHERE valid_time >= $1
         ORDER BY created_at, id",
    )
    .bind(since)
    .fetch_all(pool)
    .await
}

/// Recent blended-model forecasts for a location, optionally filtered by
/// variables and horizons.
pub async fn get_model_forecasts(
    pool: &PgPool,
    source: &str,
    latitude: Decimal,
    longitude: Decimal,
    variables: &[String],
    horizons: &[i32],
    since: DateTime<Utc>,
) -> Result<Vec<ForecastRecord>, sqlx::Error> {
    sqlx::query_as::<_, ForecastRecord>(
        "SELECT id, source, latitude, longitude, variable,
                issue_time, valid_time, horizon_hours, value, unit, created_at
         FROM forecasts
         WHERE source = $1 AND latitude = $2 AND longitude = $3
           AND variable = ANY($4) AND horizon_hours = ANY($5)
           AND valid_time >= $6
         ORDER BY variable, horizon_hours, valid_time",
    )
    .bind(source)
    .bind(latitude)
    .bind(longitude)
    .bind(variables)
    .bind(horizons)
    .bind(since)
    .fetch_all(pool)
    .await
}

/// Seed configured target locations, skipping names that already exist.
pub async fn seed_locations(pool: &PgPool, locations: &[Location]) -> Result<(), sqlx::Error> {
    for loc in locations {
        sqlx::query(
            "INSERT INTO locations (name, latitude, longitude)
             SELECT $1, $2, $3
             WHERE NOT EXISTS (SELECT 1 FROM locations WHERE name = $1)",
        )
        .bind(&loc.name)
        .bind(f64_to_decimal(loc.lat))
        .bind(f64_to_decimal(loc.lon))
        .execute(pool)
        .await?;
    }
    Ok(())
}
