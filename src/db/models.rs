use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;
use uuid::Uuid;

/// An append-only forecast record, always in canonical SI units.
///
/// `issue_time`/`horizon_hours` are NULL-able because the same shape also
/// carries the blended `our_model` rows, whose horizon is assigned per batch.
#[derive(Debug, Clone, FromRow)]
#[allow(dead_code)] // All fields populated by FromRow; some accessed only via route serialization
pub struct ForecastRecord {
    pub id: Uuid,
    pub source: String,
    pub latitude: Decimal,
    pub longitude: Decimal,
    pub variable: String,
    pub issue_time: Option<DateTime<Utc>>,
    pub valid_time: DateTime<Utc>,
    pub horizon_hours: Option<i32>,
    pub value: f64,
    pub unit: String,
    pub created_at: DateTime<Utc>,
}

/// A ground observation record, canonical SI units.
#[derive(Debug, Clone, FromRow)]
#[allow(dead_code)]
pub struct ObservationRecord {
    pub id: Uuid,
    pub latitude: Decimal,
    pub longitude: Decimal,
    pub variable: String,
    pub obs_time: DateTime<Utc>,
    pub value: f64,
    pub unit: String,
    pub created_at: DateTime<Utc>,
}

/// Accuracy of one source's forecast against the later observation.
#[derive(Debug, Clone, FromRow)]
#[allow(dead_code)]
pub struct ErrorRecord {
    pub id: Uuid,
    pub source: String,
    pub variable: String,
    pub horizon_hours: i32,
    pub valid_time: DateTime<Utc>,
    pub rmse: f64,
    pub mae: f64,
    pub mape: f64,
    pub created_at: DateTime<Utc>,
}
