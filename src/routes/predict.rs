//! Blended-forecast HTTP endpoint.
//!
//! POST /api/v1/predict — serve the latest `our_model` forecasts already in
//! the store for a location. Inference runs on the background job cadence;
//! this endpoint never computes on demand.

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use utoipa::ToSchema;

use crate::db::queries;
use crate::errors::{AppError, ErrorResponse};
use crate::helpers::{dec_to_f64, f64_to_decimal};
use crate::services::predict::MODEL_SOURCE;

/// Served forecasts must have a valid_time no further back than this;
/// anything older describes weather that has already happened.
const FRESHNESS_WINDOW_HOURS: i64 = 6;

#[derive(Debug, Deserialize, ToSchema)]
pub struct PredictRequest {
    pub lat: f64,
    pub lon: f64,
    /// Variables to return (e.g. ["temp_2m"])
    pub variables: Vec<String>,
    /// Forecast horizons in hours (e.g. [6, 24])
    pub horizons: Vec<i32>,
}

/// One blended forecast value.
#[derive(Debug, Serialize, ToSchema)]
pub struct PredictionRow {
    pub lat: f64,
    pub lon: f64,
    pub variable: String,
    pub horizon_hours: i32,
    pub valid_time: DateTime<Utc>,
    pub value: f64,
    pub unit: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PredictResponse {
    pub predictions: Vec<PredictionRow>,
}

/// Latest blended forecasts for a location.
#[utoipa::path(
    post,
    path = "/api/v1/predict",
    tag = "Predictions",
    request_body = PredictRequest,
    responses(
        (status = 200, description = "Blended forecasts", body = PredictResponse),
        (status = 404, description = "No predictions available yet", body = ErrorResponse),
    )
)]
pub async fn post_predict(
    State(pool): State<PgPool>,
    Json(request): Json<PredictRequest>,
) -> Result<Json<PredictResponse>, AppError> {
    let since = Utc::now() - Duration::hours(FRESHNESS_WINDOW_HOURS);
    let records = queries::get_model_forecasts(
        &pool,
        MODEL_SOURCE,
        f64_to_decimal(request.lat),
        f64_to_decimal(request.lon),
        &request.variables,
        &request.horizons,
        since,
    )
    .await?;

    if records.is_empty() {
        return Err(AppError::NotFound(
            "No predictions available yet for requested parameters".to_string(),
        ));
    }

    let predictions = records
        .into_iter()
        .map(|r| PredictionRow {
            lat: dec_to_f64(r.latitude),
            lon: dec_to_f64(r.longitude),
            variable: r.variable,
            horizon_hours: r.horizon_hours.unwrap_or(0),
            valid_time: r.valid_time,
            value: r.value,
            unit: r.unit,
        })
        .collect();

    Ok(Json(PredictResponse { predictions }))
}
