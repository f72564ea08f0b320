//! Blended-forecast inference.
//!
//! The statistical model is an external collaborator behind the [`Predictor`]
//! trait: one output per input row, positionally aligned with the feature
//! matrix. The built-in [`VendorMeanBlend`] baseline averages the available
//! vendor columns; a trained model plugs in through the same trait.
//!
//! The inference job builds features with the same assembler used at
//! training time and appends its outputs as `our_model` forecast rows, so
//! the ranking engine scores the blend alongside the vendors.

use chrono::Utc;
use sqlx::PgPool;

use crate::db::queries::{self, InsertForecastParams};
use crate::errors::AppError;
use crate::services::features::{build_features, FeatureConfig, FeatureMatrix};
use crate::services::units::Variable;

/// Source tag for locally produced blended forecasts.
pub const MODEL_SOURCE: &str = "our_model";

/// Opaque predictor contract: `predict(features) -> values`, one output per
/// row, aligned positionally with the matrix rows.
pub trait Predictor: Send + Sync {
    fn name(&self) -> &str;
    fn predict(&self, matrix: &FeatureMatrix) -> Result<Vec<f64>, AppError>;
}

/// Baseline blend: the mean of whichever vendor columns are present.
pub struct VendorMeanBlend;

impl Predictor for VendorMeanBlend {
    fn name(&self) -> &str {
        "vendor_mean_blend"
    }

    fn predict(&self, matrix: &FeatureMatrix) -> Result<Vec<f64>, AppError> {
        matrix
            .rows
            .iter()
            .map(|row| {
                let present: Vec<f64> = row.vendors.iter().flatten().copied().collect();
                if present.is_empty() {
                    // The assembler drops zero-signal rows; seeing one here
                    // means the matrix was built elsewhere.
                    return Err(AppError::InternalError(
                        "feature row without any vendor signal".to_string(),
                    ));
                }
                Ok(present.iter().sum::<f64>() / present.len() as f64)
            })
            .collect()
    }
}

/// Build features and append blended forecasts for every configured
/// (variable, horizon) pair.
pub async fn run_inference(
    pool: &PgPool,
    predictor: &dyn Predictor,
    variables: &[String],
    horizons: &[i32],
    vendor_sources: &[String],
) -> Result<(), AppError> {
    let config = FeatureConfig::with_default_lags(vendor_sources.to_vec());

    for variable_name in variables {
        let variable: Variable = match variable_name.parse() {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Skipping inference for unknown variable: {}", e);
                continue;
            }
        };

        let forecasts = queries::get_forecasts(pool, variable_name, vendor_sources).await?;
        let observations = queries::get_observations(pool, variable_name).await?;

        for &horizon in horizons {
            let matrix = build_features(&forecasts, &observations, &config)?;
            if matrix.is_empty() {
                continue;
            }

            let predictions = predictor.predict(&matrix)?;
            if predictions.len() != matrix.rows.len() {
                return Err(AppError::InternalError(format!(
                    "predictor '{}' returned {} values for {} rows",
                    predictor.name(),
                    predictions.len(),
                    matrix.rows.len()
                )));
            }

            let issue_time = Utc::now();
            let mut inserted = 0;
            for (row, value) in matrix.rows.iter().zip(predictions) {
                let params = InsertForecastParams {
                    source: MODEL_SOURCE.to_string(),
                    latitude: row.latitude,
                    longitude: row.longitude,
                    variable: variable_name.clone(),
                    issue_time: Some(issue_time),
                    valid_time: row.valid_time,
                    horizon_hours: Some(horizon),
                    value,
                    unit: variable.canonical_unit().tag().to_string(),
                };
                match queries::insert_forecast(pool, params).await {
                    Ok(()) => inserted += 1,
                    Err(e) => tracing::warn!("Blend insert failed: {}", e),
                }
            }

            tracing::debug!(
                "Inference: {} horizon {}h — {} blended rows from {}",
                variable_name,
                horizon,
                inserted,
                predictor.name(),
            );
        }
    }

    Ok(())
}
