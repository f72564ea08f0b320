//! Vendor ingestion: fetch, normalize, persist.
//!
//! One cycle fetches every configured (vendor, location) pair through the
//! cached fetch client on a bounded concurrent pool, normalizes readings to
//! canonical units, and appends forecast/observation rows. A failing vendor
//! or location is logged and skipped — it must never block the others. A
//! reading with an unsupported unit is dropped with an error (hard stop for
//! that record; silently coercing it would corrupt downstream aggregates).
//!
//! [`IngestJob`] wraps the cycle in an hourly background task spawned from
//! `main`, running the blend inference pass after each ingest.

use futures::stream::{self, StreamExt};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Location;
use crate::db::queries::{self, InsertForecastParams, InsertObservationParams};
use crate::errors::AppError;
use crate::helpers::{clamp_value, f64_to_decimal, horizon_hours};
use crate::services::fetch::FetchClient;
use crate::services::predict::{self, Predictor};
use crate::services::units::normalize;
use crate::services::vendors::{RawReading, ReadingKind, VendorForecast};

/// Counters for one ingest cycle.
#[derive(Debug, Default)]
pub struct IngestSummary {
    pub fetched: usize,
    pub failed: usize,
    pub forecasts_inserted: usize,
    pub observations_inserted: usize,
    /// Readings dropped for unsupported units.
    pub readings_rejected: usize,
}

struct VendorFetchOutcome {
    source: String,
    location: Location,
    result: Result<Vec<RawReading>, AppError>,
}

/// Fetch and parse one vendor/location pair. Failures land in the outcome,
/// never propagate.
async fn fetch_one(
    fetch: &FetchClient,
    vendor: Arc<dyn VendorForecast>,
    location: Location,
) -> VendorFetchOutcome {
    let request = vendor.request(&location);
    let result = match fetch
        .fetch_json(&request.url, &request.params, &request.headers)
        .await
    {
        Ok(payload) => vendor.parse(&payload),
        Err(e) => Err(e.into()),
    };
    VendorFetchOutcome {
        source: vendor.source().to_string(),
        location,
        result,
    }
}

/// Fetch and parse every (vendor, location) pair, at most `concurrency` in
/// flight at once.
///
/// The futures are collected in a plain loop rather than mapped through a
/// closure: a closure returning the future here gets pinned to a single
/// trait-object lifetime and fails to compile once the job is `tokio::spawn`ed.
async fn fetch_all(
    fetch: &FetchClient,
    vendors: &[Arc<dyn VendorForecast>],
    locations: &[Location],
    concurrency: usize,
) -> Vec<VendorFetchOutcome> {
    let mut pending = Vec::with_capacity(vendors.len() * locations.len());
    for vendor in vendors {
        for location in locations {
            pending.push(fetch_one(fetch, vendor.clone(), location.clone()));
        }
    }

    stream::iter(pending)
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await
}

/// Normalize raw readings into insert parameters. Readings with unsupported
/// units are counted as rejected and dropped.
fn prepare_records(
    source: &str,
    location: &Location,
    readings: Vec<RawReading>,
) -> (
    Vec<InsertForecastParams>,
    Vec<InsertObservationParams>,
    usize,
) {
    let latitude = f64_to_decimal(location.lat);
    let longitude = f64_to_decimal(location.lon);
    let mut forecasts = Vec::new();
    let mut observations = Vec::new();
    let mut rejected = 0;

    for reading in readings {
        let (value, unit) = match normalize(reading.variable, reading.value, reading.unit.as_deref())
        {
            Ok(normalized) => normalized,
            Err(e) => {
                tracing::error!(
                    "Rejecting {} reading from {} at {}: {}",
                    reading.variable,
                    source,
                    location.name,
                    e
                );
                rejected += 1;
                continue;
            }
        };
        let value = clamp_value(value);

        match reading.kind {
            ReadingKind::Forecast => forecasts.push(InsertForecastParams {
                source: source.to_string(),
                latitude,
                longitude,
                variable: reading.variable.as_str().to_string(),
                issue_time: reading.issue_time,
                valid_time: reading.valid_time,
                horizon_hours: reading
                    .issue_time
                    .map(|issue| horizon_hours(issue, reading.valid_time)),
                value,
                unit: unit.tag().to_string(),
            }),
            ReadingKind::Observation => observations.push(InsertObservationParams {
                latitude,
                longitude,
                variable: reading.variable.as_str().to_string(),
                obs_time: reading.valid_time,
                value,
                unit: unit.tag().to_string(),
            }),
        }
    }

    (forecasts, observations, rejected)
}

/// Run one full ingest cycle over all vendors and locations.
pub async fn run_ingest_cycle(
    pool: &PgPool,
    fetch: &FetchClient,
    vendors: &[Arc<dyn VendorForecast>],
    locations: &[Location],
    concurrency: usize,
) -> IngestSummary {
    let mut summary = IngestSummary::default();

    for outcome in fetch_all(fetch, vendors, locations, concurrency).await {
        let readings = match outcome.result {
            Ok(readings) => {
                summary.fetched += 1;
                readings
            }
            Err(e) => {
                // One failing vendor/location must not abort the cycle.
                tracing::warn!(
                    "Ingest: {} at {} failed, skipping this cycle: {}",
                    outcome.source,
                    outcome.location.name,
                    e
                );
                summary.failed += 1;
                continue;
            }
        };

        let (forecasts, observations, rejected) =
            prepare_records(&outcome.source, &outcome.location, readings);
        summary.readings_rejected += rejected;

        for params in forecasts {
            match queries::insert_forecast(pool, params).await {
                Ok(()) => summary.forecasts_inserted += 1,
                Err(e) => tracing::warn!("Ingest: forecast insert failed: {}", e),
            }
        }
        for params in observations {
            match queries::insert_observation(pool, params).await {
                Ok(()) => summary.observations_inserted += 1,
                Err(e) => tracing::warn!("Ingest: observation insert failed: {}", e),
            }
        }
    }

    summary
}

/// Everything the background ingest + inference loop needs, assembled once
/// at startup.
pub struct IngestJob {
    pub pool: PgPool,
    pub fetch: FetchClient,
    pub vendors: Vec<Arc<dyn VendorForecast>>,
    pub locations: Vec<Location>,
    pub predictor: Arc<dyn Predictor>,
    pub variables: Vec<String>,
    pub horizons: Vec<i32>,
    pub vendor_sources: Vec<String>,
    pub concurrency: usize,
    pub interval: Duration,
}

impl IngestJob {
    /// Run the loop forever. Should be spawned via `tokio::spawn(job.run())`.
    pub async fn run(self) {
        tracing::info!(
            "Ingest loop started: {} vendors × {} locations every {:?}",
            self.vendors.len(),
            self.locations.len(),
            self.interval
        );

        loop {
            let summary = run_ingest_cycle(
                &self.pool,
                &self.fetch,
                &self.vendors,
                &self.locations,
                self.concurrency,
            )
            .await;
            tracing::info!(
                "Ingest cycle done: {} fetched, {} failed, {} forecasts, {} observations, {} rejected",
                summary.fetched,
                summary.failed,
                summary.forecasts_inserted,
                summary.observations_inserted,
                summary.readings_rejected,
            );

            if let Err(e) = predict::run_inference(
                &self.pool,
                self.predictor.as_ref(),
                &self.variables,
                &self.horizons,
                &self.vendor_sources,
            )
            .await
            {
                tracing::error!("Inference pass failed: {}", e);
            }

            tokio::time::sleep(self.interval).await;
        }
    }
}
