//! Temporal feature assembly: reconcile vendor forecasts and ground
//! observations into a model-ready matrix per (variable, horizon).
//!
//! The matrix construction is deterministic: rows are keyed and ordered by
//! (latitude, longitude, valid_time), and the column set and ordering are
//! fixed — identity columns, vendor columns in configured order, lag columns
//! ascending, calendar columns, target. Training and inference call the same
//! code path; any divergence between the two would silently invalidate
//! predictions.
//!
//! Vendor and observation clocks are not perfectly aligned, so the target
//! join tries an exact timestamp first, then falls back to the observation at
//! valid_time − 1h, then +1h. That priority order is load-bearing: changing
//! it changes training/serving semantics.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};

use crate::db::models::{ForecastRecord, ObservationRecord};
use crate::errors::AppError;

/// Grouping key for a single matrix row.
type RowKey = (Decimal, Decimal, DateTime<Utc>);

/// Assembler configuration: the recognized vendor columns (in output order)
/// and the observation lag offsets.
#[derive(Debug, Clone)]
pub struct FeatureConfig {
    vendor_sources: Vec<String>,
    lag_hours: Vec<i64>,
}

impl FeatureConfig {
    pub fn new(vendor_sources: Vec<String>, mut lag_hours: Vec<i64>) -> Self {
        // Lag columns are emitted in ascending order regardless of input order.
        lag_hours.sort_unstable();
        lag_hours.dedup();
        Self {
            vendor_sources,
            lag_hours,
        }
    }

    /// Standard lag offsets: 1h, 3h, 6h.
    pub fn with_default_lags(vendor_sources: Vec<String>) -> Self {
        Self::new(vendor_sources, vec![1, 3, 6])
    }

    pub fn vendor_sources(&self) -> &[String] {
        &self.vendor_sources
    }

    pub fn lag_hours(&self) -> &[i64] {
        &self.lag_hours
    }
}

/// One assembled row. Vendor and lag values are positional, aligned with the
/// config's vendor/lag ordering; `None` means the signal was absent, which is
/// a valid state, not an error.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub latitude: Decimal,
    pub longitude: Decimal,
    pub valid_time: DateTime<Utc>,
    pub vendors: Vec<Option<f64>>,
    pub lags: Vec<Option<f64>>,
    /// Hour of day, 0–23.
    pub hour: u32,
    /// Day of week, Monday = 0.
    pub dow: u32,
    /// Target observation; None until the matching observation arrives.
    pub y: Option<f64>,
}

/// A reproducible, column-ordered feature/target matrix.
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    pub columns: Vec<String>,
    pub rows: Vec<FeatureRow>,
}

impl FeatureMatrix {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn empty(config: &FeatureConfig) -> Self {
        Self {
            columns: column_names(config),
            rows: Vec::new(),
        }
    }
}

/// Fixed output column order: identity, vendors (configured order), lags
/// (ascending), calendar, target.
fn column_names(config: &FeatureConfig) -> Vec<String> {
    let mut columns = vec![
        "lat".to_string(),
        "lon".to_string(),
        "valid_time".to_string(),
    ];
    columns.extend(config.vendor_sources.iter().cloned());
    columns.extend(config.lag_hours.iter().map(|l| format!("obs_lag_{}h", l)));
    columns.push("hour".to_string());
    columns.push("dow".to_string());
    columns.push("y".to_string());
    columns
}

/// Build the feature/target matrix for one variable from complete forecast
/// and observation snapshots.
///
/// Rows where every vendor column is absent carry no signal to model on and
/// are dropped; rows with partial vendor coverage or missing lags are kept.
/// With no observations at all there is nothing to target-join, and the
/// result is an empty (but correctly-columned) matrix.
pub fn build_features(
    forecasts: &[ForecastRecord],
    observations: &[ObservationRecord],
    config: &FeatureConfig,
) -> Result<FeatureMatrix, AppError> {
    if config.vendor_sources.is_empty() {
        return Err(AppError::ConfigError(
            "feature assembly requires at least one configured vendor source".to_string(),
        ));
    }

    if forecasts.is_empty() || observations.is_empty() {
        return Ok(FeatureMatrix::empty(config));
    }

    let vendor_index: HashMap<&str, usize> = config
        .vendor_sources
        .iter()
        .enumerate()
        .map(|(i, s)| (s.as_str(), i))
        .collect();

    // Pivot forecasts into one column per vendor, keyed by (lat, lon, valid_time).
    // Duplicate (key, source) records aggregate by mean.
    let mut pivot: BTreeMap<RowKey, Vec<(f64, u32)>> = BTreeMap::new();
    for rec in forecasts {
        let Some(&idx) = vendor_index.get(rec.source.as_str()) else {
            // Unknown source tag — not one of the configured vendor columns.
            continue;
        };
        let key = (rec.latitude, rec.longitude, rec.valid_time);
        let cell = &mut pivot
            .entry(key)
            .or_insert_with(|| vec![(0.0, 0); config.vendor_sources.len()])[idx];
        cell.0 += rec.value;
        cell.1 += 1;
    }

    // Observation lookup by exact (lat, lon, time).
    let mut obs: BTreeMap<RowKey, f64> = BTreeMap::new();
    for rec in observations {
        obs.insert((rec.latitude, rec.longitude, rec.obs_time), rec.value);
    }

    let mut rows = Vec::with_capacity(pivot.len());
    for ((lat, lon, valid_time), cells) in pivot {
        let vendors: Vec<Option<f64>> = cells
            .iter()
            .map(|(sum, n)| (*n > 0).then(|| sum / *n as f64))
            .collect();
        if vendors.iter().all(Option::is_none) {
            continue;
        }

        // An observation at time t surfaces as obs_lag_Nh at t + N, i.e. the
        // lag value at this row is the observation N hours before valid_time.
        let lags: Vec<Option<f64>> = config
            .lag_hours
            .iter()
            .map(|l| obs.get(&(lat, lon, valid_time - Duration::hours(*l))).copied())
            .collect();

        let y = obs
            .get(&(lat, lon, valid_time))
            .or_else(|| obs.get(&(lat, lon, valid_time - Duration::hours(1))))
            .or_else(|| obs.get(&(lat, lon, valid_time + Duration::hours(1))))
            .copied();

        rows.push(FeatureRow {
            latitude: lat,
            longitude: lon,
            valid_time,
            vendors,
            lags,
            hour: valid_time.hour(),
            dow: valid_time.weekday().num_days_from_monday(),
            y,
        });
    }

    Ok(FeatureMatrix {
        columns: column_names(config),
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::f64_to_decimal;
    use uuid::Uuid;

    fn cfg() -> FeatureConfig {
        FeatureConfig::with_default_lags(vec!["open_meteo".to_string(), "met_no".to_string()])
    }

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn forecast(source: &str, t: &str, value: f64) -> ForecastRecord {
        ForecastRecord {
            id: Uuid::new_v4(),
            source: source.to_string(),
            latitude: f64_to_decimal(47.0),
            longitude: f64_to_decimal(8.0),
            variable: "temp_2m".to_string(),
            issue_time: Some(ts("2026-03-01T00:00:00Z")),
            valid_time: ts(t),
            horizon_hours: Some(12),
            value,
            unit: "C".to_string(),
            created_at: ts("2026-03-01T00:00:00Z"),
        }
    }

    fn observation(t: &str, value: f64) -> ObservationRecord {
        ObservationRecord {
            id: Uuid::new_v4(),
            latitude: f64_to_decimal(47.0),
            longitude: f64_to_decimal(8.0),
            variable: "temp_2m".to_string(),
            obs_time: ts(t),
            value,
            unit: "C".to_string(),
            created_at: ts("2026-03-01T00:00:00Z"),
        }
    }

    #[test]
    fn test_column_order_is_fixed() {
        let m = build_features(
            &[forecast("open_meteo", "2026-03-01T12:00:00Z", 1.0)],
            &[observation("2026-03-01T12:00:00Z", 1.5)],
            &cfg(),
        )
        .unwrap();
        assert_eq!(
            m.columns,
            vec![
                "lat",
                "lon",
                "valid_time",
                "open_meteo",
                "met_no",
                "obs_lag_1h",
                "obs_lag_3h",
                "obs_lag_6h",
                "hour",
                "dow",
                "y",
            ]
        );
    }

    #[test]
    fn test_lag_columns_sorted_ascending() {
        let config = FeatureConfig::new(vec!["open_meteo".to_string()], vec![6, 1, 3]);
        assert_eq!(config.lag_hours(), &[1, 3, 6]);
    }

    #[test]
    fn test_target_fallback_to_minus_one_hour() {
        // Two vendors forecast at T; the only observation is at T−1h.
        let t = "2026-03-01T12:00:00Z";
        let m = build_features(
            &[forecast("open_meteo", t, -2.0), forecast("met_no", t, -1.0)],
            &[observation("2026-03-01T11:00:00Z", -1.4)],
            &cfg(),
        )
        .unwrap();
        assert_eq!(m.rows.len(), 1);
        let row = &m.rows[0];
        assert_eq!(row.vendors, vec![Some(-2.0), Some(-1.0)]);
        assert_eq!(row.y, Some(-1.4));
    }

    #[test]
    fn test_target_prefers_exact_then_minus_then_plus() {
        let t = "2026-03-01T12:00:00Z";
        let obs_all = vec![
            observation("2026-03-01T11:00:00Z", 10.0),
            observation("2026-03-01T12:00:00Z", 20.0),
            observation("2026-03-01T13:00:00Z", 30.0),
        ];
        let m = build_features(&[forecast("open_meteo", t, 1.0)], &obs_all, &cfg()).unwrap();
        assert_eq!(m.rows[0].y, Some(20.0));

        // Without the exact match, −1h wins over +1h.
        let obs_sides = vec![
            observation("2026-03-01T11:00:00Z", 10.0),
            observation("2026-03-01T13:00:00Z", 30.0),
        ];
        let m = build_features(&[forecast("open_meteo", t, 1.0)], &obs_sides, &cfg()).unwrap();
        assert_eq!(m.rows[0].y, Some(10.0));

        let obs_plus = vec![observation("2026-03-01T13:00:00Z", 30.0)];
        let m = build_features(&[forecast("open_meteo", t, 1.0)], &obs_plus, &cfg()).unwrap();
        assert_eq!(m.rows[0].y, Some(30.0));
    }

    #[test]
    fn test_missing_target_is_none_not_error() {
        let m = build_features(
            &[forecast("open_meteo", "2026-03-01T12:00:00Z", 1.0)],
            &[observation("2026-03-01T06:00:00Z", 5.0)],
            &cfg(),
        )
        .unwrap();
        assert_eq!(m.rows[0].y, None);
    }

    #[test]
    fn test_lag_features_attach_at_shifted_time() {
        let t = "2026-03-01T12:00:00Z";
        let m = build_features(
            &[forecast("open_meteo", t, 1.0)],
            &[
                observation("2026-03-01T11:00:00Z", 11.0), // lag 1h
                observation("2026-03-01T09:00:00Z", 9.0),  // lag 3h
                observation("2026-03-01T06:00:00Z", 6.0),  // lag 6h
            ],
            &cfg(),
        )
        .unwrap();
        assert_eq!(m.rows[0].lags, vec![Some(11.0), Some(9.0), Some(6.0)]);
    }

    #[test]
    fn test_partial_lags_are_kept() {
        let m = build_features(
            &[forecast("open_meteo", "2026-03-01T12:00:00Z", 1.0)],
            &[observation("2026-03-01T09:00:00Z", 9.0)],
            &cfg(),
        )
        .unwrap();
        assert_eq!(m.rows.len(), 1);
        assert_eq!(m.rows[0].lags, vec![None, Some(9.0), None]);
    }

    #[test]
    fn test_unknown_vendor_rows_are_excluded() {
        // The only forecast at this key comes from an unconfigured source, so
        // the key carries zero vendor signal and must not produce a row, even
        // though lag and calendar features would be available.
        let m = build_features(
            &[forecast("mystery_vendor", "2026-03-01T12:00:00Z", 1.0)],
            &[observation("2026-03-01T11:00:00Z", 2.0)],
            &cfg(),
        )
        .unwrap();
        assert!(m.is_empty());
    }

    #[test]
    fn test_duplicate_vendor_values_average() {
        let t = "2026-03-01T12:00:00Z";
        let m = build_features(
            &[forecast("open_meteo", t, 1.0), forecast("open_meteo", t, 3.0)],
            &[observation(t, 2.0)],
            &cfg(),
        )
        .unwrap();
        assert_eq!(m.rows[0].vendors[0], Some(2.0));
    }

    #[test]
    fn test_calendar_features() {
        // 2026-03-02 is a Monday.
        let m = build_features(
            &[forecast("open_meteo", "2026-03-02T15:00:00Z", 1.0)],
            &[observation("2026-03-02T15:00:00Z", 1.0)],
            &cfg(),
        )
        .unwrap();
        assert_eq!(m.rows[0].hour, 15);
        assert_eq!(m.rows[0].dow, 0);
    }

    #[test]
    fn test_rows_ordered_deterministically() {
        let mut f1 = forecast("open_meteo", "2026-03-01T13:00:00Z", 1.0);
        let mut f2 = forecast("open_meteo", "2026-03-01T12:00:00Z", 2.0);
        f1.latitude = f64_to_decimal(48.0);
        f2.latitude = f64_to_decimal(47.0);
        let m = build_features(
            &[f1, f2],
            &[observation("2026-03-01T12:00:00Z", 0.0)],
            &cfg(),
        )
        .unwrap();
        assert_eq!(m.rows[0].latitude, f64_to_decimal(47.0));
        assert_eq!(m.rows[1].latitude, f64_to_decimal(48.0));
    }

    #[test]
    fn test_no_observations_yields_empty_matrix() {
        let m = build_features(
            &[forecast("open_meteo", "2026-03-01T12:00:00Z", 1.0)],
            &[],
            &cfg(),
        )
        .unwrap();
        assert!(m.is_empty());
        assert!(!m.columns.is_empty());
    }

    #[test]
    fn test_zero_configured_vendors_is_schema_error() {
        let config = FeatureConfig::with_default_lags(Vec::new());
        let err = build_features(&[], &[], &config).unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }
}
