//! Vendor forecast endpoints.
//!
//! Each vendor is an HTTP GET returning JSON; the ingestion job only needs a
//! request description and a payload parser per vendor, so both live behind
//! the [`VendorForecast`] trait. The crate ships one concrete adapter
//! (Open-Meteo, key-free); further vendors implement the same trait.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;

use crate::config::Location;
use crate::errors::AppError;
use crate::helpers::floor_hour;
use crate::services::units::Variable;

const OPEN_METEO_URL: &str = "https://api.open-meteo.com/v1/forecast";

/// Everything the fetch layer needs to issue a vendor request.
#[derive(Debug, Clone)]
pub struct VendorRequest {
    pub url: String,
    pub params: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

/// Whether a reading is a forecast or a ground observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingKind {
    Forecast,
    Observation,
}

/// One raw vendor reading, pre-normalization. `unit` is the vendor's unit
/// alias as reported; the ingestion job normalizes it (and hard-fails the
/// reading if unsupported).
#[derive(Debug, Clone)]
pub struct RawReading {
    pub kind: ReadingKind,
    pub variable: Variable,
    pub issue_time: Option<DateTime<Utc>>,
    pub valid_time: DateTime<Utc>,
    pub value: f64,
    pub unit: Option<String>,
}

/// A vendor forecast endpoint: source tag, request builder, payload parser.
pub trait VendorForecast: Send + Sync {
    /// Source tag stored with every record from this vendor.
    fn source(&self) -> &str;
    /// Build the GET request for one location.
    fn request(&self, location: &Location) -> VendorRequest;
    /// Parse the JSON payload into raw readings.
    fn parse(&self, payload: &serde_json::Value) -> Result<Vec<RawReading>, AppError>;
}

// --- Open-Meteo ---

/// Open-Meteo forecast adapter. Requests hourly series for all tracked
/// variables plus the current conditions block, which doubles as a ground
/// observation for the fetch hour.
pub struct OpenMeteo {
    user_agent: String,
}

impl OpenMeteo {
    pub fn new(user_agent: &str) -> Self {
        Self {
            user_agent: user_agent.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenMeteoResponse {
    hourly: Option<OpenMeteoHourly>,
    hourly_units: Option<HashMap<String, String>>,
    current: Option<OpenMeteoCurrent>,
    current_units: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct OpenMeteoHourly {
    time: Vec<String>,
    temperature_2m: Option<Vec<Option<f64>>>,
    wind_speed_10m: Option<Vec<Option<f64>>>,
    precipitation: Option<Vec<Option<f64>>>,
}

#[derive(Debug, Deserialize)]
struct OpenMeteoCurrent {
    time: String,
    temperature_2m: Option<f64>,
    wind_speed_10m: Option<f64>,
    precipitation: Option<f64>,
}

/// Open-Meteo timestamps are ISO 8601 without an offset, in the requested
/// timezone (we always request UTC).
fn parse_open_meteo_time(s: &str) -> Result<DateTime<Utc>, AppError> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M")
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
        .map_err(|e| {
            AppError::ExternalServiceError(format!("open_meteo time '{}' unparseable: {}", s, e))
        })
}

fn field_variable(field: &str) -> Option<Variable> {
    match field {
        "temperature_2m" => Some(Variable::Temperature2m),
        "wind_speed_10m" => Some(Variable::WindSpeed10m),
        "precipitation" => Some(Variable::Precipitation),
        _ => None,
    }
}

impl VendorForecast for OpenMeteo {
    fn source(&self) -> &str {
        "open_meteo"
    }

    fn request(&self, location: &Location) -> VendorRequest {
        VendorRequest {
            url: OPEN_METEO_URL.to_string(),
            params: vec![
                ("latitude".to_string(), format!("{:.4}", location.lat)),
                ("longitude".to_string(), format!("{:.4}", location.lon)),
                (
                    "hourly".to_string(),
                    "temperature_2m,wind_speed_10m,precipitation".to_string(),
                ),
                (
                    "current".to_string(),
                    "temperature_2m,wind_speed_10m,precipitation".to_string(),
                ),
                ("timezone".to_string(), "UTC".to_string()),
            ],
            headers: vec![("User-Agent".to_string(), self.user_agent.clone())],
        }
    }

    fn parse(&self, payload: &serde_json::Value) -> Result<Vec<RawReading>, AppError> {
        let response: OpenMeteoResponse = serde_json::from_value(payload.clone())
            .map_err(|e| AppError::ExternalServiceError(format!("open_meteo payload: {}", e)))?;

        let mut readings = Vec::new();
        // Open-Meteo has no explicit model-run timestamp in the payload, so
        // the fetch hour stands in as the issue time. Floored so derived
        // horizons come out in whole hours.
        let issue_time = floor_hour(Utc::now());

        if let Some(hourly) = &response.hourly {
            let units = response.hourly_units.unwrap_or_default();
            let series: [(&str, Option<&Vec<Option<f64>>>); 3] = [
                ("temperature_2m", hourly.temperature_2m.as_ref()),
                ("wind_speed_10m", hourly.wind_speed_10m.as_ref()),
                ("precipitation", hourly.precipitation.as_ref()),
            ];
            for (field, values) in series {
                let Some(values) = values else { continue };
                let Some(variable) = field_variable(field) else {
                    continue;
                };
                let unit = units.get(field).cloned();
                for (time_str, value) in hourly.time.iter().zip(values.iter()) {
                    let Some(value) = value else { continue };
                    readings.push(RawReading {
                        kind: ReadingKind::Forecast,
                        variable,
                        issue_time: Some(issue_time),
                        valid_time: parse_open_meteo_time(time_str)?,
                        value: *value,
                        unit: unit.clone(),
                    });
                }
            }
        }

        if let Some(current) = &response.current {
            let units = response.current_units.unwrap_or_default();
            // The current block reports quarter-hour timestamps; floored to
            // the hour so the observation lines up with the hourly forecast
            // grid the feature join runs on.
            let obs_time = floor_hour(parse_open_meteo_time(&current.time)?);
            let values = [
                ("temperature_2m", current.temperature_2m),
                ("wind_speed_10m", current.wind_speed_10m),
                ("precipitation", current.precipitation),
            ];
            for (field, value) in values {
                let (Some(value), Some(variable)) = (value, field_variable(field)) else {
                    continue;
                };
                readings.push(RawReading {
                    kind: ReadingKind::Observation,
                    variable,
                    issue_time: None,
                    valid_time: obs_time,
                    value,
                    unit: units.get(field).cloned(),
                });
            }
        }

        if readings.is_empty() {
            return Err(AppError::ExternalServiceError(
                "open_meteo returned no hourly or current data".to_string(),
            ));
        }

        Ok(readings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> serde_json::Value {
        serde_json::json!({
            "hourly": {
                "time": ["2026-03-01T07:00", "2026-03-01T08:00"],
                "temperature_2m": [-5.0, -3.5],
                "wind_speed_10m": [3.2, null],
                "precipitation": [0.0, 0.5]
            },
            "hourly_units": {
                "temperature_2m": "°C",
                "wind_speed_10m": "km/h",
                "precipitation": "mm"
            },
            "current": {
                "time": "2026-03-01T07:15",
                "temperature_2m": -4.8,
                "wind_speed_10m": 10.8,
                "precipitation": 0.0
            },
            "current_units": {
                "temperature_2m": "°C",
                "wind_speed_10m": "km/h",
                "precipitation": "mm"
            }
        })
    }

    #[test]
    fn test_request_includes_location_and_series() {
        let vendor = OpenMeteo::new("test-agent/1.0");
        let req = vendor.request(&Location {
            name: "Zurich".to_string(),
            lat: 47.3769,
            lon: 8.5417,
        });
        assert_eq!(req.url, OPEN_METEO_URL);
        assert!(req
            .params
            .iter()
            .any(|(k, v)| k == "latitude" && v == "47.3769"));
        assert!(req.params.iter().any(|(k, _)| k == "hourly"));
        assert!(req.headers.iter().any(|(k, _)| k == "User-Agent"));
    }

    #[test]
    fn test_parse_forecast_readings() {
        let vendor = OpenMeteo::new("test");
        let readings = vendor.parse(&sample_payload()).unwrap();

        let forecasts: Vec<_> = readings
            .iter()
            .filter(|r| r.kind == ReadingKind::Forecast)
            .collect();
        // 2 temps + 1 wind (one null skipped) + 2 precip
        assert_eq!(forecasts.len(), 5);

        let temps: Vec<_> = forecasts
            .iter()
            .filter(|r| r.variable == Variable::Temperature2m)
            .collect();
        assert_eq!(temps.len(), 2);
        assert_eq!(temps[0].value, -5.0);
        assert_eq!(temps[0].unit.as_deref(), Some("°C"));
        assert_eq!(
            temps[0].valid_time,
            "2026-03-01T07:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
    }

    #[test]
    fn test_parse_current_as_observation() {
        let vendor = OpenMeteo::new("test");
        let readings = vendor.parse(&sample_payload()).unwrap();

        let obs: Vec<_> = readings
            .iter()
            .filter(|r| r.kind == ReadingKind::Observation)
            .collect();
        assert_eq!(obs.len(), 3);
        assert!(obs.iter().all(|r| r.issue_time.is_none()));
        let wind = obs
            .iter()
            .find(|r| r.variable == Variable::WindSpeed10m)
            .unwrap();
        // Raw km/h value; normalization happens in the ingestion job.
        assert_eq!(wind.value, 10.8);
        assert_eq!(wind.unit.as_deref(), Some("km/h"));
    }

    #[test]
    fn test_observation_time_floored_to_the_hour() {
        // current.time is "2026-03-01T07:15"; stored unfloored it would never
        // match a forecast row's whole-hour target or lag lookup.
        let vendor = OpenMeteo::new("test");
        let readings = vendor.parse(&sample_payload()).unwrap();
        let obs = readings
            .iter()
            .find(|r| r.kind == ReadingKind::Observation)
            .unwrap();
        assert_eq!(
            obs.valid_time,
            "2026-03-01T07:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
    }

    #[test]
    fn test_parse_empty_payload_is_an_error() {
        let vendor = OpenMeteo::new("test");
        let err = vendor.parse(&serde_json::json!({})).unwrap_err();
        assert!(matches!(err, AppError::ExternalServiceError(_)));
    }

    #[test]
    fn test_parse_bad_time_is_an_error() {
        let vendor = OpenMeteo::new("test");
        let payload = serde_json::json!({
            "hourly": {
                "time": ["yesterday-ish"],
                "temperature_2m": [1.0]
            }
        });
        assert!(vendor.parse(&payload).is_err());
    }
}
