//! Shared helpers: Decimal ↔ f64 conversions and UTC time arithmetic.
//!
//! Latitude/longitude are stored as `Decimal` so they can serve as exact
//! grouping keys when joining forecasts against observations; weather values
//! stay `f64`. Non-finite inputs convert to `Decimal::ZERO`.

use chrono::{DateTime, Timelike, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

/// Convert an f64 coordinate to Decimal preserving full precision.
pub(crate) fn f64_to_decimal(v: f64) -> Decimal {
    if !v.is_finite() {
        tracing::warn!("f64_to_decimal received non-finite value {}, defaulting to 0", v);
        return Decimal::ZERO;
    }
    Decimal::from_f64(v).unwrap_or_else(|| Decimal::new(v as i64, 0))
}

/// Convert a Decimal to f64, defaulting to 0.0 for values that can't be represented.
pub(crate) fn dec_to_f64(d: Decimal) -> f64 {
    d.to_f64().unwrap_or(0.0)
}

/// Floor a datetime to the start of its hour.
pub(crate) fn floor_hour(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.date_naive()
        .and_hms_opt(dt.time().hour(), 0, 0)
        .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
        .unwrap_or(dt)
}

/// Forecast horizon in whole hours: round((valid_time − issue_time) / 1h).
pub(crate) fn horizon_hours(issue_time: DateTime<Utc>, valid_time: DateTime<Utc>) -> i32 {
    let secs = (valid_time - issue_time).num_seconds() as f64;
    (secs / 3600.0).round() as i32
}

/// Clamp a value to a safe range to avoid extreme vendor outliers.
pub(crate) fn clamp_value(x: f64) -> f64 {
    x.clamp(-1e6, 1e6)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_f64_to_decimal_normal() {
        let d = f64_to_decimal(47.3769);
        assert!(d > Decimal::ZERO);
    }

    #[test]
    fn test_f64_to_decimal_nan() {
        assert_eq!(f64_to_decimal(f64::NAN), Decimal::ZERO);
    }

    #[test]
    fn test_f64_to_decimal_infinity() {
        assert_eq!(f64_to_decimal(f64::INFINITY), Decimal::ZERO);
    }

    #[test]
    fn test_dec_to_f64_roundtrip() {
        let d = Decimal::from_str("8.5417").unwrap();
        assert!((dec_to_f64(d) - 8.5417).abs() < 1e-10);
    }

    #[test]
    fn test_floor_hour() {
        let dt = "2026-03-01T07:45:30Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(
            floor_hour(dt),
            "2026-03-01T07:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
    }

    #[test]
    fn test_floor_hour_exact() {
        let dt = "2026-03-01T07:00:00Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(floor_hour(dt), dt);
    }

    #[test]
    fn test_horizon_hours_exact() {
        let issue = "2026-03-01T06:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let valid = "2026-03-01T12:00:00Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(horizon_hours(issue, valid), 6);
    }

    #[test]
    fn test_horizon_hours_rounds() {
        let issue = "2026-03-01T06:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let valid = "2026-03-01T12:40:00Z".parse::<DateTime<Utc>>().unwrap();
        // 6h40m rounds to 7
        assert_eq!(horizon_hours(issue, valid), 7);
    }

    #[test]
    fn test_clamp_value() {
        assert_eq!(clamp_value(1e9), 1e6);
        assert_eq!(clamp_value(-1e9), -1e6);
        assert_eq!(clamp_value(12.5), 12.5);
    }
}
