//! Unit normalization for vendor weather values.
//!
//! Vendors report in a mix of units; the rest of the pipeline only ever sees
//! the canonical SI unit per variable (temperature → °C, wind → m/s,
//! precipitation → mm). An unrecognized unit is a hard error — passing a raw
//! value through silently would corrupt every downstream aggregate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Physical variable tracked by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Variable {
    /// 2-metre air temperature, canonical unit °C.
    #[serde(rename = "temp_2m")]
    Temperature2m,
    /// 10-metre wind speed, canonical unit m/s.
    #[serde(rename = "wind_speed_10m")]
    WindSpeed10m,
    /// Hourly precipitation amount, canonical unit mm.
    #[serde(rename = "precipitation")]
    Precipitation,
}

impl Variable {
    pub fn as_str(&self) -> &'static str {
        match self {
            Variable::Temperature2m => "temp_2m",
            Variable::WindSpeed10m => "wind_speed_10m",
            Variable::Precipitation => "precipitation",
        }
    }

    /// Canonical SI unit for this variable.
    pub fn canonical_unit(&self) -> Unit {
        match self {
            Variable::Temperature2m => Unit::Celsius,
            Variable::WindSpeed10m => Unit::MetersPerSecond,
            Variable::Precipitation => Unit::Millimeters,
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Variable {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "temp_2m" => Ok(Variable::Temperature2m),
            "wind_speed_10m" => Ok(Variable::WindSpeed10m),
            "precipitation" => Ok(Variable::Precipitation),
            other => Err(format!("Unknown variable: {}", other)),
        }
    }
}

/// A measurement unit a vendor may report in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Celsius,
    Kelvin,
    Fahrenheit,
    MetersPerSecond,
    KilometersPerHour,
    MilesPerHour,
    Knots,
    Millimeters,
    Centimeters,
    Meters,
    Inches,
}

impl Unit {
    /// Canonical tag persisted alongside normalized values.
    pub fn tag(&self) -> &'static str {
        match self {
            Unit::Celsius => "C",
            Unit::Kelvin => "K",
            Unit::Fahrenheit => "F",
            Unit::MetersPerSecond => "m/s",
            Unit::KilometersPerHour => "km/h",
            Unit::MilesPerHour => "mph",
            Unit::Knots => "kt",
            Unit::Millimeters => "mm",
            Unit::Centimeters => "cm",
            Unit::Meters => "m",
            Unit::Inches => "in",
        }
    }

    /// Resolve a vendor unit alias for the given variable.
    ///
    /// Alias tables are per-variable so that e.g. "m" can never be read as
    /// a wind unit. Unknown aliases are `UnsupportedUnit`.
    pub fn parse_alias(variable: Variable, alias: &str) -> Result<Unit, UnsupportedUnit> {
        let unit = match variable {
            Variable::Temperature2m => match alias {
                "C" | "°C" | "celsius" => Some(Unit::Celsius),
                "K" | "kelvin" => Some(Unit::Kelvin),
                "F" | "°F" | "fahrenheit" => Some(Unit::Fahrenheit),
                _ => None,
            },
            Variable::WindSpeed10m => match alias {
                "m/s" | "mps" => Some(Unit::MetersPerSecond),
                "km/h" | "kmh" | "kph" => Some(Unit::KilometersPerHour),
                "mph" => Some(Unit::MilesPerHour),
                "kt" | "knot" | "knots" => Some(Unit::Knots),
                _ => None,
            },
            Variable::Precipitation => match alias {
                "mm" => Some(Unit::Millimeters),
                "cm" => Some(Unit::Centimeters),
                "m" => Some(Unit::Meters),
                "in" | "inch" | "inches" => Some(Unit::Inches),
                _ => None,
            },
        };

        unit.ok_or_else(|| UnsupportedUnit {
            variable,
            unit: alias.to_string(),
        })
    }
}

/// A vendor reported a unit the conversion tables don't cover.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Unsupported unit '{unit}' for variable '{variable}'")]
pub struct UnsupportedUnit {
    pub variable: Variable,
    pub unit: String,
}

/// Convert a raw (value, unit alias) pair to the variable's canonical SI
/// representation. A missing alias is taken as already-canonical.
pub fn normalize(
    variable: Variable,
    value: f64,
    src_unit: Option<&str>,
) -> Result<(f64, Unit), UnsupportedUnit> {
    let canonical = variable.canonical_unit();
    let unit = match src_unit {
        Some(alias) => Unit::parse_alias(variable, alias)?,
        None => canonical,
    };

    let converted = match unit {
        Unit::Celsius | Unit::MetersPerSecond | Unit::Millimeters => value,
        Unit::Kelvin => value - 273.15,
        Unit::Fahrenheit => (value - 32.0) * 5.0 / 9.0,
        Unit::KilometersPerHour => value / 3.6,
        Unit::MilesPerHour => value * 0.44704,
        Unit::Knots => value * 0.514444,
        Unit::Centimeters => value * 10.0,
        Unit::Meters => value * 1000.0,
        Unit::Inches => value * 25.4,
    };

    Ok((converted, canonical))
}
