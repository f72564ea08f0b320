use serde::Deserialize;
use std::time::Duration;

use crate::services::fetch::FetchConfig;

/// A target location the ingestion job fetches forecasts for.
#[derive(Debug, Clone, Deserialize)]
pub struct Location {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
}

/// Application configuration, parsed from environment variables.
///
/// List-valued settings (locations, variables, horizons) are JSON-encoded
/// in their env var; invalid JSON falls back to the default with a warning.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    /// User-Agent sent to vendor APIs that require one.
    pub vendor_user_agent: String,

    pub target_locations: Vec<Location>,
    pub variables: Vec<String>,
    pub horizons_hours: Vec<i32>,
    /// Vendor sources recognized by the feature assembler, in column order.
    pub vendor_sources: Vec<String>,

    pub requests_timeout: Duration,
    pub requests_cache_ttl: Duration,
    pub requests_concurrency: usize,
    pub fetch_max_attempts: u32,
    /// Whether non-429 4xx responses consume retry budget (policy switch).
    pub fetch_retry_client_errors: bool,
    pub http_cache_dir: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .expect("PORT must be a valid u16"),
            vendor_user_agent: std::env::var("VENDOR_USER_AGENT")
                .unwrap_or_else(|_| "weather-rank/0.1 (ops@weather-rank.example)".to_string()),
            target_locations: json_env("TARGET_LOCATIONS", Vec::new()),
            variables: json_env(
                "VARIABLES",
                vec![
                    "temp_2m".to_string(),
                    "wind_speed_10m".to_string(),
                    "precipitation".to_string(),
                ],
            ),
            horizons_hours: json_env("HORIZONS_HOURS", vec![1, 3, 6, 12, 24, 48, 72]),
            vendor_sources: json_env(
                "VENDOR_SOURCES",
                vec![
                    "open_meteo".to_string(),
                    "met_no".to_string(),
                    "openweather".to_string(),
                    "visual_crossing".to_string(),
                    "weather_gov".to_string(),
                ],
            ),
            requests_timeout: Duration::from_secs(env_u64("REQUESTS_TIMEOUT", 30)),
            requests_cache_ttl: Duration::from_secs(env_u64("REQUESTS_CACHE_TTL_SECONDS", 600)),
            requests_concurrency: env_u64("REQUESTS_CONCURRENCY", 4) as usize,
            fetch_max_attempts: env_u64("FETCH_MAX_ATTEMPTS", 6) as u32,
            fetch_retry_client_errors: std::env::var("FETCH_RETRY_CLIENT_ERRORS")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            http_cache_dir: std::env::var("HTTP_CACHE_DIR")
                .unwrap_or_else(|_| ".cache/http".to_string()),
        }
    }

    /// Fetch-client tuning derived from the app config.
    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            ttl: self.requests_cache_ttl,
            timeout: self.requests_timeout,
            max_attempts: self.fetch_max_attempts,
            retry_client_errors: self.fetch_retry_client_errors,
            ..FetchConfig::default()
        }
    }
}

/// Parse a JSON-encoded env var; return the default if missing or invalid.
fn json_env<T: serde::de::DeserializeOwned>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Invalid JSON in {}: {}; using default", name, e);
                default
            }
        },
        _ => default,
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
