//! Accuracy metric HTTP endpoints.
//!
//! - GET /api/v1/sources?window_days=N — per-source aggregated errors
//! - GET /api/v1/leaderboard?window_days=N — best source per (variable, horizon)

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use utoipa::{IntoParams, ToSchema};

use crate::errors::{AppError, ErrorResponse};
use crate::services::leaderboard::{self, LeaderboardRow, SourceScore};

/// Default trailing window for accuracy queries, matching the hourly
/// verification cadence.
const DEFAULT_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Deserialize, IntoParams)]
pub struct WindowQuery {
    /// Trailing window in days (default 7)
    pub window_days: Option<i64>,
}

/// Per-source accuracy over the window.
#[derive(Debug, Serialize, ToSchema)]
pub struct SourcesResponse {
    pub window_days: i64,
    pub sources: Vec<SourceScore>,
}

/// Leaderboard of best sources per (variable, horizon).
#[derive(Debug, Serialize, ToSchema)]
pub struct LeaderboardResponse {
    pub window_days: i64,
    pub leaderboard: Vec<LeaderboardRow>,
}

fn window_days(query: &WindowQuery) -> Result<i64, AppError> {
    let days = query.window_days.unwrap_or(DEFAULT_WINDOW_DAYS);
    if days <= 0 {
        return Err(AppError::BadRequest(
            "window_days must be positive".to_string(),
        ));
    }
    Ok(days)
}

/// Aggregated error metrics per (source, variable, horizon).
///
/// An empty window yields an empty list, not an error.
#[utoipa::path(
    get,
    path = "/api/v1/sources",
    tag = "Metrics",
    params(WindowQuery),
    responses(
        (status = 200, description = "Per-source aggregated errors", body = SourcesResponse),
        (status = 400, description = "Invalid window", body = ErrorResponse),
    )
)]
pub async fn get_sources(
    State(pool): State<PgPool>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<SourcesResponse>, AppError> {
    let days = window_days(&query)?;
    let sources = leaderboard::source_scores(&pool, days).await?;
    Ok(Json(SourcesResponse {
        window_days: days,
        sources,
    }))
}

/// Best-performing source per (variable, horizon) over the window.
#[utoipa::path(
    get,
    path = "/api/v1/leaderboard",
    tag = "Metrics",
    params(WindowQuery),
    responses(
        (status = 200, description = "Current leaderboard", body = LeaderboardResponse),
        (status = 400, description = "Invalid window", body = ErrorResponse),
    )
)]
pub async fn get_leaderboard(
    State(pool): State<PgPool>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<LeaderboardResponse>, AppError> {
    let days = window_days(&query)?;
    let rows = leaderboard::leaderboard(&pool, days).await?;
    Ok(Json(LeaderboardResponse {
        window_days: days,
        leaderboard: rows,
    }))
}
