//! Ranking engine: aggregate accuracy errors and pick the best-performing
//! source per (variable, horizon).
//!
//! Grouping preserves first-seen order so tie-breaking on equal mean RMSE is
//! deterministic (earliest-encountered source wins), never an artifact of
//! hash-map iteration order.

use chrono::{Duration, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::collections::HashMap;
use utoipa::ToSchema;

use crate::db::models::ErrorRecord;
use crate::db::queries;
use crate::errors::AppError;

/// Aggregated accuracy for one (source, variable, horizon) group.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SourceScore {
    pub source: String,
    pub variable: String,
    pub horizon_hours: i32,
    /// Mean root-mean-square error over the window.
    pub rmse: f64,
    /// Mean absolute error over the window.
    pub mae: f64,
    /// Mean absolute percentage error over the window.
    pub mape: f64,
    /// Number of error rows aggregated.
    pub n: i64,
}

/// The winning source for one (variable, horizon) pair.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LeaderboardRow {
    pub variable: String,
    pub horizon_hours: i32,
    pub best_source: String,
    pub rmse: f64,
    pub mae: f64,
    pub mape: f64,
    pub n: i64,
}

/// Group error records by (source, variable, horizon) and average the
/// metrics. Output preserves the order groups were first encountered in.
pub fn aggregate_errors(records: &[ErrorRecord]) -> Vec<SourceScore> {
    struct Acc {
        rmse: f64,
        mae: f64,
        mape: f64,
        n: i64,
    }

    let mut order: Vec<(String, String, i32)> = Vec::new();
    let mut groups: HashMap<(String, String, i32), Acc> = HashMap::new();

    for rec in records {
        let key = (rec.source.clone(), rec.variable.clone(), rec.horizon_hours);
        let acc = groups.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            Acc {
                rmse: 0.0,
                mae: 0.0,
                mape: 0.0,
                n: 0,
            }
        });
        acc.rmse += rec.rmse;
        acc.mae += rec.mae;
        acc.mape += rec.mape;
        acc.n += 1;
    }

    order
        .into_iter()
        .map(|key| {
            let acc = &groups[&key];
            let n = acc.n as f64;
            SourceScore {
                source: key.0,
                variable: key.1,
                horizon_hours: key.2,
                rmse: acc.rmse / n,
                mae: acc.mae / n,
                mape: acc.mape / n,
                n: acc.n,
            }
        })
        .collect()
}

/// Select the minimum-mean-RMSE source per (variable, horizon).
///
/// Ties keep the earliest-encountered source (strict less-than comparison).
/// Output is sorted by (variable, horizon) for a stable emit order; empty
/// input yields an empty leaderboard.
pub fn rank(records: &[ErrorRecord]) -> Vec<LeaderboardRow> {
    let scores = aggregate_errors(records);

    let mut best: Vec<LeaderboardRow> = Vec::new();
    let mut index: HashMap<(String, i32), usize> = HashMap::new();

    for score in scores {
        let key = (score.variable.clone(), score.horizon_hours);
        match index.get(&key) {
            Some(&i) if score.rmse >= best[i].rmse => {}
            Some(&i) => {
                best[i] = LeaderboardRow {
                    variable: score.variable,
                    horizon_hours: score.horizon_hours,
                    best_source: score.source,
                    rmse: score.rmse,
                    mae: score.mae,
                    mape: score.mape,
                    n: score.n,
                };
            }
            None => {
                index.insert(key, best.len());
                best.push(LeaderboardRow {
                    variable: score.variable,
                    horizon_hours: score.horizon_hours,
                    best_source: score.source,
                    rmse: score.rmse,
                    mae: score.mae,
                    mape: score.mape,
                    n: score.n,
                });
            }
        }
    }

    best.sort_by(|a, b| {
        (a.variable.as_str(), a.horizon_hours).cmp(&(b.variable.as_str(), b.horizon_hours))
    });
    best
}

/// Leaderboard over the trailing `window_days` of error records.
pub async fn leaderboard(pool: &PgPool, window_days: i64) -> Result<Vec<LeaderboardRow>, AppError> {
    let since = Utc::now() - Duration::days(window_days);
    let records = queries::get_errors_since(pool, since).await?;
    Ok(rank(&records))
}

/// Per-source aggregated errors over the trailing `window_days`.
pub async fn source_scores(pool: &PgPool, window_days: i64) -> Result<Vec<SourceScore>, AppError> {
    let since = Utc::now() - Duration::days(window_days);
    let records = queries::get_errors_since(pool, since).await?;
    Ok(aggregate_errors(&records))
}
