pub mod features;
pub mod fetch;
pub mod ingest;
pub mod leaderboard;
pub mod predict;
pub mod units;
pub mod vendors;
