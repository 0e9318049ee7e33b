//! Ranking, progress, and completeness computations.

/// Live leaderboard that tracks rank evolution between snapshots.
pub mod projector;
/// Full-recompute ranking, progress, and segment splits.
pub mod ranking;
/// Final classification of finishers.
pub mod results;
/// Mandatory-checkpoint completeness checks.
pub mod validator;
