//! In-memory authoritative document store and index helpers.

/// Helper index aliases.
pub mod indices;
/// Authoritative document store with atomic batches.
pub mod store;
