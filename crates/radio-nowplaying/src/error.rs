//! Error types for polling and cycle execution.

use std::time::Duration;

/// Why a single station poll produced no usable payload.
///
/// Always isolated to the station it happened on: the engine turns it into
/// an offline snapshot and the cycle moves on.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("request failed: {0}")]
    Http(String),

    #[error("poll timed out after {0:?}")]
    Timeout(Duration),

    #[error("upstream returned status {0}")]
    Status(u16),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("no adapter for station kind '{0}'")]
    Unsupported(String),
}

/// Failures that abort a whole cycle.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("could not list stations: {0}")]
    StationListing(#[source] anyhow::Error),

    #[error("a cycle is already in progress")]
    CycleInProgress,
}
