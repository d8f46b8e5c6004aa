//! Now-playing aggregation for a set of radio stations.
//!
//! Every cycle polls each station once, decides whether its current song is
//! unchanged, gone or new, records new plays in the history ledger, and
//! hands the combined result to the metrics, cache and snapshot sinks.

pub mod adapter;
pub mod config;
pub mod cycle;
pub mod engine;
pub mod error;
pub mod history;
pub mod nowplaying;
pub mod platform;
pub mod sinks;
pub mod songs;
pub mod station;

pub use adapter::{AdapterProvider, StationAdapter};
pub use cycle::{AggregateCycleResult, CycleRunner, DispatchOptions, LatestNowPlaying, Sinks};
pub use engine::{AggregationEngine, Decision, EngineConfig};
pub use error::{AdapterError, CycleError};
pub use nowplaying::{NowPlayingSnapshot, RawNowPlayingPayload};
