//! One pass over every station.
//!
//! `CycleRunner::run_cycle` lists the stations, runs the engine for each of
//! them concurrently, and only once all of them are done dispatches the
//! result to the sinks. At most one cycle runs at a time per runner.
//!
//! A station's `prev` is the last snapshot this runner computed for it, or
//! the durable store's copy when the runner has none yet (first cycle after
//! a restart). A failed store write or an abandoned cycle therefore never
//! makes a continuing song look new.

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::adapter::AdapterProvider;
use crate::config::Config;
use crate::engine::{AggregationEngine, Decision, StationOutcome};
use crate::error::CycleError;
use crate::nowplaying::{CacheMarker, NowPlayingSnapshot};
use crate::sinks::{CacheSink, MetricsSink, SnapshotStore};
use crate::station::{Station, StationRegistry};

/// Everything one cycle computed.
#[derive(Debug, Clone, Serialize)]
pub struct AggregateCycleResult {
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    /// Keyed by station short name.
    pub stations: BTreeMap<String, NowPlayingSnapshot>,
    /// Sum of `listeners.current` over `stations`.
    pub total_overall: u64,
    #[serde(skip)]
    pub decisions: BTreeMap<String, Decision>,
}

impl AggregateCycleResult {
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }

    pub fn station(&self, short_name: &str) -> Option<&NowPlayingSnapshot> {
        self.stations.get(short_name)
    }

    /// Per-station map with every snapshot tagged `marker`.
    pub fn tagged(&self, marker: CacheMarker) -> BTreeMap<String, NowPlayingSnapshot> {
        self.stations
            .iter()
            .map(|(k, v)| (k.clone(), v.with_cache_marker(marker)))
            .collect()
    }
}

/// Where a cycle's result goes.
#[derive(Clone)]
pub struct Sinks {
    pub metrics: Arc<dyn MetricsSink>,
    pub cache: Arc<dyn CacheSink>,
    pub snapshots: Arc<dyn SnapshotStore>,
}

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub cache_key: String,
    pub cache_tags: Vec<String>,
    pub cache_ttl: Duration,
    pub metrics_prefix: String,
}

impl DispatchOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            cache_key: config.cache.key.clone(),
            cache_tags: config.cache.tags.clone(),
            cache_ttl: Duration::from_secs(config.cache.ttl_secs),
            metrics_prefix: config.metrics.prefix.clone(),
        }
    }

    fn metric(&self, path: &str) -> String {
        if self.metrics_prefix.is_empty() {
            path.to_string()
        } else {
            format!("{}.{}", self.metrics_prefix.trim_end_matches('.'), path)
        }
    }
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

pub struct CycleRunner {
    registry: Arc<dyn StationRegistry>,
    adapters: Arc<dyn AdapterProvider>,
    engine: AggregationEngine,
    sinks: Sinks,
    options: DispatchOptions,
    in_flight: Mutex<()>,
    last: StdMutex<HashMap<String, NowPlayingSnapshot>>,
}

impl CycleRunner {
    pub fn new(
        registry: Arc<dyn StationRegistry>,
        adapters: Arc<dyn AdapterProvider>,
        engine: AggregationEngine,
        sinks: Sinks,
        options: DispatchOptions,
    ) -> Self {
        Self {
            registry,
            adapters,
            engine,
            sinks,
            options,
            in_flight: Mutex::new(()),
            last: StdMutex::new(HashMap::new()),
        }
    }

    /// Run one full cycle: compute every station, then dispatch.
    ///
    /// Fails only if the station list cannot be read or another cycle is
    /// still running. Station and sink failures are logged and absorbed.
    pub async fn run_cycle(&self) -> Result<AggregateCycleResult, CycleError> {
        let _guard = self
            .in_flight
            .try_lock()
            .map_err(|_| CycleError::CycleInProgress)?;

        let result = self.compute().await?;
        self.dispatch(&result);
        info!(
            "[cycle] {} stations, {} listeners total, {}ms",
            result.stations.len(),
            result.total_overall,
            result.elapsed_ms
        );
        Ok(result)
    }

    /// Compute the cycle result without touching the sinks.
    pub async fn compute(&self) -> Result<AggregateCycleResult, CycleError> {
        let started_at = Utc::now();
        let start = Instant::now();

        let stations = self
            .registry
            .list_all_stations()
            .map_err(CycleError::StationListing)?;
        debug!("[cycle] processing {} stations", stations.len());

        let outcomes = join_all(stations.iter().map(|s| self.process(s))).await;

        let mut snapshots = BTreeMap::new();
        let mut decisions = BTreeMap::new();
        for (station, outcome) in stations.iter().zip(outcomes) {
            if snapshots.contains_key(&station.short_name) {
                warn!(
                    "[cycle] duplicate station '{}', keeping the last one",
                    station.short_name
                );
            }
            snapshots.insert(station.short_name.clone(), outcome.snapshot);
            decisions.insert(station.short_name.clone(), outcome.decision);
        }
        let total_overall = snapshots.values().map(|s| s.listeners.current).sum();

        Ok(AggregateCycleResult {
            started_at,
            elapsed_ms: start.elapsed().as_millis() as u64,
            stations: snapshots,
            total_overall,
            decisions,
        })
    }

    async fn process(&self, station: &Station) -> StationOutcome {
        let prev = self.previous(&station.short_name);
        let outcome = match self.adapters.adapter_for(station) {
            Ok(adapter) => {
                self.engine
                    .process_station(station, prev.as_ref(), adapter.as_ref())
                    .await
            }
            Err(e) => self.engine.aggregate(station, prev.as_ref(), Err(e)),
        };
        if let Ok(mut last) = self.last.lock() {
            last.insert(station.short_name.clone(), outcome.snapshot.clone());
        }
        outcome
    }

    fn previous(&self, station: &str) -> Option<NowPlayingSnapshot> {
        let remembered = self
            .last
            .lock()
            .ok()
            .and_then(|last| last.get(station).cloned());
        if remembered.is_some() {
            return remembered;
        }
        match self.sinks.snapshots.get(station) {
            Ok(prev) => prev,
            Err(e) => {
                warn!(
                    "[cycle] {}: could not load previous snapshot: {:#}",
                    station, e
                );
                None
            }
        }
    }

    /// Push a computed result to metrics, cache and the snapshot store.
    pub fn dispatch(&self, result: &AggregateCycleResult) {
        for (code, snapshot) in &result.stations {
            let path = self.options.metric(&format!("station.{}.listeners", code));
            self.sinks
                .metrics
                .record(&path, snapshot.listeners.current as f64);
        }
        self.sinks.metrics.record(
            &self.options.metric("all.listeners"),
            result.total_overall as f64,
        );

        match serde_json::to_value(result.tagged(CacheMarker::Hit)) {
            Ok(value) => {
                if let Err(e) = self.sinks.cache.put(
                    &self.options.cache_key,
                    value,
                    &self.options.cache_tags,
                    self.options.cache_ttl,
                ) {
                    warn!("[sink] cache write failed: {:#}", e);
                }
            }
            Err(e) => warn!("[sink] could not serialize cycle for cache: {}", e),
        }

        for (code, snapshot) in result.tagged(CacheMarker::Database) {
            if let Err(e) = self.sinks.snapshots.set(&code, &snapshot) {
                warn!("[sink] {}: snapshot write failed: {:#}", code, e);
            }
        }
    }
}

/// Handle to the most recent cycle result, shared with readers such as the
/// HTTP API.
#[derive(Debug, Clone, Default)]
pub struct LatestNowPlaying {
    inner: Arc<RwLock<Option<Arc<AggregateCycleResult>>>>,
}

impl LatestNowPlaying {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn publish(&self, result: AggregateCycleResult) {
        *self.inner.write().await = Some(Arc::new(result));
    }

    pub async fn get(&self) -> Option<Arc<AggregateCycleResult>> {
        self.inner.read().await.clone()
    }
}
