//! Downstream sinks for a finished cycle: metrics, the read cache and the
//! durable per-station snapshot store.

use serde_json::Value;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::nowplaying::NowPlayingSnapshot;

/// Time-series sink. Fire-and-forget: implementations log their own errors.
pub trait MetricsSink: Send + Sync {
    fn record(&self, metric_path: &str, value: f64);
}

/// Short-lived read cache.
pub trait CacheSink: Send + Sync {
    fn put(&self, key: &str, value: Value, tags: &[String], ttl: Duration) -> anyhow::Result<()>;
}

/// Authoritative per-station snapshot record.
pub trait SnapshotStore: Send + Sync {
    fn get(&self, station: &str) -> anyhow::Result<Option<NowPlayingSnapshot>>;
    fn set(&self, station: &str, snapshot: &NowPlayingSnapshot) -> anyhow::Result<()>;
}

// ── Metrics ───────────────────────────────────────────────────────────────────

/// Writes every data point to the log.
#[derive(Debug, Default)]
pub struct LogMetrics;

impl MetricsSink for LogMetrics {
    fn record(&self, metric_path: &str, value: f64) {
        info!("[metrics] {} = {}", metric_path, value);
    }
}

/// Appends `<path> <value> <unix_ts>` lines (Graphite plaintext) to a file.
#[derive(Debug)]
pub struct LineFileMetrics {
    path: PathBuf,
    lock: Mutex<()>,
}

impl LineFileMetrics {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn write_line(&self, metric_path: &str, value: f64) -> anyhow::Result<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("metrics lock poisoned"))?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(f, "{} {} {}", metric_path, value, chrono::Utc::now().timestamp())?;
        Ok(())
    }
}

impl MetricsSink for LineFileMetrics {
    fn record(&self, metric_path: &str, value: f64) {
        if let Err(e) = self.write_line(metric_path, value) {
            warn!("[metrics] failed to write {}: {}", metric_path, e);
        }
    }
}

/// Keeps every recorded point in memory, in order.
#[derive(Debug, Default)]
pub struct MemoryMetrics {
    points: Mutex<Vec<(String, f64)>>,
}

impl MemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn points(&self) -> Vec<(String, f64)> {
        self.points.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl MetricsSink for MemoryMetrics {
    fn record(&self, metric_path: &str, value: f64) {
        if let Ok(mut points) = self.points.lock() {
            points.push((metric_path.to_string(), value));
        }
    }
}

// ── Cache ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

/// In-process TTL cache.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value under `key`, unless it has expired.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock().ok()?;
        let expired = match entries.get(key) {
            Some(e) if e.expires_at > Instant::now() => return Some(e.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.remove(key);
        }
        None
    }
}

impl CacheSink for MemoryCache {
    fn put(&self, key: &str, value: Value, tags: &[String], ttl: Duration) -> anyhow::Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("cache lock poisoned"))?;
        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        debug!("[cache] put {} tags={:?} (ttl {}s)", key, tags, ttl.as_secs());
        Ok(())
    }
}

// ── Snapshot store ────────────────────────────────────────────────────────────

/// One pretty-printed JSON file per station under `dir`.
#[derive(Debug, Clone)]
pub struct JsonSnapshotStore {
    dir: PathBuf,
}

impl JsonSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `[A-Za-z0-9_-]` is kept, every other byte becomes `%XX`, so distinct
    /// station names never share a file.
    fn file_for(&self, station: &str) -> PathBuf {
        let mut name = String::with_capacity(station.len() + 5);
        for b in station.bytes() {
            if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
                name.push(b as char);
            } else {
                name.push_str(&format!("%{:02X}", b));
            }
        }
        name.push_str(".json");
        self.dir.join(name)
    }
}

impl SnapshotStore for JsonSnapshotStore {
    fn get(&self, station: &str) -> anyhow::Result<Option<NowPlayingSnapshot>> {
        let path = self.file_for(station);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn set(&self, station: &str, snapshot: &NowPlayingSnapshot) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.file_for(station);
        write_atomic(&path, &serde_json::to_vec_pretty(snapshot)?)
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshots: Mutex<HashMap<String, NowPlayingSnapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn get(&self, station: &str) -> anyhow::Result<Option<NowPlayingSnapshot>> {
        let snapshots = self
            .snapshots
            .lock()
            .map_err(|_| anyhow::anyhow!("snapshot lock poisoned"))?;
        Ok(snapshots.get(station).cloned())
    }

    fn set(&self, station: &str, snapshot: &NowPlayingSnapshot) -> anyhow::Result<()> {
        let mut snapshots = self
            .snapshots
            .lock()
            .map_err(|_| anyhow::anyhow!("snapshot lock poisoned"))?;
        snapshots.insert(station.to_string(), snapshot.clone());
        Ok(())
    }
}
