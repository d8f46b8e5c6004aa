#![allow(dead_code)]

use async_trait::async_trait;
use radio_nowplaying::cycle::{CycleRunner, DispatchOptions, Sinks};
use radio_nowplaying::engine::{AggregationEngine, EngineConfig};
use radio_nowplaying::history::TsvHistoryLedger;
use radio_nowplaying::nowplaying::{RawListeners, RawNowPlayingPayload, RawSong};
use radio_nowplaying::sinks::{JsonSnapshotStore, MemoryCache, MemoryMetrics};
use radio_nowplaying::songs::JsonSongTable;
use radio_nowplaying::station::{AdapterConfig, StaticStationRegistry, Station};
use radio_nowplaying::{AdapterError, AdapterProvider, StationAdapter};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// One scripted poll response.
#[derive(Debug, Clone)]
pub enum Poll {
    Song(&'static str, u64),
    Silent(u64),
    Fail,
}

impl Poll {
    fn into_result(self) -> Result<RawNowPlayingPayload, AdapterError> {
        let (text, current) = match self {
            Poll::Song(text, current) => (text.to_string(), current),
            Poll::Silent(current) => (String::new(), current),
            Poll::Fail => return Err(AdapterError::Http("connection refused".into())),
        };
        Ok(RawNowPlayingPayload {
            listeners: Some(RawListeners {
                current: Some(current),
                unique: Some(current),
                total: Some(current * 10),
            }),
            current_song: Some(RawSong {
                text: Some(text),
                ..Default::default()
            }),
            ..Default::default()
        })
    }
}

/// Replays its script one poll at a time, repeating the last entry.
pub struct ScriptedAdapter {
    script: Mutex<VecDeque<Poll>>,
}

#[async_trait]
impl StationAdapter for ScriptedAdapter {
    async fn poll(&self) -> Result<RawNowPlayingPayload, AdapterError> {
        let next = {
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().cloned()
            }
        };
        next.unwrap_or(Poll::Fail).into_result()
    }
}

#[derive(Default)]
pub struct ScriptedProvider {
    adapters: HashMap<String, Arc<ScriptedAdapter>>,
}

impl ScriptedProvider {
    pub fn with(mut self, station: &str, script: Vec<Poll>) -> Self {
        self.adapters.insert(
            station.to_string(),
            Arc::new(ScriptedAdapter {
                script: Mutex::new(script.into()),
            }),
        );
        self
    }
}

impl AdapterProvider for ScriptedProvider {
    fn adapter_for(&self, station: &Station) -> Result<Arc<dyn StationAdapter>, AdapterError> {
        self.adapters
            .get(&station.short_name)
            .map(|a| a.clone() as Arc<dyn StationAdapter>)
            .ok_or_else(|| AdapterError::Unsupported(station.adapter.kind().into()))
    }
}

pub fn station(code: &str) -> Station {
    Station {
        short_name: code.to_string(),
        name: format!("{} FM", code),
        description: String::new(),
        url: format!("https://{}.example/stream", code),
        adapter: AdapterConfig::Static {
            song: None,
            listeners: None,
        },
    }
}

pub struct World {
    pub runner: CycleRunner,
    pub metrics: Arc<MemoryMetrics>,
    pub cache: Arc<MemoryCache>,
    pub snapshots: Arc<JsonSnapshotStore>,
    pub songs: Arc<JsonSongTable>,
    pub history: Arc<TsvHistoryLedger>,
}

/// Runner over file-backed stores rooted at `dir`.
pub fn world(dir: &Path, stations: Vec<Station>, provider: ScriptedProvider) -> World {
    let metrics = Arc::new(MemoryMetrics::new());
    let cache = Arc::new(MemoryCache::new());
    let snapshots = Arc::new(JsonSnapshotStore::new(dir.join("snapshots")));
    let songs = Arc::new(JsonSongTable::open(dir.join("songs.json")).unwrap());
    let history = Arc::new(TsvHistoryLedger::open(dir.join("history.tsv")).unwrap());

    let engine = AggregationEngine::new(songs.clone(), history.clone(), EngineConfig::default());
    let runner = CycleRunner::new(
        Arc::new(StaticStationRegistry::new(stations)),
        Arc::new(provider),
        engine,
        Sinks {
            metrics: metrics.clone(),
            cache: cache.clone(),
            snapshots: snapshots.clone(),
        },
        DispatchOptions::default(),
    );
    World {
        runner,
        metrics,
        cache,
        snapshots,
        songs,
        history,
    }
}
