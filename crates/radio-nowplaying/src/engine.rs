//! Per-station change detection.
//!
//! Each poll ends in exactly one [`Decision`]:
//!
//! - `Unchanged`: the reported song fingerprints to `prev.current_song.id`.
//!   Song and history are carried over from `prev`.
//! - `NoSong`: nothing usable was reported. Song cleared, history re-read.
//! - `Changed`: a different, non-empty song. History is re-read, the song is
//!   confirmed live in the song table, one history entry is appended and
//!   only then is the play counted on the song.
//! - `Degraded`: a `Changed` poll whose song/history write failed. Treated
//!   like `NoSong` so the snapshot never points at a missing entry.
//! - `Offline`: the adapter failed. Song and history carried from `prev`.
//!
//! Listener counts and status always come from the current poll.

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::adapter::StationAdapter;
use crate::error::AdapterError;
use crate::history::HistoryLedger;
use crate::nowplaying::{
    CurrentSong, HistoryItem, Listeners, NowPlayingSnapshot, RawNowPlayingPayload, StationStatus,
};
use crate::songs::{fingerprint, SongTable, SongView};
use crate::station::Station;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Entries carried in `song_history`.
    pub history_window: usize,
    pub poll_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_window: 5,
            poll_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Unchanged,
    NoSong,
    Changed { sh_id: u64 },
    Degraded(String),
    Offline(String),
}

impl Decision {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::NoSong => "no-song",
            Self::Changed { .. } => "changed",
            Self::Degraded(_) => "degraded",
            Self::Offline(_) => "offline",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StationOutcome {
    pub snapshot: NowPlayingSnapshot,
    pub decision: Decision,
}

pub struct AggregationEngine {
    songs: Arc<dyn SongTable>,
    history: Arc<dyn HistoryLedger>,
    config: EngineConfig,
}

impl AggregationEngine {
    pub fn new(
        songs: Arc<dyn SongTable>,
        history: Arc<dyn HistoryLedger>,
        config: EngineConfig,
    ) -> Self {
        Self {
            songs,
            history,
            config,
        }
    }

    /// Poll the station's adapter (bounded by `poll_timeout`) and decide.
    pub async fn process_station(
        &self,
        station: &Station,
        prev: Option<&NowPlayingSnapshot>,
        adapter: &dyn StationAdapter,
    ) -> StationOutcome {
        let start = Instant::now();
        let polled = match tokio::time::timeout(self.config.poll_timeout, adapter.poll()).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::Timeout(self.config.poll_timeout)),
        };
        let outcome = self.aggregate(station, prev, polled);
        debug!(
            "[engine] {} → {} in {}ms",
            station.short_name,
            outcome.decision.label(),
            start.elapsed().as_millis()
        );
        outcome
    }

    /// Decide from an already-obtained poll result.
    pub fn aggregate(
        &self,
        station: &Station,
        prev: Option<&NowPlayingSnapshot>,
        polled: Result<RawNowPlayingPayload, AdapterError>,
    ) -> StationOutcome {
        let mut np = NowPlayingSnapshot {
            status: StationStatus::Offline,
            station: station.info(),
            ..Default::default()
        };

        let raw = match polled {
            Ok(raw) => raw,
            Err(e) => {
                warn!("[engine] {}: poll failed: {}", station.short_name, e);
                if let Some(prev) = prev {
                    np.current_song = prev.current_song.clone();
                    np.song_history = prev.song_history.clone();
                }
                return StationOutcome {
                    snapshot: np,
                    decision: Decision::Offline(e.to_string()),
                };
            }
        };

        let payload = raw.normalize();
        np.status = payload.status;
        np.listeners = payload.listeners;
        np.extra = payload.meta;

        let prev_id = prev.and_then(NowPlayingSnapshot::current_song_id);

        let Some(text) = payload.song_text else {
            np.song_history = self.recent_history(station, prev);
            return StationOutcome {
                snapshot: np,
                decision: Decision::NoSong,
            };
        };

        let song_id = fingerprint(&text);

        if prev_id == Some(song_id.as_str()) {
            if let Some(prev) = prev {
                np.current_song = prev.current_song.clone();
                np.song_history = prev.song_history.clone();
            }
            return StationOutcome {
                snapshot: np,
                decision: Decision::Unchanged,
            };
        }

        np.song_history = self.recent_history(station, prev);

        match self.register_play(station, &song_id, &text, &np.listeners) {
            Ok(current) => {
                let sh_id = current.sh_id.unwrap_or_default();
                info!(
                    "[engine] {}: now playing '{}' (sh_id={})",
                    station.short_name, current.song.text, sh_id
                );
                np.current_song = Some(current);
                StationOutcome {
                    snapshot: np,
                    decision: Decision::Changed { sh_id },
                }
            }
            Err(e) => {
                warn!(
                    "[engine] {}: could not record '{}': {:#}",
                    station.short_name, text, e
                );
                StationOutcome {
                    snapshot: np,
                    decision: Decision::Degraded(e.to_string()),
                }
            }
        }
    }

    /// Confirm the song as live, append its history entry, then count the play.
    fn register_play(
        &self,
        station: &Station,
        song_id: &str,
        text: &str,
        listeners: &Listeners,
    ) -> anyhow::Result<CurrentSong> {
        let song = self.songs.get_or_create(song_id, text, true)?;
        let entry = self
            .history
            .append(&station.short_name, &song, listeners, Utc::now())?;
        // The entry exists from here on, so a counter failure stays a Changed.
        let song = match self.songs.mark_played(song_id, entry.timestamp) {
            Ok(counted) => counted,
            Err(e) => {
                warn!(
                    "[engine] {}: play of {} not counted: {:#}",
                    station.short_name, song_id, e
                );
                song
            }
        };
        Ok(CurrentSong {
            song: song.view(),
            sh_id: Some(entry.id),
        })
    }

    fn recent_history(
        &self,
        station: &Station,
        prev: Option<&NowPlayingSnapshot>,
    ) -> Vec<HistoryItem> {
        match self
            .history
            .recent_history(&station.short_name, self.config.history_window)
        {
            Ok(entries) => entries
                .iter()
                .map(|e| HistoryItem::from_entry(e, SongView::from_text(e.song_id.clone(), &e.song_text)))
                .collect(),
            Err(e) => {
                warn!(
                    "[engine] {}: history read failed, keeping previous: {:#}",
                    station.short_name, e
                );
                prev.map(|p| p.song_history.clone()).unwrap_or_default()
            }
        }
    }
}
