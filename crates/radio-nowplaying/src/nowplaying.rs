//! Now-playing data model.
//!
//! `NowPlayingSnapshot` is what gets cached, persisted and served. Adapters
//! hand over a `RawNowPlayingPayload`, which is normalized into a
//! `NowPlayingPayload` before the engine sees it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

use crate::history::SongHistoryEntry;
use crate::songs::SongView;
use crate::station::StationInfo;

/// Snapshot fields computed by the engine. Passthrough keys with these names
/// are dropped so they cannot shadow the computed values.
pub const RESERVED_FIELDS: &[&str] = &[
    "status",
    "station",
    "listeners",
    "current_song",
    "song_history",
    "cache",
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StationStatus {
    #[default]
    Offline,
    Online,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Listeners {
    /// Live concurrent listeners.
    pub current: u64,
    pub unique: u64,
    /// Cumulative.
    pub total: u64,
}

/// The song on air, plus the history entry recorded when it started.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CurrentSong {
    #[serde(flatten)]
    pub song: SongView,
    /// Absent when the play was carried over without a new history entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sh_id: Option<u64>,
}

impl CurrentSong {
    pub fn id(&self) -> &str {
        &self.song.id
    }
}

/// One row of a snapshot's recent history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryItem {
    pub sh_id: u64,
    pub played_at: DateTime<Utc>,
    pub song: SongView,
}

impl HistoryItem {
    pub fn from_entry(entry: &SongHistoryEntry, song: SongView) -> Self {
        Self {
            sh_id: entry.id,
            played_at: entry.timestamp,
            song,
        }
    }
}

/// Where a served snapshot came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheMarker {
    /// Short-lived read cache.
    Hit,
    /// Authoritative per-station record.
    Database,
}

/// Full now-playing state of one station as of one cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NowPlayingSnapshot {
    #[serde(default)]
    pub status: StationStatus,
    #[serde(default)]
    pub station: StationInfo,
    #[serde(default)]
    pub listeners: Listeners,
    #[serde(default)]
    pub current_song: Option<CurrentSong>,
    /// Most recent first.
    #[serde(default)]
    pub song_history: Vec<HistoryItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheMarker>,
    /// Adapter metadata, passed through untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl NowPlayingSnapshot {
    pub fn current_song_id(&self) -> Option<&str> {
        self.current_song.as_ref().map(CurrentSong::id)
    }

    pub fn with_cache_marker(&self, marker: CacheMarker) -> Self {
        Self {
            cache: Some(marker),
            ..self.clone()
        }
    }
}

// ── Adapter boundary ──────────────────────────────────────────────────────────

/// Payload as reported by a station adapter. Every field is optional; the
/// rest of the document is kept as passthrough metadata.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RawNowPlayingPayload {
    #[serde(default)]
    pub status: Option<StationStatus>,
    #[serde(default)]
    pub listeners: Option<RawListeners>,
    #[serde(default)]
    pub current_song: Option<RawSong>,
    #[serde(flatten)]
    pub meta: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct RawListeners {
    #[serde(default)]
    pub current: Option<u64>,
    #[serde(default)]
    pub unique: Option<u64>,
    #[serde(default)]
    pub total: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct RawSong {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

impl RawSong {
    /// Display text: `text` if set, otherwise "Artist - Title" built from the
    /// parts. `None` when nothing usable is left after trimming.
    pub fn display_text(&self) -> Option<String> {
        let non_empty = |s: &Option<String>| {
            s.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        if let Some(text) = non_empty(&self.text) {
            return Some(text);
        }
        match (non_empty(&self.artist), non_empty(&self.title)) {
            (Some(a), Some(t)) => Some(format!("{} - {}", a, t)),
            (None, Some(t)) => Some(t),
            (Some(a), None) => Some(a),
            (None, None) => None,
        }
    }
}

/// A poll result after normalization. This is all the engine reads.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NowPlayingPayload {
    pub status: StationStatus,
    pub listeners: Listeners,
    /// `None` when the station reported no usable song.
    pub song_text: Option<String>,
    pub meta: BTreeMap<String, Value>,
}

impl RawNowPlayingPayload {
    /// Normalize a successful poll. Missing listener counts become zero, a
    /// missing status means the station answered and is online.
    pub fn normalize(self) -> NowPlayingPayload {
        let listeners = self
            .listeners
            .map(|l| Listeners {
                current: l.current.unwrap_or(0),
                unique: l.unique.unwrap_or(0),
                total: l.total.unwrap_or(0),
            })
            .unwrap_or_default();

        let song_text = self.current_song.as_ref().and_then(RawSong::display_text);

        let mut meta = self.meta;
        meta.retain(|k, _| {
            let reserved = RESERVED_FIELDS.contains(&k.as_str());
            if reserved {
                debug!("[payload] dropping reserved passthrough key '{}'", k);
            }
            !reserved
        });

        NowPlayingPayload {
            status: self.status.unwrap_or(StationStatus::Online),
            listeners,
            song_text,
            meta,
        }
    }
}
