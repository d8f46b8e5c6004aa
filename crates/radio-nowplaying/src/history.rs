//! Append-only play history.
//!
//! One entry is written per detected song start. Entries are never updated
//! or removed here; pruning old rows is left to whoever owns the storage.
//!
//! ## history.tsv schema (tab-separated)
//!
//!   sh_id  timestamp  station  song_id  current  unique  total  text
//!
//! `timestamp` is RFC 3339 in UTC. `text` is last so that it may be empty.
//!
//! The file is read once at open. After that the ledger serves reads from
//! the last [`RECENT_PER_STATION`] entries of each station, kept in memory
//! and updated on append; only larger windows go back to the file. The
//! ledger assumes it is the file's only writer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::nowplaying::Listeners;
use crate::songs::{FingerprintId, Song};

/// One recorded play.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SongHistoryEntry {
    pub id: u64,
    pub station: String,
    pub song_id: FingerprintId,
    /// Display text at the time of the play; kept so history can be rendered
    /// without a song table lookup.
    pub song_text: String,
    pub timestamp: DateTime<Utc>,
    pub listeners: Listeners,
}

pub trait HistoryLedger: Send + Sync {
    /// Up to `limit` entries for `station`, most recent first.
    fn recent_history(&self, station: &str, limit: usize) -> anyhow::Result<Vec<SongHistoryEntry>>;

    /// Record one play of `song` on `station`.
    fn append(
        &self,
        station: &str,
        song: &Song,
        listeners: &Listeners,
        timestamp: DateTime<Utc>,
    ) -> anyhow::Result<SongHistoryEntry>;
}

fn most_recent_first<'a>(
    entries: impl DoubleEndedIterator<Item = &'a SongHistoryEntry>,
    station: &str,
    limit: usize,
) -> Vec<SongHistoryEntry> {
    entries
        .rev()
        .filter(|e| e.station == station)
        .take(limit)
        .cloned()
        .collect()
}

// ── In-memory ledger ──────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryHistoryLedger {
    entries: Mutex<Vec<SongHistoryEntry>>,
}

impl MemoryHistoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of entries across all stations.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HistoryLedger for MemoryHistoryLedger {
    fn recent_history(&self, station: &str, limit: usize) -> anyhow::Result<Vec<SongHistoryEntry>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("history lock poisoned"))?;
        Ok(most_recent_first(entries.iter(), station, limit))
    }

    fn append(
        &self,
        station: &str,
        song: &Song,
        listeners: &Listeners,
        timestamp: DateTime<Utc>,
    ) -> anyhow::Result<SongHistoryEntry> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("history lock poisoned"))?;
        let entry = SongHistoryEntry {
            id: entries.len() as u64 + 1,
            station: station.to_string(),
            song_id: song.id.clone(),
            song_text: song.text.clone(),
            timestamp,
            listeners: listeners.clone(),
        };
        entries.push(entry.clone());
        Ok(entry)
    }
}

// ── TSV file ledger ───────────────────────────────────────────────────────────

const HISTORY_HEADER: &str =
    "sh_id\ttimestamp\tstation\tsong_id\tcurrent\tunique\ttotal\ttext\n";

/// Entries per station kept in memory by [`TsvHistoryLedger`].
pub const RECENT_PER_STATION: usize = 64;

#[derive(Debug, Default)]
struct LedgerState {
    next_id: u64,
    /// Oldest first, at most `RECENT_PER_STATION` per station.
    recent: HashMap<String, VecDeque<SongHistoryEntry>>,
}

impl LedgerState {
    fn remember(&mut self, entry: SongHistoryEntry) {
        let rows = self.recent.entry(entry.station.clone()).or_default();
        rows.push_back(entry);
        if rows.len() > RECENT_PER_STATION {
            rows.pop_front();
        }
    }
}

/// Ledger backed by an append-only tab-separated file.
#[derive(Debug)]
pub struct TsvHistoryLedger {
    path: PathBuf,
    /// The lock also serializes appends.
    state: Mutex<LedgerState>,
}

impl TsvHistoryLedger {
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let rows = read_rows(&path)?;
        let mut state = LedgerState {
            next_id: rows.iter().map(|e| e.id).max().unwrap_or(0) + 1,
            ..Default::default()
        };
        let count = rows.len();
        for row in rows {
            state.remember(row);
        }
        info!(
            "[history] Opened {:?}: {} rows, next sh_id={}",
            path, count, state.next_id
        );
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }
}

impl HistoryLedger for TsvHistoryLedger {
    fn recent_history(&self, station: &str, limit: usize) -> anyhow::Result<Vec<SongHistoryEntry>> {
        if limit > RECENT_PER_STATION {
            let rows = read_rows(&self.path)?;
            return Ok(most_recent_first(rows.iter(), station, limit));
        }
        let state = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("history lock poisoned"))?;
        Ok(state
            .recent
            .get(station)
            .map(|rows| most_recent_first(rows.iter(), station, limit))
            .unwrap_or_default())
    }

    fn append(
        &self,
        station: &str,
        song: &Song,
        listeners: &Listeners,
        timestamp: DateTime<Utc>,
    ) -> anyhow::Result<SongHistoryEntry> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("history lock poisoned"))?;

        let entry = SongHistoryEntry {
            id: state.next_id,
            station: station.to_string(),
            song_id: song.id.clone(),
            song_text: song.text.clone(),
            timestamp,
            listeners: listeners.clone(),
        };

        let exists = self.path.exists();
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        // One write per row so a crash never leaves half a line behind a header.
        let mut buf = String::new();
        if !exists {
            buf.push_str(HISTORY_HEADER);
        }
        buf.push_str(&encode_row(&entry));
        f.write_all(buf.as_bytes())?;

        state.next_id += 1;
        state.remember(entry.clone());
        debug!("[history] Appended sh_id={} station={}", entry.id, station);
        Ok(entry)
    }
}

fn read_rows(path: &PathBuf) -> anyhow::Result<Vec<SongHistoryEntry>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    Ok(content
        .lines()
        .filter(|l| !l.starts_with("sh_id\t") && !l.trim().is_empty())
        .filter_map(|line| {
            let row = parse_row(line);
            if row.is_none() {
                warn!("[history] Skipping malformed row: {:?}", line);
            }
            row
        })
        .collect())
}

fn encode_row(e: &SongHistoryEntry) -> String {
    format!(
        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\n",
        e.id,
        e.timestamp.to_rfc3339(),
        tsv_esc(&e.station),
        e.song_id,
        e.listeners.current,
        e.listeners.unique,
        e.listeners.total,
        tsv_esc(&e.song_text),
    )
}

fn parse_row(line: &str) -> Option<SongHistoryEntry> {
    let cols: Vec<&str> = line.splitn(8, '\t').collect();
    if cols.len() < 8 {
        return None;
    }
    Some(SongHistoryEntry {
        id: cols[0].trim().parse().ok()?,
        timestamp: DateTime::parse_from_rfc3339(cols[1].trim())
            .ok()?
            .with_timezone(&Utc),
        station: cols[2].to_string(),
        song_id: cols[3].trim().to_string(),
        listeners: Listeners {
            current: cols[4].trim().parse().ok()?,
            unique: cols[5].trim().parse().ok()?,
            total: cols[6].trim().parse().ok()?,
        },
        song_text: cols[7].to_string(),
    })
}

fn tsv_esc(s: &str) -> String {
    s.replace('\t', " ").replace('\n', " ").replace('\r', "")
}

// ── tests ─────────────────────────────────────────────────────────────────────
