//! Song identity and the canonical song table.
//!
//! A song is identified only by its display text ("Artist - Title"). The
//! fingerprint is a content hash of that text, so it survives restarts and
//! is the same no matter which station reported it.
//!
//! ## songs.json
//!
//! The file-backed table keeps every canonical song in one JSON object keyed
//! by fingerprint. The whole file is rewritten (tmp + rename) whenever a
//! song is created or a play is counted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

/// Stable content hash of a song's display text.
pub type FingerprintId = String;

// ── Identity ─────────────────────────────────────────────────────────────────

/// Fingerprint a display text: 32 hex chars of SHA-256 over the normalized
/// text. Normalization trims, collapses runs of whitespace and lowercases,
/// nothing else.
pub fn fingerprint(display_text: &str) -> FingerprintId {
    let normalized = normalize(display_text);
    let digest = Sha256::digest(normalized.as_bytes());
    let mut hex = format!("{:x}", digest);
    hex.truncate(32);
    hex
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Split "Artist - Title" into `(title, artist)`. Text without a separator
/// is taken as a bare title.
pub fn parse_song_text(text: &str) -> (Option<String>, Option<String>) {
    let s = text.trim();
    if let Some(pos) = s.find(" - ") {
        let artist = s[..pos].trim().to_string();
        let title = s[pos + 3..].trim().to_string();
        (
            Some(title).filter(|t| !t.is_empty()),
            Some(artist).filter(|a| !a.is_empty()),
        )
    } else {
        (Some(s.to_string()).filter(|t| !t.is_empty()), None)
    }
}

// ── Canonical song ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub id: FingerprintId,
    pub text: String,
    pub artist: Option<String>,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Number of recorded plays; one per history entry written for the song.
    #[serde(default)]
    pub play_count: u64,
    #[serde(default)]
    pub last_played: Option<DateTime<Utc>>,
}

impl Song {
    pub fn new(id: FingerprintId, text: &str, now: DateTime<Utc>) -> Self {
        let text = text.trim().to_string();
        let (title, artist) = parse_song_text(&text);
        Self {
            id,
            text,
            artist,
            title,
            created_at: now,
            play_count: 0,
            last_played: None,
        }
    }

    /// Public view, as embedded in snapshots.
    pub fn view(&self) -> SongView {
        SongView {
            id: self.id.clone(),
            text: self.text.clone(),
            artist: self.artist.clone(),
            title: self.title.clone(),
        }
    }

    fn mark_played(&mut self, now: DateTime<Utc>) {
        self.play_count += 1;
        self.last_played = Some(now);
    }
}

/// The part of a song the API exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongView {
    pub id: FingerprintId,
    pub text: String,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

impl SongView {
    /// View built from text alone, for history rows whose song record is gone.
    pub fn from_text(id: FingerprintId, text: &str) -> Self {
        let (title, artist) = parse_song_text(text);
        Self {
            id,
            text: text.trim().to_string(),
            artist,
            title,
        }
    }
}

// ── Song table ───────────────────────────────────────────────────────────────

/// Shared store of canonical songs.
///
/// `get_or_create` must be atomic per fingerprint: two stations airing the
/// same text in the same cycle end up with one record.
pub trait SongTable: Send + Sync {
    fn get(&self, id: &str) -> anyhow::Result<Option<Song>>;

    /// Look up the song by fingerprint, creating it on first sight.
    ///
    /// With `mark_live` the song is being confirmed as currently airing: the
    /// text must be non-empty and hash to `id`. Without it the record is only
    /// referenced. Neither form counts a play.
    fn get_or_create(&self, id: &str, text: &str, mark_live: bool) -> anyhow::Result<Song>;

    /// Count one play of an existing song at `at`.
    fn mark_played(&self, id: &str, at: DateTime<Utc>) -> anyhow::Result<Song>;
}

fn check_live(id: &str, text: &str) -> anyhow::Result<()> {
    if text.trim().is_empty() {
        anyhow::bail!("cannot confirm a live play without song text");
    }
    let expected = fingerprint(text);
    if expected != id {
        anyhow::bail!(
            "fingerprint mismatch for '{}': expected {}, got {}",
            text.trim(),
            expected,
            id
        );
    }
    Ok(())
}

/// Shared get-or-create over a locked map. Returns the song and whether it
/// was created.
fn upsert(
    songs: &mut HashMap<FingerprintId, Song>,
    id: &str,
    text: &str,
    mark_live: bool,
) -> anyhow::Result<(Song, bool)> {
    if mark_live {
        check_live(id, text)?;
    }
    let mut created = false;
    let song = songs.entry(id.to_string()).or_insert_with(|| {
        created = true;
        debug!("[songs] new song {} '{}'", id, text.trim());
        Song::new(id.to_string(), text, Utc::now())
    });
    Ok((song.clone(), created))
}

fn count_play(
    songs: &mut HashMap<FingerprintId, Song>,
    id: &str,
    at: DateTime<Utc>,
) -> anyhow::Result<Song> {
    let song = songs
        .get_mut(id)
        .ok_or_else(|| anyhow::anyhow!("no song with id {}", id))?;
    song.mark_played(at);
    Ok(song.clone())
}

/// Process-local song table.
#[derive(Debug, Default)]
pub struct MemorySongTable {
    songs: Mutex<HashMap<FingerprintId, Song>>,
}

impl MemorySongTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.songs.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SongTable for MemorySongTable {
    fn get(&self, id: &str) -> anyhow::Result<Option<Song>> {
        let songs = self
            .songs
            .lock()
            .map_err(|_| anyhow::anyhow!("song table lock poisoned"))?;
        Ok(songs.get(id).cloned())
    }

    fn get_or_create(&self, id: &str, text: &str, mark_live: bool) -> anyhow::Result<Song> {
        let mut songs = self
            .songs
            .lock()
            .map_err(|_| anyhow::anyhow!("song table lock poisoned"))?;
        let (song, _) = upsert(&mut songs, id, text, mark_live)?;
        Ok(song)
    }

    fn mark_played(&self, id: &str, at: DateTime<Utc>) -> anyhow::Result<Song> {
        let mut songs = self
            .songs
            .lock()
            .map_err(|_| anyhow::anyhow!("song table lock poisoned"))?;
        count_play(&mut songs, id, at)
    }
}

/// Song table persisted as `songs.json`.
#[derive(Debug)]
pub struct JsonSongTable {
    path: PathBuf,
    songs: Mutex<HashMap<FingerprintId, Song>>,
}

impl JsonSongTable {
    /// Open the table, starting empty if the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let songs = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                HashMap::new()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            HashMap::new()
        };
        info!("[songs] Loaded {} songs from {:?}", songs.len(), path);
        Ok(Self {
            path,
            songs: Mutex::new(songs),
        })
    }

    fn persist(path: &Path, songs: &HashMap<FingerprintId, Song>) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(songs)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl SongTable for JsonSongTable {
    fn get(&self, id: &str) -> anyhow::Result<Option<Song>> {
        let songs = self
            .songs
            .lock()
            .map_err(|_| anyhow::anyhow!("song table lock poisoned"))?;
        Ok(songs.get(id).cloned())
    }

    fn get_or_create(&self, id: &str, text: &str, mark_live: bool) -> anyhow::Result<Song> {
        let mut songs = self
            .songs
            .lock()
            .map_err(|_| anyhow::anyhow!("song table lock poisoned"))?;
        let (song, created) = upsert(&mut songs, id, text, mark_live)?;
        if created {
            if let Err(e) = Self::persist(&self.path, &songs) {
                // Keep memory and disk in step.
                songs.remove(id);
                return Err(e);
            }
        }
        Ok(song)
    }

    fn mark_played(&self, id: &str, at: DateTime<Utc>) -> anyhow::Result<Song> {
        let mut songs = self
            .songs
            .lock()
            .map_err(|_| anyhow::anyhow!("song table lock poisoned"))?;
        let previous = songs.get(id).cloned();
        let song = count_play(&mut songs, id, at)?;
        if let Err(e) = Self::persist(&self.path, &songs) {
            if let Some(prev) = previous {
                songs.insert(id.to_string(), prev);
            }
            return Err(e);
        }
        Ok(song)
    }
}

// ── tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_fingerprint_is_stable() {
        let a = fingerprint("Artist - Title");
        let b = fingerprint("Artist - Title");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_fingerprint_differs_for_different_text() {
        assert_ne!(fingerprint("Artist - Title"), fingerprint("Artist - Other Title"));
    }

    #[test]
    fn test_fingerprint_ignores_spacing_and_case() {
        assert_eq!(
            fingerprint("  The Beatles -  Hey Jude "),
            fingerprint("the beatles - hey jude")
        );
    }

    #[test]
    fn test_parse_song_text_artist_title() {
        let (title, artist) = parse_song_text("The Beatles - Hey Jude");
        assert_eq!(title.as_deref(), Some("Hey Jude"));
        assert_eq!(artist.as_deref(), Some("The Beatles"));
    }

    #[test]
    fn test_parse_song_text_no_sep() {
        let (title, artist) = parse_song_text("Some Show Name");
        assert_eq!(title.as_deref(), Some("Some Show Name"));
        assert!(artist.is_none());
    }

    #[test]
    fn test_get_or_create_reuses_record() {
        let table = MemorySongTable::new();
        let id = fingerprint("A - B");
        let first = table.get_or_create(&id, "A - B", false).unwrap();
        let second = table.get_or_create(&id, "A - B", false).unwrap();
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(table.len(), 1);
        assert_eq!(second.play_count, 0);
    }

    #[test]
    fn test_mark_played_counts_plays() {
        let table = MemorySongTable::new();
        let id = fingerprint("A - B");
        let created = table.get_or_create(&id, "A - B", true).unwrap();
        assert_eq!(created.play_count, 0);
        assert!(created.last_played.is_none());

        let at = Utc::now();
        table.mark_played(&id, at).unwrap();
        let song = table.mark_played(&id, at).unwrap();
        assert_eq!(song.play_count, 2);
        assert_eq!(song.last_played, Some(at));
        assert_eq!(song.artist.as_deref(), Some("A"));
        assert_eq!(song.title.as_deref(), Some("B"));
    }

    #[test]
    fn test_mark_played_unknown_song_fails() {
        let table = MemorySongTable::new();
        assert!(table.mark_played(&fingerprint("Nobody - Nothing"), Utc::now()).is_err());
        assert!(table.is_empty());
    }

    #[test]
    fn test_mark_live_rejects_mismatched_fingerprint() {
        let table = MemorySongTable::new();
        let err = table.get_or_create("deadbeef", "A - B", true);
        assert!(err.is_err());
        assert!(table.is_empty());
    }

    #[test]
    fn test_concurrent_get_or_create_creates_one_song() {
        let table = Arc::new(MemorySongTable::new());
        let id = fingerprint("Shared - Song");
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let t = Arc::clone(&table);
                let id = id.clone();
                std::thread::spawn(move || {
                    t.get_or_create(&id, "Shared - Song", true).unwrap();
                    t.mark_played(&id, Utc::now()).unwrap()
                })
            })
            .collect();
        let created: Vec<Song> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(table.len(), 1);
        assert!(created.iter().all(|s| s.created_at == created[0].created_at));
        assert_eq!(table.get(&id).unwrap().unwrap().play_count, 8);
    }

    #[test]
    fn test_json_table_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("songs.json");
        let id = fingerprint("Artist - Title");
        {
            let table = JsonSongTable::open(&path).unwrap();
            table.get_or_create(&id, "Artist - Title", true).unwrap();
            table.mark_played(&id, Utc::now()).unwrap();
        }
        let table = JsonSongTable::open(&path).unwrap();
        let song = table.get(&id).unwrap().unwrap();
        assert_eq!(song.text, "Artist - Title");
        assert_eq!(song.play_count, 1);
    }
}
