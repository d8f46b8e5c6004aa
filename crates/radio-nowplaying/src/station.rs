use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// How a station's now-playing data is fetched. Selected per station in
/// `stations.toml` via `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdapterConfig {
    /// Fixed values from configuration.
    Static {
        song: Option<String>,
        listeners: Option<u64>,
    },
    /// A URL that returns a now-playing JSON document.
    HttpJson { status_url: String },
}

impl AdapterConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Static { .. } => "static",
            Self::HttpJson { .. } => "http_json",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Station {
    /// Unique short code; key of the per-station maps.
    pub short_name: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Public stream URL.
    #[serde(default)]
    pub url: String,
    pub adapter: AdapterConfig,
}

impl Station {
    /// Public view embedded in every snapshot.
    pub fn info(&self) -> StationInfo {
        StationInfo {
            short_name: self.short_name.clone(),
            name: self.name.clone(),
            kind: self.adapter.kind().to_string(),
            description: Some(self.description.clone()).filter(|d| !d.is_empty()),
            url: Some(self.url.clone()).filter(|u| !u.is_empty()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StationInfo {
    pub short_name: String,
    pub name: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Source of the station list for a cycle.
pub trait StationRegistry: Send + Sync {
    fn list_all_stations(&self) -> anyhow::Result<Vec<Station>>;
}

/// Fixed, in-memory station list.
#[derive(Debug, Clone, Default)]
pub struct StaticStationRegistry {
    stations: Vec<Station>,
}

impl StaticStationRegistry {
    pub fn new(stations: Vec<Station>) -> Self {
        Self { stations }
    }
}

impl StationRegistry for StaticStationRegistry {
    fn list_all_stations(&self) -> anyhow::Result<Vec<Station>> {
        Ok(self.stations.clone())
    }
}

/// Reads `stations.toml` on every call so edits apply on the next cycle.
#[derive(Debug, Clone)]
pub struct TomlStationRegistry {
    path: PathBuf,
}

impl TomlStationRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StationRegistry for TomlStationRegistry {
    fn list_all_stations(&self) -> anyhow::Result<Vec<Station>> {
        load_stations_from_toml(&self.path)
    }
}

// ── TOML station loader ───────────────────────────────────────────────────────

/// Intermediate struct that matches the TOML `[[station]]` table.
/// We keep this separate from `Station` so the file format can stay flat
/// while `Station` carries a typed adapter config.
#[derive(Debug, serde::Deserialize)]
struct TomlStationFile {
    #[serde(default)]
    station: Vec<TomlStation>,
}

#[derive(Debug, serde::Deserialize)]
struct TomlStation {
    short_name: String,
    name: String,
    kind: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    status_url: Option<String>,
    #[serde(default)]
    song: Option<String>,
    #[serde(default)]
    listeners: Option<u64>,
}

impl TomlStation {
    fn into_station(self) -> anyhow::Result<Station> {
        let adapter = match self.kind.as_str() {
            "static" => AdapterConfig::Static {
                song: self.song,
                listeners: self.listeners,
            },
            "http_json" => AdapterConfig::HttpJson {
                status_url: self.status_url.ok_or_else(|| {
                    anyhow::anyhow!("station '{}': http_json needs status_url", self.short_name)
                })?,
            },
            other => anyhow::bail!("station '{}': unknown kind '{}'", self.short_name, other),
        };
        Ok(Station {
            short_name: self.short_name,
            name: self.name,
            description: self.description,
            url: self.url,
            adapter,
        })
    }
}

pub fn load_stations_from_toml(path: &Path) -> anyhow::Result<Vec<Station>> {
    let content = std::fs::read_to_string(path)?;
    parse_stations_from_toml_str(&content)
}

pub fn parse_stations_from_toml_str(content: &str) -> anyhow::Result<Vec<Station>> {
    let file: TomlStationFile = toml::from_str(content)?;
    let stations = file
        .station
        .into_iter()
        .map(TomlStation::into_station)
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut seen = HashSet::new();
    for s in &stations {
        if s.short_name.trim().is_empty() {
            anyhow::bail!("station '{}' has an empty short_name", s.name);
        }
        if !seen.insert(s.short_name.as_str()) {
            anyhow::bail!("duplicate station short_name '{}'", s.short_name);
        }
    }
    Ok(stations)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATIONS: &str = r#"
        [[station]]
        short_name = "alpha"
        name = "Alpha FM"
        kind = "static"
        song = "Artist - Title"
        listeners = 4

        [[station]]
        short_name = "beta"
        name = "Beta Radio"
        kind = "http_json"
        url = "https://beta.example/stream"
        status_url = "https://beta.example/status.json"
        description = "Beta's main feed"
    "#;

    #[test]
    fn test_parse_stations() {
        let stations = parse_stations_from_toml_str(STATIONS).unwrap();
        assert_eq!(stations.len(), 2);
        assert_eq!(
            stations[0].adapter,
            AdapterConfig::Static {
                song: Some("Artist - Title".into()),
                listeners: Some(4)
            }
        );
        assert_eq!(stations[1].adapter.kind(), "http_json");
    }

    #[test]
    fn test_station_info() {
        let stations = parse_stations_from_toml_str(STATIONS).unwrap();
        let alpha = stations[0].info();
        assert_eq!(alpha.kind, "static");
        assert!(alpha.url.is_none());
        let beta = stations[1].info();
        assert_eq!(beta.url.as_deref(), Some("https://beta.example/stream"));
        assert_eq!(beta.description.as_deref(), Some("Beta's main feed"));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let err = parse_stations_from_toml_str(
            r#"
            [[station]]
            short_name = "x"
            name = "X"
            kind = "shoutcast"
            "#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_http_json_requires_status_url() {
        let err = parse_stations_from_toml_str(
            r#"
            [[station]]
            short_name = "x"
            name = "X"
            kind = "http_json"
            "#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_duplicate_short_names_rejected() {
        let err = parse_stations_from_toml_str(
            r#"
            [[station]]
            short_name = "x"
            name = "X"
            kind = "static"

            [[station]]
            short_name = "x"
            name = "X again"
            kind = "static"
            "#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_empty_file_has_no_stations() {
        assert!(parse_stations_from_toml_str("").unwrap().is_empty());
    }
}
