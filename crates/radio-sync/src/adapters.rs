//! Concrete station adapters, selected by each station's `kind`.

use async_trait::async_trait;
use radio_nowplaying::nowplaying::{RawListeners, RawNowPlayingPayload, RawSong};
use radio_nowplaying::station::{AdapterConfig, Station};
use radio_nowplaying::{AdapterError, AdapterProvider, StationAdapter};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Reports the song and listener count written in `stations.toml`.
pub struct StaticAdapter {
    song: Option<String>,
    listeners: Option<u64>,
}

#[async_trait]
impl StationAdapter for StaticAdapter {
    async fn poll(&self) -> Result<RawNowPlayingPayload, AdapterError> {
        Ok(RawNowPlayingPayload {
            listeners: Some(RawListeners {
                current: self.listeners,
                ..Default::default()
            }),
            current_song: self.song.as_ref().map(|text| RawSong {
                text: Some(text.clone()),
                ..Default::default()
            }),
            ..Default::default()
        })
    }
}

/// Fetches a now-playing JSON document from `status_url`.
pub struct HttpJsonAdapter {
    client: Client,
    status_url: String,
    timeout: Duration,
}

#[async_trait]
impl StationAdapter for HttpJsonAdapter {
    async fn poll(&self) -> Result<RawNowPlayingPayload, AdapterError> {
        debug!("[adapter] GET {}", self.status_url);
        let resp = self
            .client
            .get(&self.status_url)
            .send()
            .await
            .map_err(|e| self.map_err(e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AdapterError::Status(status.as_u16()));
        }

        let body = resp.bytes().await.map_err(|e| self.map_err(e))?;
        serde_json::from_slice(&body).map_err(|e| AdapterError::InvalidPayload(e.to_string()))
    }
}

impl HttpJsonAdapter {
    fn map_err(&self, e: reqwest::Error) -> AdapterError {
        if e.is_timeout() {
            AdapterError::Timeout(self.timeout)
        } else {
            AdapterError::Http(e.to_string())
        }
    }
}

/// Builds adapters from station config, sharing one HTTP client.
pub struct ConfiguredAdapters {
    client: Client,
    timeout: Duration,
}

impl ConfiguredAdapters {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("radio-sync/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self { client, timeout })
    }
}

impl AdapterProvider for ConfiguredAdapters {
    fn adapter_for(&self, station: &Station) -> Result<Arc<dyn StationAdapter>, AdapterError> {
        Ok(match &station.adapter {
            AdapterConfig::Static { song, listeners } => Arc::new(StaticAdapter {
                song: song.clone(),
                listeners: *listeners,
            }),
            AdapterConfig::HttpJson { status_url } => Arc::new(HttpJsonAdapter {
                client: self.client.clone(),
                status_url: status_url.clone(),
                timeout: self.timeout,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::Router;
    use radio_nowplaying::nowplaying::StationStatus;

    fn station(adapter: AdapterConfig) -> Station {
        Station {
            short_name: "alpha".into(),
            name: "Alpha".into(),
            description: String::new(),
            url: String::new(),
            adapter,
        }
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_static_adapter() {
        let provider = ConfiguredAdapters::new(Duration::from_secs(1)).unwrap();
        let adapter = provider
            .adapter_for(&station(AdapterConfig::Static {
                song: Some("Artist - Title".into()),
                listeners: Some(4),
            }))
            .unwrap();
        let payload = adapter.poll().await.unwrap().normalize();
        assert_eq!(payload.song_text.as_deref(), Some("Artist - Title"));
        assert_eq!(payload.listeners.current, 4);
        assert_eq!(payload.status, StationStatus::Online);
    }

    #[tokio::test]
    async fn test_http_json_adapter_parses_payload() {
        let app = Router::new().route(
            "/status.json",
            get(|| async {
                axum::Json(serde_json::json!({
                    "listeners": { "current": 12, "unique": 10, "total": 400 },
                    "current_song": { "artist": "Artist", "title": "Title" },
                    "bitrate": 128
                }))
            }),
        );
        let base = serve(app).await;
        let provider = ConfiguredAdapters::new(Duration::from_secs(5)).unwrap();
        let adapter = provider
            .adapter_for(&station(AdapterConfig::HttpJson {
                status_url: format!("{}/status.json", base),
            }))
            .unwrap();

        let payload = adapter.poll().await.unwrap().normalize();
        assert_eq!(payload.listeners.total, 400);
        assert_eq!(payload.song_text.as_deref(), Some("Artist - Title"));
        assert_eq!(payload.meta.get("bitrate"), Some(&serde_json::json!(128)));
    }

    #[tokio::test]
    async fn test_http_json_adapter_reports_bad_status_and_body() {
        let app = Router::new()
            .route(
                "/down",
                get(|| async { axum::http::StatusCode::SERVICE_UNAVAILABLE }),
            )
            .route("/garbage", get(|| async { "not json" }));
        let base = serve(app).await;
        let provider = ConfiguredAdapters::new(Duration::from_secs(5)).unwrap();

        let down = provider
            .adapter_for(&station(AdapterConfig::HttpJson {
                status_url: format!("{}/down", base),
            }))
            .unwrap();
        assert!(matches!(down.poll().await, Err(AdapterError::Status(503))));

        let garbage = provider
            .adapter_for(&station(AdapterConfig::HttpJson {
                status_url: format!("{}/garbage", base),
            }))
            .unwrap();
        assert!(matches!(
            garbage.poll().await,
            Err(AdapterError::InvalidPayload(_))
        ));
    }
}
