use async_trait::async_trait;
use std::sync::Arc;

use crate::error::AdapterError;
use crate::nowplaying::RawNowPlayingPayload;
use crate::station::Station;

/// Fetches the current now-playing payload of one station.
#[async_trait]
pub trait StationAdapter: Send + Sync {
    async fn poll(&self) -> Result<RawNowPlayingPayload, AdapterError>;
}

/// Picks the adapter for a station from its configured kind.
pub trait AdapterProvider: Send + Sync {
    fn adapter_for(&self, station: &Station) -> Result<Arc<dyn StationAdapter>, AdapterError>;
}
