use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

/// A concrete version of a map as known to the map catalogue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapVersion {
    pub id: u32,
    pub file_name: String,
    /// Whether games on this map may count toward ratings.
    pub ranked: bool,
}

/// Lookup and bookkeeping interface to the map catalogue.
pub trait MapService: Send + Sync {
    /// Resolve a map by the file name reported by the host.
    fn find_map(&self, file_name: &str) -> BoxFuture<'_, Option<MapVersion>>;

    /// Bump the play counter of a map after a game on it ended.
    fn increment_times_played(&self, map_id: u32) -> BoxFuture<'_, ()>;
}
