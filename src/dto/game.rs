use std::time::SystemTime;

use serde::Serialize;
use uuid::Uuid;

use crate::state::game::{GameId, GameVisibility};
use crate::state::machine::GameState;
use crate::state::players::PlayerId;

/// Snapshot of a game as broadcast to connected viewers.
///
/// This is the coalesced payload the dirty-set debouncer fans out. It never
/// carries the password itself, only whether one is set.
#[derive(Debug, Clone, Serialize)]
pub struct GameInfo {
    pub id: GameId,
    pub title: String,
    pub visibility: GameVisibility,
    pub password_protected: bool,
    pub state: GameState,
    /// Technical name of the featured mod.
    pub featured_mod: String,
    pub sim_mods: Vec<SimModInfo>,
    pub map_folder_name: String,
    pub host_login: String,
    pub players: Vec<GamePlayerInfo>,
    pub max_players: u32,
    pub start_time: Option<SystemTime>,
    pub min_rating: Option<i32>,
    pub max_rating: Option<i32>,
    /// Highest deployed file version of the featured mod.
    pub featured_mod_version: Option<u32>,
    pub featured_mod_file_versions: Vec<FeaturedModFileVersion>,
}

/// A player entry inside a [`GameInfo`] snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct GamePlayerInfo {
    pub id: PlayerId,
    pub login: String,
    pub team: i32,
}

/// A sim-mod entry inside a [`GameInfo`] snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct SimModInfo {
    pub uid: Uuid,
    pub display_name: String,
}

/// One versioned file of the featured mod, as shipped in snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct FeaturedModFileVersion {
    pub file_id: u32,
    pub version: u32,
}
