//! Persisted representations of the engine aggregates.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::game::{
    Game, GameId, GamePlayerStats, GameVisibility, Validity, VictoryCondition,
};
use crate::state::players::PlayerId;

/// Durable form of a game, written at launch and updated at end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameEntity {
    pub id: GameId,
    pub title: String,
    pub host_id: PlayerId,
    pub featured_mod: String,
    pub map_id: Option<u32>,
    pub map_folder_name: String,
    pub victory_condition: VictoryCondition,
    pub validity: Validity,
    pub visibility: GameVisibility,
    pub password_protected: bool,
    pub start_time: Option<SystemTime>,
    pub end_time: Option<SystemTime>,
    pub mutually_agreed_draw: bool,
    pub sim_mods: Vec<Uuid>,
    pub player_stats: Vec<GamePlayerStats>,
}

impl From<&Game> for GameEntity {
    fn from(game: &Game) -> Self {
        Self {
            id: game.id,
            title: game.title.clone(),
            host_id: game.host.id(),
            featured_mod: game.featured_mod.technical_name.clone(),
            map_id: game.map_version.as_ref().map(|map| map.id),
            map_folder_name: game.map_folder_name.clone(),
            victory_condition: game.victory_condition,
            validity: game.validity,
            visibility: game.visibility,
            password_protected: game.password.is_some(),
            start_time: game.start_time,
            end_time: game.end_time,
            mutually_agreed_draw: game.mutually_agreed_draw,
            sim_mods: game.sim_mods.iter().map(|sim_mod| sim_mod.uid).collect(),
            player_stats: game.player_stats.values().cloned().collect(),
        }
    }
}
