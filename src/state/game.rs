use std::collections::HashSet;
use std::sync::Arc;
use std::time::SystemTime;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dao::maps::MapVersion;
use crate::dao::mods::{FeaturedMod, ModVersion};
use crate::state::machine::GameState;
use crate::state::players::{Player, PlayerId};

/// Identifier of a game, allocated by the engine's monotonic counter.
pub type GameId = u32;

/// ID of the team that stands for "no team" according to the game.
pub const NO_TEAM_ID: i32 = 1;
/// ID of the synthetic team observers sit on.
pub const OBSERVERS_TEAM_ID: i32 = -1;
/// Difficulty a cooperative game has to be played on to count as ranked.
pub const COOP_DIFFICULTY: i64 = 3;
/// Expansion setting a cooperative game has to keep to count as ranked.
pub const DEFAULT_EXPANSION: i64 = 1;

/// Wire-visible names of the game options the engine inspects. Unknown
/// options are stored verbatim alongside these.
pub mod options {
    pub const FOG_OF_WAR: &str = "FogOfWar";
    pub const CHEATS_ENABLED: &str = "CheatsEnabled";
    pub const PREBUILT_UNITS: &str = "PrebuiltUnits";
    pub const NO_RUSH: &str = "NoRushOption";
    pub const RESTRICTED_CATEGORIES: &str = "RestrictedCategories";
    pub const SLOTS: &str = "Slots";
    pub const SCENARIO_FILE: &str = "ScenarioFile";
    pub const TITLE: &str = "Title";
    pub const TEAM: &str = "Team";
    pub const TEAM_LOCK: &str = "TeamLock";
    pub const TEAM_SPAWN: &str = "TeamSpawn";
    pub const CIVILIANS_REVEALED: &str = "RevealedCivilians";
    pub const DIFFICULTY: &str = "Difficulty";
    pub const EXPANSION: &str = "Expansion";
    pub const START_SPOT: &str = "StartSpot";
    pub const FACTION: &str = "Faction";
    pub const COLOR: &str = "Color";
    pub const ARMY: &str = "Army";
}

/// Who gets to see a game in the public list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameVisibility {
    Public,
    Friends,
}

/// How the lobby is entered by participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LobbyMode {
    /// The host configures the lobby and players join on their own.
    Default,
    /// Participants are preset and join automatically (matchmaker games).
    AutoJoin,
}

/// Victory condition of a match as configured by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VictoryCondition {
    Demoralization,
    Domination,
    Eradication,
    Sandbox,
}

impl VictoryCondition {
    /// Game option key under which clients report the victory condition.
    pub const GAME_OPTION_NAME: &'static str = "Victory";

    /// Parse the wire representation. Returns `None` for unknown values.
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "demoralization" => Some(Self::Demoralization),
            "domination" => Some(Self::Domination),
            "eradication" => Some(Self::Eradication),
            "sandbox" => Some(Self::Sandbox),
            _ => None,
        }
    }
}

/// Outcome of one army as seen by one reporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Victory,
    Defeat,
    Draw,
    /// Placeholder used while only a score has been reported.
    Unknown,
}

/// Score and outcome of one army as seen by one reporter. Equality covers
/// all fields so identical reports can be grouped when electing the
/// most-reported result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArmyResult {
    pub army_id: u32,
    pub outcome: Outcome,
    pub score: i32,
}

impl ArmyResult {
    pub fn new(army_id: u32, outcome: Outcome, score: i32) -> Self {
        Self {
            army_id,
            outcome,
            score,
        }
    }

    /// A complete report carries both an outcome and a score; score-only
    /// placeholders do not take part in result voting.
    pub fn is_complete(&self) -> bool {
        self.outcome != Outcome::Unknown
    }
}

/// Verdict deciding whether a finished game may affect ratings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Validity {
    Valid,
    TooManyDesyncs,
    WrongVictoryCondition,
    NoFogOfWar,
    CheatsEnabled,
    PrebuiltEnabled,
    NoRushEnabled,
    BadUnitRestrictions,
    BadMap,
    TooShort,
    BadMod,
    MutualDraw,
    SinglePlayer,
    FreeForAll,
    UnevenTeams,
    UnknownResult,
    UnlockedTeams,
    HasAi,
    SpawnNotFixed,
    CiviliansRevealed,
    WrongDifficulty,
    ExpansionDisabled,
}

/// Per-game, per-player statistics captured at launch and settled at end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GamePlayerStats {
    pub player_id: PlayerId,
    pub team: Option<i32>,
    pub faction: Option<i32>,
    pub color: Option<i32>,
    pub start_spot: Option<i32>,
    /// Rating mean snapshotted when the game launched.
    pub mean: f64,
    /// Rating deviation snapshotted when the game launched.
    pub deviation: f64,
    pub score: Option<i32>,
    pub score_time: Option<SystemTime>,
}

impl GamePlayerStats {
    pub fn new(player_id: PlayerId) -> Self {
        Self {
            player_id,
            team: None,
            faction: None,
            color: None,
            start_spot: None,
            mean: 0.0,
            deviation: 0.0,
            score: None,
            score_time: None,
        }
    }
}

/// A participant preset by the matchmaker for auto-join lobbies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameParticipant {
    pub player_id: PlayerId,
    pub team: i32,
    pub slot: i32,
    pub faction: Option<i32>,
}

/// One active match and everything the engine tracks about it.
///
/// A `Game` is only ever mutated by code holding its serialization lock (see
/// [`crate::state::GameHandle`]); fields are therefore plain data.
#[derive(Debug)]
pub struct Game {
    pub id: GameId,
    pub title: String,
    pub password: Option<String>,
    pub visibility: GameVisibility,
    pub featured_mod: FeaturedMod,
    pub map_version: Option<MapVersion>,
    pub map_folder_name: String,
    pub min_rating: Option<i32>,
    pub max_rating: Option<i32>,
    pub max_players: u32,
    pub lobby_mode: LobbyMode,
    pub preset_participants: Option<Vec<GameParticipant>>,
    pub victory_condition: VictoryCondition,
    pub host: Arc<Player>,
    pub state: GameState,
    pub validity: Validity,
    pub start_time: Option<SystemTime>,
    pub end_time: Option<SystemTime>,
    pub desync_count: u32,
    pub rating_enforced: bool,
    pub mutually_agreed_draw: bool,
    /// Global options reported by the host, stored verbatim.
    pub options: IndexMap<String, Value>,
    /// Per-player options keyed by player id.
    pub player_options: IndexMap<PlayerId, IndexMap<String, Value>>,
    /// Per-AI options keyed by the AI's final name.
    pub ai_options: IndexMap<String, IndexMap<String, Value>>,
    pub sim_mods: Vec<ModVersion>,
    /// Players currently attached to this game, in join order.
    pub connected_players: IndexMap<PlayerId, Arc<Player>>,
    pub player_stats: IndexMap<PlayerId, GamePlayerStats>,
    /// Army results keyed by reporter, then by army id. Insertion order is
    /// semantic: it breaks ties when electing the most-reported result.
    pub reported_army_results: IndexMap<PlayerId, IndexMap<u32, ArmyResult>>,
    pub mutual_draw_acceptors: HashSet<PlayerId>,
    pub game_ended_reporters: HashSet<PlayerId>,
    /// Raw army statistics blob, replaced wholesale on every report.
    pub army_statistics: Vec<Value>,
}

impl Game {
    pub fn new(id: GameId, host: Arc<Player>, featured_mod: FeaturedMod) -> Self {
        Self {
            id,
            title: String::new(),
            password: None,
            visibility: GameVisibility::Public,
            featured_mod,
            map_version: None,
            map_folder_name: String::new(),
            min_rating: None,
            max_rating: None,
            max_players: 0,
            lobby_mode: LobbyMode::Default,
            preset_participants: None,
            victory_condition: VictoryCondition::Demoralization,
            host,
            state: GameState::Initializing,
            validity: Validity::Valid,
            start_time: None,
            end_time: None,
            desync_count: 0,
            rating_enforced: false,
            mutually_agreed_draw: false,
            options: IndexMap::new(),
            player_options: IndexMap::new(),
            ai_options: IndexMap::new(),
            sim_mods: Vec::new(),
            connected_players: IndexMap::new(),
            player_stats: IndexMap::new(),
            reported_army_results: IndexMap::new(),
            mutual_draw_acceptors: HashSet::new(),
            game_ended_reporters: HashSet::new(),
            army_statistics: Vec::new(),
        }
    }

    pub fn is_host(&self, player: &Player) -> bool {
        self.host.id() == player.id()
    }

    /// Value of a global option, if it was reported as a string.
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }

    /// Value of a global option, if it was reported as an integer.
    pub fn option_i64(&self, key: &str) -> Option<i64> {
        self.options.get(key).and_then(Value::as_i64)
    }

    pub fn player_option(&self, player_id: PlayerId, key: &str) -> Option<&Value> {
        self.player_options.get(&player_id).and_then(|o| o.get(key))
    }

    /// Team a player sits on, if its client reported one.
    pub fn player_team(&self, player_id: PlayerId) -> Option<i32> {
        self.player_option(player_id, options::TEAM)
            .and_then(Value::as_i64)
            .map(|team| team as i32)
    }

    /// Army a player commands, if its client reported one.
    pub fn player_army(&self, player_id: PlayerId) -> Option<u32> {
        self.player_option(player_id, options::ARMY)
            .and_then(Value::as_u64)
            .map(|army| army as u32)
    }

    /// An army is known iff some player or AI option entry claims it.
    pub fn has_army(&self, army_id: u32) -> bool {
        self.player_options
            .values()
            .chain(self.ai_options.values())
            .filter_map(|opts| opts.get(options::ARMY))
            .filter_map(Value::as_u64)
            .any(|id| id == army_id as u64)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testing::{featured_mod, player};

    fn game() -> Game {
        Game::new(1, player(1, "host"), featured_mod("faf", true))
    }

    #[test]
    fn new_game_starts_initializing_and_valid() {
        let game = game();
        assert_eq!(game.state, GameState::Initializing);
        assert_eq!(game.validity, Validity::Valid);
        assert_eq!(game.victory_condition, VictoryCondition::Demoralization);
    }

    #[test]
    fn has_army_checks_player_and_ai_options() {
        let mut game = game();
        game.player_options
            .entry(2)
            .or_default()
            .insert(options::ARMY.to_string(), json!(1));
        game.ai_options
            .entry("AI: Turtle".to_string())
            .or_default()
            .insert(options::ARMY.to_string(), json!(4));

        assert!(game.has_army(1));
        assert!(game.has_army(4));
        assert!(!game.has_army(3));
    }

    #[test]
    fn player_team_and_army_read_reported_options() {
        let mut game = game();
        let opts = game.player_options.entry(2).or_default();
        opts.insert(options::TEAM.to_string(), json!(2));
        opts.insert(options::ARMY.to_string(), json!(0));

        assert_eq!(game.player_team(2), Some(2));
        assert_eq!(game.player_army(2), Some(0));
        assert_eq!(game.player_team(9), None);
    }

    #[test]
    fn victory_condition_parses_known_wire_values() {
        assert_eq!(
            VictoryCondition::from_wire("demoralization"),
            Some(VictoryCondition::Demoralization)
        );
        assert_eq!(
            VictoryCondition::from_wire("sandbox"),
            Some(VictoryCondition::Sandbox)
        );
        assert_eq!(VictoryCondition::from_wire("openfire"), None);
    }

    #[test]
    fn score_only_reports_are_not_complete() {
        assert!(!ArmyResult::new(1, Outcome::Unknown, 10).is_complete());
        assert!(ArmyResult::new(1, Outcome::Victory, 10).is_complete());
    }
}
