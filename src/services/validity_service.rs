//! Validity adjudication for finished games.
//!
//! A game's validity starts at `Valid` and is decided exactly once, at the
//! end of the game, by an ordered list of independent voters. The first
//! voter that objects wins; its verdict is what keeps the game out of the
//! rating pipeline.

use std::collections::HashSet;

use indexmap::IndexMap;
use tracing::warn;

use crate::config::EngineConfig;
use crate::dao::mods::ModService;
use crate::state::game::{
    options, Game, Validity, VictoryCondition, COOP_DIFFICULTY, DEFAULT_EXPANSION, NO_TEAM_ID,
    OBSERVERS_TEAM_ID,
};
use crate::state::machine::GameState;

/// Everything a voter may consult besides the game itself.
pub(crate) struct VoterContext<'a> {
    pub mod_service: &'a dyn ModService,
    pub config: &'a EngineConfig,
}

type Voter = for<'a, 'b, 'c> fn(&'a Game, &'b VoterContext<'c>) -> Validity;

/// Voters in adjudication order. The order is part of the contract: earlier
/// objections shadow later ones.
const VOTERS: [Voter; 21] = [
    is_ranked,
    victory_condition,
    free_for_all,
    even_teams,
    fog_of_war,
    cheats_enabled,
    prebuilt_units,
    team_spawn,
    civilians_revealed,
    difficulty,
    expansion_disabled,
    no_rush,
    restricted_units,
    ranked_map,
    desync,
    mutual_draw,
    single_player,
    game_result,
    game_length,
    teams_unlocked,
    has_ai,
];

/// Run the voters and record the first objection on the game.
///
/// Guarded rather than asserted: adjudicating twice or in a wrong state is a
/// programming error, but it must never prevent a game from closing.
pub(crate) fn adjudicate(game: &mut Game, ctx: &VoterContext<'_>) {
    if game.validity != Validity::Valid {
        warn!(
            game_id = game.id,
            validity = ?game.validity,
            "validity has already been adjudicated"
        );
        return;
    }
    if !matches!(game.state, GameState::Playing | GameState::Ended) {
        warn!(
            game_id = game.id,
            state = ?game.state,
            "validity cannot be adjudicated in this state"
        );
        return;
    }

    if let Some(verdict) = VOTERS
        .iter()
        .map(|voter| voter(game, ctx))
        .find(|verdict| *verdict != Validity::Valid)
    {
        game.validity = verdict;
    }
}

fn is_ranked(game: &Game, ctx: &VoterContext<'_>) -> Validity {
    if ctx.mod_service.is_mod_ranked(&game.featured_mod) {
        Validity::Valid
    } else {
        Validity::BadMod
    }
}

fn victory_condition(game: &Game, ctx: &VoterContext<'_>) -> Validity {
    if ctx.mod_service.is_coop(&game.featured_mod) {
        return Validity::Valid;
    }
    if game.victory_condition == VictoryCondition::Demoralization {
        Validity::Valid
    } else {
        Validity::WrongVictoryCondition
    }
}

/// Three or more players, each alone on its own real team, is a free-for-all.
fn free_for_all(game: &Game, _: &VoterContext<'_>) -> Validity {
    if game.player_stats.len() < 3 {
        return Validity::Valid;
    }
    let mut teams = HashSet::new();
    for stats in game.player_stats.values() {
        let Some(team) = stats.team else {
            return Validity::Valid;
        };
        if team <= 0 {
            return Validity::Valid;
        }
        if !teams.insert(team) {
            return Validity::Valid;
        }
    }
    Validity::FreeForAll
}

fn even_teams(game: &Game, ctx: &VoterContext<'_>) -> Validity {
    if ctx.mod_service.is_coop(&game.featured_mod) {
        return Validity::Valid;
    }

    let mut team_sizes: IndexMap<i32, usize> = IndexMap::new();
    for stats in game.player_stats.values() {
        let Some(team) = stats.team else { continue };
        if team == OBSERVERS_TEAM_ID {
            continue;
        }
        *team_sizes.entry(team).or_insert(0) += 1;
    }

    if team_sizes.contains_key(&NO_TEAM_ID) {
        // Players without a team each fight alone, so every real team must
        // be a single player too.
        let even = team_sizes
            .iter()
            .filter(|(team, _)| **team != NO_TEAM_ID)
            .all(|(_, size)| *size == 1);
        return if even {
            Validity::Valid
        } else {
            Validity::UnevenTeams
        };
    }

    let mut sizes = team_sizes.values();
    match sizes.next() {
        Some(first) if sizes.any(|size| size != first) => Validity::UnevenTeams,
        _ => Validity::Valid,
    }
}

fn fog_of_war(game: &Game, _: &VoterContext<'_>) -> Validity {
    option_must_equal(game, options::FOG_OF_WAR, "explored", Validity::NoFogOfWar)
}

fn cheats_enabled(game: &Game, _: &VoterContext<'_>) -> Validity {
    option_must_equal(game, options::CHEATS_ENABLED, "false", Validity::CheatsEnabled)
}

fn prebuilt_units(game: &Game, _: &VoterContext<'_>) -> Validity {
    option_must_equal(game, options::PREBUILT_UNITS, "Off", Validity::PrebuiltEnabled)
}

fn no_rush(game: &Game, _: &VoterContext<'_>) -> Validity {
    option_must_equal(game, options::NO_RUSH, "Off", Validity::NoRushEnabled)
}

fn restricted_units(game: &Game, _: &VoterContext<'_>) -> Validity {
    match game.options.get(options::RESTRICTED_CATEGORIES) {
        None => Validity::Valid,
        Some(value) if value.as_i64() == Some(0) => Validity::Valid,
        Some(_) => Validity::BadUnitRestrictions,
    }
}

fn team_spawn(game: &Game, ctx: &VoterContext<'_>) -> Validity {
    if !ctx.mod_service.is_coop(&game.featured_mod) {
        return Validity::Valid;
    }
    option_must_equal(game, options::TEAM_SPAWN, "fixed", Validity::SpawnNotFixed)
}

fn civilians_revealed(game: &Game, ctx: &VoterContext<'_>) -> Validity {
    if !ctx.mod_service.is_coop(&game.featured_mod) {
        return Validity::Valid;
    }
    option_must_equal(
        game,
        options::CIVILIANS_REVEALED,
        "No",
        Validity::CiviliansRevealed,
    )
}

fn difficulty(game: &Game, ctx: &VoterContext<'_>) -> Validity {
    if !ctx.mod_service.is_coop(&game.featured_mod) {
        return Validity::Valid;
    }
    match game.option_i64(options::DIFFICULTY) {
        None => Validity::Valid,
        Some(COOP_DIFFICULTY) => Validity::Valid,
        Some(_) => Validity::WrongDifficulty,
    }
}

fn expansion_disabled(game: &Game, ctx: &VoterContext<'_>) -> Validity {
    if !ctx.mod_service.is_coop(&game.featured_mod) {
        return Validity::Valid;
    }
    match game.option_i64(options::EXPANSION) {
        None => Validity::Valid,
        Some(DEFAULT_EXPANSION) => Validity::Valid,
        Some(_) => Validity::ExpansionDisabled,
    }
}

fn ranked_map(game: &Game, _: &VoterContext<'_>) -> Validity {
    match &game.map_version {
        Some(map) if map.ranked => Validity::Valid,
        _ => Validity::BadMap,
    }
}

fn desync(game: &Game, _: &VoterContext<'_>) -> Validity {
    if game.desync_count as usize > game.player_stats.len() {
        Validity::TooManyDesyncs
    } else {
        Validity::Valid
    }
}

fn mutual_draw(game: &Game, _: &VoterContext<'_>) -> Validity {
    if game.mutually_agreed_draw {
        Validity::MutualDraw
    } else {
        Validity::Valid
    }
}

fn single_player(game: &Game, _: &VoterContext<'_>) -> Validity {
    if game.player_stats.len() < 2 {
        Validity::SinglePlayer
    } else {
        Validity::Valid
    }
}

fn game_result(game: &Game, _: &VoterContext<'_>) -> Validity {
    if game.reported_army_results.is_empty() {
        Validity::UnknownResult
    } else {
        Validity::Valid
    }
}

fn game_length(game: &Game, ctx: &VoterContext<'_>) -> Validity {
    let (Some(start_time), Some(end_time)) = (game.start_time, game.end_time) else {
        return Validity::Valid;
    };
    let elapsed = end_time.duration_since(start_time).unwrap_or_default();
    let required =
        game.player_stats.len() as u64 * ctx.config.ranked_min_time_multiplicator;
    if elapsed.as_secs() < required {
        Validity::TooShort
    } else {
        Validity::Valid
    }
}

fn teams_unlocked(game: &Game, _: &VoterContext<'_>) -> Validity {
    option_must_equal(game, options::TEAM_LOCK, "locked", Validity::UnlockedTeams)
}

fn has_ai(game: &Game, _: &VoterContext<'_>) -> Validity {
    if game.ai_options.is_empty() {
        Validity::Valid
    } else {
        Validity::HasAi
    }
}

/// An option voter objects only when the option was reported with a value
/// other than the required one; an absent option keeps the game default.
fn option_must_equal(game: &Game, key: &str, required: &str, objection: Validity) -> Validity {
    match game.option_str(key) {
        None => Validity::Valid,
        Some(value) if value == required => Validity::Valid,
        Some(_) => objection,
    }
}
