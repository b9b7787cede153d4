//! Lobby option intake: global, per-player and per-AI options.
//!
//! Option reports arrive repeatedly and in bulk while a lobby is being set
//! up. Reports from players without a current game are telemetry noise
//! (clients keep sending after reconnects) and are logged and dropped
//! instead of erroring, which would flood the transport.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, trace, warn};

use uuid::Uuid;

use crate::error::{RequestError, RequestResult};
use crate::services::game_service::{current_game_of, mark_dirty_default};
use crate::state::game::{options, VictoryCondition};
use crate::state::machine::GameState;
use crate::state::players::{Player, PlayerId};
use crate::state::SharedState;

/// Update an option of the game currently hosted by the reporter.
///
/// Recognized keys additionally update the parsed field they mirror; every
/// key is stored verbatim alongside.
pub async fn update_game_option(
    state: &SharedState,
    reporter: &Arc<Player>,
    key: &str,
    value: Value,
) -> RequestResult<()> {
    let Some(handle) = current_game_of(state, reporter) else {
        debug!(player = %reporter.login(), "received game option for player without game");
        return Ok(());
    };

    let mut game = handle.lock().await;
    if !game.is_host(reporter) {
        return Err(RequestError::HostOnlyOption(key.to_string()));
    }

    trace!(game_id = game.id, key, ?value, "updating game option");
    game.options.insert(key.to_string(), value.clone());

    match key {
        VictoryCondition::GAME_OPTION_NAME => match value.as_str().map(VictoryCondition::from_wire)
        {
            Some(Some(condition)) => game.victory_condition = condition,
            _ => warn!(game_id = game.id, ?value, "unparseable victory condition"),
        },
        options::SLOTS => match value.as_u64() {
            Some(slots) => game.max_players = slots as u32,
            None => warn!(game_id = game.id, ?value, "unparseable slot count"),
        },
        options::SCENARIO_FILE => {
            let Some(path) = value.as_str() else {
                warn!(game_id = game.id, ?value, "unparseable scenario file");
                return Ok(());
            };
            game.map_folder_name = parse_map_folder_name(path)?;
        }
        options::TITLE => match value.as_str() {
            Some(title) => game.title = title.to_string(),
            None => warn!(game_id = game.id, ?value, "unparseable title"),
        },
        _ => {}
    }

    mark_dirty_default(state, &game).await;
    Ok(())
}

/// Update an option of a specific player. Host-only, and only while the
/// game is still open.
pub async fn update_player_option(
    state: &SharedState,
    reporter: &Arc<Player>,
    player_id: PlayerId,
    key: &str,
    value: Value,
) -> RequestResult<()> {
    let Some(handle) = current_game_of(state, reporter) else {
        // Happens after restarts; clients keep reporting for a while.
        warn!(player = %reporter.login(), "received player option for player without game");
        return Ok(());
    };

    let mut game = handle.lock().await;
    if game.state != GameState::Open {
        return Err(RequestError::InvalidGameState {
            expected: GameState::Open,
            actual: game.state,
        });
    }
    if !game.is_host(reporter) {
        return Err(RequestError::HostOnlyOption(key.to_string()));
    }

    if !game.connected_players.contains_key(&player_id) {
        warn!(
            game_id = game.id,
            player_id, key, ?value,
            "option reported for unknown player"
        );
        return Ok(());
    }

    trace!(game_id = game.id, player_id, key, ?value, "updating player option");
    game.player_options
        .entry(player_id)
        .or_default()
        .insert(key.to_string(), value);

    mark_dirty_default(state, &game).await;
    Ok(())
}

/// Update an option of an AI player. Host-only, and only while the game is
/// still open.
pub async fn update_ai_option(
    state: &SharedState,
    reporter: &Arc<Player>,
    ai_name: &str,
    key: &str,
    value: Value,
) -> RequestResult<()> {
    let Some(handle) = current_game_of(state, reporter) else {
        warn!(player = %reporter.login(), "received AI option for player without game");
        return Ok(());
    };

    let mut game = handle.lock().await;
    if game.state != GameState::Open {
        return Err(RequestError::InvalidGameState {
            expected: GameState::Open,
            actual: game.state,
        });
    }
    if !game.is_host(reporter) {
        return Err(RequestError::HostOnlyOption(key.to_string()));
    }

    if key != options::ARMY {
        // Other keys arrive before the AI's final name is known and would
        // pile up under throwaway names.
        trace!(game_id = game.id, ai_name, key, "ignoring non-army AI option");
        return Ok(());
    }

    trace!(game_id = game.id, ai_name, key, ?value, "updating AI option");
    game.ai_options
        .entry(ai_name.to_string())
        .or_default()
        .insert(key.to_string(), value);

    mark_dirty_default(state, &game).await;
    Ok(())
}

/// Remove the options of every player occupying the given slot. AI entries
/// are keyed by name, not slot, and stay untouched.
pub async fn clear_slot(state: &SharedState, reporter: &Arc<Player>, slot_id: i64) -> RequestResult<()> {
    let Some(handle) = current_game_of(state, reporter) else {
        warn!(player = %reporter.login(), slot_id, "clearing slot requested without game");
        return Ok(());
    };

    let mut game = handle.lock().await;
    trace!(game_id = game.id, slot_id, "clearing slot");

    let game_id = game.id;
    game.player_options.retain(|player_id, player_options| {
        let occupies_slot = player_options
            .get(options::START_SPOT)
            .and_then(Value::as_i64)
            == Some(slot_id);
        if occupies_slot {
            trace!(game_id, player_id, "removing options of cleared slot");
        }
        !occupies_slot
    });

    mark_dirty_default(state, &game).await;
    Ok(())
}

/// Replace the list of activated sim-mods with the versions known to the
/// mod catalogue. Unknown uids are dropped by the lookup.
pub async fn update_game_mods(
    state: &SharedState,
    reporter: &Arc<Player>,
    mod_uids: Vec<Uuid>,
) -> RequestResult<()> {
    let Some(handle) = current_game_of(state, reporter) else {
        warn!(player = %reporter.login(), "received mod list for player without game");
        return Ok(());
    };

    let mod_versions = state.mod_service().find_mod_versions_by_uids(&mod_uids).await;

    let mut game = handle.lock().await;
    game.sim_mods = mod_versions;

    mark_dirty_default(state, &game).await;
    Ok(())
}

/// A zero mod count clears the sim-mod list; any other count is ignored
/// (the authoritative list arrives through `update_game_mods`).
pub async fn update_game_mods_count(
    state: &SharedState,
    reporter: &Arc<Player>,
    count: u32,
) -> RequestResult<()> {
    let Some(handle) = current_game_of(state, reporter) else {
        warn!(player = %reporter.login(), "received mod count for player without game");
        return Ok(());
    };

    if count != 0 {
        return Ok(());
    }

    let mut game = handle.lock().await;
    trace!(game_id = game.id, "clearing sim-mod list");
    game.sim_mods.clear();

    mark_dirty_default(state, &game).await;
    Ok(())
}

/// Derive the map folder name from a scenario path such as
/// `/maps/scmp_001/SCMP_001_scenario.lua`: backslashes and doubled slashes
/// are normalized, then the third `/`-delimited segment is taken.
fn parse_map_folder_name(path: &str) -> Result<String, RequestError> {
    let normalized = path.replace('\\', "/").replace("//", "/");
    normalized
        .split('/')
        .nth(2)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .ok_or_else(|| RequestError::MalformedScenarioPath(path.to_string()))
}
