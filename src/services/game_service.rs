//! Game lifecycle: creation, joining, state transitions, removal and end
//! processing.
//!
//! This is the heart of the engine. Every mutation of a game happens on the
//! game's serialization lock; end processing additionally coordinates with
//! the rating queue, which is drained only while no game lock is held.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, info, trace, warn};

use crate::dao::models::GameEntity;
use crate::dto::game::{FeaturedModFileVersion, GameInfo, GamePlayerInfo, SimModInfo};
use crate::dto::result::{GameResultMessage, PlayerResult};
use crate::error::{RequestError, RequestResult};
use crate::services::rating_service::{drain_rating_queue, enqueue_for_rating_update};
use crate::services::result_service::{map_army_results_to_players, most_reported_army_results};
use crate::services::validity_service::{adjudicate, VoterContext};
use crate::state::game::{
    options, ArmyResult, Game, GameId, GameParticipant, GamePlayerStats, GameVisibility,
    LobbyMode, Outcome, Validity, NO_TEAM_ID, OBSERVERS_TEAM_ID,
};
use crate::state::machine::{GameState, PlayerGameState};
use crate::state::players::{GameFuture, Player, PlayerId};
use crate::state::{AppState, SharedGame, SharedState};

/// Create a new game, register it and tell the creator's client to start
/// its game process. The creator becomes the host.
///
/// Returns a future that completes once the game reached `Open`, i.e. the
/// host's client arrived in the lobby. There are various reasons for that
/// to never happen (crash, disconnect, abort), so never await it without a
/// timeout.
#[allow(clippy::too_many_arguments)]
pub async fn create_game(
    state: &SharedState,
    title: String,
    featured_mod_name: &str,
    map_file_name: &str,
    password: Option<String>,
    visibility: GameVisibility,
    min_rating: Option<i32>,
    max_rating: Option<i32>,
    player: &Arc<Player>,
    lobby_mode: LobbyMode,
    preset_participants: Option<Vec<GameParticipant>>,
) -> RequestResult<GameFuture> {
    if let Some(current) = current_game_of(state, player) {
        let is_initializing = current.lock().await.state == GameState::Initializing;
        if !is_initializing {
            return Err(RequestError::AlreadyInGame);
        }
        // The previous game process never reached the lobby. Instead of
        // timing such games out we reset the player when it tries again.
        debug!(
            player = %player.login(),
            game_id = current.id(),
            "dropping orphaned initializing game"
        );
        remove_player_from_game(state, &current, player).await?;
    }

    let featured_mod = state
        .mod_service()
        .featured_mod(featured_mod_name)
        .await
        .ok_or_else(|| RequestError::InvalidFeaturedMod(featured_mod_name.to_string()))?;

    let game_id = state.games().allocate_id();
    let mut game = Game::new(game_id, player.clone(), featured_mod);
    game.title = title;
    game.map_version = state.map_service().find_map(map_file_name).await;
    game.map_folder_name = map_file_name.to_string();
    game.password = password;
    game.visibility = visibility;
    game.min_rating = min_rating;
    game.max_rating = max_rating;
    game.lobby_mode = lobby_mode;
    game.preset_participants = preset_participants;

    state.games().insert(game);
    state.game_state_counters().record_created(GameState::Initializing);

    debug!(player = %player.login(), game_id, "player created game");

    state
        .client_service()
        .start_game_process(game_id, map_file_name, player);
    player.set_current_game(Some(game_id));
    change_player_game_state(state, player, PlayerGameState::Initializing);

    Ok(player.install_game_future())
}

/// Join an open game, telling the joiner's client to start its game
/// process.
///
/// Returns a future that completes once the joining player reached the
/// lobby. As with [`create_game`], always await it with a timeout.
pub async fn join_game(
    state: &SharedState,
    game_id: GameId,
    password: Option<&str>,
    player: &Arc<Player>,
) -> RequestResult<GameFuture> {
    if player.current_game().is_some() {
        return Err(RequestError::AlreadyInGame);
    }

    let handle = state
        .games()
        .find(game_id)
        .ok_or(RequestError::NoSuchGame(game_id))?;

    {
        let game = handle.lock().await;
        if game.state != GameState::Open {
            return Err(RequestError::GameNotJoinable(game_id, game.state));
        }
        if let Some(expected) = &game.password {
            if password != Some(expected.as_str()) {
                return Err(RequestError::InvalidPassword(game_id));
            }
        }

        debug!(player = %player.login(), game_id, "player joins game");
        state
            .client_service()
            .start_game_process(game_id, &game.map_folder_name, player);
    }

    player.set_current_game(Some(game_id));
    change_player_game_state(state, player, PlayerGameState::Initializing);

    Ok(player.install_game_future())
}

/// Apply a player-reported game state and run the transition's side
/// effects.
pub async fn update_player_game_state(
    state: &SharedState,
    new_state: PlayerGameState,
    player: &Arc<Player>,
) -> RequestResult<()> {
    let handle = current_game_of(state, player).ok_or(RequestError::NotInAGame)?;

    let old_state = player.game_state();
    debug!(
        player = %player.login(),
        game_id = handle.id(),
        from = ?old_state,
        to = ?new_state,
        "player updated its game state"
    );

    if !old_state.can_transition(new_state) {
        return Err(RequestError::InvalidPlayerGameStateTransition {
            from: old_state,
            to: new_state,
        });
    }
    change_player_game_state(state, player, new_state);

    let needs_end_processing = {
        let mut game = handle.lock().await;
        match new_state {
            PlayerGameState::Lobby => {
                on_lobby_entered(state, &handle, &mut game, player).await;
                false
            }
            PlayerGameState::Launching => {
                on_game_launching(state, &mut game, player).await?;
                false
            }
            PlayerGameState::Ended => {
                debug!(player = %player.login(), game_id = game.id, "player ended its game");
                game.state != GameState::Ended
            }
            PlayerGameState::Closed => {
                debug!(player = %player.login(), game_id = game.id, "player closed its game");
                remove_from_game_locked(state, &mut game, player).await?
            }
            PlayerGameState::Idle => {
                warn!(
                    player = %player.login(),
                    game_id = game.id,
                    "ignoring idle state, it is handled by the client"
                );
                false
            }
            PlayerGameState::None | PlayerGameState::Initializing => {
                warn!(
                    player = %player.login(),
                    game_id = game.id,
                    state = ?new_state,
                    "client reported an engine-internal state"
                );
                false
            }
        }
    };

    if needs_end_processing {
        on_game_ended(state, &handle).await?;
    }
    Ok(())
}

/// Remove a player from its current game, if any. Called on disconnect and
/// when a client reports its game closed.
pub async fn remove_player(state: &SharedState, player: &Arc<Player>) -> RequestResult<()> {
    if let Some(handle) = current_game_of(state, player) {
        remove_player_from_game(state, &handle, player).await?;
    }
    Ok(())
}

/// Increment the desync counter of the reporter's game.
pub async fn report_desync(state: &SharedState, reporter: &Arc<Player>) -> RequestResult<()> {
    let Some(handle) = current_game_of(state, reporter) else {
        warn!(player = %reporter.login(), "desync reported by player without game");
        return Ok(());
    };

    let mut game = handle.lock().await;
    game.desync_count += 1;
    debug!(
        player = %reporter.login(),
        game_id = game.id,
        desync_count = game.desync_count,
        "player reported desync"
    );
    Ok(())
}

/// Force rating and division updates for the reporter's game even if a
/// validity voter objects at the end.
pub async fn enforce_rating(state: &SharedState, reporter: &Arc<Player>) -> RequestResult<()> {
    let Some(handle) = current_game_of(state, reporter) else {
        warn!(player = %reporter.login(), "rating enforcement by player without game");
        return Ok(());
    };

    let mut game = handle.lock().await;
    debug!(player = %reporter.login(), game_id = game.id, "player enforced rating");
    game.rating_enforced = true;
    Ok(())
}

/// Record that the reporter saw the game end. Once every connected player
/// reported it, end processing runs. Repeated reports are no-ops.
pub async fn report_game_ended(state: &SharedState, reporter: &Arc<Player>) -> RequestResult<()> {
    let handle = current_game_of(state, reporter).ok_or(RequestError::NotInAGame)?;

    let all_reported = {
        let mut game = handle.lock().await;
        game.game_ended_reporters.insert(reporter.id());
        game.connected_players
            .keys()
            .all(|player_id| game.game_ended_reporters.contains(player_id))
    };

    if all_reported {
        on_game_ended(state, &handle).await?;
    }
    Ok(())
}

/// Ask every other connected peer to drop its connection to the target
/// player. A transport-level instruction; the target stays in the game.
pub async fn disconnect_player_from_game(
    state: &SharedState,
    requester: &Arc<Player>,
    target_id: PlayerId,
) -> RequestResult<()> {
    let Some(target) = state.players().get_online_player(target_id) else {
        warn!(
            requester = %requester.login(),
            target_id,
            "tried to disconnect unknown player from game"
        );
        return Ok(());
    };

    let Some(handle) = current_game_of(state, &target) else {
        warn!(
            requester = %requester.login(),
            target = %target.login(),
            "tried to disconnect player without game"
        );
        return Ok(());
    };

    let game = handle.lock().await;
    let receivers: Vec<Arc<Player>> = game
        .connected_players
        .values()
        .filter(|peer| peer.id() != target_id)
        .cloned()
        .collect();
    state
        .client_service()
        .disconnect_player_from_game(target_id, &receivers);
    info!(
        requester = %requester.login(),
        target = %target.login(),
        game_id = game.id,
        "disconnected player from game"
    );
    Ok(())
}

/// Reattach a reconnected player to the game it was part of.
pub async fn restore_game_session(
    state: &SharedState,
    player: &Arc<Player>,
    game_id: GameId,
) -> RequestResult<()> {
    if let Some(current) = player.current_game() {
        warn!(
            player = %player.login(),
            current_game = current,
            "session restoration requested while still in a game"
        );
        return Ok(());
    }

    let handle = state
        .games()
        .find(game_id)
        .ok_or(RequestError::CantRestoreGameDoesntExist(game_id))?;

    let mut game = handle.lock().await;
    if !matches!(game.state, GameState::Open | GameState::Playing) {
        return Err(RequestError::CantRestoreGameDoesntExist(game_id));
    }
    if game.state == GameState::Playing && !game.player_stats.contains_key(&player.id()) {
        return Err(RequestError::CantRestoreGameNotParticipant(game_id));
    }

    debug!(player = %player.login(), game_id, "reassociating player with game");

    add_player(state, &handle, &mut game, player).await;
    change_player_game_state(state, player, PlayerGameState::Initializing);
    change_player_game_state(state, player, PlayerGameState::Lobby);
    if game.state == GameState::Playing {
        change_player_game_state(state, player, PlayerGameState::Launching);
    }
    Ok(())
}

/// Accept a draw on behalf of the calling player. Once every connected
/// non-observer player accepted, the game is flagged as mutually drawn.
pub async fn mutually_agree_draw(state: &SharedState, player: &Arc<Player>) -> RequestResult<()> {
    let handle = current_game_of(state, player).ok_or(RequestError::NotInAGame)?;

    let mut game = handle.lock().await;
    if game.state != GameState::Playing {
        return Err(RequestError::InvalidGameState {
            expected: GameState::Playing,
            actual: game.state,
        });
    }

    // Observers and players without a team have no say in a draw.
    let Some(team) = game.player_team(player.id()) else {
        return Ok(());
    };
    if team == OBSERVERS_TEAM_ID {
        return Ok(());
    }

    debug!(player = %player.login(), game_id = game.id, "player accepted mutual draw");
    game.mutual_draw_acceptors.insert(player.id());

    let all_agreed = game
        .connected_players
        .values()
        .filter(|peer| {
            matches!(game.player_team(peer.id()), Some(team) if team != OBSERVERS_TEAM_ID)
        })
        .all(|peer| game.mutual_draw_acceptors.contains(&peer.id()));

    if all_agreed {
        debug!(game_id = game.id, "all in-game players agreed on mutual draw");
        game.mutually_agreed_draw = true;
    }
    Ok(())
}

/// Mark every unfinished persisted game with the given validity. Run on
/// startup to invalidate games interrupted by a crash.
pub async fn update_unfinished_games_validity(
    state: &SharedState,
    validity: Validity,
) -> RequestResult<()> {
    debug!(?validity, "invalidating unfinished games");
    state
        .game_repository()
        .update_unfinished_games_validity(validity)
        .await?;
    Ok(())
}

/// Register a player that came online and send it the current game list.
pub async fn on_player_online(state: &SharedState, player: &Arc<Player>) {
    state.players().register(player.clone());
    state.player_state_counters().record_online(player.game_state());

    let mut games = Vec::new();
    for handle in state.games().snapshot() {
        let game = handle.lock().await;
        games.push(to_game_info(state, &game).await);
    }
    state.client_service().send_game_list(games, player);
}

/// Drop a player that went offline from the directory. The caller removes
/// it from its game first.
pub fn on_player_offline(state: &SharedState, player: &Arc<Player>) {
    state.player_state_counters().record_offline(player.game_state());
    state.players().remove(player.id());
}

/// Resolve the game a player currently points at, if it is still active.
pub(crate) fn current_game_of(state: &AppState, player: &Player) -> Option<SharedGame> {
    player
        .current_game()
        .and_then(|game_id| state.games().find(game_id))
}

pub(crate) async fn mark_dirty(
    state: &AppState,
    game: &Game,
    min_delay: Duration,
    max_delay: Duration,
) {
    let info = to_game_info(state, game).await;
    state.broadcaster().mark_dirty(info, min_delay, max_delay);
}

pub(crate) async fn mark_dirty_default(state: &AppState, game: &Game) {
    mark_dirty(
        state,
        game,
        state.config().broadcast_min_delay,
        state.config().broadcast_max_delay,
    )
    .await;
}

pub(crate) fn change_player_game_state(
    state: &AppState,
    player: &Player,
    new_state: PlayerGameState,
) {
    state
        .player_state_counters()
        .record_transition(player.game_state(), new_state);
    player.set_game_state(new_state);
}

/// Move a game to a new state, keeping the gauges in sync. Returns the
/// offending pair when the transition is not documented.
fn change_game_state(
    state: &AppState,
    game: &mut Game,
    new_state: GameState,
) -> Result<(), (GameState, GameState)> {
    if !game.state.can_transition(new_state) {
        return Err((game.state, new_state));
    }
    state
        .game_state_counters()
        .record_transition(game.state, new_state);
    game.state = new_state;
    Ok(())
}

/// A player's client reached the lobby. The host opens the game; everyone
/// else is wired up to the mesh and told to connect.
async fn on_lobby_entered(
    state: &SharedState,
    handle: &SharedGame,
    game: &mut Game,
    player: &Arc<Player>,
) {
    if game.connected_players.contains_key(&player.id()) {
        warn!(
            player = %player.login(),
            game_id = game.id,
            "player entered the lobby but is already connected"
        );
        return;
    }
    debug!(player = %player.login(), game_id = game.id, "player entered the lobby");

    if game.is_host(player) {
        if let Err((from, to)) = change_game_state(state, game, GameState::Open) {
            warn!(game_id = game.id, ?from, ?to, "illegal game state transition");
            return;
        }
        state
            .client_service()
            .host_game(game.id, &game.map_folder_name, player);
    } else {
        state.client_service().connect_to_host(player, &game.host, game.id);
        state.client_service().connect_to_peer(&game.host, player, true);

        let others: Vec<Arc<Player>> = game
            .connected_players
            .values()
            .filter(|peer| !game.is_host(peer))
            .cloned()
            .collect();
        for other in others {
            if other.id() == player.id() {
                warn!(player = %player.login(), "player should not connect to itself");
                continue;
            }
            state.client_service().connect_to_peer(player, &other, true);
            state.client_service().connect_to_peer(&other, player, false);
        }
    }

    add_player(state, handle, game, player).await;
}

/// Attach a player to a game: join the connected set, snapshot its rating
/// for this game and complete its pending join future.
async fn add_player(
    state: &SharedState,
    handle: &SharedGame,
    game: &mut Game,
    player: &Arc<Player>,
) {
    game.connected_players.insert(player.id(), player.clone());

    if state.mod_service().is_ladder1v1(&game.featured_mod) {
        if player.ladder1v1_rating().is_none() {
            state.rating_service().init_ladder1v1_rating(player);
        }
        player.set_rating_within_current_game(player.ladder1v1_rating());
    } else {
        if player.global_rating().is_none() {
            state.rating_service().init_global_rating(player);
        }
        player.set_rating_within_current_game(player.global_rating());
    }

    player.set_current_game(Some(game.id));
    player.complete_game_future(handle.clone());

    mark_dirty_default(state, game).await;
}

/// The host's client started the simulation. The game becomes `Playing`,
/// per-player stats are built from the lobby options and the game is
/// persisted for the first time.
async fn on_game_launching(
    state: &SharedState,
    game: &mut Game,
    reporter: &Arc<Player>,
) -> RequestResult<()> {
    if !game.is_host(reporter) {
        warn!(
            player = %reporter.login(),
            game_id = game.id,
            host = %game.host.login(),
            "non-host reported launch"
        );
        return Ok(());
    }

    if let Err((from, to)) = change_game_state(state, game, GameState::Playing) {
        warn!(game_id = game.id, ?from, ?to, "illegal game state transition");
        return Ok(());
    }
    game.start_time = Some(SystemTime::now());

    create_game_player_stats(game);

    state.game_repository().persist(GameEntity::from(&*game)).await?;
    debug!(game_id = game.id, "game launched");
    mark_dirty(state, game, Duration::ZERO, Duration::ZERO).await;
    Ok(())
}

fn create_game_player_stats(game: &mut Game) {
    let mut all_stats: IndexMap<PlayerId, GamePlayerStats> = IndexMap::new();

    for player in game.connected_players.values() {
        let mut stats = GamePlayerStats::new(player.id());

        match game.player_options.get(&player.id()) {
            None => warn!(
                game_id = game.id,
                player = %player.login(),
                "no player options available at launch"
            ),
            Some(player_options) => {
                for (key, field) in [
                    (options::TEAM, &mut stats.team),
                    (options::FACTION, &mut stats.faction),
                    (options::COLOR, &mut stats.color),
                    (options::START_SPOT, &mut stats.start_spot),
                ] {
                    match player_options.get(key).and_then(Value::as_i64) {
                        Some(value) => *field = Some(value as i32),
                        None => warn!(
                            game_id = game.id,
                            player = %player.login(),
                            key,
                            "missing player option at launch"
                        ),
                    }
                }
            }
        }

        match player.rating_within_current_game() {
            Some(rating) => {
                stats.mean = rating.mean;
                stats.deviation = rating.deviation;
            }
            None => warn!(
                game_id = game.id,
                player = %player.login(),
                "no rating snapshot available at launch"
            ),
        }

        all_stats.insert(player.id(), stats);
    }

    game.player_stats = all_stats;
}

/// Remove a player from the given game, ending or cancelling the game when
/// it drains. Public within the crate for the orphan cleanup in
/// [`create_game`].
pub(crate) async fn remove_player_from_game(
    state: &SharedState,
    handle: &SharedGame,
    player: &Arc<Player>,
) -> RequestResult<()> {
    let needs_end_processing = {
        let mut game = handle.lock().await;
        remove_from_game_locked(state, &mut game, player).await?
    };
    if needs_end_processing {
        on_game_ended(state, handle).await?;
    }
    Ok(())
}

/// Removal body that runs under the game lock. Returns whether the caller
/// must run end processing after releasing the lock.
async fn remove_from_game_locked(
    state: &SharedState,
    game: &mut Game,
    player: &Arc<Player>,
) -> RequestResult<bool> {
    let host_leaves_lobby = game.state == GameState::Open && game.is_host(player);

    detach_player(state, game, player);

    if host_leaves_lobby {
        // Without a host there is nothing to join anymore; drain the lobby.
        while let Some(next) = game.connected_players.values().next().cloned() {
            detach_player(state, game, &next);
        }
    }

    if game.connected_players.is_empty() {
        match game.state {
            GameState::Initializing | GameState::Open => {
                on_game_cancelled(state, game).await;
                Ok(false)
            }
            GameState::Playing => Ok(true),
            GameState::Ended => {
                on_game_closed(state, game).await;
                Ok(false)
            }
            GameState::Closed => Ok(false),
        }
    } else {
        mark_dirty_default(state, game).await;
        Ok(false)
    }
}

/// Detach one player: reset its state, cancel a pending join future and
/// tell the remaining peers to drop their connections to it.
fn detach_player(state: &AppState, game: &mut Game, player: &Arc<Player>) {
    debug!(player = %player.login(), game_id = game.id, "removing player from game");

    change_player_game_state(state, player, PlayerGameState::None);
    player.set_current_game(None);
    player.set_rating_within_current_game(None);
    player.cancel_game_future();

    game.connected_players.shift_remove(&player.id());

    let receivers: Vec<Arc<Player>> = game.connected_players.values().cloned().collect();
    state
        .client_service()
        .disconnect_player_from_game(player.id(), &receivers);
}

async fn on_game_cancelled(state: &SharedState, game: &mut Game) {
    debug!(game_id = game.id, "game cancelled");
    on_game_closed(state, game).await;
}

/// Close a game and drop it from the active registry. Persisted data
/// survives; the in-memory aggregate is gone after this.
async fn on_game_closed(state: &SharedState, game: &mut Game) {
    if game.state == GameState::Closed {
        return;
    }

    if let Err((from, to)) = change_game_state(state, game, GameState::Closed) {
        warn!(game_id = game.id, ?from, ?to, "illegal game state transition");
    }
    mark_dirty(state, game, Duration::ZERO, Duration::ZERO).await;

    state.games().remove(game.id);
    debug!(game_id = game.id, "game closed");
}

/// End processing. Idempotent: a game that is already `Ended` is left
/// alone.
///
/// Must be called without holding the game's lock; the rating drain in the
/// middle inspects other games and must not nest locks.
pub(crate) async fn on_game_ended(state: &SharedState, handle: &SharedGame) -> RequestResult<()> {
    let previous_state = {
        let mut game = handle.lock().await;
        if game.state == GameState::Ended {
            return Ok(());
        }
        debug!(game_id = game.id, "game ended");

        let previous_state = game.state;
        game.end_time = Some(SystemTime::now());
        if let Err((from, to)) = change_game_state(state, &mut game, GameState::Ended) {
            // A programming error must never prevent a game from ending.
            warn!(game_id = game.id, ?from, ?to, "illegal game state transition");
        }

        // Games can end before they even started, in which case there is
        // nothing to adjudicate or rate.
        if previous_state != GameState::Playing {
            if game.connected_players.is_empty() {
                on_game_closed(state, &mut game).await;
            }
            return Ok(());
        }

        let ctx = VoterContext {
            mod_service: state.mod_service(),
            config: state.config(),
        };
        adjudicate(&mut game, &ctx);

        enqueue_for_rating_update(state, handle.clone());
        previous_state
    };
    debug_assert_eq!(previous_state, GameState::Playing);

    // Between releasing the lock above and re-acquiring it below only the
    // rating queue looks at this game, and it is already `Ended`.
    drain_rating_queue(state).await;

    let mut game = handle.lock().await;

    if let Some(map) = &game.map_version {
        state.map_service().increment_times_played(map.id).await;
    }

    let army_results = most_reported_army_results(&game);
    let player_results = map_army_results_to_players(&game, &army_results);
    let result_message = build_game_result_message(&game, &player_results);

    settle_player_scores(&mut game, &army_results);
    state.client_service().broadcast_game_result(result_message);
    update_division_scores_if_valid(state, &game).await;

    state.game_repository().save(GameEntity::from(&*game)).await?;

    let participants: Vec<Arc<Player>> = game
        .player_stats
        .keys()
        .filter_map(|player_id| {
            game.connected_players
                .get(player_id)
                .cloned()
                .or_else(|| state.players().get_online_player(*player_id))
        })
        .collect();
    for participant in participants {
        if let Err(error) = state
            .army_statistics_service()
            .process(&participant, &game)
            .await
        {
            warn!(game_id = game.id, error = %error, "army statistics could not be updated");
            break;
        }
    }

    if game.connected_players.is_empty() {
        on_game_closed(state, &mut game).await;
    }
    Ok(())
}

fn build_game_result_message(
    game: &Game,
    player_results: &IndexMap<PlayerId, ArmyResult>,
) -> GameResultMessage {
    let mut message = GameResultMessage {
        game_id: game.id,
        draw: false,
        player_results: Vec::with_capacity(player_results.len()),
    };

    for (player_id, result) in player_results {
        message.player_results.push(PlayerResult {
            player_id: *player_id,
            winner: result.outcome == Outcome::Victory,
            acu_killed: false,
        });
        if result.outcome == Outcome::Draw {
            message.draw = true;
        }
    }

    message
}

/// Write the reconciled scores into the per-player stats.
fn settle_player_scores(game: &mut Game, army_results: &IndexMap<u32, ArmyResult>) {
    let score_time = SystemTime::now();
    let scores: Vec<(PlayerId, Option<i32>)> = game
        .player_stats
        .keys()
        .map(|player_id| {
            let score = game
                .player_army(*player_id)
                .and_then(|army_id| army_results.get(&army_id))
                .map(|result| result.score);
            (*player_id, score)
        })
        .collect();

    for (player_id, score) in scores {
        if let Some(stats) = game.player_stats.get_mut(&player_id) {
            stats.score = score;
            stats.score_time = Some(score_time);
        }
    }
}

/// Post the outcome of a valid ladder game to the division collaborator.
async fn update_division_scores_if_valid(state: &SharedState, game: &Game) {
    if game.validity != Validity::Valid && !game.rating_enforced {
        trace!(game_id = game.id, "skipping division scores for invalid game");
        return;
    }
    if !state.mod_service().is_ladder1v1(&game.featured_mod) {
        trace!(game_id = game.id, "skipping division scores for non-ladder game");
        return;
    }
    if game.connected_players.len() != 2 {
        warn!(
            game_id = game.id,
            players = game.connected_players.len(),
            "a ladder1v1 game must have exactly 2 players"
        );
        return;
    }

    let mut players = game.connected_players.values();
    let player_one = players.next().cloned().expect("two players checked");
    let player_two = players.next().cloned().expect("two players checked");

    let winner = if game.mutually_agreed_draw {
        trace!(game_id = game.id, "ladder game ended in mutual draw");
        None
    } else {
        let winner_id = game
            .player_stats
            .values()
            .filter(|stats| stats.score.is_some())
            .fold(None::<&GamePlayerStats>, |best, stats| match best {
                None => Some(stats),
                Some(current) if stats.score > current.score => Some(stats),
                _ => best,
            })
            .map(|stats| stats.player_id);
        winner_id.and_then(|player_id| {
            game.connected_players
                .get(&player_id)
                .cloned()
                .or_else(|| state.players().get_online_player(player_id))
        })
    };

    debug!(
        game_id = game.id,
        player_one = %player_one.login(),
        player_two = %player_two.login(),
        winner = winner.as_ref().map(|player| player.login().to_string()),
        "posting division result"
    );
    state
        .division_service()
        .post_result(player_one, player_two, winner)
        .await;
}

/// Build the broadcastable snapshot of a game.
pub(crate) async fn to_game_info(state: &AppState, game: &Game) -> GameInfo {
    let files = state
        .mod_service()
        .latest_file_versions(&game.featured_mod)
        .await;

    GameInfo {
        id: game.id,
        title: game.title.clone(),
        visibility: game.visibility,
        password_protected: game.password.is_some(),
        state: game.state,
        featured_mod: game.featured_mod.technical_name.clone(),
        sim_mods: game
            .sim_mods
            .iter()
            .map(|sim_mod| SimModInfo {
                uid: sim_mod.uid,
                display_name: sim_mod.display_name.clone(),
            })
            .collect(),
        map_folder_name: game.map_folder_name.clone(),
        host_login: game.host.login().to_string(),
        players: game
            .connected_players
            .values()
            .map(|player| GamePlayerInfo {
                id: player.id(),
                login: player.login().to_string(),
                team: game.player_team(player.id()).unwrap_or(NO_TEAM_ID),
            })
            .collect(),
        max_players: game.max_players,
        start_time: game.start_time,
        min_rating: game.min_rating,
        max_rating: game.max_rating,
        featured_mod_version: files.iter().map(|file| file.version).max(),
        featured_mod_file_versions: files
            .into_iter()
            .map(|file| FeaturedModFileVersion {
                file_id: file.file_id,
                version: file.version,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::time::timeout;

    use super::*;
    use crate::services::option_service::update_player_option;
    use crate::services::rating_service::RatingType;
    use crate::services::result_service::report_army_outcome;
    use crate::testing::{harness, player, TestHarness};

    const FUTURE_TIMEOUT: Duration = Duration::from_secs(1);

    async fn create_default_game(
        h: &TestHarness,
        host: &Arc<Player>,
    ) -> crate::state::players::GameFuture {
        create_game(
            &h.state,
            "M".to_string(),
            "faf",
            "SCMP_001",
            None,
            GameVisibility::Public,
            None,
            None,
            host,
            LobbyMode::Default,
            None,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn s1_happy_path_two_players_global_rating() {
        let h = harness().await;
        let host = player(1, "H");
        let joiner = player(2, "J");
        h.state.players().register(host.clone());
        h.state.players().register(joiner.clone());

        let host_future = create_default_game(&h, &host).await;
        {
            let handle = h.state.games().find(1).expect("first game id is 1");
            assert_eq!(handle.lock().await.state, GameState::Initializing);
        }

        update_player_game_state(&h.state, PlayerGameState::Lobby, &host)
            .await
            .unwrap();
        let opened = timeout(FUTURE_TIMEOUT, host_future).await.unwrap().unwrap();
        assert_eq!(opened.lock().await.state, GameState::Open);

        let join_future = join_game(&h.state, 1, None, &joiner).await.unwrap();
        update_player_game_state(&h.state, PlayerGameState::Lobby, &joiner)
            .await
            .unwrap();
        timeout(FUTURE_TIMEOUT, join_future).await.unwrap().unwrap();

        for (target, army, team, spot) in [(&host, 0, 2, 1), (&joiner, 1, 3, 2)] {
            for (key, value) in [
                (options::ARMY, json!(army)),
                (options::TEAM, json!(team)),
                (options::START_SPOT, json!(spot)),
                (options::FACTION, json!(1)),
                (options::COLOR, json!(spot)),
            ] {
                update_player_option(&h.state, &host, target.id(), key, value)
                    .await
                    .unwrap();
            }
        }

        update_player_game_state(&h.state, PlayerGameState::Launching, &host)
            .await
            .unwrap();
        {
            let handle = h.state.games().find(1).unwrap();
            assert_eq!(handle.lock().await.state, GameState::Playing);
        }
        let persisted = h.repository.get(1).expect("persisted at launch");
        assert!(persisted.start_time.is_some());
        assert_eq!(persisted.player_stats.len(), 2);

        for reporter in [&host, &joiner] {
            report_army_outcome(&h.state, reporter, 0, Outcome::Victory, 10)
                .await
                .unwrap();
            report_army_outcome(&h.state, reporter, 1, Outcome::Defeat, 0)
                .await
                .unwrap();
        }

        report_game_ended(&h.state, &host).await.unwrap();
        assert!(h.rating.updates().is_empty(), "one report is not enough");
        report_game_ended(&h.state, &joiner).await.unwrap();

        let updates = h.rating.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].rating_type, RatingType::Global);
        assert_eq!(updates[0].player_ids, vec![1, 2]);

        let results = h.client.game_results();
        assert_eq!(results.len(), 1);
        assert!(!results[0].draw);
        let host_result = results[0]
            .player_results
            .iter()
            .find(|result| result.player_id == 1)
            .unwrap();
        assert!(host_result.winner);

        let saved = h.repository.get(1).unwrap();
        assert_eq!(saved.validity, Validity::Valid);
        assert!(saved.end_time.is_some());
        let host_stats = saved
            .player_stats
            .iter()
            .find(|stats| stats.player_id == 1)
            .unwrap();
        assert_eq!(host_stats.score, Some(10));

        // Clients shut their processes down; the drained game closes.
        update_player_game_state(&h.state, PlayerGameState::Closed, &host)
            .await
            .unwrap();
        update_player_game_state(&h.state, PlayerGameState::Closed, &joiner)
            .await
            .unwrap();
        assert!(h.state.games().is_empty());
        assert_eq!(host.current_game(), None);
        assert_eq!(joiner.current_game(), None);
    }

    #[tokio::test]
    async fn s2_host_abandoning_the_lobby_drains_and_closes_it() {
        let h = harness().await;
        let (host, joiner) = h.open_two_player_game().await;

        remove_player(&h.state, &host).await.unwrap();

        assert!(h.state.games().is_empty());
        assert_eq!(host.current_game(), None);
        assert_eq!(joiner.current_game(), None);
        assert_eq!(joiner.game_state(), PlayerGameState::None);
        assert!(h.rating.updates().is_empty());
        assert!(h.repository.is_empty(), "never launched, never persisted");
    }

    #[tokio::test]
    async fn s4_overlapping_games_rate_in_start_time_order() {
        let h = harness().await;
        let shared = player(1, "P");
        let first_peer = player(2, "A");
        let second_peer = player(3, "B");
        for p in [&shared, &first_peer, &second_peer] {
            h.state.players().register((*p).clone());
        }

        // g1: P and A, launched first.
        h.open_and_launch_game(&shared, &first_peer).await;
        // P drops out of g1 mid-game and starts g2 with B.
        remove_player(&h.state, &shared).await.unwrap();
        h.open_and_launch_game(&shared, &second_peer).await;

        // g2 finishes first.
        for reporter in [&shared, &second_peer] {
            report_army_outcome(&h.state, reporter, 0, Outcome::Victory, 10)
                .await
                .unwrap();
            report_army_outcome(&h.state, reporter, 1, Outcome::Defeat, 0)
                .await
                .unwrap();
            report_game_ended(&h.state, reporter).await.unwrap();
        }
        assert!(
            h.rating.updates().is_empty(),
            "g2 must wait for the older overlapping g1"
        );

        // g1 finishes; A is its only remaining participant.
        report_army_outcome(&h.state, &first_peer, 0, Outcome::Defeat, 0)
            .await
            .unwrap();
        report_army_outcome(&h.state, &first_peer, 1, Outcome::Victory, 7)
            .await
            .unwrap();
        report_game_ended(&h.state, &first_peer).await.unwrap();

        let updates = h.rating.updates();
        assert_eq!(updates.len(), 2, "both games rated after g1 ended");
        assert_eq!(updates[0].player_ids, vec![1, 2], "g1 rates first");
        assert_eq!(updates[1].player_ids, vec![1, 3], "g2 rates second");
    }

    #[tokio::test]
    async fn s5_mutual_draw_invalidates_the_game() {
        let h = harness().await;
        let (host, joiner) = h.playing_two_player_game().await;

        mutually_agree_draw(&h.state, &host).await.unwrap();
        {
            let handle = h.state.games().find(1).unwrap();
            assert!(!handle.lock().await.mutually_agreed_draw);
        }
        mutually_agree_draw(&h.state, &joiner).await.unwrap();
        {
            let handle = h.state.games().find(1).unwrap();
            assert!(handle.lock().await.mutually_agreed_draw);
        }

        for reporter in [&host, &joiner] {
            report_game_ended(&h.state, reporter).await.unwrap();
        }

        assert_eq!(h.repository.get(1).unwrap().validity, Validity::MutualDraw);
        assert!(h.rating.updates().is_empty(), "mutual draw skips rating");
    }

    #[tokio::test]
    async fn enforce_rating_overrides_a_non_valid_verdict() {
        let h = harness().await;
        let (host, joiner) = h.playing_two_player_game().await;

        mutually_agree_draw(&h.state, &host).await.unwrap();
        mutually_agree_draw(&h.state, &joiner).await.unwrap();
        enforce_rating(&h.state, &host).await.unwrap();

        for reporter in [&host, &joiner] {
            report_game_ended(&h.state, reporter).await.unwrap();
        }

        assert_eq!(h.repository.get(1).unwrap().validity, Validity::MutualDraw);
        assert_eq!(h.rating.updates().len(), 1, "enforcement forces the update");
    }

    #[tokio::test]
    async fn ladder_games_use_the_ladder_bucket_and_post_division_results() {
        let h = harness().await;
        let host = player(1, "H");
        let joiner = player(2, "J");
        h.state.players().register(host.clone());
        h.state.players().register(joiner.clone());

        create_game(
            &h.state,
            "ladder".to_string(),
            "ladder1v1",
            "SCMP_001",
            None,
            GameVisibility::Public,
            None,
            None,
            &host,
            LobbyMode::AutoJoin,
            None,
        )
        .await
        .unwrap();
        update_player_game_state(&h.state, PlayerGameState::Lobby, &host)
            .await
            .unwrap();
        join_game(&h.state, 1, None, &joiner).await.unwrap();
        update_player_game_state(&h.state, PlayerGameState::Lobby, &joiner)
            .await
            .unwrap();
        h.assign_default_slots(&host, &joiner).await;
        update_player_game_state(&h.state, PlayerGameState::Launching, &host)
            .await
            .unwrap();

        assert!(host.ladder1v1_rating().is_some(), "ladder rating initialized");

        for reporter in [&host, &joiner] {
            report_army_outcome(&h.state, reporter, 0, Outcome::Victory, 10)
                .await
                .unwrap();
            report_army_outcome(&h.state, reporter, 1, Outcome::Defeat, 0)
                .await
                .unwrap();
            report_game_ended(&h.state, reporter).await.unwrap();
        }

        let updates = h.rating.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].rating_type, RatingType::Ladder1v1);

        let division_results = h.division.results();
        assert_eq!(division_results.len(), 1);
        let (one, two, winner) = division_results[0];
        assert_eq!((one, two), (1, 2));
        assert_eq!(winner, Some(1), "highest settled score wins");
    }

    #[tokio::test]
    async fn last_player_leaving_a_playing_game_ends_and_closes_it() {
        let h = harness().await;
        let (host, joiner) = h.playing_two_player_game().await;

        remove_player(&h.state, &joiner).await.unwrap();
        assert!(
            h.state.games().find(1).is_some(),
            "one player still connected"
        );

        remove_player(&h.state, &host).await.unwrap();

        assert!(h.state.games().is_empty(), "end processing ran, then closed");
        let saved = h.repository.get(1).unwrap();
        assert!(saved.end_time.is_some());
        // Nobody was left to report, so the result is unknown and unrated.
        assert_eq!(saved.validity, Validity::UnknownResult);
        assert!(h.rating.updates().is_empty());
    }

    #[tokio::test]
    async fn create_game_rejects_callers_already_in_a_game() {
        let h = harness().await;
        let (host, _joiner) = h.open_two_player_game().await;

        let err = create_default_game_err(&h, &host).await;
        assert!(matches!(err, RequestError::AlreadyInGame));
    }

    async fn create_default_game_err(h: &TestHarness, host: &Arc<Player>) -> RequestError {
        create_game(
            &h.state,
            "again".to_string(),
            "faf",
            "SCMP_001",
            None,
            GameVisibility::Public,
            None,
            None,
            host,
            LobbyMode::Default,
            None,
        )
        .await
        .unwrap_err()
    }

    #[tokio::test]
    async fn create_game_resets_an_orphaned_initializing_game() {
        let h = harness().await;
        let host = player(1, "H");
        h.state.players().register(host.clone());

        // First attempt crashes before reaching the lobby.
        let stale_future = create_default_game(&h, &host).await;

        // Second attempt silently replaces it.
        let _future = create_default_game(&h, &host).await;

        assert!(stale_future.await.is_err(), "stale join future cancelled");
        assert!(h.state.games().find(1).is_none(), "orphan cancelled");
        assert_eq!(host.current_game(), Some(2));
        assert_eq!(h.state.games().len(), 1);
    }

    #[tokio::test]
    async fn join_game_validates_state_and_password() {
        let h = harness().await;
        let host = player(1, "H");
        let joiner = player(2, "J");
        h.state.players().register(host.clone());
        h.state.players().register(joiner.clone());

        assert!(matches!(
            join_game(&h.state, 99, None, &joiner).await.unwrap_err(),
            RequestError::NoSuchGame(99)
        ));

        create_game(
            &h.state,
            "locked".to_string(),
            "faf",
            "SCMP_001",
            Some("sesame".to_string()),
            GameVisibility::Public,
            None,
            None,
            &host,
            LobbyMode::Default,
            None,
        )
        .await
        .unwrap();

        assert!(matches!(
            join_game(&h.state, 1, None, &joiner).await.unwrap_err(),
            RequestError::GameNotJoinable(1, GameState::Initializing)
        ));

        update_player_game_state(&h.state, PlayerGameState::Lobby, &host)
            .await
            .unwrap();

        assert!(matches!(
            join_game(&h.state, 1, Some("wrong"), &joiner).await.unwrap_err(),
            RequestError::InvalidPassword(1)
        ));
        join_game(&h.state, 1, Some("sesame"), &joiner).await.unwrap();
    }

    #[tokio::test]
    async fn player_state_reports_respect_the_transition_table() {
        let h = harness().await;
        let host = player(1, "H");
        h.state.players().register(host.clone());
        create_default_game(&h, &host).await;

        let err = update_player_game_state(&h.state, PlayerGameState::Launching, &host)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RequestError::InvalidPlayerGameStateTransition {
                from: PlayerGameState::Initializing,
                to: PlayerGameState::Launching,
            }
        ));
    }

    #[tokio::test]
    async fn report_game_ended_is_idempotent_per_player() {
        let h = harness().await;
        let (host, joiner) = h.playing_two_player_game().await;

        report_game_ended(&h.state, &host).await.unwrap();
        report_game_ended(&h.state, &host).await.unwrap();
        {
            let handle = h.state.games().find(1).unwrap();
            assert_eq!(handle.lock().await.state, GameState::Playing);
        }

        report_game_ended(&h.state, &joiner).await.unwrap();
        let handle = h.state.games().find(1).unwrap();
        assert_eq!(handle.lock().await.state, GameState::Ended);
    }

    #[tokio::test]
    async fn end_processing_runs_at_most_once() {
        let h = harness().await;
        let (host, joiner) = h.playing_two_player_game().await;
        for reporter in [&host, &joiner] {
            report_army_outcome(&h.state, reporter, 0, Outcome::Victory, 10)
                .await
                .unwrap();
            report_game_ended(&h.state, reporter).await.unwrap();
        }

        let handle = h.state.games().find(1).unwrap();
        on_game_ended(&h.state, &handle).await.unwrap();

        assert_eq!(h.rating.updates().len(), 1);
        assert_eq!(h.client.game_results().len(), 1);
    }

    #[tokio::test]
    async fn stats_processing_failures_never_block_closure() {
        let h = harness().await;
        let (host, joiner) = h.playing_two_player_game().await;
        h.stats.fail_next();

        remove_player(&h.state, &host).await.unwrap();
        remove_player(&h.state, &joiner).await.unwrap();

        assert!(h.state.games().is_empty(), "game closed despite stats failure");
        assert!(h.repository.get(1).unwrap().end_time.is_some());
    }

    #[tokio::test]
    async fn restore_game_session_reattaches_a_participant() {
        let h = harness().await;
        let (_host, joiner) = h.playing_two_player_game().await;

        remove_player(&h.state, &joiner).await.unwrap();
        assert_eq!(joiner.current_game(), None);

        restore_game_session(&h.state, &joiner, 1).await.unwrap();

        assert_eq!(joiner.current_game(), Some(1));
        assert_eq!(joiner.game_state(), PlayerGameState::Launching);
        let handle = h.state.games().find(1).unwrap();
        assert!(handle.lock().await.connected_players.contains_key(&joiner.id()));
        drop(handle);

        // An outsider was never part of the running game.
        let outsider = player(9, "O");
        h.state.players().register(outsider.clone());
        let err = restore_game_session(&h.state, &outsider, 1).await.unwrap_err();
        assert!(matches!(err, RequestError::CantRestoreGameNotParticipant(1)));
    }

    #[tokio::test]
    async fn restore_game_session_requires_an_active_game() {
        let h = harness().await;
        let lost = player(5, "lost");
        h.state.players().register(lost.clone());

        let err = restore_game_session(&h.state, &lost, 123).await.unwrap_err();
        assert!(matches!(err, RequestError::CantRestoreGameDoesntExist(123)));
    }

    #[tokio::test]
    async fn mutual_draw_requires_a_playing_game_and_a_real_team() {
        let h = harness().await;
        let (host, joiner) = h.open_two_player_game().await;

        let err = mutually_agree_draw(&h.state, &host).await.unwrap_err();
        assert!(matches!(err, RequestError::InvalidGameState { .. }));

        // Launch, then demote the joiner to observer.
        update_player_game_state(&h.state, PlayerGameState::Launching, &host)
            .await
            .unwrap();
        {
            let handle = h.state.games().find(1).unwrap();
            let mut game = handle.lock().await;
            game.player_options
                .entry(joiner.id())
                .or_default()
                .insert(options::TEAM.to_string(), json!(OBSERVERS_TEAM_ID));
        }

        mutually_agree_draw(&h.state, &joiner).await.unwrap();
        mutually_agree_draw(&h.state, &host).await.unwrap();

        let handle = h.state.games().find(1).unwrap();
        let game = handle.lock().await;
        assert!(
            game.mutually_agreed_draw,
            "only the host's vote counts once the joiner observes"
        );
        assert!(!game.mutual_draw_acceptors.contains(&joiner.id()));
    }

    #[tokio::test]
    async fn disconnect_player_from_game_notifies_everyone_else() {
        let h = harness().await;
        let (host, joiner) = h.playing_two_player_game().await;

        disconnect_player_from_game(&h.state, &host, joiner.id())
            .await
            .unwrap();

        let receivers = h.client.last_disconnect_receivers().unwrap();
        assert_eq!(receivers, vec![host.id()]);
        let handle = h.state.games().find(1).unwrap();
        assert!(
            handle.lock().await.connected_players.contains_key(&joiner.id()),
            "a transport-level instruction does not remove the player"
        );
    }

    #[tokio::test]
    async fn game_ids_are_dense_and_strictly_increasing() {
        let h = harness().await;
        let first_host = player(1, "one");
        let second_host = player(2, "two");
        h.state.players().register(first_host.clone());
        h.state.players().register(second_host.clone());

        create_default_game(&h, &first_host).await;
        create_default_game(&h, &second_host).await;

        assert!(h.state.games().find(1).is_some());
        assert!(h.state.games().find(2).is_some());
    }

    #[tokio::test]
    async fn player_online_receives_the_game_list() {
        let h = harness().await;
        let (_host, _joiner) = h.open_two_player_game().await;

        let viewer = player(7, "viewer");
        on_player_online(&h.state, &viewer).await;

        assert_eq!(h.client.last_game_list_len(), Some(1));
        assert!(h.state.players().get_online_player(7).is_some());

        on_player_offline(&h.state, &viewer);
        assert!(h.state.players().get_online_player(7).is_none());
    }
}
