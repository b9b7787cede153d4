//! Rating collaborator contracts and the cross-game rating serializer.
//!
//! Rating updates must be applied in `start_time` order for games that share
//! players, otherwise the later game's update would be computed from stale
//! ratings and clobber the earlier one. Ended games therefore pass through a
//! pending queue which only releases a game once no older, still-playing
//! game shares a participant with it.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::SystemTime;

use futures::future::BoxFuture;
use tracing::{debug, trace};

use crate::state::game::{GameId, GamePlayerStats, Validity, NO_TEAM_ID};
use crate::state::machine::GameState;
use crate::state::players::Player;
use crate::state::{AppState, SharedGame};

/// Which rating bucket an update applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatingType {
    Global,
    Ladder1v1,
}

/// Rating math collaborator. The engine decides *when* and *for whom*
/// ratings update; the collaborator owns the math and the persistence of
/// the resulting values.
pub trait RatingService: Send + Sync {
    /// Seed a missing global rating for a player entering a game.
    fn init_global_rating(&self, player: &Player);

    /// Seed a missing ladder rating for a player entering a ladder game.
    fn init_ladder1v1_rating(&self, player: &Player);

    /// Apply the rating update for one finished game.
    fn update_ratings<'a>(
        &'a self,
        player_stats: Vec<GamePlayerStats>,
        no_team_id: i32,
        rating_type: RatingType,
    ) -> BoxFuture<'a, ()>;
}

/// Ladder division bookkeeping collaborator.
pub trait DivisionService: Send + Sync {
    /// Record the outcome of a ladder game. `winner` is `None` for a draw.
    fn post_result<'a>(
        &'a self,
        player_one: Arc<Player>,
        player_two: Arc<Player>,
        winner: Option<Arc<Player>>,
    ) -> BoxFuture<'a, ()>;
}

/// Put an ended game on the rating-pending queue. The caller must hold the
/// game's lock; the queue itself stores the handle so a game that closes
/// while deferred can still be rated later.
pub(crate) fn enqueue_for_rating_update(state: &AppState, game: SharedGame) {
    state
        .rating_queue()
        .lock()
        .expect("rating queue lock poisoned")
        .push(game);
}

/// Release every queued game that has no rating-dependent predecessor, in
/// `start_time` order. Games that are still blocked stay queued and are
/// retried when the next game ends.
///
/// Must be called without holding any game lock; the drain locks games one
/// at a time while scanning for dependencies.
pub(crate) async fn drain_rating_queue(state: &AppState) {
    let _gate = state.rating_drain_gate().lock().await;

    let queued: Vec<SharedGame> = state
        .rating_queue()
        .lock()
        .expect("rating queue lock poisoned")
        .clone();

    let mut entries: Vec<(SharedGame, SystemTime, HashSet<_>)> = Vec::new();
    for handle in queued {
        let game = handle.lock().await;
        if let Some(start_time) = game.start_time {
            let participants: HashSet<_> = game.player_stats.keys().copied().collect();
            drop(game);
            entries.push((handle, start_time, participants));
        }
    }
    entries.sort_by_key(|(_, start_time, _)| *start_time);

    for (handle, start_time, participants) in entries {
        if has_rating_dependent_game(state, handle.id(), start_time, &participants).await {
            trace!(game_id = handle.id(), "rating deferred behind an older overlapping game");
            continue;
        }

        state
            .rating_queue()
            .lock()
            .expect("rating queue lock poisoned")
            .retain(|queued| queued.id() != handle.id());

        update_ratings_if_valid(state, &handle).await;
    }
}

/// Whether an older game is still playing that shares at least one
/// participant with the given game.
async fn has_rating_dependent_game(
    state: &AppState,
    game_id: GameId,
    start_time: SystemTime,
    participants: &HashSet<crate::state::players::PlayerId>,
) -> bool {
    for other in state.games().snapshot() {
        if other.id() == game_id {
            continue;
        }
        let game = other.lock().await;
        if game.state != GameState::Playing {
            continue;
        }
        let Some(other_start) = game.start_time else {
            continue;
        };
        if other_start >= start_time {
            continue;
        }
        if game
            .player_stats
            .keys()
            .any(|player_id| participants.contains(player_id))
        {
            return true;
        }
    }
    false
}

async fn update_ratings_if_valid(state: &AppState, handle: &SharedGame) {
    let (player_stats, rating_type) = {
        let game = handle.lock().await;
        if game.validity != Validity::Valid && !game.rating_enforced {
            trace!(game_id = game.id, validity = ?game.validity, "skipping rating update");
            return;
        }
        let rating_type = if state.mod_service().is_ladder1v1(&game.featured_mod) {
            RatingType::Ladder1v1
        } else {
            RatingType::Global
        };
        (
            game.player_stats.values().cloned().collect::<Vec<_>>(),
            rating_type,
        )
    };

    debug!(game_id = handle.id(), rating_type = ?rating_type, "updating ratings");
    state
        .rating_service()
        .update_ratings(player_stats, NO_TEAM_ID, rating_type)
        .await;
}
