use std::sync::{Arc, Mutex, RwLock};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::state::game::GameId;
use crate::state::machine::PlayerGameState;
use crate::state::SharedGame;

/// Identifier of a player, assigned by the identity layer.
pub type PlayerId = u32;

/// A rating as tracked per player and per rating bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub mean: f64,
    pub deviation: f64,
}

/// Receiver half of a pending `createGame`/`joinGame` future. Completes with
/// the joined game, or errors if the join was cancelled by removal. Always
/// consume this with a timeout; the engine never times out a pending join.
pub type GameFuture = oneshot::Receiver<SharedGame>;

/// An online player as tracked by the engine.
///
/// Players are arena-owned aggregates living in the [`PlayerRegistry`];
/// games reference them through `Arc`s while a player only records the id of
/// its current game, which keeps the object graph acyclic. The mutable
/// fields use plain sync locks and are never held across await points.
#[derive(Debug)]
pub struct Player {
    id: PlayerId,
    login: String,
    game_state: RwLock<PlayerGameState>,
    current_game: RwLock<Option<GameId>>,
    ladder1v1_rating: RwLock<Option<Rating>>,
    global_rating: RwLock<Option<Rating>>,
    rating_within_current_game: RwLock<Option<Rating>>,
    game_future: Mutex<Option<oneshot::Sender<SharedGame>>>,
}

impl Player {
    pub fn new(id: PlayerId, login: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id,
            login: login.into(),
            game_state: RwLock::new(PlayerGameState::None),
            current_game: RwLock::new(None),
            ladder1v1_rating: RwLock::new(None),
            global_rating: RwLock::new(None),
            rating_within_current_game: RwLock::new(None),
            game_future: Mutex::new(None),
        })
    }

    pub fn id(&self) -> PlayerId {
        self.id
    }

    pub fn login(&self) -> &str {
        &self.login
    }

    pub fn game_state(&self) -> PlayerGameState {
        *self.game_state.read().expect("game_state lock poisoned")
    }

    pub(crate) fn set_game_state(&self, state: PlayerGameState) {
        *self.game_state.write().expect("game_state lock poisoned") = state;
    }

    pub fn current_game(&self) -> Option<GameId> {
        *self.current_game.read().expect("current_game lock poisoned")
    }

    pub(crate) fn set_current_game(&self, game_id: Option<GameId>) {
        *self.current_game.write().expect("current_game lock poisoned") = game_id;
    }

    pub fn ladder1v1_rating(&self) -> Option<Rating> {
        *self.ladder1v1_rating.read().expect("rating lock poisoned")
    }

    pub fn set_ladder1v1_rating(&self, rating: Rating) {
        *self.ladder1v1_rating.write().expect("rating lock poisoned") = Some(rating);
    }

    pub fn global_rating(&self) -> Option<Rating> {
        *self.global_rating.read().expect("rating lock poisoned")
    }

    pub fn set_global_rating(&self, rating: Rating) {
        *self.global_rating.write().expect("rating lock poisoned") = Some(rating);
    }

    /// Rating snapshot taken when the player entered its current game.
    pub fn rating_within_current_game(&self) -> Option<Rating> {
        *self
            .rating_within_current_game
            .read()
            .expect("rating lock poisoned")
    }

    pub(crate) fn set_rating_within_current_game(&self, rating: Option<Rating>) {
        *self
            .rating_within_current_game
            .write()
            .expect("rating lock poisoned") = rating;
    }

    /// Arm a fresh single-shot game future, replacing (and thereby
    /// cancelling) any previous one.
    pub(crate) fn install_game_future(&self) -> GameFuture {
        let (tx, rx) = oneshot::channel();
        *self.game_future.lock().expect("game_future lock poisoned") = Some(tx);
        rx
    }

    /// Complete the pending game future, if one is armed.
    pub(crate) fn complete_game_future(&self, game: SharedGame) {
        if let Some(tx) = self.game_future.lock().expect("game_future lock poisoned").take() {
            let _ = tx.send(game);
        }
    }

    /// Drop the pending game future, cancelling the caller's receiver.
    pub(crate) fn cancel_game_future(&self) {
        self.game_future
            .lock()
            .expect("game_future lock poisoned")
            .take();
    }
}

/// Directory of online players, keyed by id.
///
/// Lookups are concurrent; entries are registered when a player comes online
/// and dropped when it goes offline.
#[derive(Debug, Default)]
pub struct PlayerRegistry {
    online: DashMap<PlayerId, Arc<Player>>,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, player: Arc<Player>) {
        self.online.insert(player.id(), player);
    }

    pub fn remove(&self, player_id: PlayerId) -> Option<Arc<Player>> {
        self.online.remove(&player_id).map(|(_, player)| player)
    }

    pub fn get_online_player(&self, player_id: PlayerId) -> Option<Arc<Player>> {
        self.online.get(&player_id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.online.len()
    }

    pub fn is_empty(&self) -> bool {
        self.online.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_player_has_no_game() {
        let player = Player::new(1, "alice");
        assert_eq!(player.game_state(), PlayerGameState::None);
        assert_eq!(player.current_game(), None);
        assert_eq!(player.rating_within_current_game(), None);
    }

    #[tokio::test]
    async fn installing_a_new_future_cancels_the_previous_one() {
        let player = Player::new(1, "alice");
        let first = player.install_game_future();
        let _second = player.install_game_future();
        assert!(first.await.is_err());
    }

    #[test]
    fn registry_round_trip() {
        let registry = PlayerRegistry::new();
        let player = Player::new(7, "bob");
        registry.register(player.clone());

        assert_eq!(registry.get_online_player(7).unwrap().login(), "bob");
        assert!(registry.get_online_player(8).is_none());

        registry.remove(7);
        assert!(registry.get_online_player(7).is_none());
    }
}
