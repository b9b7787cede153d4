use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::DashMap;

use crate::state::game::{Game, GameId};
use crate::state::{GameHandle, SharedGame};

/// Thread-safe in-memory index of active games.
///
/// A game is active from the moment it is being hosted until it closes.
/// Lookups are concurrent; the id counter is atomic and seeded from the
/// highest persisted id so ids stay strictly increasing for the lifetime of
/// the process.
#[derive(Debug)]
pub struct ActiveGameRegistry {
    games: DashMap<GameId, SharedGame>,
    last_game_id: AtomicU32,
}

impl ActiveGameRegistry {
    pub fn new(last_persisted_id: GameId) -> Self {
        Self {
            games: DashMap::new(),
            last_game_id: AtomicU32::new(last_persisted_id),
        }
    }

    /// Allocate the next game id.
    pub fn allocate_id(&self) -> GameId {
        self.last_game_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Insert a freshly created game and return its shared handle.
    pub fn insert(&self, game: Game) -> SharedGame {
        let handle = GameHandle::new(game);
        self.games.insert(handle.id(), handle.clone());
        handle
    }

    pub fn find(&self, id: GameId) -> Option<SharedGame> {
        self.games.get(&id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, id: GameId) -> Option<SharedGame> {
        self.games.remove(&id).map(|(_, handle)| handle)
    }

    /// Clone out the current set of handles.
    ///
    /// Callers iterate the snapshot rather than the map itself so no shard
    /// lock is held while awaiting a game's mutex.
    pub fn snapshot(&self) -> Vec<SharedGame> {
        self.games.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.games.len()
    }

    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }
}
