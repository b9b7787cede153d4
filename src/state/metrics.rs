//! Lock-free gauge counters for game and player lifecycle states.
//!
//! These are the values a metrics exporter would scrape; the engine only
//! maintains them.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::state::machine::{GameState, PlayerGameState};

/// Number of active games per lifecycle state. `Closed` games are not
/// counted; a game leaves its gauge when it closes.
#[derive(Debug, Default)]
pub struct GameStateCounters {
    counts: [AtomicUsize; GameState::ALL.len()],
}

impl GameStateCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, state: GameState) -> usize {
        self.counts[index_of_game_state(state)].load(Ordering::Relaxed)
    }

    pub(crate) fn record_created(&self, state: GameState) {
        self.counts[index_of_game_state(state)].fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transition(&self, from: GameState, to: GameState) {
        if from != GameState::Closed {
            decrement(&self.counts[index_of_game_state(from)]);
        }
        if to != GameState::Closed {
            self.counts[index_of_game_state(to)].fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Number of online players per player-game state.
#[derive(Debug, Default)]
pub struct PlayerStateCounters {
    counts: [AtomicUsize; PlayerGameState::ALL.len()],
}

impl PlayerStateCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, state: PlayerGameState) -> usize {
        self.counts[index_of_player_state(state)].load(Ordering::Relaxed)
    }

    pub(crate) fn record_online(&self, state: PlayerGameState) {
        self.counts[index_of_player_state(state)].fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_offline(&self, state: PlayerGameState) {
        decrement(&self.counts[index_of_player_state(state)]);
    }

    pub(crate) fn record_transition(&self, from: PlayerGameState, to: PlayerGameState) {
        decrement(&self.counts[index_of_player_state(from)]);
        self.counts[index_of_player_state(to)].fetch_add(1, Ordering::Relaxed);
    }
}

/// Gauges never go negative, even if a decrement races a missed increment.
fn decrement(count: &AtomicUsize) {
    let _ = count.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |value| {
        Some(value.saturating_sub(1))
    });
}

fn index_of_game_state(state: GameState) -> usize {
    GameState::ALL
        .iter()
        .position(|candidate| *candidate == state)
        .expect("state covered by ALL")
}

fn index_of_player_state(state: PlayerGameState) -> usize {
    PlayerGameState::ALL
        .iter()
        .position(|candidate| *candidate == state)
        .expect("state covered by ALL")
}
