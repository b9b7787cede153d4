use serde::{Deserialize, Serialize};

/// Lifecycle states of a game.
///
/// A game starts in `Initializing` the moment it is created (the host has
/// been told to launch its game process), becomes `Open` once the host
/// reaches the lobby, `Playing` at launch, `Ended` when every remaining
/// participant reported the end, and `Closed` when it leaves the active
/// registry. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameState {
    Initializing,
    Open,
    Playing,
    Ended,
    Closed,
}

impl GameState {
    /// All states, in lifecycle order. Used to size the gauge counters.
    pub const ALL: [GameState; 5] = [
        GameState::Initializing,
        GameState::Open,
        GameState::Playing,
        GameState::Ended,
        GameState::Closed,
    ];

    /// Whether moving from `self` to `to` is a documented transition.
    ///
    /// Besides the happy path, a game can be cancelled before the lobby
    /// opened (`Initializing -> Closed`) or abandoned before launch
    /// (`Open -> Closed`).
    pub fn can_transition(self, to: GameState) -> bool {
        use GameState::*;
        matches!(
            (self, to),
            (Initializing, Open)
                | (Open, Playing)
                | (Playing, Ended)
                | (Ended, Closed)
                | (Initializing, Closed)
                | (Open, Closed)
        )
    }
}

/// A player's view of its current game, as reported by its client.
///
/// `Idle` is reported by some client versions but carries no meaning for the
/// engine; it is logged and ignored by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayerGameState {
    None,
    Idle,
    Initializing,
    Lobby,
    Launching,
    Ended,
    Closed,
}

impl PlayerGameState {
    /// All states. Used to size the gauge counters.
    pub const ALL: [PlayerGameState; 7] = [
        PlayerGameState::None,
        PlayerGameState::Idle,
        PlayerGameState::Initializing,
        PlayerGameState::Lobby,
        PlayerGameState::Launching,
        PlayerGameState::Ended,
        PlayerGameState::Closed,
    ];

    /// Whether a client-reported transition from `self` to `to` is legal.
    ///
    /// The table enumerates the legal predecessors of each state. `None` is
    /// always reachable because the engine resets a player to it on removal.
    pub fn can_transition(self, to: PlayerGameState) -> bool {
        use PlayerGameState::*;
        match to {
            None => true,
            Initializing => matches!(self, None),
            Idle => matches!(self, None | Initializing),
            Lobby => matches!(self, Initializing | Idle),
            Launching => matches!(self, Lobby),
            Ended => matches!(self, Lobby | Launching),
            Closed => matches!(self, Lobby | Launching | Ended),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn game_happy_path_is_legal() {
        assert!(GameState::Initializing.can_transition(GameState::Open));
        assert!(GameState::Open.can_transition(GameState::Playing));
        assert!(GameState::Playing.can_transition(GameState::Ended));
        assert!(GameState::Ended.can_transition(GameState::Closed));
    }

    #[test]
    fn game_can_be_cancelled_or_abandoned() {
        assert!(GameState::Initializing.can_transition(GameState::Closed));
        assert!(GameState::Open.can_transition(GameState::Closed));
    }

    #[test]
    fn game_cannot_skip_or_reverse() {
        assert!(!GameState::Initializing.can_transition(GameState::Playing));
        assert!(!GameState::Open.can_transition(GameState::Ended));
        assert!(!GameState::Playing.can_transition(GameState::Open));
        assert!(!GameState::Playing.can_transition(GameState::Closed));
        assert!(!GameState::Ended.can_transition(GameState::Playing));
    }

    #[test]
    fn closed_is_terminal() {
        for to in GameState::ALL {
            assert!(!GameState::Closed.can_transition(to));
        }
    }

    #[test]
    fn player_happy_path_is_legal() {
        use PlayerGameState::*;
        assert!(None.can_transition(Initializing));
        assert!(Initializing.can_transition(Lobby));
        assert!(Lobby.can_transition(Launching));
        assert!(Launching.can_transition(Ended));
        assert!(Ended.can_transition(Closed));
    }

    #[test]
    fn player_reset_to_none_is_always_legal() {
        for from in PlayerGameState::ALL {
            assert!(from.can_transition(PlayerGameState::None));
        }
    }

    #[test]
    fn player_cannot_reenter_lobby_from_launching() {
        assert!(!PlayerGameState::Launching.can_transition(PlayerGameState::Lobby));
    }

    #[test]
    fn player_cannot_launch_without_lobby() {
        use PlayerGameState::*;
        for from in [None, Idle, Initializing, Launching, Ended, Closed] {
            assert!(!from.can_transition(Launching), "{from:?}");
        }
    }
}
