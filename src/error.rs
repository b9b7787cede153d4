use thiserror::Error;

use crate::dao::storage::StorageError;
use crate::state::game::GameId;
use crate::state::machine::{GameState, PlayerGameState};

/// Error returned to the requesting client.
///
/// Each variant corresponds to a wire-visible error code; the payload carries
/// the code's parameters. Telemetry-grade failures (repeated reports from
/// clients without a current game, options for unknown players or armies) are
/// never surfaced through this type, they are logged and discarded.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("player is already in a game")]
    AlreadyInGame,
    #[error("player is not in a game")]
    NotInAGame,
    #[error("no such game: {0}")]
    NoSuchGame(GameId),
    #[error("game {0} is not joinable while in state {1:?}")]
    GameNotJoinable(GameId, GameState),
    #[error("invalid password for game {0}")]
    InvalidPassword(GameId),
    #[error("option `{0}` may only be reported by the host")]
    HostOnlyOption(String),
    #[error("game is in state {actual:?}, expected {expected:?}")]
    InvalidGameState {
        expected: GameState,
        actual: GameState,
    },
    #[error("illegal player game state transition {from:?} -> {to:?}")]
    InvalidPlayerGameStateTransition {
        from: PlayerGameState,
        to: PlayerGameState,
    },
    #[error("unknown featured mod `{0}`")]
    InvalidFeaturedMod(String),
    #[error("cannot restore session: game {0} does not exist or is over")]
    CantRestoreGameDoesntExist(GameId),
    #[error("cannot restore session: not a participant of game {0}")]
    CantRestoreGameNotParticipant(GameId),
    #[error("scenario path `{0}` does not contain a map folder segment")]
    MalformedScenarioPath(String),
    #[error("storage unavailable")]
    Storage(#[from] StorageError),
}

/// Result alias used by the public engine operations.
pub type RequestResult<T> = Result<T, RequestError>;
