use serde::Serialize;

use crate::state::game::GameId;
use crate::state::players::PlayerId;

/// Final per-player outcome of a finished game, broadcast once after the
/// army results have been reconciled.
#[derive(Debug, Clone, Serialize)]
pub struct GameResultMessage {
    pub game_id: GameId,
    /// True iff any surviving army result is a draw.
    pub draw: bool,
    pub player_results: Vec<PlayerResult>,
}

/// One player's share of a [`GameResultMessage`].
#[derive(Debug, Clone, Serialize)]
pub struct PlayerResult {
    pub player_id: PlayerId,
    pub winner: bool,
    /// Whether the player's commander was destroyed. The client does not
    /// report this yet, so it is always false.
    pub acu_killed: bool,
}
