use std::sync::Arc;

use crate::dto::game::GameInfo;
use crate::dto::result::GameResultMessage;
use crate::state::game::GameId;
use crate::state::players::{Player, PlayerId};

/// Command sink toward connected clients.
///
/// The engine issues fire-and-forget commands; implementations queue them
/// onto whatever transport the embedding server speaks. None of these
/// methods may block or fail, a gone receiver is the implementation's
/// problem.
pub trait ClientService: Send + Sync {
    /// Tell a player's client to launch its game process.
    fn start_game_process(&self, game_id: GameId, map_folder_name: &str, player: &Player);

    /// Tell the host's client to open a listening lobby.
    fn host_game(&self, game_id: GameId, map_folder_name: &str, host: &Player);

    /// Tell a joining player's client to connect to the game's host.
    fn connect_to_host(&self, player: &Player, host: &Player, game_id: GameId);

    /// Tell `player`'s client to establish a peer connection to `other`.
    /// The offerer side initiates the connection.
    fn connect_to_peer(&self, player: &Player, other: &Player, offerer: bool);

    /// Tell every receiver to drop its peer connection to the given player.
    fn disconnect_player_from_game(&self, player_id: PlayerId, receivers: &[Arc<Player>]);

    /// Send the current game list to a single recipient.
    fn send_game_list(&self, games: Vec<GameInfo>, recipient: &Player);

    /// Fan out the final result of a finished game.
    fn broadcast_game_result(&self, message: GameResultMessage);

    /// Fan out a coalesced game snapshot to all viewers.
    fn broadcast_game_info(&self, info: GameInfo);
}
