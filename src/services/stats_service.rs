use std::error::Error;

use futures::future::BoxFuture;

use crate::state::game::Game;
use crate::state::players::Player;

/// Post-game army statistics processing (unit totals, achievements, events).
///
/// Runs once per player-stats entry at the end of a game, fed from the raw
/// statistics blob the clients reported. Failures are logged by the engine
/// and never block game closure.
pub trait ArmyStatisticsService: Send + Sync {
    fn process<'a>(
        &'a self,
        player: &'a Player,
        game: &'a Game,
    ) -> BoxFuture<'a, Result<(), Box<dyn Error + Send + Sync>>>;
}
