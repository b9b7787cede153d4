pub mod game;
pub mod machine;
pub mod metrics;
pub mod players;

use std::sync::Arc;

use tokio::sync::{Mutex as AsyncMutex, MutexGuard};
use tracing::debug;

use crate::config::EngineConfig;
use crate::dao::games::GameRepository;
use crate::dao::maps::MapService;
use crate::dao::mods::ModService;
use crate::dao::registry::ActiveGameRegistry;
use crate::dao::storage::StorageError;
use crate::services::broadcast_service::Broadcaster;
use crate::services::client_service::ClientService;
use crate::services::rating_service::{DivisionService, RatingService};
use crate::services::stats_service::ArmyStatisticsService;
use crate::state::game::{Game, GameId};
use crate::state::metrics::{GameStateCounters, PlayerStateCounters};
use crate::state::players::PlayerRegistry;

pub type SharedState = Arc<AppState>;
pub type SharedGame = Arc<GameHandle>;

/// Owner of one game's aggregate and its serialization token.
///
/// Every public operation that mutates a game acquires the handle's mutex
/// for its full duration; the id is readable without locking so cross-game
/// scans can identify a handle cheaply.
#[derive(Debug)]
pub struct GameHandle {
    id: GameId,
    game: AsyncMutex<Game>,
}

impl GameHandle {
    pub(crate) fn new(game: Game) -> SharedGame {
        Arc::new(Self {
            id: game.id,
            game: AsyncMutex::new(game),
        })
    }

    pub fn id(&self) -> GameId {
        self.id
    }

    pub async fn lock(&self) -> MutexGuard<'_, Game> {
        self.game.lock().await
    }
}

/// Central engine state storing the active games, the player directory and
/// handles to every collaborator the engine consumes.
pub struct AppState {
    config: EngineConfig,
    games: ActiveGameRegistry,
    players: PlayerRegistry,
    /// Games whose rating update waits for an older overlapping game. The
    /// queue holds handles so a game that already left the registry can
    /// still be rated once its predecessor ends.
    rating_queue: std::sync::Mutex<Vec<SharedGame>>,
    /// Serializes drains of the rating queue.
    rating_drain_gate: AsyncMutex<()>,
    game_repository: Arc<dyn GameRepository>,
    map_service: Arc<dyn MapService>,
    mod_service: Arc<dyn ModService>,
    rating_service: Arc<dyn RatingService>,
    division_service: Arc<dyn DivisionService>,
    army_statistics_service: Arc<dyn ArmyStatisticsService>,
    client_service: Arc<dyn ClientService>,
    broadcaster: Broadcaster,
    game_state_counters: GameStateCounters,
    player_state_counters: PlayerStateCounters,
}

impl AppState {
    /// Construct the engine state, seeding the game id counter from
    /// persistence so ids stay unique across restarts.
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        config: EngineConfig,
        game_repository: Arc<dyn GameRepository>,
        map_service: Arc<dyn MapService>,
        mod_service: Arc<dyn ModService>,
        rating_service: Arc<dyn RatingService>,
        division_service: Arc<dyn DivisionService>,
        army_statistics_service: Arc<dyn ArmyStatisticsService>,
        client_service: Arc<dyn ClientService>,
    ) -> Result<SharedState, StorageError> {
        let max_persisted_id = game_repository.find_max_id().await?.unwrap_or(0);
        debug!(next_game_id = max_persisted_id + 1, "seeded game id counter");

        let broadcaster = Broadcaster::spawn(client_service.clone());

        Ok(Arc::new(Self {
            config,
            games: ActiveGameRegistry::new(max_persisted_id),
            players: PlayerRegistry::new(),
            rating_queue: std::sync::Mutex::new(Vec::<SharedGame>::new()),
            rating_drain_gate: AsyncMutex::new(()),
            game_repository,
            map_service,
            mod_service,
            rating_service,
            division_service,
            army_statistics_service,
            client_service,
            broadcaster,
            game_state_counters: GameStateCounters::new(),
            player_state_counters: PlayerStateCounters::new(),
        }))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The in-memory index of active games.
    pub fn games(&self) -> &ActiveGameRegistry {
        &self.games
    }

    /// Directory of online players.
    pub fn players(&self) -> &PlayerRegistry {
        &self.players
    }

    pub fn game_repository(&self) -> &dyn GameRepository {
        self.game_repository.as_ref()
    }

    pub fn map_service(&self) -> &dyn MapService {
        self.map_service.as_ref()
    }

    pub fn mod_service(&self) -> &dyn ModService {
        self.mod_service.as_ref()
    }

    pub fn rating_service(&self) -> &dyn RatingService {
        self.rating_service.as_ref()
    }

    pub fn division_service(&self) -> &dyn DivisionService {
        self.division_service.as_ref()
    }

    pub fn army_statistics_service(&self) -> &dyn ArmyStatisticsService {
        self.army_statistics_service.as_ref()
    }

    pub fn client_service(&self) -> &dyn ClientService {
        self.client_service.as_ref()
    }

    pub(crate) fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn game_state_counters(&self) -> &GameStateCounters {
        &self.game_state_counters
    }

    pub fn player_state_counters(&self) -> &PlayerStateCounters {
        &self.player_state_counters
    }

    pub(crate) fn rating_queue(&self) -> &std::sync::Mutex<Vec<SharedGame>> {
        &self.rating_queue
    }

    pub(crate) fn rating_drain_gate(&self) -> &AsyncMutex<()> {
        &self.rating_drain_gate
    }
}
