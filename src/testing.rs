//! Stub collaborators and fixtures shared by the unit tests.

use std::collections::HashMap;
use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::json;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::dao::games::InMemoryGameRepository;
use crate::dao::maps::{MapService, MapVersion};
use crate::dao::mods::{FeaturedMod, FeaturedModFile, ModService, ModVersion};
use crate::dto::game::GameInfo;
use crate::dto::result::GameResultMessage;
use crate::error::RequestError;
use crate::services::client_service::ClientService;
use crate::services::game_service::{create_game, join_game, update_player_game_state};
use crate::services::option_service::update_player_option;
use crate::services::rating_service::{DivisionService, RatingService, RatingType};
use crate::services::stats_service::ArmyStatisticsService;
use crate::state::game::{options, Game, GameId, GamePlayerStats, GameVisibility, LobbyMode};
use crate::state::machine::{GameState, PlayerGameState};
use crate::state::players::{Player, PlayerId, Rating};
use crate::state::{AppState, SharedState};

pub(crate) fn player(id: PlayerId, login: impl Into<String>) -> Arc<Player> {
    Player::new(id, login)
}

pub(crate) fn featured_mod(technical_name: &str, ranked: bool) -> FeaturedMod {
    FeaturedMod {
        id: 1,
        technical_name: technical_name.to_string(),
        display_name: technical_name.to_uppercase(),
        ranked,
    }
}

pub(crate) fn game_info(id: GameId, title: &str) -> GameInfo {
    GameInfo {
        id,
        title: title.to_string(),
        visibility: GameVisibility::Public,
        password_protected: false,
        state: GameState::Open,
        featured_mod: "faf".to_string(),
        sim_mods: Vec::new(),
        map_folder_name: "scmp_001".to_string(),
        host_login: "H".to_string(),
        players: Vec::new(),
        max_players: 8,
        start_time: None,
        min_rating: None,
        max_rating: None,
        featured_mod_version: None,
        featured_mod_file_versions: Vec::new(),
    }
}

/// Everything a client would have been told, for assertions.
#[derive(Debug, Clone)]
pub(crate) enum ClientCommand {
    StartGameProcess {
        game_id: GameId,
        player_id: PlayerId,
    },
    HostGame {
        game_id: GameId,
        host_id: PlayerId,
    },
    ConnectToHost {
        player_id: PlayerId,
        host_id: PlayerId,
    },
    ConnectToPeer {
        from: PlayerId,
        to: PlayerId,
        offerer: bool,
    },
    DisconnectFromGame {
        target_id: PlayerId,
        receiver_ids: Vec<PlayerId>,
    },
    GameList {
        recipient_id: PlayerId,
        games: usize,
    },
    GameResult(GameResultMessage),
    GameInfo(GameInfo),
}

#[derive(Debug, Default)]
pub(crate) struct RecordingClientService {
    commands: Mutex<Vec<ClientCommand>>,
}

impl RecordingClientService {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, command: ClientCommand) {
        self.commands.lock().expect("commands lock poisoned").push(command);
    }

    pub fn commands(&self) -> Vec<ClientCommand> {
        self.commands.lock().expect("commands lock poisoned").clone()
    }

    pub fn broadcast_infos(&self) -> Vec<GameInfo> {
        self.commands()
            .into_iter()
            .filter_map(|command| match command {
                ClientCommand::GameInfo(info) => Some(info),
                _ => None,
            })
            .collect()
    }

    pub fn game_results(&self) -> Vec<GameResultMessage> {
        self.commands()
            .into_iter()
            .filter_map(|command| match command {
                ClientCommand::GameResult(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn last_disconnect_receivers(&self) -> Option<Vec<PlayerId>> {
        self.commands()
            .into_iter()
            .rev()
            .find_map(|command| match command {
                ClientCommand::DisconnectFromGame { receiver_ids, .. } => Some(receiver_ids),
                _ => None,
            })
    }

    pub fn last_game_list_len(&self) -> Option<usize> {
        self.commands()
            .into_iter()
            .rev()
            .find_map(|command| match command {
                ClientCommand::GameList { games, .. } => Some(games),
                _ => None,
            })
    }
}

impl ClientService for RecordingClientService {
    fn start_game_process(&self, game_id: GameId, _map_folder_name: &str, player: &Player) {
        self.push(ClientCommand::StartGameProcess {
            game_id,
            player_id: player.id(),
        });
    }

    fn host_game(&self, game_id: GameId, _map_folder_name: &str, host: &Player) {
        self.push(ClientCommand::HostGame {
            game_id,
            host_id: host.id(),
        });
    }

    fn connect_to_host(&self, player: &Player, host: &Player, _game_id: GameId) {
        self.push(ClientCommand::ConnectToHost {
            player_id: player.id(),
            host_id: host.id(),
        });
    }

    fn connect_to_peer(&self, player: &Player, other: &Player, offerer: bool) {
        self.push(ClientCommand::ConnectToPeer {
            from: player.id(),
            to: other.id(),
            offerer,
        });
    }

    fn disconnect_player_from_game(&self, player_id: PlayerId, receivers: &[Arc<Player>]) {
        self.push(ClientCommand::DisconnectFromGame {
            target_id: player_id,
            receiver_ids: receivers.iter().map(|player| player.id()).collect(),
        });
    }

    fn send_game_list(&self, games: Vec<GameInfo>, recipient: &Player) {
        self.push(ClientCommand::GameList {
            recipient_id: recipient.id(),
            games: games.len(),
        });
    }

    fn broadcast_game_result(&self, message: GameResultMessage) {
        self.push(ClientCommand::GameResult(message));
    }

    fn broadcast_game_info(&self, info: GameInfo) {
        self.push(ClientCommand::GameInfo(info));
    }
}

/// One recorded rating update, reduced to what assertions care about.
#[derive(Debug, Clone)]
pub(crate) struct RatingUpdate {
    pub player_ids: Vec<PlayerId>,
    pub rating_type: RatingType,
}

#[derive(Debug, Default)]
pub(crate) struct RecordingRatingService {
    updates: Mutex<Vec<RatingUpdate>>,
}

impl RecordingRatingService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<RatingUpdate> {
        self.updates.lock().expect("updates lock poisoned").clone()
    }
}

impl RatingService for RecordingRatingService {
    fn init_global_rating(&self, player: &Player) {
        player.set_global_rating(Rating {
            mean: 1500.0,
            deviation: 500.0,
        });
    }

    fn init_ladder1v1_rating(&self, player: &Player) {
        player.set_ladder1v1_rating(Rating {
            mean: 1500.0,
            deviation: 500.0,
        });
    }

    fn update_ratings<'a>(
        &'a self,
        player_stats: Vec<GamePlayerStats>,
        _no_team_id: i32,
        rating_type: RatingType,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let mut player_ids: Vec<PlayerId> =
                player_stats.iter().map(|stats| stats.player_id).collect();
            player_ids.sort_unstable();
            self.updates
                .lock()
                .expect("updates lock poisoned")
                .push(RatingUpdate {
                    player_ids,
                    rating_type,
                });
        })
    }
}

#[derive(Debug, Default)]
pub(crate) struct RecordingDivisionService {
    results: Mutex<Vec<(PlayerId, PlayerId, Option<PlayerId>)>>,
}

impl RecordingDivisionService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> Vec<(PlayerId, PlayerId, Option<PlayerId>)> {
        self.results.lock().expect("results lock poisoned").clone()
    }
}

impl DivisionService for RecordingDivisionService {
    fn post_result<'a>(
        &'a self,
        player_one: Arc<Player>,
        player_two: Arc<Player>,
        winner: Option<Arc<Player>>,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.results.lock().expect("results lock poisoned").push((
                player_one.id(),
                player_two.id(),
                winner.map(|player| player.id()),
            ));
        })
    }
}

#[derive(Debug, Default)]
pub(crate) struct RecordingStatsService {
    processed: Mutex<Vec<PlayerId>>,
    fail: AtomicBool,
}

impl RecordingStatsService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `process` call fail.
    pub fn fail_next(&self) {
        self.fail.store(true, Ordering::Relaxed);
    }

    #[allow(dead_code)]
    pub fn processed(&self) -> Vec<PlayerId> {
        self.processed.lock().expect("processed lock poisoned").clone()
    }
}

impl ArmyStatisticsService for RecordingStatsService {
    fn process<'a>(
        &'a self,
        player: &'a Player,
        _game: &'a Game,
    ) -> BoxFuture<'a, Result<(), Box<dyn Error + Send + Sync>>> {
        Box::pin(async move {
            if self.fail.load(Ordering::Relaxed) {
                return Err(Box::new(std::io::Error::other("stats backend down"))
                    as Box<dyn Error + Send + Sync>);
            }
            self.processed
                .lock()
                .expect("processed lock poisoned")
                .push(player.id());
            Ok(())
        })
    }
}

#[derive(Debug)]
pub(crate) struct StubModService {
    mods: HashMap<String, FeaturedMod>,
    mod_versions: HashMap<Uuid, ModVersion>,
}

impl StubModService {
    /// The usual catalogue: the default mod, the ladder and coop rulesets,
    /// plus one unranked mod.
    pub fn standard() -> Self {
        let mut mods = HashMap::new();
        for (name, ranked) in [
            ("faf", true),
            ("ladder1v1", true),
            ("coop", true),
            ("labwars", false),
        ] {
            mods.insert(name.to_string(), featured_mod(name, ranked));
        }
        Self {
            mods,
            mod_versions: HashMap::new(),
        }
    }

    #[allow(dead_code)]
    pub fn with_mod_version(mut self, version: ModVersion) -> Self {
        self.mod_versions.insert(version.uid, version);
        self
    }
}

impl ModService for StubModService {
    fn featured_mod(&self, technical_name: &str) -> BoxFuture<'_, Option<FeaturedMod>> {
        let found = self.mods.get(technical_name).cloned();
        Box::pin(async move { found })
    }

    fn is_ladder1v1(&self, featured_mod: &FeaturedMod) -> bool {
        featured_mod.technical_name == "ladder1v1"
    }

    fn is_coop(&self, featured_mod: &FeaturedMod) -> bool {
        featured_mod.technical_name == "coop"
    }

    fn is_mod_ranked(&self, featured_mod: &FeaturedMod) -> bool {
        featured_mod.ranked
    }

    fn find_mod_versions_by_uids(&self, uids: &[Uuid]) -> BoxFuture<'_, Vec<ModVersion>> {
        let found = uids
            .iter()
            .filter_map(|uid| self.mod_versions.get(uid).cloned())
            .collect();
        Box::pin(async move { found })
    }

    fn latest_file_versions(
        &self,
        _featured_mod: &FeaturedMod,
    ) -> BoxFuture<'_, Vec<FeaturedModFile>> {
        Box::pin(async move {
            vec![
                FeaturedModFile {
                    file_id: 1,
                    version: 3742,
                },
                FeaturedModFile {
                    file_id: 2,
                    version: 3741,
                },
            ]
        })
    }
}

#[derive(Debug)]
pub(crate) struct StubMapService {
    maps: HashMap<String, MapVersion>,
    times_played: Mutex<Vec<u32>>,
}

impl StubMapService {
    pub fn standard() -> Self {
        let mut maps = HashMap::new();
        maps.insert(
            "SCMP_001".to_string(),
            MapVersion {
                id: 10,
                file_name: "SCMP_001".to_string(),
                ranked: true,
            },
        );
        Self {
            maps,
            times_played: Mutex::new(Vec::new()),
        }
    }

    #[allow(dead_code)]
    pub fn times_played(&self) -> Vec<u32> {
        self.times_played
            .lock()
            .expect("times_played lock poisoned")
            .clone()
    }
}

impl MapService for StubMapService {
    fn find_map(&self, file_name: &str) -> BoxFuture<'_, Option<MapVersion>> {
        let found = self.maps.get(file_name).cloned();
        Box::pin(async move { found })
    }

    fn increment_times_played(&self, map_id: u32) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.times_played
                .lock()
                .expect("times_played lock poisoned")
                .push(map_id);
        })
    }
}

/// A fully wired engine with recording collaborators.
pub(crate) struct TestHarness {
    pub state: SharedState,
    pub repository: Arc<InMemoryGameRepository>,
    pub client: Arc<RecordingClientService>,
    pub rating: Arc<RecordingRatingService>,
    pub division: Arc<RecordingDivisionService>,
    pub stats: Arc<RecordingStatsService>,
}

pub(crate) async fn harness() -> TestHarness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let repository = Arc::new(InMemoryGameRepository::new());
    let client = Arc::new(RecordingClientService::new());
    let rating = Arc::new(RecordingRatingService::new());
    let division = Arc::new(RecordingDivisionService::new());
    let stats = Arc::new(RecordingStatsService::new());

    // Short delays and no minimum game time keep scenario tests snappy.
    let config = EngineConfig {
        ranked_min_time_multiplicator: 0,
        broadcast_min_delay: Duration::from_millis(10),
        broadcast_max_delay: Duration::from_millis(50),
    };

    let state = AppState::new(
        config,
        repository.clone(),
        Arc::new(StubMapService::standard()),
        Arc::new(StubModService::standard()),
        rating.clone(),
        division.clone(),
        stats.clone(),
        client.clone(),
    )
    .await
    .expect("in-memory repository never fails");

    TestHarness {
        state,
        repository,
        client,
        rating,
        division,
        stats,
    }
}

impl TestHarness {
    /// Host "H" (id 1) and joiner "J" (id 2) in an open lobby with default
    /// slots assigned.
    pub async fn open_two_player_game(&self) -> (Arc<Player>, Arc<Player>) {
        let host = player(1, "H");
        let joiner = player(2, "J");
        self.state.players().register(host.clone());
        self.state.players().register(joiner.clone());
        self.open_game(&host, &joiner).await;
        (host, joiner)
    }

    /// Like [`Self::open_two_player_game`], but launched.
    pub async fn playing_two_player_game(&self) -> (Arc<Player>, Arc<Player>) {
        let (host, joiner) = self.open_two_player_game().await;
        update_player_game_state(&self.state, PlayerGameState::Launching, &host)
            .await
            .expect("host launches");
        (host, joiner)
    }

    /// Open and launch a game between two already registered players.
    pub async fn open_and_launch_game(&self, host: &Arc<Player>, joiner: &Arc<Player>) {
        self.open_game(host, joiner).await;
        update_player_game_state(&self.state, PlayerGameState::Launching, host)
            .await
            .expect("host launches");
    }

    async fn open_game(&self, host: &Arc<Player>, joiner: &Arc<Player>) {
        self.try_open_game(host, joiner).await.expect("game opens");
    }

    async fn try_open_game(
        &self,
        host: &Arc<Player>,
        joiner: &Arc<Player>,
    ) -> Result<(), RequestError> {
        create_game(
            &self.state,
            "M".to_string(),
            "faf",
            "SCMP_001",
            None,
            GameVisibility::Public,
            None,
            None,
            host,
            LobbyMode::Default,
            None,
        )
        .await?;
        update_player_game_state(&self.state, PlayerGameState::Lobby, host).await?;

        let game_id = host.current_game().expect("host is in its game");
        join_game(&self.state, game_id, None, joiner).await?;
        update_player_game_state(&self.state, PlayerGameState::Lobby, joiner).await?;

        self.assign_default_slots(host, joiner).await;
        Ok(())
    }

    /// Host on army 0 / team 2, joiner on army 1 / team 3.
    pub async fn assign_default_slots(&self, host: &Arc<Player>, joiner: &Arc<Player>) {
        for (target, army, team, spot) in [(host, 0, 2, 1), (joiner, 1, 3, 2)] {
            for (key, value) in [
                (options::ARMY, json!(army)),
                (options::TEAM, json!(team)),
                (options::START_SPOT, json!(spot)),
                (options::FACTION, json!(1)),
                (options::COLOR, json!(spot)),
            ] {
                update_player_option(&self.state, host, target.id(), key, value)
                    .await
                    .expect("host assigns slots");
            }
        }
    }
}
