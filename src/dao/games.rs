use std::collections::HashMap;
use std::sync::Mutex;

use futures::future::BoxFuture;

use crate::dao::models::GameEntity;
use crate::dao::storage::StorageResult;
use crate::state::game::{GameId, Validity};

/// Abstraction over the durable game store.
///
/// Ids are allocated by the engine, not the database, so inserting and
/// updating are distinct operations: `persist` writes a launching game for
/// the first time, `save` updates it after end processing.
pub trait GameRepository: Send + Sync {
    /// Insert a newly launched game. The id is already assigned.
    fn persist(&self, game: GameEntity) -> BoxFuture<'_, StorageResult<()>>;

    /// Update a previously persisted game.
    fn save(&self, game: GameEntity) -> BoxFuture<'_, StorageResult<()>>;

    /// Highest game id ever persisted, used to seed the id counter.
    fn find_max_id(&self) -> BoxFuture<'_, StorageResult<Option<GameId>>>;

    /// Mark every game without an end time with the given validity. Called
    /// on startup to invalidate games interrupted by a crash.
    fn update_unfinished_games_validity(
        &self,
        validity: Validity,
    ) -> BoxFuture<'_, StorageResult<()>>;
}

/// Map-backed repository used by tests and single-node embeddings.
#[derive(Debug, Default)]
pub struct InMemoryGameRepository {
    games: Mutex<HashMap<GameId, GameEntity>>,
}

impl InMemoryGameRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read back a stored entity, mainly for assertions.
    pub fn get(&self, id: GameId) -> Option<GameEntity> {
        self.games.lock().expect("games lock poisoned").get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.games.lock().expect("games lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.games.lock().expect("games lock poisoned").is_empty()
    }
}

impl GameRepository for InMemoryGameRepository {
    fn persist(&self, game: GameEntity) -> BoxFuture<'_, StorageResult<()>> {
        Box::pin(async move {
            self.games
                .lock()
                .expect("games lock poisoned")
                .insert(game.id, game);
            Ok(())
        })
    }

    fn save(&self, game: GameEntity) -> BoxFuture<'_, StorageResult<()>> {
        self.persist(game)
    }

    fn find_max_id(&self) -> BoxFuture<'_, StorageResult<Option<GameId>>> {
        Box::pin(async move {
            Ok(self
                .games
                .lock()
                .expect("games lock poisoned")
                .keys()
                .max()
                .copied())
        })
    }

    fn update_unfinished_games_validity(
        &self,
        validity: Validity,
    ) -> BoxFuture<'_, StorageResult<()>> {
        Box::pin(async move {
            for game in self
                .games
                .lock()
                .expect("games lock poisoned")
                .values_mut()
                .filter(|game| game.end_time.is_none())
            {
                game.validity = validity;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;
    use crate::state::game::{GameVisibility, VictoryCondition};

    fn entity(id: GameId, ended: bool) -> GameEntity {
        GameEntity {
            id,
            title: format!("game {id}"),
            host_id: 1,
            featured_mod: "faf".to_string(),
            map_id: None,
            map_folder_name: String::new(),
            victory_condition: VictoryCondition::Demoralization,
            validity: Validity::Valid,
            visibility: GameVisibility::Public,
            password_protected: false,
            start_time: Some(SystemTime::now()),
            end_time: ended.then(SystemTime::now),
            mutually_agreed_draw: false,
            sim_mods: Vec::new(),
            player_stats: Vec::new(),
        }
    }

    #[tokio::test]
    async fn max_id_reflects_persisted_games() {
        let repository = InMemoryGameRepository::new();
        assert_eq!(repository.find_max_id().await.unwrap(), None);

        repository.persist(entity(3, true)).await.unwrap();
        repository.persist(entity(11, false)).await.unwrap();
        assert_eq!(repository.find_max_id().await.unwrap(), Some(11));
    }

    #[tokio::test]
    async fn unfinished_games_are_invalidated_in_bulk() {
        let repository = InMemoryGameRepository::new();
        repository.persist(entity(1, true)).await.unwrap();
        repository.persist(entity(2, false)).await.unwrap();

        repository
            .update_unfinished_games_validity(Validity::UnknownResult)
            .await
            .unwrap();

        assert_eq!(repository.get(1).unwrap().validity, Validity::Valid);
        assert_eq!(repository.get(2).unwrap().validity, Validity::UnknownResult);
    }
}
