//! Army result intake and multi-reporter reconciliation.
//!
//! Every participant reports scores and outcomes for every army it knows
//! about, and reporters disagree: clients crash, lag behind or lie. The
//! engine does not require unanimity, it elects the result reported most
//! often per army, counting only complete reports from players who are
//! still connected when the game ends.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::RequestResult;
use crate::services::game_service::current_game_of;
use crate::state::game::{ArmyResult, Game, Outcome};
use crate::state::players::{Player, PlayerId};
use crate::state::SharedState;

/// Record a score-only report for an army. The reporter's previously
/// reported outcome, if any, is preserved.
pub async fn report_army_score(
    state: &SharedState,
    reporter: &Arc<Player>,
    army_id: u32,
    score: i32,
) -> RequestResult<()> {
    let Some(handle) = current_game_of(state, reporter) else {
        warn!(player = %reporter.login(), "army score reported by player without game");
        return Ok(());
    };

    let mut game = handle.lock().await;
    if !game.has_army(army_id) {
        warn!(
            game_id = game.id,
            player = %reporter.login(),
            army_id,
            score,
            "score reported for unknown army"
        );
        return Ok(());
    }

    debug!(game_id = game.id, player = %reporter.login(), army_id, score, "army score reported");
    let reports = game.reported_army_results.entry(reporter.id()).or_default();
    let outcome = reports
        .get(&army_id)
        .map(|result| result.outcome)
        .unwrap_or(Outcome::Unknown);
    reports.insert(army_id, ArmyResult::new(army_id, outcome, score));
    Ok(())
}

/// Record a complete outcome report for an army, replacing whatever the
/// reporter said before.
pub async fn report_army_outcome(
    state: &SharedState,
    reporter: &Arc<Player>,
    army_id: u32,
    outcome: Outcome,
    score: i32,
) -> RequestResult<()> {
    let Some(handle) = current_game_of(state, reporter) else {
        warn!(player = %reporter.login(), "army outcome reported by player without game");
        return Ok(());
    };

    let mut game = handle.lock().await;
    if !game.has_army(army_id) {
        warn!(
            game_id = game.id,
            player = %reporter.login(),
            army_id,
            ?outcome,
            "outcome reported for unknown army"
        );
        return Ok(());
    }

    debug!(
        game_id = game.id,
        player = %reporter.login(),
        army_id,
        ?outcome,
        score,
        "army outcome reported"
    );
    game.reported_army_results
        .entry(reporter.id())
        .or_default()
        .insert(army_id, ArmyResult::new(army_id, outcome, score));
    Ok(())
}

/// Replace the game's raw army statistics blob. Last reporter wins.
pub async fn report_army_statistics(
    state: &SharedState,
    reporter: &Arc<Player>,
    army_statistics: Vec<Value>,
) -> RequestResult<()> {
    let Some(handle) = current_game_of(state, reporter) else {
        warn!(player = %reporter.login(), "army statistics reported by player without game");
        return Ok(());
    };

    let mut game = handle.lock().await;
    game.army_statistics = army_statistics;
    Ok(())
}

/// Elect, per army, the result reported most often.
///
/// Only complete reports (outcome and score) from still-connected players
/// are counted. Ties break in insertion order: the first result to reach
/// the winning count keeps it.
pub(crate) fn most_reported_army_results(game: &Game) -> IndexMap<u32, ArmyResult> {
    let mut occurrences: IndexMap<ArmyResult, usize> = IndexMap::new();
    for (reporter_id, reports) in &game.reported_army_results {
        if !game.connected_players.contains_key(reporter_id) {
            continue;
        }
        for result in reports.values() {
            if !result.is_complete() {
                continue;
            }
            *occurrences.entry(*result).or_insert(0) += 1;
        }
    }

    let mut elected: IndexMap<u32, (ArmyResult, usize)> = IndexMap::new();
    for (result, count) in occurrences {
        match elected.get(&result.army_id) {
            Some((_, best)) if *best >= count => {}
            _ => {
                elected.insert(result.army_id, (result, count));
            }
        }
    }

    elected
        .into_iter()
        .map(|(army_id, (result, _))| (army_id, result))
        .collect()
}

/// Attribute the elected army results to players through their `Army`
/// option. Players without an army are omitted.
pub(crate) fn map_army_results_to_players(
    game: &Game,
    army_results: &IndexMap<u32, ArmyResult>,
) -> IndexMap<PlayerId, ArmyResult> {
    let mut player_results = IndexMap::new();
    for stats in game.player_stats.values() {
        let Some(army_id) = game.player_army(stats.player_id) else {
            continue;
        };
        if let Some(result) = army_results.get(&army_id) {
            player_results.insert(stats.player_id, *result);
        }
    }
    player_results
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::state::game::{options, GamePlayerStats};
    use crate::testing::{featured_mod, player};

    fn game_with_armies(armies: &[(PlayerId, u32)]) -> Game {
        let mut game = Game::new(1, player(1, "host"), featured_mod("faf", true));
        for (player_id, army_id) in armies {
            let reporter = player(*player_id, format!("p{player_id}"));
            game.connected_players.insert(*player_id, reporter);
            game.player_options
                .entry(*player_id)
                .or_default()
                .insert(options::ARMY.to_string(), json!(army_id));
            game.player_stats
                .insert(*player_id, GamePlayerStats::new(*player_id));
        }
        game
    }

    fn report(game: &mut Game, reporter: PlayerId, army_id: u32, outcome: Outcome, score: i32) {
        game.reported_army_results
            .entry(reporter)
            .or_default()
            .insert(army_id, ArmyResult::new(army_id, outcome, score));
    }

    #[test]
    fn majority_report_wins_per_army() {
        // Three reporters for army 7: two say victory, one says defeat.
        let mut game = game_with_armies(&[(1, 7), (2, 8), (3, 9)]);
        report(&mut game, 1, 7, Outcome::Victory, 10);
        report(&mut game, 2, 7, Outcome::Victory, 10);
        report(&mut game, 3, 7, Outcome::Defeat, 0);

        let elected = most_reported_army_results(&game);
        assert_eq!(elected.get(&7), Some(&ArmyResult::new(7, Outcome::Victory, 10)));
    }

    #[test]
    fn disconnected_reporters_do_not_count() {
        let mut game = game_with_armies(&[(1, 7), (2, 8), (3, 9)]);
        report(&mut game, 1, 7, Outcome::Victory, 10);
        report(&mut game, 2, 7, Outcome::Defeat, 0);
        report(&mut game, 3, 7, Outcome::Defeat, 0);

        // The two defeat reporters drop out before the end.
        game.connected_players.shift_remove(&2);
        game.connected_players.shift_remove(&3);

        let elected = most_reported_army_results(&game);
        assert_eq!(elected.get(&7), Some(&ArmyResult::new(7, Outcome::Victory, 10)));
    }

    #[test]
    fn ties_break_in_insertion_order() {
        let mut game = game_with_armies(&[(1, 7), (2, 8)]);
        report(&mut game, 1, 7, Outcome::Victory, 10);
        report(&mut game, 2, 7, Outcome::Defeat, 0);

        let elected = most_reported_army_results(&game);
        // One vote each; the first reported result sticks.
        assert_eq!(elected.get(&7), Some(&ArmyResult::new(7, Outcome::Victory, 10)));
    }

    #[test]
    fn score_only_reports_do_not_vote() {
        let mut game = game_with_armies(&[(1, 7), (2, 8)]);
        report(&mut game, 1, 7, Outcome::Unknown, 99);
        report(&mut game, 2, 7, Outcome::Defeat, 0);

        let elected = most_reported_army_results(&game);
        assert_eq!(elected.get(&7), Some(&ArmyResult::new(7, Outcome::Defeat, 0)));
    }

    #[test]
    fn results_map_to_players_through_their_army_option() {
        let mut game = game_with_armies(&[(1, 7), (2, 8)]);
        // Player 3 has stats but no army option, e.g. an observer.
        game.player_stats.insert(3, GamePlayerStats::new(3));
        report(&mut game, 1, 7, Outcome::Victory, 10);
        report(&mut game, 1, 8, Outcome::Defeat, 0);
        report(&mut game, 2, 7, Outcome::Victory, 10);
        report(&mut game, 2, 8, Outcome::Defeat, 0);

        let elected = most_reported_army_results(&game);
        let by_player = map_army_results_to_players(&game, &elected);

        assert_eq!(by_player.get(&1).unwrap().outcome, Outcome::Victory);
        assert_eq!(by_player.get(&2).unwrap().outcome, Outcome::Defeat);
        assert!(!by_player.contains_key(&3));
    }

    #[tokio::test]
    async fn unknown_armies_are_dropped() {
        let h = crate::testing::harness().await;
        let (host, _joiner) = h.playing_two_player_game().await;

        report_army_score(&h.state, &host, 42, 10).await.unwrap();
        report_army_outcome(&h.state, &host, 42, Outcome::Victory, 10)
            .await
            .unwrap();

        let handle = h.state.games().find(1).unwrap();
        let game = handle.lock().await;
        assert!(game.reported_army_results.is_empty());
    }

    #[tokio::test]
    async fn score_reports_preserve_previous_outcomes() {
        let h = crate::testing::harness().await;
        let (host, _joiner) = h.playing_two_player_game().await;

        // Armies 0 and 1 are assigned by the harness.
        report_army_outcome(&h.state, &host, 0, Outcome::Victory, 5)
            .await
            .unwrap();
        report_army_score(&h.state, &host, 0, 12).await.unwrap();
        report_army_score(&h.state, &host, 1, 3).await.unwrap();

        let handle = h.state.games().find(1).unwrap();
        let game = handle.lock().await;
        let reports = game.reported_army_results.get(&host.id()).unwrap();
        assert_eq!(reports.get(&0), Some(&ArmyResult::new(0, Outcome::Victory, 12)));
        assert_eq!(reports.get(&1), Some(&ArmyResult::new(1, Outcome::Unknown, 3)));
    }
}
