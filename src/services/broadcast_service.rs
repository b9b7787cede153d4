//! Debounced fan-out of game snapshots.
//!
//! Every state-affecting mutation marks its game dirty. Marks for the same
//! game id arriving in quick succession are coalesced into a single
//! snapshot broadcast, last write wins. A mark with zero delays flushes
//! immediately, which the state machines use for transition announcements.

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::trace;

use crate::dto::game::GameInfo;
use crate::services::client_service::ClientService;
use crate::state::game::GameId;

/// Handle to the broadcast task. Cheap to use from any context; marking is
/// synchronous and never blocks.
pub struct Broadcaster {
    tx: mpsc::UnboundedSender<DirtyMark>,
}

struct DirtyMark {
    info: GameInfo,
    min_delay: Duration,
    max_delay: Duration,
}

struct PendingFlush {
    info: GameInfo,
    /// When the entry flushes unless another mark extends it.
    flush_at: Instant,
    /// Hard deadline; further marks cannot push the flush past this.
    deadline: Instant,
}

impl Broadcaster {
    /// Spawn the coalescing task and return its handle.
    pub(crate) fn spawn(client_service: Arc<dyn ClientService>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(rx, client_service));
        Self { tx }
    }

    /// Record a dirty mark for the game captured in `info`.
    pub(crate) fn mark_dirty(&self, info: GameInfo, min_delay: Duration, max_delay: Duration) {
        let _ = self.tx.send(DirtyMark {
            info,
            min_delay,
            max_delay,
        });
    }
}

async fn run(mut rx: mpsc::UnboundedReceiver<DirtyMark>, client_service: Arc<dyn ClientService>) {
    let mut pending: IndexMap<GameId, PendingFlush> = IndexMap::new();

    loop {
        let next_flush = pending.values().map(|entry| entry.flush_at).min();

        tokio::select! {
            mark = rx.recv() => match mark {
                Some(mark) => absorb(&mut pending, mark),
                None => break,
            },
            _ = sleep_until(next_flush.unwrap_or_else(Instant::now)), if next_flush.is_some() => {}
        }

        flush_due(&mut pending, client_service.as_ref());
    }

    // Engine shutting down: flush whatever is still pending.
    for (_, entry) in pending {
        client_service.broadcast_game_info(entry.info);
    }
}

fn absorb(pending: &mut IndexMap<GameId, PendingFlush>, mark: DirtyMark) {
    let now = Instant::now();
    let game_id = mark.info.id;

    match pending.entry(game_id) {
        indexmap::map::Entry::Occupied(mut entry) => {
            let slot = entry.get_mut();
            slot.info = mark.info;
            slot.flush_at = (now + mark.min_delay).min(slot.deadline);
        }
        indexmap::map::Entry::Vacant(slot) => {
            slot.insert(PendingFlush {
                info: mark.info,
                flush_at: now + mark.min_delay,
                deadline: now + mark.max_delay,
            });
        }
    }
    trace!(game_id, "game marked dirty");
}

fn flush_due(pending: &mut IndexMap<GameId, PendingFlush>, client_service: &dyn ClientService) {
    let now = Instant::now();
    pending.retain(|game_id, entry| {
        if entry.flush_at > now {
            return true;
        }
        trace!(game_id, "flushing game snapshot");
        client_service.broadcast_game_info(entry.info.clone());
        false
    });
}
