//! Incremental spawner.
//!
//! Streams nearby static entities to a player, nearest first, one per pacing
//! interval. At most one stream runs per player entity; starting a new one
//! cancels the previous. Cancellation is checked before every entity and
//! interrupts the pacing sleep.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::Duration;

use skyshard_shared::entity::EntityId;
use skyshard_shared::math::Vec3;
use skyshard_shared::net::{PeerId, PLACEHOLDER};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::context::ServerContext;

pub const MIN_SPAWN_INTERVAL: Duration = Duration::from_millis(200);
pub const MAX_SPAWN_INTERVAL: Duration = Duration::from_millis(5000);

pub fn clamp_interval(interval: Duration) -> Duration {
    interval.clamp(MIN_SPAWN_INTERVAL, MAX_SPAWN_INTERVAL)
}

/// Entities already announced, per player entity. Sets only grow.
#[derive(Debug, Default)]
pub struct SpawnedSets {
    by_player: HashMap<EntityId, HashSet<EntityId>>,
}

impl SpawnedSets {
    pub fn get(&self, player: EntityId) -> Option<&HashSet<EntityId>> {
        self.by_player.get(&player)
    }

    pub fn contains(&self, player: EntityId, entity: EntityId) -> bool {
        self.get(player).is_some_and(|s| s.contains(&entity))
    }

    /// Returns `false` if the entity was already recorded.
    pub fn insert(&mut self, player: EntityId, entity: EntityId) -> bool {
        self.by_player.entry(player).or_default().insert(entity)
    }

    pub fn count(&self, player: EntityId) -> usize {
        self.get(player).map_or(0, HashSet::len)
    }
}

struct SpawnHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SpawnHandle {
    fn cancel(self) {
        // The task may already be gone; nothing to signal then.
        let _ = self.cancel.send(true);
    }
}

/// Running spawn streams, keyed by player entity.
#[derive(Default)]
pub struct SpawnTasks {
    tasks: HashMap<EntityId, SpawnHandle>,
    starts: HashMap<EntityId, u64>,
}

impl SpawnTasks {
    fn replace(&mut self, player: EntityId, handle: SpawnHandle) {
        if let Some(old) = self.tasks.insert(player, handle) {
            old.cancel();
        }
        *self.starts.entry(player).or_default() += 1;
    }

    /// Cancels the stream of a player. Returns `true` if one was registered.
    pub fn cancel(&mut self, player: EntityId) -> bool {
        match self.tasks.remove(&player) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, handle) in self.tasks.drain() {
            handle.cancel();
        }
    }

    /// How many streams were ever started for a player.
    pub fn starts(&self, player: EntityId) -> u64 {
        self.starts.get(&player).copied().unwrap_or(0)
    }

    pub fn is_running(&self, player: EntityId) -> bool {
        self.tasks
            .get(&player)
            .is_some_and(|h| !h.task.is_finished())
    }
}

/// Rate limit on movement-triggered restarts, per entity.
#[derive(Debug)]
pub struct ResyncLimiter {
    cooldown: Duration,
    last: HashMap<EntityId, Instant>,
}

impl ResyncLimiter {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last: HashMap::new(),
        }
    }

    /// Records a trigger and returns `true` unless the previous one was less
    /// than the cooldown ago.
    pub fn try_trigger(&mut self, entity: EntityId) -> bool {
        let now = Instant::now();
        match self.last.get(&entity) {
            Some(last) if now.duration_since(*last) < self.cooldown => false,
            _ => {
                self.last.insert(entity, now);
                true
            }
        }
    }
}

/// Starts streaming entities around `origin` to `peer`, replacing any stream
/// already running for `player`.
///
/// Must be called from within a `LocalSet`.
pub fn spawn_nearby(
    ctx: &Rc<ServerContext>,
    peer: PeerId,
    player: EntityId,
    origin: Vec3,
    interval: Duration,
) {
    let interval = clamp_interval(interval);
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let task = tokio::task::spawn_local(stream_entities(
        Rc::clone(ctx),
        peer,
        player,
        origin,
        interval,
        cancel_rx,
    ));
    ctx.spawn_tasks.borrow_mut().replace(
        player,
        SpawnHandle {
            cancel: cancel_tx,
            task,
        },
    );
    info!(%peer, %player, ?origin, ?interval, "Spawn stream started");
}

fn cancelled(cancel: &watch::Receiver<bool>) -> bool {
    *cancel.borrow()
}

async fn stream_entities(
    ctx: Rc<ServerContext>,
    peer: PeerId,
    player: EntityId,
    origin: Vec3,
    interval: Duration,
    mut cancel: watch::Receiver<bool>,
) {
    let candidates = {
        let spawned = ctx.spawned.borrow();
        ctx.registry.nearby_unspawned(origin, spawned.get(player))
    };
    debug!(%peer, %player, candidates = candidates.len(), "Spawn candidates collected");

    let mut sent = 0usize;
    for entity in candidates {
        if cancelled(&cancel) {
            info!(%peer, %player, sent, "Spawn stream cancelled");
            return;
        }
        if ctx.spawned.borrow().contains(player, entity.entity_id) {
            continue;
        }

        {
            let mut store = ctx.store.borrow_mut();
            for (kind, data) in &entity.initial_components {
                store.set_component(entity.entity_id, *kind, data.clone());
            }
        }

        if ctx
            .ops
            .add_entity(peer, entity.entity_id, &entity.prefab, PLACEHOLDER)
        {
            ctx.spawned.borrow_mut().insert(player, entity.entity_id);
            sent += 1;
            debug!(%peer, entity = %entity.entity_id, prefab = %entity.prefab, "Spawned");
        } else {
            warn!(
                %peer,
                entity = %entity.entity_id,
                prefab = %entity.prefab,
                "Failed to announce entity"
            );
        }

        tokio::select! {
            _ = time::sleep(interval) => {}
            _ = cancel.changed() => {
                info!(%peer, %player, sent, "Spawn stream cancelled");
                return;
            }
        }
    }
    info!(%peer, %player, sent, "Spawn stream finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_is_clamped() {
        assert_eq!(clamp_interval(Duration::from_millis(10)), MIN_SPAWN_INTERVAL);
        assert_eq!(clamp_interval(Duration::from_secs(60)), MAX_SPAWN_INTERVAL);
        assert_eq!(
            clamp_interval(Duration::from_millis(1500)),
            Duration::from_millis(1500)
        );
    }

    #[test]
    fn spawned_sets_reject_duplicates() {
        let mut sets = SpawnedSets::default();
        assert!(sets.insert(EntityId(1), EntityId(10)));
        assert!(!sets.insert(EntityId(1), EntityId(10)));
        assert!(sets.insert(EntityId(2), EntityId(10)));
        assert_eq!(sets.count(EntityId(1)), 1);
        assert!(!sets.contains(EntityId(3), EntityId(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn resync_is_rate_limited_per_entity() {
        let mut limiter = ResyncLimiter::new(Duration::from_secs(60));
        assert!(limiter.try_trigger(EntityId(1)));
        time::sleep(Duration::from_secs(10)).await;
        assert!(!limiter.try_trigger(EntityId(1)));
        assert!(limiter.try_trigger(EntityId(2)));
        time::sleep(Duration::from_secs(50)).await;
        assert!(limiter.try_trigger(EntityId(1)));
    }
}
