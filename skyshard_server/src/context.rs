//! Process-wide server state.
//!
//! One `ServerContext` is built at startup and shared by reference between
//! the main loop and spawner tasks. Everything runs on one thread, so the
//! mutable parts sit behind `RefCell`s. Borrows are never held across an
//! await point.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use skyshard_shared::config::ServerConfig;
use skyshard_shared::entity::{AuthorityStore, EntityId};
use skyshard_shared::items::ItemCatalog;
use skyshard_shared::net::PeerId;
use skyshard_shared::schema::ComponentId;
use skyshard_shared::transport::Transport;
use skyshard_shared::weather::WeatherField;
use skyshard_shared::world::WorldMap;
use tracing::{info, warn};

use crate::ops::OpSender;
use crate::replication::ReplicationRegistry;
use crate::spawner::{ResyncLimiter, SpawnTasks, SpawnedSets};

pub struct ServerContext {
    pub cfg: ServerConfig,
    pub registry: ReplicationRegistry,
    pub items: ItemCatalog,
    pub weather: WeatherField,
    pub store: RefCell<AuthorityStore>,
    /// Keyed by player entity.
    pub spawned: RefCell<SpawnedSets>,
    pub spawn_tasks: RefCell<SpawnTasks>,
    pub resync: RefCell<ResyncLimiter>,
    pub ops: OpSender,
}

impl ServerContext {
    pub fn new(
        cfg: ServerConfig,
        world: &WorldMap,
        items: ItemCatalog,
        transport: Rc<dyn Transport>,
    ) -> Rc<Self> {
        let weather = WeatherField::generate(world.edge_length(), cfg.weather_seed);
        let mut store = AuthorityStore::new();
        let registry = ReplicationRegistry::build(world, &weather, &mut store, &cfg);
        info!(
            entities = registry.len(),
            weather_cells = weather.cells_per_axis() * weather.cells_per_axis(),
            items = items.len(),
            "Replication registry built"
        );

        let resync = ResyncLimiter::new(Duration::from_secs(cfg.resync_cooldown_secs));
        Rc::new(Self {
            cfg,
            registry,
            items,
            weather,
            store: RefCell::new(store),
            spawned: RefCell::new(SpawnedSets::default()),
            spawn_tasks: RefCell::new(SpawnTasks::default()),
            resync: RefCell::new(resync),
            ops: OpSender::new(transport),
        })
    }

    /// Announces an authority change and records it.
    ///
    /// Revocations always apply; grants only once the announcement was sent.
    pub fn set_authority(
        &self,
        peer: PeerId,
        entity: EntityId,
        ids: &[ComponentId],
        authoritative: bool,
    ) -> bool {
        let sent = self.ops.authority_change(peer, entity, ids, authoritative);
        let mut store = self.store.borrow_mut();
        if !authoritative {
            store.revoke(peer, entity, ids);
        } else if sent {
            store.grant(peer, entity, ids);
        }
        if !sent {
            warn!(%peer, %entity, authoritative, "Failed to send authority change");
        }
        sent
    }
}
