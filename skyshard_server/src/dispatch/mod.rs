//! Component update dispatcher.
//!
//! An inbound update goes through four gates, in order:
//! 1. the component id must resolve to a known kind,
//! 2. the kind must have a registered handler,
//! 3. the sending peer must hold authority over that component,
//! 4. the payload must decode into the kind's update shape.
//!
//! A rejected update is logged and dropped. An accepted one is merged into
//! the authoritative snapshot, then its handler decides which [`Effect`]s to
//! emit. Effects are executed after every store borrow is released.

pub mod handlers;
pub mod interest;
pub mod inventory;

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use serde_json::Value;
use skyshard_shared::entity::{AuthorityStore, EntityId};
use skyshard_shared::items::ItemCatalog;
use skyshard_shared::math::Vec3;
use skyshard_shared::net::{decode_op, ComponentPayload, ComponentUpdateOp, PeerId};
use skyshard_shared::schema::{ComponentId, ComponentKind, ComponentUpdate};
use tracing::{error, warn};

use crate::context::ServerContext;
use crate::replication::ReplicationRegistry;
use crate::spawner::{self, ResyncLimiter, SpawnedSets};

/// Closed set of per-kind behaviours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    /// Merge then echo the client's update unchanged.
    Passthrough,
    Transform,
    CharacterControls,
    RespawnClient,
    InventoryModification,
}

/// Outcome of a handler, executed by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// One component update op carrying these payloads, in order.
    Update(Vec<(ComponentId, Value)>),
    /// Authority change over components of the updated entity.
    Authority {
        components: Vec<ComponentId>,
        authoritative: bool,
    },
    /// Restart the spawn stream of the updated entity around a position.
    Resync { position: Vec3 },
}

/// Why an update was dropped.
#[derive(Debug)]
pub enum Rejected {
    UnknownKind(ComponentId),
    NoHandler(ComponentKind),
    NotAuthoritative(ComponentKind),
    Malformed(anyhow::Error),
}

impl fmt::Display for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejected::UnknownKind(id) => write!(f, "unknown component id {id}"),
            Rejected::NoHandler(kind) => write!(f, "no handler registered for {kind}"),
            Rejected::NotAuthoritative(kind) => write!(f, "peer is not authoritative over {kind}"),
            Rejected::Malformed(e) => write!(f, "malformed payload: {e:#}"),
        }
    }
}

/// State a handler may read and write.
pub struct HandlerContext<'a> {
    pub peer: PeerId,
    pub entity: EntityId,
    pub store: &'a mut AuthorityStore,
    pub spawned: &'a SpawnedSets,
    pub registry: &'a ReplicationRegistry,
    pub items: &'a ItemCatalog,
    pub resync: &'a mut ResyncLimiter,
}

pub struct Dispatcher {
    handlers: HashMap<ComponentKind, Handler>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let handlers = HashMap::from([
            (ComponentKind::ClientAuthoritativePlayerState, Handler::Passthrough),
            (ComponentKind::RopeControlPoints, Handler::Passthrough),
            (ComponentKind::LogoutState, Handler::Passthrough),
            (ComponentKind::TransformState, Handler::Transform),
            (ComponentKind::CharacterControlsData, Handler::CharacterControls),
            (ComponentKind::RespawnClientState, Handler::RespawnClient),
            (ComponentKind::InventoryModificationState, Handler::InventoryModification),
        ]);
        Self { handlers }
    }

    pub fn handler_for(&self, kind: ComponentKind) -> Option<Handler> {
        self.handlers.get(&kind).copied()
    }

    /// Decodes a component update op and dispatches each of its updates.
    pub fn handle_update_op(&self, ctx: &Rc<ServerContext>, peer: PeerId, payload: &[u8]) {
        let op: ComponentUpdateOp = match decode_op(payload) {
            Ok(op) => op,
            Err(e) => {
                error!(
                    %peer,
                    len = payload.len(),
                    error = ?e,
                    "Dropping malformed component update"
                );
                return;
            }
        };
        if op.updates.is_empty() {
            warn!(%peer, entity = %op.entity_id, "Dropping empty component update");
            return;
        }

        for update in &op.updates {
            match self.dispatch(ctx, peer, op.entity_id, update.component_id, &update.payload) {
                Ok(effects) => execute(ctx, peer, op.entity_id, effects),
                Err(Rejected::Malformed(e)) => {
                    error!(
                        %peer,
                        entity = %op.entity_id,
                        component = %update.component_id,
                        error = ?e,
                        "Dropping malformed component payload"
                    );
                }
                Err(rejected) => {
                    warn!(
                        %peer,
                        entity = %op.entity_id,
                        component = %update.component_id,
                        reason = %rejected,
                        "Update rejected"
                    );
                }
            }
        }
    }

    /// Runs one update through the gates and its handler.
    pub fn dispatch(
        &self,
        ctx: &ServerContext,
        peer: PeerId,
        entity: EntityId,
        component_id: ComponentId,
        payload: &Value,
    ) -> Result<Vec<Effect>, Rejected> {
        let kind = ComponentKind::from_id(component_id).ok_or(Rejected::UnknownKind(component_id))?;
        let handler = self.handler_for(kind).ok_or(Rejected::NoHandler(kind))?;

        let mut store = ctx.store.borrow_mut();
        if !store.has_authority(peer, entity, component_id) {
            return Err(Rejected::NotAuthoritative(kind));
        }
        let update = ComponentUpdate::decode(kind, payload).map_err(Rejected::Malformed)?;

        let mut snapshot = store.get_or_default(entity, kind);
        snapshot.apply(&update).map_err(Rejected::Malformed)?;
        store.set_component(entity, kind, snapshot);

        let spawned = ctx.spawned.borrow();
        let mut resync = ctx.resync.borrow_mut();
        let mut hctx = HandlerContext {
            peer,
            entity,
            store: &mut *store,
            spawned: &*spawned,
            registry: &ctx.registry,
            items: &ctx.items,
            resync: &mut *resync,
        };
        Ok(handler.apply(&mut hctx, kind, &update, payload))
    }
}

/// Executes handler effects for `entity` on behalf of `peer`.
pub fn execute(ctx: &Rc<ServerContext>, peer: PeerId, entity: EntityId, effects: Vec<Effect>) {
    for effect in effects {
        match effect {
            Effect::Update(updates) => {
                let updates = updates
                    .into_iter()
                    .map(|(component_id, payload)| ComponentPayload {
                        component_id,
                        payload,
                    })
                    .collect();
                if !ctx.ops.component_update(peer, entity, updates) {
                    warn!(%peer, %entity, "Failed to send component update");
                }
            }
            Effect::Authority {
                components,
                authoritative,
            } => {
                ctx.set_authority(peer, entity, &components, authoritative);
            }
            Effect::Resync { position } => {
                let interval = Duration::from_millis(ctx.cfg.resync_spawn_interval_ms);
                spawner::spawn_nearby(ctx, peer, entity, position, interval);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use skyshard_shared::config::ServerConfig;
    use skyshard_shared::net::{encode_op, AuthorityChangeOp, Channel};
    use skyshard_shared::schema::{ComponentData, InventoryItem, InventoryState};
    use skyshard_shared::transport::LoopbackTransport;
    use skyshard_shared::world::{Island, WorldMap};

    const PEER: PeerId = PeerId(1);

    fn world(islands: &[(f32, f32)]) -> WorldMap {
        WorldMap {
            islands: islands
                .iter()
                .map(|&(x, z)| Island {
                    x,
                    y: 0.0,
                    z,
                    island: "949069116.json".into(),
                })
                .collect(),
            ..Default::default()
        }
    }

    fn context(world: &WorldMap) -> (Rc<ServerContext>, Rc<LoopbackTransport>) {
        let transport = Rc::new(LoopbackTransport::new());
        let cfg = ServerConfig {
            weather_seed: Some(1),
            ..Default::default()
        };
        let ctx = ServerContext::new(cfg, world, ItemCatalog::default(), transport.clone());
        (ctx, transport)
    }

    fn player(ctx: &ServerContext, ids: &[ComponentId]) -> EntityId {
        let mut store = ctx.store.borrow_mut();
        let entity = store.allocate_entity_id();
        store.grant(PEER, entity, ids);
        entity
    }

    #[test]
    fn gates_reject_in_order() {
        let (ctx, _) = context(&WorldMap::default());
        let d = Dispatcher::new();
        let e = player(&ctx, &[]);

        let r = d.dispatch(&ctx, PEER, e, ComponentId(4242), &json!({}));
        assert!(matches!(r, Err(Rejected::UnknownKind(ComponentId(4242)))));

        let r = d.dispatch(&ctx, PEER, e, ComponentKind::InventoryState.id(), &json!({}));
        assert!(matches!(r, Err(Rejected::NoHandler(ComponentKind::InventoryState))));

        let transform = ComponentKind::TransformState.id();
        let r = d.dispatch(&ctx, PEER, e, transform, &json!({ "localRotation": 1 }));
        assert!(matches!(r, Err(Rejected::NotAuthoritative(_))));

        ctx.store.borrow_mut().grant(PEER, e, &[transform]);
        let r = d.dispatch(&ctx, PEER, e, transform, &json!(12));
        assert!(matches!(r, Err(Rejected::Malformed(_))));
        assert!(ctx.store.borrow().transform(e).is_none());
    }

    #[test]
    fn other_peers_cannot_write() {
        let (ctx, _) = context(&WorldMap::default());
        let logout = ComponentKind::LogoutState.id();
        let e = player(&ctx, &[logout]);
        let r = Dispatcher::new().dispatch(&ctx, PeerId(2), e, logout, &json!({}));
        assert!(matches!(r, Err(Rejected::NotAuthoritative(ComponentKind::LogoutState))));
    }

    #[test]
    fn passthrough_merges_and_echoes() {
        let (ctx, _) = context(&WorldMap::default());
        let logout = ComponentKind::LogoutState.id();
        let e = player(&ctx, &[logout]);
        let payload = json!({ "loggingOut": true });

        let effects = Dispatcher::new().dispatch(&ctx, PEER, e, logout, &payload).unwrap();
        assert_eq!(effects, vec![Effect::Update(vec![(logout, payload.clone())])]);
        let stored = ctx.store.borrow().get_or_default(e, ComponentKind::LogoutState);
        assert_eq!(stored.encode(), payload);
    }

    #[test]
    fn respawn_parents_player_to_nearest_spawned_island() {
        let (ctx, _) = context(&world(&[(100.0, 0.0), (2000.0, 0.0), (50.0, 0.0)]));
        let controls = ComponentKind::CharacterControlsData.id();
        let e = player(&ctx, &[controls]);
        let spawned_far = EntityId(2);
        let spawned_near = EntityId(1);
        ctx.spawned.borrow_mut().insert(e, spawned_far);
        ctx.spawned.borrow_mut().insert(e, spawned_near);

        let effects = Dispatcher::new()
            .dispatch(&ctx, PEER, e, controls, &json!({ "respawn": [{}] }))
            .unwrap();
        let transform = ComponentKind::TransformState.id();
        assert_eq!(
            effects,
            vec![
                Effect::Authority {
                    components: vec![transform],
                    authoritative: false
                },
                Effect::Update(vec![(
                    transform,
                    json!({
                        "localPosition": { "fixedPointValues": [0, 0, 0] },
                        "parent": { "entityId": 1, "name": "Island" }
                    })
                )]),
            ]
        );
        let store = ctx.store.borrow();
        let parent = store.transform(e).and_then(|t| t.parent.clone()).unwrap();
        assert_eq!(parent.entity_id, spawned_near);
    }

    #[test]
    fn respawn_without_spawned_island_is_dropped() {
        let (ctx, _) = context(&world(&[(100.0, 0.0)]));
        let controls = ComponentKind::CharacterControlsData.id();
        let e = player(&ctx, &[controls]);
        let effects = Dispatcher::new()
            .dispatch(&ctx, PEER, e, controls, &json!({ "respawn": [{}], "sprinting": true }))
            .unwrap();
        assert!(effects.is_empty());
        let stored = ctx.store.borrow().get_or_default(e, ComponentKind::CharacterControlsData);
        assert_eq!(stored.encode()["sprinting"], json!(true));
    }

    #[tokio::test(start_paused = true)]
    async fn position_updates_resync_once_per_cooldown() {
        let (ctx, _) = context(&WorldMap::default());
        let transform = ComponentKind::TransformState.id();
        let e = player(&ctx, &[transform]);
        let d = Dispatcher::new();
        let moved = json!({ "localPosition": { "fixedPointValues": [4096, 0, 8192] } });

        let effects = d.dispatch(&ctx, PEER, e, transform, &moved).unwrap();
        assert_eq!(
            effects,
            vec![Effect::Resync {
                position: Vec3::new(1.0, 0.0, 2.0)
            }]
        );
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(d.dispatch(&ctx, PEER, e, transform, &moved).unwrap().is_empty());
        assert!(d
            .dispatch(&ctx, PEER, e, transform, &json!({ "localRotation": 3 }))
            .unwrap()
            .is_empty());
        assert_eq!(ctx.store.borrow().transform(e).unwrap().local_rotation, 3);
    }

    #[test]
    fn equip_sends_batch_then_echo() {
        let (ctx, _) = context(&WorldMap::default());
        let modification = ComponentKind::InventoryModificationState.id();
        let e = player(&ctx, &[modification]);
        ctx.store.borrow_mut().set_component(
            e,
            ComponentKind::InventoryState,
            ComponentData::Inventory(InventoryState {
                inventory_list: vec![InventoryItem {
                    item_id: 7,
                    item_type_id: "hat".into(),
                    slot_type: "None".into(),
                    ..Default::default()
                }],
                lock_box_items: Vec::new(),
            }),
        );

        let effects = Dispatcher::new()
            .dispatch(
                &ctx,
                PEER,
                e,
                modification,
                &json!({
                    "equipWearable": [{ "itemId": 7, "isLockboxItem": false }],
                    "craftItem": [{ "amount": 2 }],
                }),
            )
            .unwrap();
        assert_eq!(effects.len(), 2);
        match &effects[0] {
            Effect::Update(batch) => {
                let ids: Vec<u32> = batch.iter().map(|(id, _)| id.0).collect();
                assert_eq!(ids, vec![1280, 1081, 1088]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(effects[1], Effect::Update(vec![(modification, json!({}))]));
    }

    #[test]
    fn respawn_done_regrants_transform_authority() -> anyhow::Result<()> {
        let (ctx, transport) = context(&WorldMap::default());
        let respawn = ComponentKind::RespawnClientState.id();
        let e = player(&ctx, &[respawn]);

        let op = ComponentUpdateOp {
            entity_id: e,
            updates: vec![ComponentPayload {
                component_id: respawn,
                payload: json!({ "respawnDone": [{ "targetEntityId": e.0 }] }),
            }],
        };
        Dispatcher::new().handle_update_op(&ctx, PEER, &encode_op(&op)?);

        let transform = ComponentKind::TransformState.id();
        assert!(ctx.store.borrow().has_authority(PEER, e, transform));
        let sent = transport.sent_on(Channel::AuthorityChange);
        assert_eq!(sent.len(), 1);
        let change: AuthorityChangeOp = decode_op(&sent[0].payload)?;
        assert_eq!(change.component_ids, vec![transform]);
        assert!(change.authoritative);
        Ok(())
    }

    #[test]
    fn malformed_op_is_dropped() -> anyhow::Result<()> {
        let (ctx, transport) = context(&WorldMap::default());
        let logout = ComponentKind::LogoutState.id();
        let e = player(&ctx, &[logout]);
        let d = Dispatcher::new();

        let op = ComponentUpdateOp {
            entity_id: e,
            updates: vec![ComponentPayload {
                component_id: logout,
                payload: json!({ "loggingOut": true }),
            }],
        };
        let bytes = encode_op(&op)?;
        d.handle_update_op(&ctx, PEER, &bytes[..bytes.len() / 2]);
        assert!(transport.sent().is_empty());

        d.handle_update_op(&ctx, PEER, &bytes);
        assert_eq!(transport.sent_on(Channel::ComponentUpdate).len(), 1);
        Ok(())
    }
}
