//! Per-kind handler bodies.

use serde_json::Value;
use skyshard_shared::math::FixedPointVector3;
use skyshard_shared::schema::{
    CharacterControlsUpdate, ComponentData, ComponentKind, ComponentUpdate,
    InventoryModificationUpdate, Parent, RespawnClientUpdate, TransformUpdate,
};
use tracing::{debug, info, warn};

use super::inventory;
use super::{Effect, Handler, HandlerContext};

const TRANSFORM: ComponentKind = ComponentKind::TransformState;

impl Handler {
    /// Emits the effects of an update that has already been merged into the
    /// authoritative snapshot.
    pub fn apply(
        self,
        hctx: &mut HandlerContext<'_>,
        kind: ComponentKind,
        update: &ComponentUpdate,
        raw: &Value,
    ) -> Vec<Effect> {
        match (self, update) {
            (Handler::Passthrough, _) => vec![Effect::Update(vec![(kind.id(), raw.clone())])],
            (Handler::Transform, ComponentUpdate::Transform(u)) => transform(hctx, u),
            (Handler::CharacterControls, ComponentUpdate::CharacterControls(u)) => {
                character_controls(hctx, u)
            }
            (Handler::RespawnClient, ComponentUpdate::RespawnClient(u)) => respawn_client(hctx, u),
            (Handler::InventoryModification, ComponentUpdate::InventoryModification(u)) => {
                inventory_modification(hctx, u)
            }
            (handler, _) => {
                warn!(?handler, %kind, "Update shape does not match handler");
                Vec::new()
            }
        }
    }
}

/// Movement is not echoed; a position may restart world streaming.
fn transform(hctx: &mut HandlerContext<'_>, update: &TransformUpdate) -> Vec<Effect> {
    let Some(pos) = update.local_position else {
        return Vec::new();
    };
    if !hctx.resync.try_trigger(hctx.entity) {
        return Vec::new();
    }
    let position = pos.to_vec3();
    info!(peer = %hctx.peer, entity = %hctx.entity, ?position, "Starting replication resync");
    vec![Effect::Resync { position }]
}

fn character_controls(
    hctx: &mut HandlerContext<'_>,
    update: &CharacterControlsUpdate,
) -> Vec<Effect> {
    let mut effects = Vec::new();
    for _ in &update.respawn {
        info!(peer = %hctx.peer, entity = %hctx.entity, "Respawn requested");
        effects.extend(respawn_at_nearest_island(hctx));
    }
    effects
}

/// Hands transform authority back to the server and parents the player to
/// the nearest island it has seen.
fn respawn_at_nearest_island(hctx: &mut HandlerContext<'_>) -> Vec<Effect> {
    let (spawned_sets, registry) = (hctx.spawned, hctx.registry);
    let Some(spawned) = spawned_sets.get(hctx.entity) else {
        warn!(entity = %hctx.entity, "No spawned entities to respawn at");
        return Vec::new();
    };
    let position = hctx
        .store
        .transform(hctx.entity)
        .map(|t| t.position())
        .unwrap_or_default();
    let Some(island) = registry.nearest_island(position, spawned) else {
        warn!(entity = %hctx.entity, "No spawned island to respawn at");
        return Vec::new();
    };

    let reset = TransformUpdate {
        local_position: Some(FixedPointVector3::ZERO),
        parent: Some(Some(Parent {
            entity_id: island.entity_id,
            name: "Island".to_string(),
        })),
        ..Default::default()
    };
    let reset = ComponentUpdate::Transform(reset);
    let mut snapshot = hctx.store.get_or_default(hctx.entity, TRANSFORM);
    if let Err(e) = snapshot.apply(&reset) {
        warn!(entity = %hctx.entity, error = ?e, "Failed to apply respawn transform");
        return Vec::new();
    }
    hctx.store.set_component(hctx.entity, TRANSFORM, snapshot);

    info!(
        entity = %hctx.entity,
        island = %island.entity_id,
        prefab = %island.prefab,
        "Respawn teleport"
    );
    vec![
        Effect::Authority {
            components: vec![TRANSFORM.id()],
            authoritative: false,
        },
        Effect::Update(vec![(TRANSFORM.id(), reset.encode())]),
    ]
}

fn respawn_client(hctx: &mut HandlerContext<'_>, update: &RespawnClientUpdate) -> Vec<Effect> {
    let entity = hctx.entity;
    for req in &update.get_reviver_ship_info_request {
        debug!(%entity, ?req, "Reviver ship info requested");
    }
    for req in &update.respawn_at_nearest_ancient_respawner {
        info!(
            %entity,
            biome = req.last_valid_biome_id,
            "Respawn at nearest ancient respawner requested"
        );
    }
    for req in &update.respawn_at_random_ancient_respawner {
        info!(
            %entity,
            biome = req.last_valid_biome_id,
            "Respawn at random ancient respawner requested"
        );
    }
    for req in &update.respawn_at_personal_reviver {
        info!(%entity, biome = req.last_valid_biome_id, "Respawn at personal reviver requested");
    }
    for done in &update.respawn_done {
        info!(%entity, target = %done.target_entity_id, "Respawn done");
    }

    if update.respawn_done.is_empty() {
        return Vec::new();
    }
    vec![Effect::Authority {
        components: vec![TRANSFORM.id()],
        authoritative: true,
    }]
}

fn inventory_modification(
    hctx: &mut HandlerContext<'_>,
    update: &InventoryModificationUpdate,
) -> Vec<Effect> {
    let entity = hctx.entity;
    let mut effects = Vec::new();

    for info in &update.unequip_wearable {
        effects.extend(
            inventory::apply_wearable(hctx.store, hctx.items, entity, info, false)
                .map(Effect::Update),
        );
    }
    for info in &update.equip_wearable {
        effects.extend(
            inventory::apply_wearable(hctx.store, hctx.items, entity, info, true)
                .map(Effect::Update),
        );
    }

    for tool in &update.equip_tool {
        debug!(%entity, item = tool.item_id, lockbox = tool.is_lockbox_item, "Equip tool");
    }
    for craft in &update.craft_item {
        debug!(
            %entity,
            inventory = %craft.inventory_entity_id,
            item_type = %craft.item_type_id,
            amount = craft.amount,
            "Craft item"
        );
    }
    for mv in &update.move_item {
        debug!(
            %entity,
            inventory = %mv.inventory_entity_id,
            item = mv.item_id,
            x = mv.x_pos,
            y = mv.y_pos,
            rotate = mv.rotate,
            lockbox = mv.is_lockbox_item,
            "Move item"
        );
    }
    for mv in &update.cross_inventory_move_item {
        debug!(
            %entity,
            item = mv.src_item_id,
            from = %mv.src_inventory_entity_id,
            to = %mv.dest_inventory_entity_id,
            x = mv.x_pos,
            y = mv.y_pos,
            rotate = mv.rotate,
            lockbox = mv.is_lockbox_item,
            "Cross inventory move"
        );
    }
    for slot in &update.remove_from_hot_bar {
        debug!(
            %entity,
            slot = slot.slot_index,
            lockbox = slot.is_lockbox_item,
            "Remove from hot bar"
        );
    }
    for slot in &update.assign_to_hot_bar {
        debug!(
            %entity,
            item = slot.item_id,
            slot = slot.slot_index,
            lockbox = slot.is_lockbox_item,
            "Assign to hot bar"
        );
    }

    let kind = ComponentKind::InventoryModificationState;
    let state: ComponentData = hctx.store.get_or_default(entity, kind);
    effects.push(Effect::Update(vec![(kind.id(), state.encode())]));
    effects
}
