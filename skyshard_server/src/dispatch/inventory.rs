//! Wearable equip and unequip.
//!
//! At most one item may occupy a character slot across both the inventory
//! and the lockbox. Each change is answered with one batch covering
//! `WearableUtilsState`, `InventoryState`, `PlayerPropertiesState`, in that
//! order; the client reads them in sequence.

use serde_json::Value;
use skyshard_shared::entity::{AuthorityStore, EntityId};
use skyshard_shared::items::ItemCatalog;
use skyshard_shared::schema::{
    ComponentData, ComponentId, ComponentKind, EquipInfo, InventoryItem, InventoryState,
    WearableUtilsState, SLOT_NONE,
};
use tracing::{info, warn};

const WEARABLE_HEALTH: f32 = 100.0;

/// Fixed order of the equip batch.
pub const EQUIP_BATCH: [ComponentKind; 3] = [
    ComponentKind::WearableUtilsState,
    ComponentKind::InventoryState,
    ComponentKind::PlayerPropertiesState,
];

/// Equips or unequips one item and returns the batch to send, or `None` when
/// the item is in neither list.
pub fn apply_wearable(
    store: &mut AuthorityStore,
    items: &ItemCatalog,
    entity: EntityId,
    info: &EquipInfo,
    equip: bool,
) -> Option<Vec<(ComponentId, Value)>> {
    let mut inventory = store
        .get_component(entity, ComponentKind::InventoryState)
        .and_then(ComponentData::as_inventory)
        .cloned()
        .unwrap_or_default();

    let item_id = info.item_id;
    let (in_lockbox, item_type) = match find(&inventory.inventory_list, item_id) {
        Some(item) => (false, item.item_type_id.clone()),
        None => match find(&inventory.lock_box_items, item_id) {
            Some(item) => (true, item.item_type_id.clone()),
            None => {
                warn!(%entity, item = item_id, equip, "Wearable not found in inventory or lockbox");
                return None;
            }
        },
    };
    if in_lockbox != info.is_lockbox_item {
        warn!(%entity, item = item_id, in_lockbox, "Equip request names the wrong list");
    }

    if equip {
        let slot = items.character_slot(&item_type).to_string();
        clear_slot_conflicts(&mut inventory.inventory_list, items, item_id, &slot);
        clear_slot_conflicts(&mut inventory.lock_box_items, items, item_id, &slot);
        let list = if in_lockbox {
            &mut inventory.lock_box_items
        } else {
            &mut inventory.inventory_list
        };
        set_slot(list, item_id, &slot);
        info!(%entity, item = item_id, %item_type, %slot, "Equip wearable");
    } else {
        set_slot(&mut inventory.inventory_list, item_id, SLOT_NONE);
        set_slot(&mut inventory.lock_box_items, item_id, SLOT_NONE);
        info!(%entity, item = item_id, %item_type, "Unequip wearable");
    }

    let wearables = equipped_wearables(&inventory);
    let properties = store.get_or_default(entity, ComponentKind::PlayerPropertiesState);
    let wearables = ComponentData::WearableUtils(wearables);
    let inventory = ComponentData::Inventory(inventory);

    let batch = vec![
        (EQUIP_BATCH[0].id(), wearables.encode()),
        (EQUIP_BATCH[1].id(), inventory.encode()),
        (EQUIP_BATCH[2].id(), properties.encode()),
    ];
    store.set_component(entity, ComponentKind::WearableUtilsState, wearables);
    store.set_component(entity, ComponentKind::InventoryState, inventory);
    Some(batch)
}

fn find(list: &[InventoryItem], item_id: i32) -> Option<&InventoryItem> {
    list.iter().find(|item| item.item_id == item_id)
}

fn set_slot(list: &mut [InventoryItem], item_id: i32, slot: &str) {
    for item in list.iter_mut().filter(|item| item.item_id == item_id) {
        item.slot_type = slot.to_string();
    }
}

/// Unequips every other item that holds, or belongs in, `slot`.
fn clear_slot_conflicts(
    list: &mut [InventoryItem],
    items: &ItemCatalog,
    item_id: i32,
    slot: &str,
) {
    if slot == SLOT_NONE {
        return;
    }
    for item in list.iter_mut() {
        if item.item_id == item_id {
            continue;
        }
        if item.slot_type == slot || items.character_slot(&item.item_type_id) == slot {
            item.slot_type = SLOT_NONE.to_string();
        }
    }
}

/// Wearable visuals for every equipped item across both lists.
fn equipped_wearables(inventory: &InventoryState) -> WearableUtilsState {
    let mut state = WearableUtilsState::default();
    for item in inventory
        .inventory_list
        .iter()
        .chain(&inventory.lock_box_items)
        .filter(|item| item.slot_type != SLOT_NONE && !item.slot_type.is_empty())
    {
        state.item_ids.push(item.item_id);
        state.healths.push(WEARABLE_HEALTH);
        state.active.push(true);
    }
    state
}
