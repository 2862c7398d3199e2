//! Component schema registry.
//!
//! Maps component kinds to their numeric ids and (de)serializes component
//! payloads. Payloads travel as JSON values inside wire ops.
//!
//! Every kind has a snapshot shape ([`ComponentData`]) with a schema
//! default. Kinds a client may write also have an update shape
//! ([`ComponentUpdate`]): optional fields overwrite the snapshot, event
//! lists are transient and never stored.
//!
//! Low-semantics kinds (movement, rope, logout, player properties) are kept
//! as opaque JSON objects and merged key by key.

use anyhow::{bail, Context};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::entity::EntityId;
use crate::math::{FixedPointVector3, Vec3, PACKED_IDENTITY_ROTATION};

/// Numeric component id as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentId(pub u32);

impl std::fmt::Display for ComponentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `PilotState`, injected before the first component batch of a player.
pub const PILOT_STATE: ComponentId = ComponentId(1109);
/// `SchematicsLearnerGSimState`, not always requested but read by the inventory UI.
pub const SCHEMATICS_LEARNER_STATE: ComponentId = ComponentId(1080);

/// Components a player's own client must be authoritative over.
///
/// Each behaviour on the client self-disables unless all of its readers and
/// writers are injected, and a writer is only injected under authority.
pub const CLIENT_AUTHORITATIVE_COMPONENTS: [ComponentId; 14] = [
    ComponentId(8050),
    ComponentId(8051),
    ComponentId(6908),
    ComponentId(1097),
    ComponentId(1003),
    ComponentId(1241),
    ComponentId(1082),
    // SchematicsUnlearnerState, inventory visualiser
    ComponentId(1260),
    // LogoutState
    ComponentId(1145),
    // RespawnClientState, respawn visualiser
    ComponentId(1093),
    // CharacterControlsData, respawn visualiser
    ComponentId(1072),
    // ClientAuthoritativePlayerState, player movement
    ComponentId(1073),
    // TransformState
    ComponentId(190602),
    // RopeControlPoints
    ComponentId(1098),
];

/// Component kinds with a modelled payload shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComponentKind {
    CharacterControlsData,
    ClientAuthoritativePlayerState,
    InventoryState,
    InventoryModificationState,
    PlayerPropertiesState,
    RespawnClientState,
    RopeControlPoints,
    WeatherCellState,
    LogoutState,
    WearableUtilsState,
    WallSegmentState,
    TransformState,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 12] = [
        ComponentKind::CharacterControlsData,
        ComponentKind::ClientAuthoritativePlayerState,
        ComponentKind::InventoryState,
        ComponentKind::InventoryModificationState,
        ComponentKind::PlayerPropertiesState,
        ComponentKind::RespawnClientState,
        ComponentKind::RopeControlPoints,
        ComponentKind::WeatherCellState,
        ComponentKind::LogoutState,
        ComponentKind::WearableUtilsState,
        ComponentKind::WallSegmentState,
        ComponentKind::TransformState,
    ];

    pub const fn id(self) -> ComponentId {
        ComponentId(match self {
            ComponentKind::CharacterControlsData => 1072,
            ComponentKind::ClientAuthoritativePlayerState => 1073,
            ComponentKind::InventoryState => 1081,
            ComponentKind::InventoryModificationState => 1082,
            ComponentKind::PlayerPropertiesState => 1088,
            ComponentKind::RespawnClientState => 1093,
            ComponentKind::RopeControlPoints => 1098,
            ComponentKind::WeatherCellState => 1139,
            ComponentKind::LogoutState => 1145,
            ComponentKind::WearableUtilsState => 1280,
            ComponentKind::WallSegmentState => 1285,
            ComponentKind::TransformState => 190602,
        })
    }

    pub fn from_id(id: ComponentId) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.id() == id)
    }

    pub const fn name(self) -> &'static str {
        match self {
            ComponentKind::CharacterControlsData => "CharacterControlsData",
            ComponentKind::ClientAuthoritativePlayerState => "ClientAuthoritativePlayerState",
            ComponentKind::InventoryState => "InventoryState",
            ComponentKind::InventoryModificationState => "InventoryModificationState",
            ComponentKind::PlayerPropertiesState => "PlayerPropertiesState",
            ComponentKind::RespawnClientState => "RespawnClientState",
            ComponentKind::RopeControlPoints => "RopeControlPoints",
            ComponentKind::WeatherCellState => "WeatherCellState",
            ComponentKind::LogoutState => "LogoutState",
            ComponentKind::WearableUtilsState => "WearableUtilsState",
            ComponentKind::WallSegmentState => "WallSegmentState",
            ComponentKind::TransformState => "TransformState",
        }
    }

    /// Kinds stored as free-form JSON objects.
    pub const fn is_opaque(self) -> bool {
        matches!(
            self,
            ComponentKind::ClientAuthoritativePlayerState
                | ComponentKind::PlayerPropertiesState
                | ComponentKind::RopeControlPoints
                | ComponentKind::LogoutState
        )
    }
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name(), self.id())
    }
}

// ─── Payload shapes ───

/// Entity a transform is attached to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parent {
    pub entity_id: EntityId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransformState {
    pub local_position: FixedPointVector3,
    pub local_rotation: u32,
    pub parent: Option<Parent>,
    pub velocity: Vec3,
    pub angular_velocity: Vec3,
    pub local_velocity: Vec3,
    pub teleported: bool,
    pub update_interval_ms: u32,
}

impl Default for TransformState {
    fn default() -> Self {
        Self {
            local_position: FixedPointVector3::ZERO,
            local_rotation: PACKED_IDENTITY_ROTATION,
            parent: None,
            velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            local_velocity: Vec3::ZERO,
            teleported: false,
            update_interval_ms: 1000,
        }
    }
}

impl TransformState {
    /// Unparented transform at a world position.
    pub fn at(position: Vec3, update_interval_ms: u32) -> Self {
        Self {
            local_position: FixedPointVector3::from_vec3(position),
            update_interval_ms,
            ..Self::default()
        }
    }

    pub fn position(&self) -> Vec3 {
        self.local_position.to_vec3()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransformUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_position: Option<FixedPointVector3>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_rotation: Option<u32>,
    /// `Some(None)` detaches the transform from its parent.
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub parent: Option<Option<Parent>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub velocity: Option<Vec3>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub angular_velocity: Option<Vec3>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_velocity: Option<Vec3>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teleported: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_interval_ms: Option<u32>,
}

impl TransformUpdate {
    fn apply_to(&self, data: &mut TransformState) {
        if let Some(v) = self.local_position {
            data.local_position = v;
        }
        if let Some(v) = self.local_rotation {
            data.local_rotation = v;
        }
        if let Some(v) = &self.parent {
            data.parent = v.clone();
        }
        if let Some(v) = self.velocity {
            data.velocity = v;
        }
        if let Some(v) = self.angular_velocity {
            data.angular_velocity = v;
        }
        if let Some(v) = self.local_velocity {
            data.local_velocity = v;
        }
        if let Some(v) = self.teleported {
            data.teleported = v;
        }
        if let Some(v) = self.update_interval_ms {
            data.update_interval_ms = v;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CharacterControlsData {
    pub move_direction: Vec3,
    pub look_direction: Vec3,
    pub sprinting: bool,
    pub crouching: bool,
}

/// Respawn request event. Carries no fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RespawnRequest {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CharacterControlsUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub move_direction: Option<Vec3>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub look_direction: Option<Vec3>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sprinting: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crouching: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub respawn: Vec<RespawnRequest>,
}

impl CharacterControlsUpdate {
    fn apply_to(&self, data: &mut CharacterControlsData) {
        if let Some(v) = self.move_direction {
            data.move_direction = v;
        }
        if let Some(v) = self.look_direction {
            data.look_direction = v;
        }
        if let Some(v) = self.sprinting {
            data.sprinting = v;
        }
        if let Some(v) = self.crouching {
            data.crouching = v;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RespawnClientState {
    pub dead: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RespawnDone {
    pub target_entity_id: EntityId,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RespawnerRequest {
    pub last_valid_biome_id: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviverShipInfoRequest {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RespawnClientUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dead: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub respawn_done: Vec<RespawnDone>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub get_reviver_ship_info_request: Vec<ReviverShipInfoRequest>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub respawn_at_nearest_ancient_respawner: Vec<RespawnerRequest>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub respawn_at_random_ancient_respawner: Vec<RespawnerRequest>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub respawn_at_personal_reviver: Vec<RespawnerRequest>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InventoryItem {
    pub item_id: i32,
    pub item_type_id: String,
    pub slot_type: String,
    pub x_pos: i32,
    pub y_pos: i32,
    pub rotate: bool,
}

/// Slot value of an item that is not equipped.
pub const SLOT_NONE: &str = "None";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InventoryState {
    pub inventory_list: Vec<InventoryItem>,
    pub lock_box_items: Vec<InventoryItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WearableUtilsState {
    pub item_ids: Vec<i32>,
    pub healths: Vec<f32>,
    pub active: Vec<bool>,
}

/// Inventory modification state holds no fields of its own; every
/// modification arrives as an event on the update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InventoryModificationState {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EquipInfo {
    pub item_id: i32,
    pub is_lockbox_item: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CraftItem {
    pub inventory_entity_id: EntityId,
    pub item_type_id: String,
    pub amount: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MoveItem {
    pub inventory_entity_id: EntityId,
    pub item_id: i32,
    pub x_pos: i32,
    pub y_pos: i32,
    pub rotate: bool,
    pub is_lockbox_item: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CrossInventoryMoveItem {
    pub src_item_id: i32,
    pub x_pos: i32,
    pub y_pos: i32,
    pub rotate: bool,
    pub src_inventory_entity_id: EntityId,
    pub dest_inventory_entity_id: EntityId,
    pub is_lockbox_item: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HotBarSlot {
    pub item_id: i32,
    pub slot_index: i32,
    pub is_lockbox_item: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InventoryModificationUpdate {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub equip_wearable: Vec<EquipInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unequip_wearable: Vec<EquipInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub equip_tool: Vec<EquipInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub craft_item: Vec<CraftItem>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub move_item: Vec<MoveItem>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cross_inventory_move_item: Vec<CrossInventoryMoveItem>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub assign_to_hot_bar: Vec<HotBarSlot>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub remove_from_hot_bar: Vec<HotBarSlot>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WeatherCellState {
    pub pressure: f32,
    pub wind: Vec3,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WallSegmentState {
    pub wall_type: i32,
    pub wall_id: i32,
    pub direction: Vec3,
    pub half_length: f32,
}

// ─── Registry entry points ───

/// Authoritative snapshot of one component.
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentData {
    Transform(TransformState),
    CharacterControls(CharacterControlsData),
    RespawnClient(RespawnClientState),
    Inventory(InventoryState),
    InventoryModification(InventoryModificationState),
    WearableUtils(WearableUtilsState),
    WeatherCell(WeatherCellState),
    WallSegment(WallSegmentState),
    Opaque(Map<String, Value>),
}

impl ComponentData {
    /// Schema default for a kind.
    pub fn default_for(kind: ComponentKind) -> Self {
        match kind {
            ComponentKind::TransformState => Self::Transform(TransformState::default()),
            ComponentKind::CharacterControlsData => {
                Self::CharacterControls(CharacterControlsData::default())
            }
            ComponentKind::RespawnClientState => Self::RespawnClient(RespawnClientState::default()),
            ComponentKind::InventoryState => Self::Inventory(InventoryState::default()),
            ComponentKind::InventoryModificationState => {
                Self::InventoryModification(InventoryModificationState::default())
            }
            ComponentKind::WearableUtilsState => Self::WearableUtils(WearableUtilsState::default()),
            ComponentKind::WeatherCellState => Self::WeatherCell(WeatherCellState::default()),
            ComponentKind::WallSegmentState => Self::WallSegment(WallSegmentState::default()),
            ComponentKind::ClientAuthoritativePlayerState
            | ComponentKind::PlayerPropertiesState
            | ComponentKind::RopeControlPoints
            | ComponentKind::LogoutState => Self::Opaque(Map::new()),
        }
    }

    /// Deserializes a snapshot of `kind` from its JSON payload.
    pub fn decode(kind: ComponentKind, payload: &Value) -> anyhow::Result<Self> {
        let data = match kind {
            ComponentKind::TransformState => Self::Transform(from_payload(kind, payload)?),
            ComponentKind::CharacterControlsData => {
                Self::CharacterControls(from_payload(kind, payload)?)
            }
            ComponentKind::RespawnClientState => Self::RespawnClient(from_payload(kind, payload)?),
            ComponentKind::InventoryState => Self::Inventory(from_payload(kind, payload)?),
            ComponentKind::InventoryModificationState => {
                Self::InventoryModification(from_payload(kind, payload)?)
            }
            ComponentKind::WearableUtilsState => Self::WearableUtils(from_payload(kind, payload)?),
            ComponentKind::WeatherCellState => Self::WeatherCell(from_payload(kind, payload)?),
            ComponentKind::WallSegmentState => Self::WallSegment(from_payload(kind, payload)?),
            ComponentKind::ClientAuthoritativePlayerState
            | ComponentKind::PlayerPropertiesState
            | ComponentKind::RopeControlPoints
            | ComponentKind::LogoutState => Self::Opaque(from_payload(kind, payload)?),
        };
        Ok(data)
    }

    /// Serializes the snapshot to its JSON payload.
    pub fn encode(&self) -> Value {
        match self {
            Self::Transform(v) => to_payload(v),
            Self::CharacterControls(v) => to_payload(v),
            Self::RespawnClient(v) => to_payload(v),
            Self::Inventory(v) => to_payload(v),
            Self::InventoryModification(v) => to_payload(v),
            Self::WearableUtils(v) => to_payload(v),
            Self::WeatherCell(v) => to_payload(v),
            Self::WallSegment(v) => to_payload(v),
            Self::Opaque(map) => Value::Object(map.clone()),
        }
    }

    /// Merges a client update into this snapshot.
    pub fn apply(&mut self, update: &ComponentUpdate) -> anyhow::Result<()> {
        match (self, update) {
            (Self::Transform(data), ComponentUpdate::Transform(u)) => u.apply_to(data),
            (Self::CharacterControls(data), ComponentUpdate::CharacterControls(u)) => {
                u.apply_to(data)
            }
            (Self::RespawnClient(data), ComponentUpdate::RespawnClient(u)) => {
                if let Some(dead) = u.dead {
                    data.dead = dead;
                }
            }
            (Self::InventoryModification(_), ComponentUpdate::InventoryModification(_)) => {}
            (Self::Opaque(data), ComponentUpdate::Opaque(u)) => {
                for (key, value) in u {
                    data.insert(key.clone(), value.clone());
                }
            }
            (data, update) => bail!(
                "update {:?} does not match snapshot {:?}",
                update.variant_name(),
                data.variant_name()
            ),
        }
        Ok(())
    }

    pub fn as_transform(&self) -> Option<&TransformState> {
        match self {
            Self::Transform(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_inventory(&self) -> Option<&InventoryState> {
        match self {
            Self::Inventory(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_weather_cell(&self) -> Option<&WeatherCellState> {
        match self {
            Self::WeatherCell(v) => Some(v),
            _ => None,
        }
    }

    fn variant_name(&self) -> &'static str {
        match self {
            Self::Transform(_) => "Transform",
            Self::CharacterControls(_) => "CharacterControls",
            Self::RespawnClient(_) => "RespawnClient",
            Self::Inventory(_) => "Inventory",
            Self::InventoryModification(_) => "InventoryModification",
            Self::WearableUtils(_) => "WearableUtils",
            Self::WeatherCell(_) => "WeatherCell",
            Self::WallSegment(_) => "WallSegment",
            Self::Opaque(_) => "Opaque",
        }
    }
}

/// Client-submitted change to one component.
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentUpdate {
    Transform(TransformUpdate),
    CharacterControls(CharacterControlsUpdate),
    RespawnClient(RespawnClientUpdate),
    InventoryModification(InventoryModificationUpdate),
    Opaque(Map<String, Value>),
}

impl ComponentUpdate {
    /// Deserializes an update of `kind`. Kinds without an update shape are
    /// server-written only and fail here.
    pub fn decode(kind: ComponentKind, payload: &Value) -> anyhow::Result<Self> {
        let update = match kind {
            ComponentKind::TransformState => Self::Transform(from_payload(kind, payload)?),
            ComponentKind::CharacterControlsData => {
                Self::CharacterControls(from_payload(kind, payload)?)
            }
            ComponentKind::RespawnClientState => Self::RespawnClient(from_payload(kind, payload)?),
            ComponentKind::InventoryModificationState => {
                Self::InventoryModification(from_payload(kind, payload)?)
            }
            kind if kind.is_opaque() => Self::Opaque(from_payload(kind, payload)?),
            kind => bail!("{kind} has no client update shape"),
        };
        Ok(update)
    }

    pub fn encode(&self) -> Value {
        match self {
            Self::Transform(v) => to_payload(v),
            Self::CharacterControls(v) => to_payload(v),
            Self::RespawnClient(v) => to_payload(v),
            Self::InventoryModification(v) => to_payload(v),
            Self::Opaque(map) => Value::Object(map.clone()),
        }
    }

    fn variant_name(&self) -> &'static str {
        match self {
            Self::Transform(_) => "Transform",
            Self::CharacterControls(_) => "CharacterControls",
            Self::RespawnClient(_) => "RespawnClient",
            Self::InventoryModification(_) => "InventoryModification",
            Self::Opaque(_) => "Opaque",
        }
    }
}

fn from_payload<T: DeserializeOwned>(kind: ComponentKind, payload: &Value) -> anyhow::Result<T> {
    T::deserialize(payload).with_context(|| format!("decode {kind} payload"))
}

fn to_payload<T: Serialize>(value: &T) -> Value {
    // Payload types are plain structs with string keys; this cannot fail.
    serde_json::to_value(value).unwrap_or_default()
}

/// Keeps "field absent" (`None`) apart from "field set to null" (`Some(None)`).
fn double_option<'de, D, T>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}
