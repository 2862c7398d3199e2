//! Networking primitives: peers, channels, and the wire ops exchanged on them.
//!
//! Every op is a JSON payload on a fixed channel. Acknowledgements arrive on
//! the channel of the op they acknowledge and their payload is not inspected.

use anyhow::Context;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::EntityId;
use crate::schema::ComponentId;

/// Filler for op fields the client ignores.
pub const PLACEHOLDER: &str = "notNeeded?";

/// Transport-assigned handle of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u32);

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// Transport channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Channel {
    /// Server -> client asset load requests; client acks on the same channel.
    AssetLoadRequest = 0,
    /// Server -> client entity announcements; client acks on the same channel.
    AddEntity = 1,
    /// Client -> server component interest.
    ComponentInterest = 2,
    /// Both directions: component updates.
    ComponentUpdate = 3,
    /// Server -> client component additions.
    AddComponent = 4,
    /// Server -> client authority changes.
    AuthorityChange = 5,
}

impl Channel {
    pub const COUNT: usize = 6;

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Channel::AssetLoadRequest),
            1 => Some(Channel::AddEntity),
            2 => Some(Channel::ComponentInterest),
            3 => Some(Channel::ComponentUpdate),
            4 => Some(Channel::AddComponent),
            5 => Some(Channel::AuthorityChange),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

// ─── Server -> client ───

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AssetLoadRequestOp {
    pub asset_type: String,
    pub asset: String,
    pub context: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AddEntityOp {
    pub entity_id: EntityId,
    pub prefab: String,
    pub tag: String,
}

/// One component added to an entity. `data` is absent when the server has no
/// override and the client should use its schema default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentEntry {
    pub component_id: ComponentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AddComponentOp {
    pub entity_id: EntityId,
    pub components: Vec<ComponentEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthorityChangeOp {
    pub entity_id: EntityId,
    pub component_ids: Vec<ComponentId>,
    pub authoritative: bool,
}

// ─── Both directions ───

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentPayload {
    pub component_id: ComponentId,
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentUpdateOp {
    pub entity_id: EntityId,
    pub updates: Vec<ComponentPayload>,
}

// ─── Client -> server ───

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InterestOverride {
    pub component_id: ComponentId,
    pub interested: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentInterestOp {
    pub entity_id: EntityId,
    pub interests: Vec<InterestOverride>,
}

/// Serializes an op payload.
pub fn encode_op<T: Serialize>(op: &T) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(op).context("serialize op")?;
    Ok(Bytes::from(payload))
}

/// Deserializes an op payload.
pub fn decode_op<T: DeserializeOwned>(b: &[u8]) -> anyhow::Result<T> {
    serde_json::from_slice(b).context("deserialize op")
}
