//! Typed outbound ops.
//!
//! Each send serializes one op and hands it to the transport on the op's
//! channel. A `false` return means the op never left the server, either
//! because it failed to serialize or the transport refused it.

use std::rc::Rc;

use serde::Serialize;
use skyshard_shared::entity::EntityId;
use skyshard_shared::net::{
    encode_op, AddComponentOp, AddEntityOp, AssetLoadRequestOp, AuthorityChangeOp, Channel,
    ComponentEntry, ComponentPayload, ComponentUpdateOp, PeerId, PLACEHOLDER,
};
use skyshard_shared::schema::ComponentId;
use skyshard_shared::transport::Transport;
use tracing::{error, trace};

#[derive(Clone)]
pub struct OpSender {
    transport: Rc<dyn Transport>,
}

impl OpSender {
    pub fn new(transport: Rc<dyn Transport>) -> Self {
        Self { transport }
    }

    fn send<T: Serialize>(&self, peer: PeerId, channel: Channel, op: &T) -> bool {
        let payload = match encode_op(op) {
            Ok(payload) => payload,
            Err(e) => {
                error!(%peer, ?channel, error = ?e, "Failed to serialize op");
                return false;
            }
        };
        let sent = self.transport.send(peer, channel, &payload);
        trace!(%peer, ?channel, len = payload.len(), sent, "op");
        sent
    }

    pub fn asset_load_request(&self, peer: PeerId, asset: &str, context: &str) -> bool {
        self.send(
            peer,
            Channel::AssetLoadRequest,
            &AssetLoadRequestOp {
                asset_type: PLACEHOLDER.to_string(),
                asset: asset.to_string(),
                context: context.to_string(),
            },
        )
    }

    pub fn add_entity(&self, peer: PeerId, entity_id: EntityId, prefab: &str, tag: &str) -> bool {
        self.send(
            peer,
            Channel::AddEntity,
            &AddEntityOp {
                entity_id,
                prefab: prefab.to_string(),
                tag: tag.to_string(),
            },
        )
    }

    pub fn add_component(
        &self,
        peer: PeerId,
        entity_id: EntityId,
        components: Vec<ComponentEntry>,
    ) -> bool {
        self.send(
            peer,
            Channel::AddComponent,
            &AddComponentOp {
                entity_id,
                components,
            },
        )
    }

    pub fn authority_change(
        &self,
        peer: PeerId,
        entity_id: EntityId,
        component_ids: &[ComponentId],
        authoritative: bool,
    ) -> bool {
        self.send(
            peer,
            Channel::AuthorityChange,
            &AuthorityChangeOp {
                entity_id,
                component_ids: component_ids.to_vec(),
                authoritative,
            },
        )
    }

    pub fn component_update(
        &self,
        peer: PeerId,
        entity_id: EntityId,
        updates: Vec<ComponentPayload>,
    ) -> bool {
        self.send(
            peer,
            Channel::ComponentUpdate,
            &ComponentUpdateOp { entity_id, updates },
        )
    }
}
