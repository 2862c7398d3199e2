//! Component interest.
//!
//! A client asks for the components of an entity it can see; the server
//! answers with add-component entries. The first request for a peer's own
//! player is special: the client also needs components it does not ask for,
//! and write authority over the ones it drives.

use skyshard_shared::entity::EntityId;
use skyshard_shared::net::{decode_op, ComponentEntry, ComponentInterestOp, PeerId};
use skyshard_shared::schema::{
    ComponentData, ComponentId, ComponentKind, CLIENT_AUTHORITATIVE_COMPONENTS, PILOT_STATE,
    SCHEMATICS_LEARNER_STATE,
};
use tracing::{debug, error, info, warn};

use crate::context::ServerContext;
use crate::sync::PeerSession;

/// Decodes and answers one component interest op.
pub fn handle_interest(ctx: &ServerContext, session: &mut PeerSession, payload: &[u8]) {
    let peer = session.peer;
    let op: ComponentInterestOp = match decode_op(payload) {
        Ok(op) => op,
        Err(e) => {
            error!(%peer, error = ?e, "Dropping malformed component interest");
            return;
        }
    };
    let entity = op.entity_id;
    let requested: Vec<ComponentId> = op
        .interests
        .iter()
        .filter(|i| i.interested)
        .map(|i| i.component_id)
        .collect();
    info!(%peer, %entity, requested = requested.len(), "Components requested");

    if session.player_entity == Some(entity) && !session.components_bootstrapped {
        if bootstrap_player(ctx, peer, entity, &requested) {
            session.components_bootstrapped = true;
            info!(%peer, %entity, "Player components bootstrapped");
        }
    } else if !add_components(ctx, peer, entity, &requested) {
        warn!(%peer, %entity, "Failed to send requested components");
    }
}

/// Sends the early injection, the requested set, the late injection, and
/// the authority grant. Stops at the first failed send so the next request
/// retries from the start.
fn bootstrap_player(
    ctx: &ServerContext,
    peer: PeerId,
    entity: EntityId,
    requested: &[ComponentId],
) -> bool {
    if !add_components(ctx, peer, entity, &[PILOT_STATE]) {
        return false;
    }
    if !add_components(ctx, peer, entity, requested) {
        return false;
    }

    let mut injected = vec![SCHEMATICS_LEARNER_STATE];
    injected.extend(CLIENT_AUTHORITATIVE_COMPONENTS);
    if !add_components(ctx, peer, entity, &injected) {
        return false;
    }
    ctx.set_authority(peer, entity, &CLIENT_AUTHORITATIVE_COMPONENTS, true)
}

fn add_components(
    ctx: &ServerContext,
    peer: PeerId,
    entity: EntityId,
    ids: &[ComponentId],
) -> bool {
    let entries: Vec<ComponentEntry> = ids.iter().map(|&id| entry(ctx, entity, id)).collect();
    debug!(%peer, %entity, components = ?ids, "Adding components");
    ctx.ops.add_component(peer, entity, entries)
}

/// Entry with the stored override, or without data when the schema default
/// applies.
fn entry(ctx: &ServerContext, entity: EntityId, component_id: ComponentId) -> ComponentEntry {
    let data = match ComponentKind::from_id(component_id) {
        Some(ComponentKind::WeatherCellState) => {
            let cell = ctx.weather.weather_for(&mut ctx.store.borrow_mut(), entity);
            cell.map(|cell| ComponentData::WeatherCell(cell).encode())
        }
        Some(kind) => ctx
            .store
            .borrow()
            .get_component(entity, kind)
            .map(|data| data.encode()),
        None => None,
    };
    ComponentEntry { component_id, data }
}
