//! Entity ids and the authority store.
//!
//! The store is the single source of truth for three things:
//! - the entity id counter (ids start at 1 and are never reused),
//! - component values that override the schema default, keyed by
//!   `(entity, kind)`,
//! - which peer may write which component ids of which entity.
//!
//! No validation of payload shape happens here; callers decode first.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::net::PeerId;
use crate::schema::{ComponentData, ComponentId, ComponentKind, TransformState};

/// Process-unique entity id.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct EntityId(pub u64);

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
pub struct AuthorityStore {
    next_id: u64,
    components: HashMap<EntityId, HashMap<ComponentKind, ComponentData>>,
    grants: HashMap<(PeerId, EntityId), HashSet<ComponentId>>,
}

impl Default for AuthorityStore {
    fn default() -> Self {
        Self {
            next_id: 1,
            components: HashMap::new(),
            grants: HashMap::new(),
        }
    }
}

impl AuthorityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh entity id.
    pub fn allocate_entity_id(&mut self) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Creates or overwrites the authoritative value of a component.
    pub fn set_component(&mut self, entity: EntityId, kind: ComponentKind, data: ComponentData) {
        self.components.entry(entity).or_default().insert(kind, data);
    }

    pub fn get_component(&self, entity: EntityId, kind: ComponentKind) -> Option<&ComponentData> {
        self.components.get(&entity).and_then(|c| c.get(&kind))
    }

    /// Stored value, or the schema default when nothing overrides it.
    pub fn get_or_default(&self, entity: EntityId, kind: ComponentKind) -> ComponentData {
        self.get_component(entity, kind)
            .cloned()
            .unwrap_or_else(|| ComponentData::default_for(kind))
    }

    pub fn transform(&self, entity: EntityId) -> Option<&TransformState> {
        self.get_component(entity, ComponentKind::TransformState)
            .and_then(ComponentData::as_transform)
    }

    /// Iterates the overridden components of an entity.
    pub fn components(
        &self,
        entity: EntityId,
    ) -> impl Iterator<Item = (ComponentKind, &ComponentData)> {
        self.components
            .get(&entity)
            .into_iter()
            .flat_map(|c| c.iter().map(|(k, v)| (*k, v)))
    }

    /// Number of entities with at least one overridden component.
    pub fn entity_count(&self) -> usize {
        self.components.len()
    }

    pub fn grant(&mut self, peer: PeerId, entity: EntityId, ids: &[ComponentId]) {
        self.grants
            .entry((peer, entity))
            .or_default()
            .extend(ids.iter().copied());
    }

    pub fn revoke(&mut self, peer: PeerId, entity: EntityId, ids: &[ComponentId]) {
        if let Some(granted) = self.grants.get_mut(&(peer, entity)) {
            for id in ids {
                granted.remove(id);
            }
        }
    }

    /// Drops every grant held by a peer.
    pub fn release_peer(&mut self, peer: PeerId) {
        self.grants.retain(|(holder, _), _| *holder != peer);
    }

    pub fn has_authority(&self, peer: PeerId, entity: EntityId, id: ComponentId) -> bool {
        self.grants
            .get(&(peer, entity))
            .is_some_and(|granted| granted.contains(&id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec3;

    #[test]
    fn ids_are_monotonic_and_start_at_one() {
        let mut store = AuthorityStore::new();
        let a = store.allocate_entity_id();
        let b = store.allocate_entity_id();
        assert_eq!(a, EntityId(1));
        assert!(b > a);
    }

    #[test]
    fn set_overwrites_and_default_fills_gaps() {
        let mut store = AuthorityStore::new();
        let e = store.allocate_entity_id();
        assert!(store.get_component(e, ComponentKind::TransformState).is_none());
        assert_eq!(
            store.get_or_default(e, ComponentKind::TransformState),
            ComponentData::Transform(TransformState::default())
        );

        let kind = ComponentKind::TransformState;
        store.set_component(e, kind, ComponentData::Transform(TransformState::at(Vec3::ZERO, 0)));
        store.set_component(
            e,
            kind,
            ComponentData::Transform(TransformState::at(Vec3::new(1.0, 0.0, 0.0), 0)),
        );
        assert_eq!(store.transform(e).unwrap().position(), Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(store.components(e).count(), 1);
    }

    #[test]
    fn grants_are_per_peer_and_entity() {
        let mut store = AuthorityStore::new();
        let e = store.allocate_entity_id();
        let id = ComponentKind::TransformState.id();

        store.grant(PeerId(1), e, &[id]);
        assert!(store.has_authority(PeerId(1), e, id));
        assert!(!store.has_authority(PeerId(2), e, id));

        store.revoke(PeerId(1), e, &[id]);
        assert!(!store.has_authority(PeerId(1), e, id));

        store.grant(PeerId(1), e, &[id]);
        store.release_peer(PeerId(1));
        assert!(!store.has_authority(PeerId(1), e, id));
    }

    #[test]
    fn releasing_a_peer_keeps_component_values() {
        let mut store = AuthorityStore::new();
        let a = store.allocate_entity_id();
        let b = store.allocate_entity_id();
        let kind = ComponentKind::TransformState;
        store.set_component(a, kind, ComponentData::Transform(TransformState::default()));
        store.set_component(b, kind, ComponentData::Transform(TransformState::default()));
        store.grant(PeerId(1), a, &[kind.id()]);
        assert_eq!(store.entity_count(), 2);

        store.release_peer(PeerId(1));
        assert_eq!(store.entity_count(), 2);
        assert!(store.transform(a).is_some());
    }
}
