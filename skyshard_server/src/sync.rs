//! Per-peer sync state machine.
//!
//! Every peer walks the same fixed script:
//! - asset load requests (configured preloads, then every distinct prefab
//!   of the replication registry),
//! - spawn of the home entity,
//! - spawn of the peer's own player, which starts world streaming.
//!
//! A step's action runs once; the cursor then waits for the acknowledgement
//! the step requires. A peer whose cursor sits on the last step is synced
//! and no longer gated.

use skyshard_shared::config::ServerConfig;
use skyshard_shared::entity::EntityId;
use skyshard_shared::net::{Channel, PeerId, PLACEHOLDER};

use crate::replication::ReplicationRegistry;

/// Acknowledgement a step waits for before the cursor moves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// No gate; the cursor moves as soon as the action has run.
    Nothing,
    AssetLoaded,
    EntityAdded,
}

impl Requirement {
    /// Whether an inbound packet on `channel` satisfies this requirement.
    pub fn satisfied_by(self, channel: u8) -> bool {
        match self {
            Requirement::Nothing => false,
            Requirement::AssetLoaded => channel == Channel::AssetLoadRequest.as_u8(),
            Requirement::EntityAdded => channel == Channel::AddEntity.as_u8(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    LoadAsset { asset: String, context: String },
    SpawnHome,
    SpawnPlayer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStep {
    pub requirement: Requirement,
    pub action: SyncAction,
}

/// Ordered bootstrap script, shared by all peers.
#[derive(Debug, Clone)]
pub struct SyncScript {
    steps: Vec<SyncStep>,
}

impl SyncScript {
    pub fn build(cfg: &ServerConfig, registry: &ReplicationRegistry) -> Self {
        let mut assets: Vec<(String, String)> = Vec::new();
        for preload in &cfg.preload_assets {
            if !assets.iter().any(|(a, _)| *a == preload.asset) {
                assets.push((preload.asset.clone(), preload.tag.clone()));
            }
        }
        for prefab in registry.prefabs() {
            if !assets.iter().any(|(a, _)| *a == prefab) {
                assets.push((prefab, PLACEHOLDER.to_string()));
            }
        }

        let mut steps: Vec<SyncStep> = assets
            .into_iter()
            .map(|(asset, context)| SyncStep {
                requirement: Requirement::AssetLoaded,
                action: SyncAction::LoadAsset { asset, context },
            })
            .collect();
        steps.push(SyncStep {
            requirement: Requirement::EntityAdded,
            action: SyncAction::SpawnHome,
        });
        steps.push(SyncStep {
            requirement: Requirement::EntityAdded,
            action: SyncAction::SpawnPlayer,
        });
        Self { steps }
    }

    pub fn from_steps(steps: Vec<SyncStep>) -> Self {
        Self { steps }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, index: usize) -> Option<&SyncStep> {
        self.steps.get(index)
    }

    pub fn steps(&self) -> &[SyncStep] {
        &self.steps
    }

    pub fn last_index(&self) -> usize {
        self.steps.len().saturating_sub(1)
    }
}

/// A peer's position in the script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatus {
    cursor: usize,
    performed: bool,
}

impl SyncStatus {
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn performed(&self) -> bool {
        self.performed
    }

    pub fn is_synced(&self, script: &SyncScript) -> bool {
        self.cursor >= script.last_index()
    }

    fn advance(&mut self) {
        self.cursor += 1;
        self.performed = false;
    }

    /// Advances one step if `channel` satisfies the current requirement.
    /// Synced peers never advance.
    pub fn on_packet(&mut self, script: &SyncScript, channel: u8) -> bool {
        if self.is_synced(script) {
            return false;
        }
        let Some(step) = script.step(self.cursor) else {
            return false;
        };
        if step.requirement.satisfied_by(channel) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Returns the action due at the cursor, at most once per step.
    ///
    /// Ungated steps advance right away so the following step is due on the
    /// next call.
    pub fn take_pending<'a>(&mut self, script: &'a SyncScript) -> Option<&'a SyncAction> {
        if self.performed {
            return None;
        }
        let step = script.step(self.cursor)?;
        self.performed = true;
        if step.requirement == Requirement::Nothing && !self.is_synced(script) {
            self.advance();
        }
        Some(&step.action)
    }
}

/// Connection-scoped state of one peer.
#[derive(Debug, Clone)]
pub struct PeerSession {
    pub peer: PeerId,
    pub sync: SyncStatus,
    /// Set once the player spawn step has run.
    pub player_entity: Option<EntityId>,
    /// The player's first component request has been served.
    pub components_bootstrapped: bool,
}

impl PeerSession {
    pub fn new(peer: PeerId) -> Self {
        Self {
            peer,
            sync: SyncStatus::default(),
            player_entity: None,
            components_bootstrapped: false,
        }
    }
}
