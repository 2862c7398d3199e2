//! Shared fixtures for the integration tests.
//!
//! - [`Harness`] drives a [`GameServer`] over a [`LoopbackTransport`]; tests
//!   queue client packets and inspect what the server sent.
//! - [`ProbeClient`] speaks the UDP framing against a bound server.
//!
//! Spawn streams are local tasks, so every test body runs inside a
//! `LocalSet`.

use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::Value;
use skyshard_server::sync::Requirement;
use skyshard_server::GameServer;
use skyshard_shared::config::ServerConfig;
use skyshard_shared::entity::EntityId;
use skyshard_shared::items::{ItemCatalog, ItemDefinition};
use skyshard_shared::net::{
    decode_op, encode_op, AddEntityOp, Channel, ComponentInterestOp, ComponentPayload,
    ComponentUpdateOp, InterestOverride, PeerId,
};
use skyshard_shared::schema::ComponentId;
use skyshard_shared::transport::{decode_frame, encode_frame, Frame, LoopbackTransport};
use skyshard_shared::world::{Island, WorldInfo, WorldMap};
use tokio::net::UdpSocket;
use tracing::debug;

pub const ISLAND_ASSET: &str = "949069116.json";
pub const ISLAND_PREFAB: &str = "949069116@Island";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// Config with no preloads, a short poll and fixed weather.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        preload_assets: Vec::new(),
        poll_timeout_ms: 5,
        weather_seed: Some(7),
        ..Default::default()
    }
}

/// Islands on the x axis, registered in the given order.
pub fn islands_at(xs: &[f32]) -> WorldMap {
    WorldMap {
        islands: xs
            .iter()
            .map(|&x| Island {
                x,
                y: 0.0,
                z: 0.0,
                island: ISLAND_ASSET.to_string(),
            })
            .collect(),
        ..Default::default()
    }
}

/// Single island at the origin; it gets entity id 1.
pub fn one_island_world() -> WorldMap {
    islands_at(&[0.0])
}

/// No islands, a 2x2 weather grid.
pub fn weather_world() -> WorldMap {
    WorldMap {
        world_info: WorldInfo {
            world_edge_length: 1000.0,
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn sample_items() -> ItemCatalog {
    ItemCatalog::from_definitions([
        ItemDefinition {
            item_type_id: "wanderer_hood".to_string(),
            character_slot: "Head".to_string(),
        },
        ItemDefinition {
            item_type_id: "explorer_cap".to_string(),
            character_slot: "Head".to_string(),
        },
        ItemDefinition {
            item_type_id: "trail_boots".to_string(),
            character_slot: "Feet".to_string(),
        },
    ])
}

/// Server over a loopback transport.
pub struct Harness {
    pub server: GameServer,
    pub transport: Rc<LoopbackTransport>,
}

impl Harness {
    pub fn new(cfg: ServerConfig, world: &WorldMap, items: ItemCatalog) -> Self {
        let transport = Rc::new(LoopbackTransport::new());
        let server = GameServer::with_transport(cfg, world, items, transport.clone());
        Self { server, transport }
    }

    /// Steps the server until every queued event is handled.
    pub async fn pump(&mut self) -> anyhow::Result<()> {
        let mut steps = 0;
        while self.transport.pending_inbound() > 0 {
            self.server.step().await?;
            steps += 1;
        }
        debug!(steps, sessions = self.server.session_count(), "pumped");
        Ok(())
    }

    pub async fn connect(&mut self, peer: PeerId) -> anyhow::Result<()> {
        self.transport.push_connect(peer);
        self.pump().await
    }

    pub async fn disconnect(&mut self, peer: PeerId) -> anyhow::Result<()> {
        self.transport.push_disconnect(peer);
        self.pump().await
    }

    pub async fn ack_asset(&mut self, peer: PeerId) -> anyhow::Result<()> {
        self.send_raw(peer, Channel::AssetLoadRequest.as_u8(), &b"{}"[..]).await
    }

    pub async fn ack_entity(&mut self, peer: PeerId) -> anyhow::Result<()> {
        self.send_raw(peer, Channel::AddEntity.as_u8(), &b"{}"[..]).await
    }

    pub async fn send_raw(
        &mut self,
        peer: PeerId,
        channel: u8,
        payload: impl Into<Bytes>,
    ) -> anyhow::Result<()> {
        self.transport.push_packet(peer, channel, payload);
        self.pump().await
    }

    pub async fn send_update(
        &mut self,
        peer: PeerId,
        entity: EntityId,
        updates: Vec<(ComponentId, Value)>,
    ) -> anyhow::Result<()> {
        let op = ComponentUpdateOp {
            entity_id: entity,
            updates: updates
                .into_iter()
                .map(|(component_id, payload)| ComponentPayload {
                    component_id,
                    payload,
                })
                .collect(),
        };
        self.send_raw(peer, Channel::ComponentUpdate.as_u8(), encode_op(&op)?)
            .await
    }

    pub async fn send_interest(
        &mut self,
        peer: PeerId,
        entity: EntityId,
        ids: &[ComponentId],
    ) -> anyhow::Result<()> {
        let op = ComponentInterestOp {
            entity_id: entity,
            interests: ids
                .iter()
                .map(|&component_id| InterestOverride {
                    component_id,
                    interested: true,
                })
                .collect(),
        };
        self.send_raw(peer, Channel::ComponentInterest.as_u8(), encode_op(&op)?)
            .await
    }

    /// Connects `peer` and acknowledges every step until it is synced.
    /// Returns the player entity.
    pub async fn onboard(&mut self, peer: PeerId) -> anyhow::Result<EntityId> {
        self.connect(peer).await?;
        for _ in 0..self.server.script().len() {
            let (cursor, synced) = {
                let session = self.server.session(peer).context("peer has no session")?;
                (
                    session.sync.cursor(),
                    session.sync.is_synced(self.server.script()),
                )
            };
            if synced {
                break;
            }
            let requirement = self
                .server
                .script()
                .step(cursor)
                .map(|s| s.requirement)
                .context("cursor past the script")?;
            match requirement {
                Requirement::AssetLoaded => self.ack_asset(peer).await?,
                Requirement::EntityAdded => self.ack_entity(peer).await?,
                Requirement::Nothing => self.server.step().await?,
            }
        }
        self.server
            .session(peer)
            .and_then(|s| s.player_entity)
            .context("player was not spawned")
    }

    /// Every op the server sent to `peer` on `channel`, in order.
    pub fn sent_ops<T: DeserializeOwned>(
        &self,
        peer: PeerId,
        channel: Channel,
    ) -> anyhow::Result<Vec<T>> {
        self.transport
            .sent_on(channel)
            .iter()
            .filter(|p| p.peer == peer)
            .map(|p| decode_op(&p.payload))
            .collect()
    }

    pub fn added_entities(&self, peer: PeerId) -> anyhow::Result<Vec<AddEntityOp>> {
        self.sent_ops(peer, Channel::AddEntity)
    }

    /// Entity ids announced to `peer` by spawn streams, in order.
    pub fn streamed_ids(&self, peer: PeerId) -> anyhow::Result<Vec<u64>> {
        let registry = &self.server.context().registry;
        Ok(self
            .added_entities(peer)?
            .into_iter()
            .filter(|op| registry.get(op.entity_id).is_some())
            .map(|op| op.entity_id.0)
            .collect())
    }
}

/// A datagram received by [`ProbeClient`].
#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    Connect,
    Disconnect,
    Data { channel: u8, payload: Bytes },
}

/// Minimal UDP client.
pub struct ProbeClient {
    socket: UdpSocket,
    server: SocketAddr,
}

impl ProbeClient {
    /// Binds a local socket and sends the connect handshake.
    pub async fn connect(server: SocketAddr) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind("127.0.0.1:0").await?;
        let client = Self { socket, server };
        client.send_frame(&Frame::Connect).await?;
        Ok(client)
    }

    pub async fn send(&self, channel: Channel, payload: &[u8]) -> anyhow::Result<()> {
        self.send_frame(&Frame::Data {
            channel: channel.as_u8(),
            payload,
        })
        .await
    }

    pub async fn disconnect(&self) -> anyhow::Result<()> {
        self.send_frame(&Frame::Disconnect).await
    }

    async fn send_frame(&self, frame: &Frame<'_>) -> anyhow::Result<()> {
        self.socket.send_to(&encode_frame(frame), self.server).await?;
        Ok(())
    }

    pub async fn recv(&self, timeout: Duration) -> anyhow::Result<Received> {
        let mut buf = vec![0u8; 64 * 1024];
        let n = tokio::time::timeout(timeout, self.socket.recv(&mut buf))
            .await
            .context("timed out waiting for a datagram")??;
        match decode_frame(&buf[..n]).context("undecodable datagram")? {
            Frame::Connect => Ok(Received::Connect),
            Frame::Disconnect => Ok(Received::Disconnect),
            Frame::Data { channel, payload } => Ok(Received::Data {
                channel,
                payload: Bytes::copy_from_slice(payload),
            }),
        }
    }

    /// Receives the next data packet and decodes it as an op on `channel`.
    pub async fn recv_op<T: DeserializeOwned>(
        &self,
        channel: Channel,
        timeout: Duration,
    ) -> anyhow::Result<T> {
        match self.recv(timeout).await? {
            Received::Data {
                channel: got,
                payload,
            } if got == channel.as_u8() => decode_op(&payload),
            other => anyhow::bail!("expected data on {channel:?}, got {other:?}"),
        }
    }
}
