//! Server implementation.
//!
//! Single-threaded poll/dispatch loop. One iteration:
//! - polls the transport for at most one event,
//! - lets a packet move its peer's sync cursor if it satisfies the gate,
//! - routes interest and update packets to the dispatcher,
//! - runs at most one pending sync action per peer.
//!
//! Spawn streams run as local tasks next to the loop and share its
//! [`ServerContext`].
//!
//! Determinism notes:
//! - Peers are visited in id order.
//! - The sync script is built once and never changes.

use std::collections::BTreeMap;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::rc::Rc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use skyshard_shared::config::ServerConfig;
use skyshard_shared::items::ItemCatalog;
use skyshard_shared::math::Vec3;
use skyshard_shared::net::{Channel, PeerId, PLACEHOLDER};
use skyshard_shared::transport::{Transport, TransportEvent, UdpTransport};
use skyshard_shared::world::WorldMap;
use tracing::{debug, error, info, warn};

use crate::context::ServerContext;
use crate::dispatch::{interest, Dispatcher};
use crate::spawner;
use crate::sync::{PeerSession, SyncAction, SyncScript};

/// Game server.
pub struct GameServer {
    ctx: Rc<ServerContext>,
    transport: Rc<dyn Transport>,
    local_addr: Option<SocketAddr>,
    script: SyncScript,
    dispatcher: Dispatcher,
    sessions: BTreeMap<PeerId, PeerSession>,
}

impl GameServer {
    /// Binds the UDP transport at `cfg.bind_addr`.
    pub async fn bind(
        cfg: ServerConfig,
        world: &WorldMap,
        items: ItemCatalog,
    ) -> anyhow::Result<Self> {
        let udp = UdpTransport::bind(&cfg.bind_addr, cfg.max_peers)
            .await
            .with_context(|| format!("bind transport on {}", cfg.bind_addr))?;
        let local_addr = udp.local_addr()?;
        let mut server = Self::with_transport(cfg, world, items, Rc::new(udp));
        server.local_addr = Some(local_addr);
        Ok(server)
    }

    /// Builds a server over an existing transport.
    pub fn with_transport(
        cfg: ServerConfig,
        world: &WorldMap,
        items: ItemCatalog,
        transport: Rc<dyn Transport>,
    ) -> Self {
        let ctx = ServerContext::new(cfg, world, items, Rc::clone(&transport));
        let script = SyncScript::build(&ctx.cfg, &ctx.registry);
        info!(steps = script.len(), "Sync script built");
        Self {
            ctx,
            transport,
            local_addr: None,
            script,
            dispatcher: Dispatcher::new(),
            sessions: BTreeMap::new(),
        }
    }

    /// Returns the bound socket address (UDP transport only).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn context(&self) -> &Rc<ServerContext> {
        &self.ctx
    }

    pub fn script(&self) -> &SyncScript {
        &self.script
    }

    pub fn session(&self, peer: PeerId) -> Option<&PeerSession> {
        self.sessions.get(&peer)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Runs one loop iteration.
    pub async fn step(&mut self) -> anyhow::Result<()> {
        let timeout = Duration::from_millis(self.ctx.cfg.poll_timeout_ms);
        if let Some(event) = self.transport.poll(timeout).await? {
            self.handle_event(event);
        }
        self.perform_pending();
        Ok(())
    }

    /// Runs until `shutdown` resolves, then releases every peer.
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                res = self.step() => res?,
            }
        }
        self.shutdown();
        Ok(())
    }

    /// Cancels all spawn streams and disconnects every peer.
    pub fn shutdown(&mut self) {
        self.ctx.spawn_tasks.borrow_mut().cancel_all();
        self.transport.shutdown();
        let peers = self.sessions.len();
        self.sessions.clear();
        info!(peers, "Server shut down");
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected(peer) => {
                info!(%peer, "Peer connected");
                self.sessions.insert(peer, PeerSession::new(peer));
            }
            TransportEvent::Disconnected(peer) => self.on_disconnect(peer),
            TransportEvent::Packet {
                peer,
                channel,
                payload,
            } => self.on_packet(peer, channel, payload),
        }
    }

    fn on_disconnect(&mut self, peer: PeerId) {
        let Some(session) = self.sessions.remove(&peer) else {
            debug!(%peer, "Disconnect from unknown peer");
            return;
        };
        if let Some(player) = session.player_entity {
            self.ctx.spawn_tasks.borrow_mut().cancel(player);
        }
        self.ctx.store.borrow_mut().release_peer(peer);
        info!(%peer, player = ?session.player_entity, "Peer disconnected");
    }

    fn on_packet(&mut self, peer: PeerId, channel: u8, payload: Bytes) {
        let Some(session) = self.sessions.get_mut(&peer) else {
            warn!(%peer, channel, "Packet from peer without session");
            return;
        };

        if session.sync.on_packet(&self.script, channel) {
            debug!(%peer, cursor = session.sync.cursor(), "Sync step advanced");
        }

        match Channel::from_u8(channel) {
            Some(Channel::ComponentInterest) => {
                interest::handle_interest(&self.ctx, session, &payload)
            }
            Some(Channel::ComponentUpdate) => {
                self.dispatcher.handle_update_op(&self.ctx, peer, &payload)
            }
            // Acknowledgements; only the gate looks at them.
            Some(Channel::AssetLoadRequest | Channel::AddEntity) => {}
            Some(other) => {
                debug!(%peer, channel = ?other, "Ignoring packet on server-only channel")
            }
            None => warn!(%peer, channel, "Packet on unknown channel"),
        }
    }

    fn perform_pending(&mut self) {
        for (peer, session) in self.sessions.iter_mut() {
            if let Some(action) = session.sync.take_pending(&self.script) {
                perform(&self.ctx, *peer, session, action);
            }
        }
    }
}

fn perform(ctx: &Rc<ServerContext>, peer: PeerId, session: &mut PeerSession, action: &SyncAction) {
    match action {
        SyncAction::LoadAsset { asset, context } => {
            debug!(%peer, %asset, "Requesting asset load");
            if !ctx.ops.asset_load_request(peer, asset, context) {
                error!(%peer, %asset, "Failed to send asset load request");
            }
        }
        SyncAction::SpawnHome => {
            let home = ctx.store.borrow_mut().allocate_entity_id();
            info!(%peer, entity = %home, prefab = %ctx.cfg.home_prefab, "Spawning home");
            if !ctx.ops.add_entity(peer, home, &ctx.cfg.home_prefab, PLACEHOLDER) {
                error!(%peer, entity = %home, "Failed to send home entity");
            }
        }
        SyncAction::SpawnPlayer => {
            let player = ctx.store.borrow_mut().allocate_entity_id();
            session.player_entity = Some(player);
            if !ctx
                .ops
                .add_entity(peer, player, &ctx.cfg.player_prefab, &ctx.cfg.player_tag)
            {
                error!(%peer, entity = %player, "Failed to send player entity");
                return;
            }
            info!(%peer, entity = %player, "Player spawning");
            let interval = Duration::from_millis(ctx.cfg.initial_spawn_interval_ms);
            spawner::spawn_nearby(ctx, peer, player, Vec3::ZERO, interval);
        }
    }
}

/// Binds a server to an ephemeral localhost port.
pub async fn bind_ephemeral(
    cfg: ServerConfig,
    world: &WorldMap,
    items: ItemCatalog,
) -> anyhow::Result<(GameServer, SocketAddr)> {
    let cfg = ServerConfig {
        bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).to_string(),
        ..cfg
    };
    let server = GameServer::bind(cfg, world, items).await?;
    let addr = server
        .local_addr()
        .context("udp transport has no local address")?;
    Ok((server, addr))
}
