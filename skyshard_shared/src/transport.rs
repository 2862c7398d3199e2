//! Transport seam.
//!
//! The server only sees opaque peers, channels, and byte payloads. Two
//! implementations:
//! - [`UdpTransport`]: datagram framing over a tokio `UdpSocket`.
//! - [`LoopbackTransport`]: in-memory queue for tests and tools.
//!
//! Datagram frame layout: `[tag u8][channel u8][payload...]`. Connect and
//! disconnect frames carry no channel or payload.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use tokio::net::UdpSocket;
use tokio::time;
use tracing::{debug, info, warn};

use crate::net::{Channel, PeerId};

pub const MAX_DATAGRAM: usize = 64 * 1024;

const FRAME_CONNECT: u8 = 0;
const FRAME_DISCONNECT: u8 = 1;
const FRAME_DATA: u8 = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected(PeerId),
    Disconnected(PeerId),
    Packet {
        peer: PeerId,
        /// Raw channel byte; unknown channels are passed through.
        channel: u8,
        payload: Bytes,
    },
}

/// Multi-channel peer transport.
///
/// All methods take `&self` so the transport can be shared between the main
/// loop and spawner tasks on one thread.
#[async_trait(?Send)]
pub trait Transport {
    /// Waits up to `timeout` for the next event.
    async fn poll(&self, timeout: Duration) -> anyhow::Result<Option<TransportEvent>>;

    /// Queues a packet. Returns `true` once the payload is handed off.
    fn send(&self, peer: PeerId, channel: Channel, payload: &[u8]) -> bool;

    /// Currently connected peers.
    fn peers(&self) -> Vec<PeerId>;

    /// Disconnects every peer and releases resources.
    fn shutdown(&self);
}

/// One decoded datagram.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame<'a> {
    Connect,
    Disconnect,
    Data { channel: u8, payload: &'a [u8] },
}

pub fn encode_frame(frame: &Frame<'_>) -> Bytes {
    let mut buf = BytesMut::new();
    match frame {
        Frame::Connect => buf.put_u8(FRAME_CONNECT),
        Frame::Disconnect => buf.put_u8(FRAME_DISCONNECT),
        Frame::Data { channel, payload } => {
            buf.reserve(2 + payload.len());
            buf.put_u8(FRAME_DATA);
            buf.put_u8(*channel);
            buf.extend_from_slice(payload);
        }
    }
    buf.freeze()
}

pub fn decode_frame(buf: &[u8]) -> Option<Frame<'_>> {
    match buf {
        [FRAME_CONNECT, ..] => Some(Frame::Connect),
        [FRAME_DISCONNECT, ..] => Some(Frame::Disconnect),
        [FRAME_DATA, channel, payload @ ..] => Some(Frame::Data {
            channel: *channel,
            payload,
        }),
        _ => None,
    }
}

#[derive(Debug, Default)]
struct PeerTable {
    next_id: u32,
    by_addr: HashMap<SocketAddr, PeerId>,
    by_id: HashMap<PeerId, SocketAddr>,
}

impl PeerTable {
    fn insert(&mut self, addr: SocketAddr) -> PeerId {
        self.next_id += 1;
        let id = PeerId(self.next_id);
        self.by_addr.insert(addr, id);
        self.by_id.insert(id, addr);
        id
    }

    fn remove(&mut self, addr: &SocketAddr) -> Option<PeerId> {
        let id = self.by_addr.remove(addr)?;
        self.by_id.remove(&id);
        Some(id)
    }
}

/// UDP transport with a connect handshake and a bounded peer count.
pub struct UdpTransport {
    socket: UdpSocket,
    max_peers: usize,
    peers: RefCell<PeerTable>,
}

impl UdpTransport {
    pub async fn bind(addr: &str, max_peers: usize) -> anyhow::Result<Self> {
        let addr: SocketAddr = addr.parse().context("parse bind address")?;
        let socket = UdpSocket::bind(addr).await.context("udp bind")?;
        Ok(Self {
            socket,
            max_peers,
            peers: RefCell::new(PeerTable::default()),
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    fn send_frame(&self, frame: &Frame<'_>, addr: SocketAddr) -> bool {
        match self.socket.try_send_to(&encode_frame(frame), addr) {
            Ok(_) => true,
            Err(e) => {
                warn!(%addr, error = %e, "udp send failed");
                false
            }
        }
    }

    fn handle_datagram(&self, from: SocketAddr, buf: &[u8]) -> Option<TransportEvent> {
        let Some(frame) = decode_frame(buf) else {
            debug!(%from, len = buf.len(), "dropping undecodable datagram");
            return None;
        };

        match frame {
            Frame::Connect => {
                let mut peers = self.peers.borrow_mut();
                if let Some(id) = peers.by_addr.get(&from).copied() {
                    // Repeated handshake; answer again, no new event.
                    drop(peers);
                    self.send_frame(&Frame::Connect, from);
                    debug!(peer = %id, "duplicate connect");
                    return None;
                }
                if peers.by_addr.len() >= self.max_peers {
                    drop(peers);
                    warn!(%from, max_peers = self.max_peers, "refusing connection, server full");
                    self.send_frame(&Frame::Disconnect, from);
                    return None;
                }
                let id = peers.insert(from);
                drop(peers);
                self.send_frame(&Frame::Connect, from);
                Some(TransportEvent::Connected(id))
            }
            Frame::Disconnect => self
                .peers
                .borrow_mut()
                .remove(&from)
                .map(TransportEvent::Disconnected),
            Frame::Data { channel, payload } => {
                let Some(peer) = self.peers.borrow().by_addr.get(&from).copied() else {
                    debug!(%from, channel, "dropping packet from unknown address");
                    return None;
                };
                Some(TransportEvent::Packet {
                    peer,
                    channel,
                    payload: Bytes::copy_from_slice(payload),
                })
            }
        }
    }
}

#[async_trait(?Send)]
impl Transport for UdpTransport {
    async fn poll(&self, timeout: Duration) -> anyhow::Result<Option<TransportEvent>> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        match time::timeout(timeout, self.socket.recv_from(&mut buf)).await {
            Ok(Ok((n, from))) => Ok(self.handle_datagram(from, &buf[..n])),
            Ok(Err(e)) => {
                warn!(error = %e, "udp recv failed");
                Ok(None)
            }
            Err(_) => Ok(None),
        }
    }

    fn send(&self, peer: PeerId, channel: Channel, payload: &[u8]) -> bool {
        let Some(addr) = self.peers.borrow().by_id.get(&peer).copied() else {
            warn!(%peer, "send to unknown peer");
            return false;
        };
        self.send_frame(
            &Frame::Data {
                channel: channel.as_u8(),
                payload,
            },
            addr,
        )
    }

    fn peers(&self) -> Vec<PeerId> {
        self.peers.borrow().by_id.keys().copied().collect()
    }

    fn shutdown(&self) {
        let addrs: Vec<SocketAddr> = self.peers.borrow().by_addr.keys().copied().collect();
        for addr in &addrs {
            self.send_frame(&Frame::Disconnect, *addr);
        }
        *self.peers.borrow_mut() = PeerTable::default();
        info!(peers = addrs.len(), "udp transport shut down");
    }
}

/// A packet recorded by [`LoopbackTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct SentPacket {
    pub peer: PeerId,
    pub channel: Channel,
    pub payload: Bytes,
}

/// In-memory transport: inbound events are queued by the caller and every
/// send is recorded.
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    inbound: RefCell<VecDeque<TransportEvent>>,
    sent: RefCell<Vec<SentPacket>>,
    connected: RefCell<Vec<PeerId>>,
    fail_sends: Cell<bool>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_connect(&self, peer: PeerId) {
        self.inbound
            .borrow_mut()
            .push_back(TransportEvent::Connected(peer));
    }

    pub fn push_disconnect(&self, peer: PeerId) {
        self.inbound
            .borrow_mut()
            .push_back(TransportEvent::Disconnected(peer));
    }

    pub fn push_packet(&self, peer: PeerId, channel: u8, payload: impl Into<Bytes>) {
        self.inbound.borrow_mut().push_back(TransportEvent::Packet {
            peer,
            channel,
            payload: payload.into(),
        });
    }

    pub fn pending_inbound(&self) -> usize {
        self.inbound.borrow().len()
    }

    /// Makes every following send report failure.
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.set(fail);
    }

    pub fn sent(&self) -> Vec<SentPacket> {
        self.sent.borrow().clone()
    }

    pub fn sent_on(&self, channel: Channel) -> Vec<SentPacket> {
        self.sent
            .borrow()
            .iter()
            .filter(|p| p.channel == channel)
            .cloned()
            .collect()
    }

    pub fn clear_sent(&self) {
        self.sent.borrow_mut().clear();
    }
}

#[async_trait(?Send)]
impl Transport for LoopbackTransport {
    async fn poll(&self, timeout: Duration) -> anyhow::Result<Option<TransportEvent>> {
        let next = self.inbound.borrow_mut().pop_front();
        match next {
            Some(event) => {
                let mut connected = self.connected.borrow_mut();
                match &event {
                    TransportEvent::Connected(peer) => connected.push(*peer),
                    TransportEvent::Disconnected(peer) => connected.retain(|p| p != peer),
                    TransportEvent::Packet { .. } => {}
                }
                Ok(Some(event))
            }
            None => {
                time::sleep(timeout).await;
                Ok(None)
            }
        }
    }

    fn send(&self, peer: PeerId, channel: Channel, payload: &[u8]) -> bool {
        if self.fail_sends.get() {
            return false;
        }
        self.sent.borrow_mut().push(SentPacket {
            peer,
            channel,
            payload: Bytes::copy_from_slice(payload),
        });
        true
    }

    fn peers(&self) -> Vec<PeerId> {
        self.connected.borrow().clone()
    }

    fn shutdown(&self) {
        self.connected.borrow_mut().clear();
    }
}
