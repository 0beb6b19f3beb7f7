// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    sync::atomic::{AtomicU16, AtomicU32, AtomicU64, AtomicU8, Ordering},
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use rand::Rng;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::{net::UdpSocket, time::timeout};
use tracing::debug;

use crate::{cfg::config::TakionConfig, error::CoreError};

/// Observable lifecycle of a [`TakionAssociation`] (§3, §8: no backward
/// transitions except `connected -> disconnecting -> idle` and `* -> error`).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationState {
    Idle = 0,
    Connecting = 1,
    InitSent = 2,
    InitAckReceived = 3,
    CookieSent = 4,
    CookieAckReceived = 5,
    Connected = 6,
    Disconnecting = 7,
    Error = 8,
}

impl AssociationState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Connecting,
            2 => Self::InitSent,
            3 => Self::InitAckReceived,
            4 => Self::CookieSent,
            5 => Self::CookieAckReceived,
            6 => Self::Connected,
            7 => Self::Disconnecting,
            _ => Self::Error,
        }
    }
}

/// Atomically readable cross-thread view of association state (§5: "external
/// observers of state must use the state getter").
#[derive(Debug, Default)]
pub struct AtomicAssociationState(AtomicU8);

impl AtomicAssociationState {
    pub fn new(initial: AssociationState) -> Self {
        Self(AtomicU8::new(initial as u8))
    }

    pub fn get(&self) -> AssociationState {
        AssociationState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, s: AssociationState) {
        self.0.store(s as u8, Ordering::Release);
    }
}

/// Packet/byte counters, updated from the receive worker only.
#[derive(Debug, Default)]
pub struct AssociationStats {
    pub packets_sent: AtomicU64,
    pub packets_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    last_packet_timestamp_ms: AtomicU64,
}

impl AssociationStats {
    pub fn note_sent(&self, bytes: usize) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn note_received(&self, bytes: usize, now: Instant, epoch: Instant) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
        self.last_packet_timestamp_ms
            .store(now.duration_since(epoch).as_millis() as u64, Ordering::Relaxed);
    }

    pub fn last_packet_timestamp_ms(&self) -> u64 {
        self.last_packet_timestamp_ms.load(Ordering::Relaxed)
    }
}

/// A live Takion transport: two connected UDP sockets plus the tags and
/// sequence numbers learned (or not yet learned) from the handshake.
pub struct TakionAssociation {
    pub tag_local: u32,
    pub tag_remote: AtomicU32,
    pub seq_local: AtomicU16,
    pub seq_remote_initial: AtomicU32,
    pub state: AtomicAssociationState,
    pub control_socket: UdpSocket,
    pub stream_socket: UdpSocket,
    pub stats: AssociationStats,
    pub epoch: Instant,
}

impl TakionAssociation {
    /// Connects both UDP sockets to the peer, applies the configured
    /// buffer sizes, and drains any unsolicited bytes sitting on the control
    /// socket (§4.6.1).
    pub async fn connect(peer: Ipv4Addr, cfg: &TakionConfig) -> Result<Self> {
        if cfg.control_port == cfg.stream_port {
            return Err(CoreError::invalid_parameter(format!(
                "Takion control_port and stream_port must differ, both were {}",
                cfg.control_port
            ))
            .into());
        }

        let control_socket =
            connect_udp(peer, cfg.control_port, cfg.recv_buffer_bytes, cfg.send_buffer_bytes)
                .await
                .context("connecting Takion control socket")?;
        let stream_socket =
            connect_udp(peer, cfg.stream_port, cfg.recv_buffer_bytes, cfg.send_buffer_bytes)
                .await
                .context("connecting Takion stream socket")?;

        let assoc = Self {
            tag_local: rand::rng().random(),
            tag_remote: AtomicU32::new(0),
            seq_local: AtomicU16::new(1),
            seq_remote_initial: AtomicU32::new(0),
            state: AtomicAssociationState::new(AssociationState::Idle),
            control_socket,
            stream_socket,
            stats: AssociationStats::default(),
            epoch: Instant::now(),
        };

        assoc.drain_stale_control_bytes(cfg.drain_timeout).await;
        Ok(assoc)
    }

    /// Drains unsolicited bytes sitting on the control socket for up to
    /// `budget` before the handshake starts, so stale data from a previous
    /// attempt cannot corrupt the handshake parser.
    pub async fn drain_stale_control_bytes(&self, budget: Duration) {
        let mut scratch = [0u8; 2048];
        let deadline = Instant::now() + budget;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return;
            }
            match timeout(remaining, self.control_socket.recv(&mut scratch)).await {
                Ok(Ok(n)) => debug!("drained {n} stale bytes from control socket"),
                _ => return,
            }
        }
    }

    pub fn next_seq_local(&self) -> u16 {
        self.seq_local.fetch_add(1, Ordering::SeqCst)
    }

    pub fn tag_remote(&self) -> u32 {
        self.tag_remote.load(Ordering::Acquire)
    }

    pub fn set_tag_remote(&self, tag: u32) {
        self.tag_remote.store(tag, Ordering::Release);
    }
}

async fn connect_udp(
    peer: Ipv4Addr,
    port: u16,
    recv_buffer_bytes: usize,
    send_buffer_bytes: usize,
) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .context("creating UDP socket")?;
    socket.set_nonblocking(true)?;
    socket.set_recv_buffer_size(recv_buffer_bytes)?;
    socket.set_send_buffer_size(send_buffer_bytes)?;
    socket.bind(&SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)).into())?;
    socket.connect(&SocketAddr::V4(SocketAddrV4::new(peer, port)).into())?;

    UdpSocket::from_std(socket.into()).context("converting to tokio UdpSocket")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_atomic() {
        let s = AtomicAssociationState::new(AssociationState::Idle);
        assert_eq!(s.get(), AssociationState::Idle);
        s.set(AssociationState::Connected);
        assert_eq!(s.get(), AssociationState::Connected);
    }
}
