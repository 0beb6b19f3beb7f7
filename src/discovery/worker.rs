// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The discovery worker: a non-blocking broadcast socket, a bounded
//! scanning duration, and a concurrent-safe results table (§4.3). One
//! worker per active scan, matching the teacher's "per-connection worker,
//! shared `DashMap` results" shape in `client/client.rs`.

use std::{
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use dashmap::DashMap;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::{net::UdpSocket, time::timeout};
use tracing::{debug, instrument, warn};

use crate::{
    cfg::config::DiscoveryConfig,
    discovery::{
        probe::{DiscoveredConsole, build_probe},
        response::{PowerState, parse_announce},
    },
};

/// Wire-exact trailing NUL byte PS5/PS4 firmware expects on probe and wake
/// datagrams (§6).
const TRAILING_NUL: [u8; 1] = [0u8];

/// Bounded, concurrent-safe discovery results, keyed by `host-id` with the
/// address as a fallback key when no `host-id` is present (§4.3).
pub struct DiscoveryResults {
    table: DashMap<String, DiscoveredConsole>,
    capacity: usize,
}

impl DiscoveryResults {
    pub fn new(capacity: usize) -> Self {
        Self { table: DashMap::with_capacity(capacity), capacity }
    }

    pub fn snapshot(&self) -> Vec<DiscoveredConsole> {
        self.table.iter().map(|e| e.value().clone()).collect()
    }

    pub fn get(&self, key: &str) -> Option<DiscoveredConsole> {
        self.table.get(key).map(|e| e.value().clone())
    }

    fn merge(&self, key: String, console: DiscoveredConsole) {
        if self.table.len() >= self.capacity && !self.table.contains_key(&key) {
            warn!("discovery results table at capacity ({}); dropping {key}", self.capacity);
            return;
        }
        self.table.insert(key, console);
    }
}

/// Callback invoked once per merged discovery result.
pub type OnConsole = Box<dyn Fn(&DiscoveredConsole) + Send + Sync>;
/// Callback invoked once when a scan completes.
pub type OnComplete = Box<dyn FnOnce(&DiscoveryResults) + Send>;

fn bind_broadcast_socket() -> Result<UdpSocket> {
    let socket =
        Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("creating socket")?;
    socket.set_nonblocking(true)?;
    socket.set_broadcast(true).context("enabling SO_BROADCAST")?;
    socket.bind(&SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)).into())?;
    UdpSocket::from_std(socket.into()).context("converting to tokio UdpSocket")
}

/// Runs one scan for `duration`, broadcasting every `cfg.scan_interval` to
/// both the PS5 and PS4 discovery ports, merging replies into a fresh
/// [`DiscoveryResults`] table (§4.3).
#[instrument(skip(cfg, on_console, on_complete))]
pub async fn scan(
    cfg: &DiscoveryConfig,
    duration: Duration,
    on_console: Option<OnConsole>,
    on_complete: Option<OnComplete>,
) -> Result<Arc<DiscoveryResults>> {
    let results = Arc::new(DiscoveryResults::new(cfg.results_table_capacity));
    let socket = bind_broadcast_socket()?;
    let epoch = Instant::now();
    let deadline = epoch + duration;

    let probe_body = build_probe();
    let mut probe_bytes = Vec::with_capacity(probe_body.len() + 1);
    probe_bytes.extend_from_slice(probe_body.as_bytes());
    probe_bytes.extend_from_slice(&TRAILING_NUL);

    let mut recv_buf = vec![0u8; 4096];
    let mut next_probe_at = Instant::now();

    while Instant::now() < deadline {
        if Instant::now() >= next_probe_at {
            broadcast_probe(&socket, &probe_bytes, cfg.ps5_port).await;
            broadcast_probe(&socket, &probe_bytes, cfg.ps4_port).await;
            next_probe_at = Instant::now() + cfg.scan_interval;
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let wait = remaining.min(cfg.scan_interval);
        if wait.is_zero() {
            break;
        }

        match timeout(wait, socket.recv_from(&mut recv_buf)).await {
            Ok(Ok((n, from))) => {
                handle_reply(&recv_buf[..n], from, epoch, &results, &on_console);
            },
            Ok(Err(e)) => warn!("discovery recv error: {e}"),
            Err(_) => {}, // timed out waiting for a reply; loop and probe again
        }
    }

    if let Some(cb) = on_complete {
        cb(&results);
    }
    Ok(results)
}

async fn broadcast_probe(socket: &UdpSocket, bytes: &[u8], port: u16) {
    let dest = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, port));
    if let Err(e) = socket.send_to(bytes, dest).await {
        warn!("failed to broadcast discovery probe to port {port}: {e}");
    }
}

fn handle_reply(
    bytes: &[u8],
    from: SocketAddr,
    epoch: Instant,
    results: &Arc<DiscoveryResults>,
    on_console: &Option<OnConsole>,
) {
    let text = String::from_utf8_lossy(bytes);
    let parsed = match parse_announce(&text) {
        Ok(p) => p,
        Err(e) => {
            debug!("ignoring unparseable discovery reply from {from}: {e:#}");
            return;
        },
    };

    let SocketAddr::V4(from_v4) = from else {
        debug!("ignoring non-IPv4 discovery reply from {from}");
        return;
    };

    let console = DiscoveredConsole {
        address: *from_v4.ip(),
        device_name: parsed.device_name,
        host_id: parsed.host_id.clone(),
        console_type: parsed.console_type,
        request_port: parsed.request_port,
        is_ready: parsed.state != PowerState::Standby,
        discovered_at_ms: Instant::now().duration_since(epoch).as_millis() as u64,
    };

    let key = console.host_id.clone().unwrap_or_else(|| console.address.to_string());
    results.merge(key, console.clone());
    if let Some(cb) = on_console {
        cb(&console);
    }
}

/// Budget for the single-console lightweight probe (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SingleProbeResult {
    Ready,
    Standby,
    Unknown,
}

/// Sends one broadcast probe and listens for a reply whose source IP
/// matches `target`, within `cfg.single_probe_timeout` (§4.3). A console
/// previously known to be in standby that does not respond within budget
/// should be reported by the caller as still-standby (it may be in deep
/// sleep); this function itself only reports what it observed.
pub async fn probe_single(target: Ipv4Addr, cfg: &DiscoveryConfig) -> Result<SingleProbeResult> {
    let socket = bind_broadcast_socket()?;
    let probe_body = build_probe();
    let mut probe_bytes = probe_body.into_bytes();
    probe_bytes.extend_from_slice(&TRAILING_NUL);

    broadcast_probe(&socket, &probe_bytes, cfg.ps5_port).await;
    broadcast_probe(&socket, &probe_bytes, cfg.ps4_port).await;

    let deadline = Instant::now() + cfg.single_probe_timeout;
    let mut recv_buf = vec![0u8; 4096];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(SingleProbeResult::Unknown);
        }
        match timeout(remaining, socket.recv_from(&mut recv_buf)).await {
            Ok(Ok((n, SocketAddr::V4(from)))) if *from.ip() == target => {
                let text = String::from_utf8_lossy(&recv_buf[..n]);
                return Ok(match parse_announce(&text) {
                    Ok(p) if p.state == PowerState::Standby => SingleProbeResult::Standby,
                    Ok(_) => SingleProbeResult::Ready,
                    Err(_) => SingleProbeResult::Unknown,
                });
            },
            Ok(Ok(_)) => continue, // reply from a different console; keep waiting
            Ok(Err(e)) => {
                warn!("single-console probe recv error: {e}");
                return Ok(SingleProbeResult::Unknown);
            },
            Err(_) => return Ok(SingleProbeResult::Unknown),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn results_table_respects_capacity() {
        let results = DiscoveryResults::new(1);
        results.merge(
            "a".to_string(),
            DiscoveredConsole {
                address: Ipv4Addr::new(1, 1, 1, 1),
                device_name: None,
                host_id: None,
                console_type: crate::discovery::response::ConsoleType::Unknown,
                request_port: 9295,
                is_ready: true,
                discovered_at_ms: 0,
            },
        );
        results.merge(
            "b".to_string(),
            DiscoveredConsole {
                address: Ipv4Addr::new(2, 2, 2, 2),
                device_name: None,
                host_id: None,
                console_type: crate::discovery::response::ConsoleType::Unknown,
                request_port: 9295,
                is_ready: true,
                discovered_at_ms: 0,
            },
        );
        assert_eq!(results.snapshot().len(), 1);
        assert!(results.get("a").is_some());
        assert!(results.get("b").is_none());
    }

    #[test]
    fn repeat_reply_updates_in_place_without_duplicating() {
        let results = DiscoveryResults::new(16);
        let console = |ready| DiscoveredConsole {
            address: Ipv4Addr::new(1, 1, 1, 1),
            device_name: None,
            host_id: Some("HOST1".to_string()),
            console_type: crate::discovery::response::ConsoleType::Ps5,
            request_port: 9295,
            is_ready: ready,
            discovered_at_ms: 0,
        };
        results.merge("HOST1".to_string(), console(false));
        results.merge("HOST1".to_string(), console(true));
        assert_eq!(results.snapshot().len(), 1);
        assert!(results.get("HOST1").unwrap().is_ready);
    }
}
