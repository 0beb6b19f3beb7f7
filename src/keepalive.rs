// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Session keepalive heartbeat (§4.7): a free-running interval loop adapted
//! from the teacher's NOP-Out/NOP-In exchange (`state_machine::nop_states`)
//! — here there is no handshake to drive, just a send-then-await-reply round
//! trip repeated on a timer, with failure-count-based state tripping instead
//! of a fixed number of steps.

use std::{
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    time::Instant,
};

use anyhow::{Context, Result};
use tokio::{net::UdpSocket, sync::Mutex, task::JoinHandle, time::timeout};
use tracing::{debug, instrument, warn};

use crate::cfg::config::KeepaliveConfig;

/// Observable lifecycle of a [`Keepalive`] (§4.7: `inactive -> active` on
/// start, `active -> failed` once consecutive failures trip).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveState {
    Inactive = 0,
    Active = 1,
    Failed = 2,
}

impl KeepaliveState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Inactive,
            1 => Self::Active,
            _ => Self::Failed,
        }
    }
}

#[derive(Debug, Default)]
struct AtomicKeepaliveState(AtomicU8);

impl AtomicKeepaliveState {
    fn get(&self) -> KeepaliveState {
        KeepaliveState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, s: KeepaliveState) {
        self.0.store(s as u8, Ordering::Release);
    }
}

/// A snapshot of heartbeat stats, handed to the status callback on every
/// state transition (§4.7).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeepaliveStats {
    pub rtt_ema_ms: Option<f64>,
    pub consecutive_failures: u32,
    pub total_sent: u64,
    pub total_failed: u64,
}

impl KeepaliveStats {
    fn new() -> Self {
        Self {
            rtt_ema_ms: None,
            consecutive_failures: 0,
            total_sent: 0,
            total_failed: 0,
        }
    }
}

/// Receives a snapshot every time the keepalive's state transitions.
pub trait KeepaliveStatusSink: Send + Sync {
    fn on_transition(&self, state: KeepaliveState, stats: KeepaliveStats);
}

/// A sink that drops every transition, for tests and headless runs.
pub struct NullKeepaliveStatusSink;

impl KeepaliveStatusSink for NullKeepaliveStatusSink {
    fn on_transition(&self, _state: KeepaliveState, _stats: KeepaliveStats) {}
}

/// Smoothing factor for a 4-sample exponential moving average:
/// `2 / (N + 1)` with `N = 4` (§4.7).
const EMA_ALPHA: f64 = 2.0 / 5.0;

/// One running heartbeat loop bound to a peer's control port.
pub struct Keepalive {
    address: Ipv4Addr,
    control_port: u16,
    cfg: KeepaliveConfig,
    state: AtomicKeepaliveState,
    stats: Mutex<KeepaliveStats>,
    sink: Arc<dyn KeepaliveStatusSink>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Keepalive {
    /// Starts the heartbeat loop immediately, transitioning `inactive ->
    /// active` and invoking the sink once (§4.7).
    #[instrument(skip(cfg, sink))]
    pub fn start(
        address: Ipv4Addr,
        control_port: u16,
        cfg: KeepaliveConfig,
        sink: Arc<dyn KeepaliveStatusSink>,
    ) -> Arc<Self> {
        let this = Arc::new(Self {
            address,
            control_port,
            cfg,
            state: AtomicKeepaliveState::default(),
            stats: Mutex::new(KeepaliveStats::new()),
            sink,
            worker: Mutex::new(None),
        });

        this.state.set(KeepaliveState::Active);
        this.sink.on_transition(KeepaliveState::Active, KeepaliveStats::new());

        let worker_this = this.clone();
        let handle = tokio::spawn(async move { worker_this.run().await });
        // `start` is synchronous and this is the only place the handle is
        // ever set, so a `try_lock` cannot contend.
        *this.worker.try_lock().expect("freshly constructed, no contention") = Some(handle);
        this
    }

    pub fn state(&self) -> KeepaliveState {
        self.state.get()
    }

    pub async fn stats(&self) -> KeepaliveStats {
        *self.stats.lock().await
    }

    /// Stops the loop and waits for it to exit. Idempotent.
    pub async fn stop(&self) {
        if self.state.get() != KeepaliveState::Failed {
            self.state.set(KeepaliveState::Inactive);
        }
        if let Some(handle) = self.worker.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }
    }

    async fn run(self: Arc<Self>) {
        let epoch = Instant::now();
        let mut ticker = tokio::time::interval(self.cfg.interval);
        ticker.tick().await; // first tick fires immediately; consume it.

        loop {
            ticker.tick().await;
            if self.state.get() != KeepaliveState::Active {
                debug!("keepalive loop exiting: state is no longer active");
                return;
            }

            let rtt = self.send_heartbeat(epoch).await;
            let mut stats = self.stats.lock().await;
            stats.total_sent += 1;

            match rtt {
                Some(rtt_ms) => {
                    stats.consecutive_failures = 0;
                    stats.rtt_ema_ms = Some(match stats.rtt_ema_ms {
                        Some(prev) => EMA_ALPHA * rtt_ms + (1.0 - EMA_ALPHA) * prev,
                        None => rtt_ms,
                    });
                },
                None => {
                    stats.total_failed += 1;
                    stats.consecutive_failures += 1;
                    if stats.consecutive_failures >= self.cfg.max_consecutive_failures {
                        self.state.set(KeepaliveState::Failed);
                        let snapshot = *stats;
                        drop(stats);
                        warn!(
                            "keepalive tripped to failed after {} consecutive failures",
                            snapshot.consecutive_failures
                        );
                        self.sink.on_transition(KeepaliveState::Failed, snapshot);
                        return;
                    }
                },
            }
        }
    }

    /// One heartbeat: fresh socket, send `"KEEP:<elapsed_ms>"`, wait for a
    /// matching reply within `cfg.timeout`. Returns the observed RTT in
    /// milliseconds on success.
    async fn send_heartbeat(&self, epoch: Instant) -> Option<f64> {
        let sent_at = Instant::now();
        let body = format!("KEEP:{}", sent_at.duration_since(epoch).as_millis());
        debug_assert!(body.len() <= 64, "heartbeat body must fit in 64 bytes");

        match self.round_trip(&body).await {
            Ok(()) => Some(sent_at.elapsed().as_secs_f64() * 1000.0),
            Err(e) => {
                debug!("keepalive heartbeat to {}:{} failed: {e:#}", self.address, self.control_port);
                None
            },
        }
    }

    async fn round_trip(&self, body: &str) -> Result<()> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .await
            .context("binding ephemeral keepalive socket")?;
        let dest = SocketAddr::V4(SocketAddrV4::new(self.address, self.control_port));
        socket.connect(dest).await.context("connecting keepalive socket")?;
        socket.send(body.as_bytes()).await.context("sending heartbeat")?;

        let mut buf = [0u8; 64];
        let n = timeout(self.cfg.timeout, socket.recv(&mut buf))
            .await
            .context("keepalive reply timed out")?
            .context("receiving heartbeat reply")?;

        let reply = std::str::from_utf8(&buf[..n]).context("heartbeat reply was not UTF-8")?;
        if reply.trim_end_matches('\0') != body {
            anyhow::bail!("heartbeat reply did not echo the request: {reply:?}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering as AOrdering},
        time::Duration,
    };

    use tokio::net::UdpSocket as TokioUdpSocket;

    use super::*;

    struct CountingSink {
        transitions: AtomicUsize,
        last_state: Mutex<Option<KeepaliveState>>,
    }

    impl CountingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                transitions: AtomicUsize::new(0),
                last_state: Mutex::new(None),
            })
        }
    }

    impl KeepaliveStatusSink for CountingSink {
        fn on_transition(&self, state: KeepaliveState, _stats: KeepaliveStats) {
            self.transitions.fetch_add(1, AOrdering::SeqCst);
            // Best-effort: test-only synchronous snapshot via try_lock.
            if let Ok(mut guard) = self.last_state.try_lock() {
                *guard = Some(state);
            }
        }
    }

    #[tokio::test]
    async fn trips_to_failed_after_max_consecutive_failures() {
        // Nothing is listening on this port, so every heartbeat times out.
        let cfg = KeepaliveConfig {
            interval: Duration::from_millis(5),
            timeout: Duration::from_millis(5),
            max_consecutive_failures: 3,
        };
        let sink = CountingSink::new();
        let ka = Keepalive::start(Ipv4Addr::new(127, 0, 0, 1), 18_295, cfg, sink.clone());

        for _ in 0..200 {
            if ka.state() == KeepaliveState::Failed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(ka.state(), KeepaliveState::Failed);
        let stats = ka.stats().await;
        assert!(stats.consecutive_failures >= 3);
        ka.stop().await;
    }

    #[tokio::test]
    async fn successful_heartbeats_update_rtt_ema() {
        let echo = TokioUdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let echo_addr = echo.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            loop {
                let Ok((n, from)) = echo.recv_from(&mut buf).await else { return };
                let _ = echo.send_to(&buf[..n], from).await;
            }
        });

        let cfg = KeepaliveConfig {
            interval: Duration::from_millis(10),
            timeout: Duration::from_millis(200),
            max_consecutive_failures: 5,
        };
        let sink = CountingSink::new();
        let ka = Keepalive::start(Ipv4Addr::LOCALHOST, echo_addr.port(), cfg, sink);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(ka.state(), KeepaliveState::Active);
        let stats = ka.stats().await;
        assert_eq!(stats.consecutive_failures, 0);
        assert!(stats.rtt_ema_ms.is_some());
        ka.stop().await;
    }
}
