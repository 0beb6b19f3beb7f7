// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The session facade (§4.8): composes the credential store, discovery,
//! wake, registration, the Takion transport, and keepalive into a single
//! `start`/`stop` lifecycle. Grounded on the teacher's
//! `client::pool_sessions::Pool`, which owns sessions and composes
//! login + connection + keepalive-via-NOP behind one narrow API.

use std::{net::Ipv4Addr, sync::Arc, time::Instant};

use anyhow::{Context, Result, bail};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::{
    cfg::config::Config,
    credentials::{CredentialStore, UnifiedCredentials},
    discovery,
    error::CoreError,
    keepalive::{Keepalive, KeepaliveState, KeepaliveStatusSink, NullKeepaliveStatusSink},
    takion::{events::TransportEvents, transport::Transport, AssociationState},
    wake::{self, WakeResult},
};

/// Observable lifecycle of a [`Session`], one notch coarser than the
/// underlying Takion association state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    WakingConsole,
    Connecting,
    Connected,
    Disconnected,
    Error,
}

/// Owns the long-lived credential store and, while a session is active, the
/// Takion transport and keepalive loop bound to it. One `Session` per paired
/// console at a time (§4.8).
pub struct Session {
    cfg: Config,
    credentials: Arc<CredentialStore>,
    live: Mutex<Option<LiveSession>>,
}

struct LiveSession {
    address: Ipv4Addr,
    transport: Arc<Transport>,
    keepalive: Arc<Keepalive>,
}

impl Session {
    /// Opens the credential store (`cfg.credentials.directory`) and runs its
    /// load/repair pass before returning.
    #[instrument(skip(cfg))]
    pub async fn new(cfg: Config) -> Result<Self> {
        let credentials = Arc::new(CredentialStore::new(
            cfg.credentials.directory.clone(),
            cfg.credentials.table_capacity,
        ));
        credentials.load_all().await.context("loading credential store")?;
        Ok(Self { cfg, credentials, live: Mutex::new(None) })
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    pub async fn state(&self) -> SessionState {
        match &*self.live.lock().await {
            None => SessionState::Idle,
            Some(live) => match live.transport.state() {
                AssociationState::Connected => SessionState::Connected,
                AssociationState::Error => SessionState::Error,
                AssociationState::Disconnecting | AssociationState::Idle => {
                    SessionState::Disconnected
                },
                _ => SessionState::Connecting,
            },
        }
    }

    /// The external `start_session(address, version)` operation (§4.8):
    /// looks up credentials, wakes the console if discovery shows standby,
    /// drives the Takion handshake, and starts keepalive once connected.
    #[instrument(skip(self, events, keepalive_sink))]
    pub async fn start(
        &self,
        address: Ipv4Addr,
        console_version: u8,
        events: Arc<dyn TransportEvents>,
        keepalive_sink: Option<Arc<dyn KeepaliveStatusSink>>,
    ) -> Result<()> {
        if self.live.lock().await.is_some() {
            bail!(CoreError::invalid_state(
                "a session is already active; call stop() first",
                "stop the current session before starting another",
            ));
        }

        let unified = self.lookup_credentials(&address).await?;

        self.ensure_console_awake(address, &unified).await?;

        let takion_cfg = self.cfg.takion.clone();
        let transport = Transport::connect(address, takion_cfg, console_version, events)
            .await
            .context("establishing Takion transport")?;
        info!("Takion transport connected to {address}");

        let keepalive_sink = keepalive_sink.unwrap_or_else(|| Arc::new(NullKeepaliveStatusSink));
        let keepalive = Keepalive::start(
            address,
            self.cfg.takion.control_port,
            self.cfg.keepalive.clone(),
            keepalive_sink,
        );

        *self.live.lock().await = Some(LiveSession { address, transport, keepalive });
        Ok(())
    }

    /// §4.2's unified accessor, translated into the two fail-fast error
    /// kinds §4.8 names: `not-registered` (no record) or
    /// `invalid-credentials` (record present but structurally unsound).
    async fn lookup_credentials(&self, address: &Ipv4Addr) -> Result<UnifiedCredentials> {
        let addr_str = address.to_string();
        let unified = self.credentials.get_unified(&addr_str).await?;
        if !unified.valid {
            bail!(CoreError::InvalidCredentials {
                message: format!("credential record for {addr_str} is structurally invalid"),
            });
        }
        Ok(unified)
    }

    /// If a lightweight discovery probe shows the console in standby, sends
    /// the wake datagram and polls discovery for readiness within
    /// `cfg.runtime.connect_timeout` (§4.8 step 2).
    async fn ensure_console_awake(
        &self,
        address: Ipv4Addr,
        unified: &UnifiedCredentials,
    ) -> Result<()> {
        let probe = discovery::probe_single(address, &self.cfg.discovery)
            .await
            .context("single-console discovery probe")?;
        if probe != discovery::SingleProbeResult::Standby {
            return Ok(());
        }

        info!("{address} is in standby; sending wake datagram");
        let wake_result = wake::send_wake(
            address,
            self.cfg.discovery.ps5_port,
            &unified.wake_credential_dec,
            self.cfg.wake.send_timeout,
        )
        .await;
        match wake_result {
            WakeResult::Success => {},
            WakeResult::InvalidCredential => bail!(CoreError::InvalidCredentials {
                message: "wake datagram credential was rejected before sending".to_string(),
            }),
            WakeResult::Timeout => bail!(CoreError::timeout(
                "wake send",
                self.cfg.wake.send_timeout.as_millis() as u64
            )),
            WakeResult::NetworkError => bail!(CoreError::network(
                "wake send",
                std::io::Error::other("wake datagram send failed"),
            )),
        }

        let deadline = Instant::now() + self.cfg.runtime.connect_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                bail!(CoreError::timeout(
                    "waiting for console to leave standby after wake",
                    self.cfg.runtime.connect_timeout.as_millis() as u64
                ));
            }
            match discovery::probe_single(address, &self.cfg.discovery).await {
                Ok(discovery::SingleProbeResult::Standby) | Ok(discovery::SingleProbeResult::Unknown) => {
                    tokio::time::sleep(self.cfg.discovery.single_probe_timeout.min(remaining)).await;
                },
                Ok(discovery::SingleProbeResult::Ready) => return Ok(()),
                Err(e) => warn!("readiness probe for {address} failed, retrying: {e:#}"),
            }
        }
    }

    /// Symmetric teardown (§4.8): keepalive stop, then transport disconnect.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<()> {
        let Some(live) = self.live.lock().await.take() else {
            return Ok(());
        };
        live.keepalive.stop().await;
        live.transport.disconnect().await.context("disconnecting Takion transport")?;
        info!("session for {} stopped", live.address);
        Ok(())
    }

    pub async fn keepalive_state(&self) -> Option<KeepaliveState> {
        self.live.lock().await.as_ref().map(|l| l.keepalive.state())
    }

    /// Exposes the live transport for send calls (`send_input`, etc.); not
    /// used by the UI before a successful `start`.
    pub async fn transport(&self) -> Option<Arc<Transport>> {
        self.live.lock().await.as_ref().map(|l| l.transport.clone())
    }
}
