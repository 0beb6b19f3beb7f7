// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The PS4-path association handshake: INIT / INIT-ACK / COOKIE / COOKIE-ACK,
//! expressed as an explicit state machine rather than ad hoc "if we got an
//! INIT_ACK while expecting a COOKIE_ACK, read again" peeking (§9).

use anyhow::{Context, Result, bail};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::{
    cfg::config::TakionConfig,
    error::CoreError,
    takion::{
        association::{AssociationState, TakionAssociation},
        header::{ChunkType, PacketType, parse_message, write_message},
        state_machine::{StateMachine, StateMachineCtx, Transition},
    },
};

/// `a_rwnd` the client advertises in INIT. Per SPEC_FULL.md's recorded
/// open-question decision: stored/reported but never enforced by this peer.
const A_RWND: u32 = 102_400;

/// Grace period to wait for an immediate duplicate INIT_ACK retransmission
/// after accepting the first one, per §4.6.2 ("the first INIT_ACK may be
/// duplicated by some firmware and must be tolerated").
const DUP_INIT_ACK_GRACE: std::time::Duration = std::time::Duration::from_millis(50);

/// Context driving one handshake attempt over an already-connected
/// association's control socket.
pub struct HandshakeCtx<'a> {
    assoc: &'a TakionAssociation,
    cfg: &'a TakionConfig,
    cookie: Option<[u8; 32]>,
    dup_init_ack_tolerated: bool,
    state: Option<HandshakeStates>,
}

impl<'a> HandshakeCtx<'a> {
    pub fn new(assoc: &'a TakionAssociation, cfg: &'a TakionConfig) -> Self {
        Self {
            assoc,
            cfg,
            cookie: None,
            dup_init_ack_tolerated: false,
            state: Some(HandshakeStates::SendInit(SendInit)),
        }
    }

    async fn recv_control(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.cfg.mtu_ceiling];
        let n = timeout(self.cfg.expectation_timeout, self.assoc.control_socket.recv(&mut buf))
            .await
            .map_err(|_| CoreError::timeout("handshake expectation", self.cfg.expectation_timeout.as_millis() as u64))?
            .map_err(|e| CoreError::network("handshake recv", e))?;
        buf.truncate(n);
        Ok(buf)
    }

    async fn send_init(&self) -> Result<()> {
        let mut payload = Vec::with_capacity(16);
        payload.extend_from_slice(&self.assoc.tag_local.to_be_bytes());
        payload.extend_from_slice(&A_RWND.to_be_bytes());
        payload.extend_from_slice(&1u16.to_be_bytes()); // out_streams
        payload.extend_from_slice(&1u16.to_be_bytes()); // in_streams
        payload.extend_from_slice(&self.assoc.tag_local.to_be_bytes()); // initial_seq

        let mut out = Vec::new();
        write_message(&mut out, PacketType::Control, 0, 0, 0, ChunkType::Init as u8, 0, &payload);
        self.assoc
            .control_socket
            .send(&out)
            .await
            .map_err(|e| CoreError::network("send INIT", e))?;
        self.assoc.stats.note_sent(out.len());
        self.assoc.state.set(AssociationState::InitSent);
        Ok(())
    }

    async fn await_init_ack(&mut self) -> Result<()> {
        loop {
            let datagram = self.recv_control().await?;
            let parsed = parse_message(&datagram).context("parsing INIT_ACK candidate")?;
            match parsed.chunk_type() {
                Some(ChunkType::InitAck) => {
                    // Layout: tag_remote(4) || a_rwnd(4) || out_streams(2) ||
                    // in_streams(2) || seq(4) || cookie(32); seq sits in the
                    // 4 bytes immediately before the trailing cookie.
                    if parsed.payload.len() < 36 {
                        bail!(CoreError::protocol(format!(
                            "INIT_ACK payload too short: {} bytes",
                            parsed.payload.len()
                        )));
                    }
                    let tag_remote = u32::from_be_bytes(parsed.payload[0..4].try_into()?);
                    if tag_remote == 0 {
                        bail!(CoreError::protocol(
                            "INIT_ACK carried a zero remote tag".to_string()
                        ));
                    }
                    let cookie_start = parsed.payload.len() - 32;
                    let seq_remote_initial =
                        u32::from_be_bytes(parsed.payload[cookie_start - 4..cookie_start].try_into()?);
                    let mut cookie = [0u8; 32];
                    cookie.copy_from_slice(&parsed.payload[cookie_start..]);

                    self.assoc.set_tag_remote(tag_remote);
                    self.assoc
                        .seq_remote_initial
                        .store(seq_remote_initial, std::sync::atomic::Ordering::Release);
                    self.cookie = Some(cookie);
                    self.assoc.state.set(AssociationState::InitAckReceived);

                    // Some firmware retransmits the INIT_ACK once immediately;
                    // swallow that duplicate here instead of letting it
                    // surface as an unexpected datagram once we move on to
                    // sending COOKIE.
                    let mut scratch = vec![0u8; self.cfg.mtu_ceiling];
                    if let Ok(Ok(n)) =
                        timeout(DUP_INIT_ACK_GRACE, self.assoc.control_socket.recv(&mut scratch)).await
                    {
                        match parse_message(&scratch[..n]) {
                            Ok(dup) if dup.chunk_type() == Some(ChunkType::InitAck) => {
                                debug!("tolerated immediate duplicate INIT_ACK retransmission");
                            },
                            _ => warn!(
                                "discarding unexpected datagram received during the INIT_ACK duplicate grace period"
                            ),
                        }
                    }
                    return Ok(());
                },
                _ => {
                    bail!(CoreError::protocol(format!(
                        "expected INIT_ACK, got chunk_type=0x{:02x}",
                        parsed.chunk_type_raw
                    )));
                },
            }
        }
    }

    async fn send_cookie(&self) -> Result<()> {
        let cookie = self.cookie.context("no cookie captured before COOKIE step")?;
        let mut out = Vec::new();
        write_message(
            &mut out,
            PacketType::Control,
            self.assoc.tag_remote(),
            0,
            0,
            ChunkType::Cookie as u8,
            0,
            &cookie,
        );
        self.assoc
            .control_socket
            .send(&out)
            .await
            .map_err(|e| CoreError::network("send COOKIE", e))?;
        self.assoc.stats.note_sent(out.len());
        self.assoc.state.set(AssociationState::CookieSent);
        Ok(())
    }

    async fn await_cookie_ack(&mut self) -> Result<()> {
        loop {
            let datagram = self.recv_control().await?;
            let parsed = parse_message(&datagram).context("parsing COOKIE_ACK candidate")?;
            match parsed.chunk_type() {
                Some(ChunkType::CookieAck) => {
                    self.assoc.state.set(AssociationState::Connected);
                    return Ok(());
                },
                Some(ChunkType::InitAck) => {
                    if self.dup_init_ack_tolerated {
                        bail!(CoreError::protocol(
                            "received a third INIT_ACK before COOKIE_ACK".to_string()
                        ));
                    }
                    self.dup_init_ack_tolerated = true;
                    warn!("tolerating late duplicate INIT_ACK while awaiting COOKIE_ACK");
                    continue;
                },
                _ => {
                    bail!(CoreError::protocol(format!(
                        "expected COOKIE_ACK, got chunk_type=0x{:02x}",
                        parsed.chunk_type_raw
                    )));
                },
            }
        }
    }
}

#[derive(Debug)]
pub struct SendInit;
#[derive(Debug)]
pub struct AwaitInitAck;
#[derive(Debug)]
pub struct SendCookie;
#[derive(Debug)]
pub struct AwaitCookieAck;

#[derive(Debug)]
pub enum HandshakeStates {
    SendInit(SendInit),
    AwaitInitAck(AwaitInitAck),
    SendCookie(SendCookie),
    AwaitCookieAck(AwaitCookieAck),
}

type HandshakeStep = Transition<HandshakeStates, Result<()>>;

impl<'ctx> StateMachine<HandshakeCtx<'ctx>, HandshakeStep> for SendInit {
    async fn step(&self, ctx: &mut HandshakeCtx<'ctx>) -> HandshakeStep {
        match ctx.send_init().await {
            Ok(()) => Transition::Next(HandshakeStates::AwaitInitAck(AwaitInitAck), Ok(())),
            Err(e) => Transition::Done(Err(e)),
        }
    }
}

impl<'ctx> StateMachine<HandshakeCtx<'ctx>, HandshakeStep> for AwaitInitAck {
    async fn step(&self, ctx: &mut HandshakeCtx<'ctx>) -> HandshakeStep {
        match ctx.await_init_ack().await {
            Ok(()) => Transition::Next(HandshakeStates::SendCookie(SendCookie), Ok(())),
            Err(e) => Transition::Done(Err(e)),
        }
    }
}

impl<'ctx> StateMachine<HandshakeCtx<'ctx>, HandshakeStep> for SendCookie {
    async fn step(&self, ctx: &mut HandshakeCtx<'ctx>) -> HandshakeStep {
        match ctx.send_cookie().await {
            Ok(()) => Transition::Next(HandshakeStates::AwaitCookieAck(AwaitCookieAck), Ok(())),
            Err(e) => Transition::Done(Err(e)),
        }
    }
}

impl<'ctx> StateMachine<HandshakeCtx<'ctx>, HandshakeStep> for AwaitCookieAck {
    async fn step(&self, ctx: &mut HandshakeCtx<'ctx>) -> HandshakeStep {
        match ctx.await_cookie_ack().await {
            Ok(()) => Transition::Done(Ok(())),
            Err(e) => Transition::Done(Err(e)),
        }
    }
}

impl<'s> StateMachineCtx<HandshakeCtx<'s>, ()> for HandshakeCtx<'s> {
    async fn execute(&mut self, cancel: &tokio_util::sync::CancellationToken) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                bail!("handshake cancelled");
            }
            let state = self.state.take().context("handshake state must be set")?;
            let trans = match state {
                HandshakeStates::SendInit(s) => s.step(self).await,
                HandshakeStates::AwaitInitAck(s) => s.step(self).await,
                HandshakeStates::SendCookie(s) => s.step(self).await,
                HandshakeStates::AwaitCookieAck(s) => s.step(self).await,
            };
            match trans {
                Transition::Next(next, r) => {
                    r?;
                    self.state = Some(next);
                },
                Transition::Stay(r) => return r,
                Transition::Done(r) => return r,
            }
        }
    }
}

/// Runs a single handshake attempt to completion (no internal retrying —
/// the caller in `takion::mod` owns the retry-with-fresh-sockets loop).
pub async fn run_once(assoc: &TakionAssociation, cfg: &TakionConfig) -> Result<()> {
    assoc.state.set(AssociationState::Connecting);
    let mut ctx = HandshakeCtx::new(assoc, cfg);
    ctx.execute(&tokio_util::sync::CancellationToken::new()).await
}
