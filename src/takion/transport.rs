// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The transport facade: owns a [`TakionAssociation`], drives the
//! handshake (or the PS5 short-circuit), spawns the receive worker, and
//! exposes the send API (§4.6).

use std::{
    net::Ipv4Addr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::{Context, Result};
use tokio::{task::JoinHandle, time::timeout};
use tracing::{info, instrument, warn};

use crate::{
    cfg::config::TakionConfig,
    error::CoreError,
    takion::{
        association::{AssociationState, TakionAssociation},
        events::TransportEvents,
        handshake,
        header::{ChunkType, PacketType, write_message, CHUNK_FLAG_DISCONNECT},
        receive,
    },
};

/// A live Takion transport. One per session (§3 `TakionAssociation`
/// lifetime note).
pub struct Transport {
    assoc: Arc<TakionAssociation>,
    cfg: TakionConfig,
    events: Arc<dyn TransportEvents>,
    running: Arc<AtomicBool>,
    receive_handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Transport {
    /// Connects both sockets and drives the association to `connected`:
    /// the PS4-path handshake (§4.6.2, retried up to `handshake_retries`
    /// times with fresh sockets between attempts) or the PS5 short-circuit
    /// (§4.6.3), then spawns the receive worker.
    #[instrument(skip(cfg, events))]
    pub async fn connect(
        peer: Ipv4Addr,
        cfg: TakionConfig,
        console_version: u8,
        events: Arc<dyn TransportEvents>,
    ) -> Result<Arc<Self>> {
        let assoc = Arc::new(Self::establish(peer, &cfg, console_version).await?);
        events.on_state(assoc.state.get());

        let running = Arc::new(AtomicBool::new(true));
        let handle = tokio::spawn(receive::run(
            assoc.clone(),
            cfg.clone(),
            events.clone(),
            running.clone(),
        ));

        Ok(Arc::new(Self {
            assoc,
            cfg,
            events,
            running,
            receive_handle: tokio::sync::Mutex::new(Some(handle)),
        }))
    }

    async fn establish(
        peer: Ipv4Addr,
        cfg: &TakionConfig,
        console_version: u8,
    ) -> Result<TakionAssociation> {
        if console_version >= cfg.ps5_version_threshold {
            let assoc = TakionAssociation::connect(peer, cfg).await?;
            assoc.state.set(AssociationState::Connected);
            info!("PS5 short-circuit: association connected without INIT/COOKIE");
            return Ok(assoc);
        }

        let mut last_err = None;
        for attempt in 1..=cfg.handshake_retries {
            let assoc = TakionAssociation::connect(peer, cfg)
                .await
                .context("(re)creating Takion sockets before handshake attempt")?;
            match handshake::run_once(&assoc, cfg).await {
                Ok(()) => return Ok(assoc),
                Err(e) => {
                    warn!("handshake attempt {attempt}/{} failed: {e:#}", cfg.handshake_retries);
                    last_err = Some(e);
                },
            }
        }
        Err(last_err.unwrap_or_else(|| {
            CoreError::protocol("handshake failed with no recorded error").into()
        }))
    }

    pub fn state(&self) -> AssociationState {
        self.assoc.state.get()
    }

    pub fn association(&self) -> &Arc<TakionAssociation> {
        &self.assoc
    }

    /// Raw send on the stream socket, for already-framed protobuf (§4.6.4).
    pub async fn send_packet(&self, bytes: &[u8]) -> Result<()> {
        self.assoc
            .stream_socket
            .send(bytes)
            .await
            .map_err(|e| CoreError::network("send_packet", e))?;
        self.assoc.stats.note_sent(bytes.len());
        Ok(())
    }

    /// Wraps `payload` in a DATA chunk and sends on both sockets; success
    /// if either delivers (§4.6.4).
    pub async fn send_data_chunk(&self, payload: &[u8]) -> Result<()> {
        let mut out = Vec::new();
        write_message(
            &mut out,
            PacketType::Data,
            self.assoc.tag_remote(),
            0,
            0,
            ChunkType::Data as u8,
            0,
            payload,
        );
        self.send_on_either(&out).await
    }

    /// Chunk 0x8E: `key_pos = seq_local++` (§4.6.4).
    pub async fn send_feedback_state(&self, payload: &[u8]) -> Result<()> {
        self.send_feedback(ChunkType::FeedbackState, payload).await
    }

    /// Chunk 0x8F, otherwise identical to `send_feedback_state` (§4.6.4).
    pub async fn send_feedback_history(&self, payload: &[u8]) -> Result<()> {
        self.send_feedback(ChunkType::FeedbackHistory, payload).await
    }

    async fn send_feedback(&self, chunk_type: ChunkType, payload: &[u8]) -> Result<()> {
        let mut out = Vec::new();
        write_message(
            &mut out,
            PacketType::Data,
            self.assoc.tag_remote(),
            0,
            self.assoc.next_seq_local() as u32,
            chunk_type as u8,
            0,
            payload,
        );
        self.send_on_either(&out).await
    }

    /// Input packet on the stream socket, chunk = DATA, tag = `tag_local`.
    /// Only allowed while `connected` (§4.6.4).
    pub async fn send_input(&self, bytes: &[u8]) -> Result<()> {
        if self.state() != AssociationState::Connected {
            return Err(CoreError::invalid_state(
                format!("send_input called while state={:?}", self.state()),
                "wait for the transport to reach the connected state",
            )
            .into());
        }
        let mut out = Vec::new();
        write_message(
            &mut out,
            PacketType::Data,
            self.assoc.tag_local,
            0,
            0,
            ChunkType::Data as u8,
            0,
            bytes,
        );
        self.assoc
            .stream_socket
            .send(&out)
            .await
            .map_err(|e| CoreError::network("send_input", e))?;
        self.assoc.stats.note_sent(out.len());
        Ok(())
    }

    async fn send_on_either(&self, bytes: &[u8]) -> Result<()> {
        let stream_res = self.assoc.stream_socket.send(bytes).await;
        let control_res = self.assoc.control_socket.send(bytes).await;
        if stream_res.is_ok() || control_res.is_ok() {
            self.assoc.stats.note_sent(bytes.len());
            Ok(())
        } else {
            let e = control_res.unwrap_err();
            Err(CoreError::network("send_data_chunk (both sockets failed)", e).into())
        }
    }

    /// Graceful disconnect (§4.6.6): sends a single DATA chunk with
    /// `chunk_flags=0x01` on the control socket, lowers `thread_running`,
    /// waits for the receive worker to join with a 5s bound (force
    /// terminating on timeout), then drops the sockets. Sockets are closed
    /// only after the worker has stopped.
    #[instrument(skip(self))]
    pub async fn disconnect(&self) -> Result<()> {
        self.assoc.state.set(AssociationState::Disconnecting);

        let mut out = Vec::new();
        write_message(
            &mut out,
            PacketType::Control,
            self.assoc.tag_remote(),
            0,
            0,
            ChunkType::Data as u8,
            CHUNK_FLAG_DISCONNECT,
            &[],
        );
        if let Err(e) = self.assoc.control_socket.send(&out).await {
            warn!("failed to send disconnect signal: {e}");
        } else {
            self.assoc.stats.note_sent(out.len());
        }

        self.running.store(false, Ordering::Release);

        let handle = self.receive_handle.lock().await.take();
        if let Some(handle) = handle {
            let abort_handle = handle.abort_handle();
            match timeout(self.cfg.teardown_join_timeout, handle).await {
                Ok(Ok(())) => {},
                Ok(Err(e)) => warn!("receive worker task panicked: {e}"),
                Err(_) => {
                    warn!(
                        "receive worker did not join within {:?}; force-terminating",
                        self.cfg.teardown_join_timeout
                    );
                    abort_handle.abort();
                },
            }
        }

        self.assoc.state.set(AssociationState::Idle);
        self.events.on_state(AssociationState::Idle);
        Ok(())
    }
}
