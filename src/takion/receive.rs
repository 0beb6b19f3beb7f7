// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The steady-state receive loop (§4.6.5): a single background worker that
//! is the only reader of both sockets once the association is connected.
//!
//! Interpretation recorded for an ambiguity in the wire description ("a
//! non-control packet drops to the media handler"): every message this
//! client sends, on both the control and stream socket, carries the full
//! 17-byte header regardless of its `packet_type` byte (`send_data_chunk`
//! and the feedback senders use `packet_type = Data`, the handshake uses
//! `packet_type = Control`). Dispatch is therefore keyed on `chunk_type`
//! alone, for both packet types; `packet_type` is not re-examined on
//! receipt. See DESIGN.md.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

use tokio::time::sleep;
use tracing::{debug, instrument, warn};

use crate::{
    cfg::config::TakionConfig,
    error::ErrorKind,
    takion::{
        association::{AssociationState, TakionAssociation},
        chunk::classify,
        events::TransportEvents,
        header::{ChunkType, parse_message},
    },
};

/// Runs until `running` is cleared or a non-timeout receive error occurs.
#[instrument(skip(assoc, cfg, events, running))]
pub async fn run(
    assoc: Arc<TakionAssociation>,
    cfg: TakionConfig,
    events: Arc<dyn TransportEvents>,
    running: Arc<AtomicBool>,
) {
    let mut cbuf = vec![0u8; cfg.mtu_ceiling];
    let mut sbuf = vec![0u8; cfg.mtu_ceiling];

    while running.load(Ordering::Acquire) {
        let outcome = tokio::select! {
            biased;
            res = assoc.control_socket.recv(&mut cbuf) => Some((res, true)),
            res = assoc.stream_socket.recv(&mut sbuf) => Some((res, false)),
            _ = sleep(cfg.select_timeout) => None,
        };

        let Some((res, from_control)) = outcome else {
            continue;
        };

        let n = match res {
            Ok(n) => n,
            Err(e) => {
                warn!("Takion receive loop fatal error: {e}");
                assoc.state.set(AssociationState::Error);
                events.on_error(ErrorKind::Network, &e.to_string());
                return;
            },
        };

        let datagram = if from_control { &cbuf[..n] } else { &sbuf[..n] };
        handle_datagram(datagram, &assoc, &events);
    }
    debug!("Takion receive loop exiting: thread_running cleared");
}

fn handle_datagram(datagram: &[u8], assoc: &TakionAssociation, events: &Arc<dyn TransportEvents>) {
    assoc.stats.note_received(datagram.len(), Instant::now(), assoc.epoch);

    if datagram.is_empty() {
        debug!("dropping empty datagram");
        return;
    }

    let parsed = match parse_message(datagram) {
        Ok(p) => p,
        Err(e) => {
            debug!("dropping unparseable Takion datagram: {e:#}");
            return;
        },
    };

    match parsed.chunk_type() {
        Some(ChunkType::Data) => {
            events.on_data(classify(parsed.payload), parsed.payload);
        },
        Some(ChunkType::InitAck) if assoc.state.get() == AssociationState::InitSent => {
            debug!("INIT_ACK observed by receive loop outside the handshake path; ignoring");
        },
        Some(ChunkType::CookieAck) if assoc.state.get() == AssociationState::CookieSent => {
            debug!("COOKIE_ACK observed by receive loop outside the handshake path; ignoring");
        },
        Some(other) => {
            debug!("delivering chunk_type={other:?} payload to data callback");
            events.on_data(classify(parsed.payload), parsed.payload);
        },
        None => {
            debug!("dropping unknown chunk_type=0x{:02x}", parsed.chunk_type_raw);
        },
    }
}
