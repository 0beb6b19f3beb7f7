// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! §8 scenario 5: a full PS4-path handshake (INIT / INIT-ACK / COOKIE /
//! COOKIE-ACK) against a fake console on loopback.

use std::{net::Ipv4Addr, sync::{atomic::Ordering, Arc}};

use takion_rp_core::takion::{
    events::NullEvents,
    header::{ChunkType, PacketType, parse_message, write_message},
    transport::Transport,
    AssociationState,
};
use tokio::net::UdpSocket;

use crate::unit_tests::{bind_ephemeral, test_takion_config};

const FAKE_TAG_REMOTE: u32 = 0x1122_3344;
const FAKE_SEQ_REMOTE_INITIAL: u32 = 0x0000_2024;
const FAKE_COOKIE: [u8; 32] = [0x5A; 32];

/// Runs one handshake turn as the console: INIT -> INIT_ACK, COOKIE -> COOKIE_ACK.
async fn run_fake_console(control_socket: UdpSocket) {
    let mut buf = vec![0u8; 2048];

    let (n, client_addr) = control_socket.recv_from(&mut buf).await.expect("recv INIT");
    let init = parse_message(&buf[..n]).expect("parses INIT");
    assert_eq!(init.chunk_type(), Some(ChunkType::Init));

    // tag_remote(4) || a_rwnd(4) || out_streams(2) || in_streams(2) || seq(4) || cookie(32)
    let mut ack_payload = Vec::with_capacity(48);
    ack_payload.extend_from_slice(&FAKE_TAG_REMOTE.to_be_bytes());
    ack_payload.extend_from_slice(&102_400u32.to_be_bytes());
    ack_payload.extend_from_slice(&1u16.to_be_bytes());
    ack_payload.extend_from_slice(&1u16.to_be_bytes());
    ack_payload.extend_from_slice(&FAKE_SEQ_REMOTE_INITIAL.to_be_bytes());
    ack_payload.extend_from_slice(&FAKE_COOKIE);
    let mut out = Vec::new();
    write_message(&mut out, PacketType::Control, 0, 0, 0, ChunkType::InitAck as u8, 0, &ack_payload);
    control_socket.send_to(&out, client_addr).await.expect("send INIT_ACK");

    let (n, _) = control_socket.recv_from(&mut buf).await.expect("recv COOKIE");
    let cookie_msg = parse_message(&buf[..n]).expect("parses COOKIE");
    assert_eq!(cookie_msg.chunk_type(), Some(ChunkType::Cookie));
    assert_eq!(cookie_msg.payload, &FAKE_COOKIE[..]);

    let mut out = Vec::new();
    write_message(&mut out, PacketType::Control, 0, 0, 0, ChunkType::CookieAck as u8, 0, &[]);
    control_socket.send_to(&out, client_addr).await.expect("send COOKIE_ACK");
}

#[tokio::test]
async fn ps4_handshake_reaches_connected_with_negotiated_tag() {
    let (control_socket, control_port) = bind_ephemeral().await;
    let (_stream_stub, stream_port) = bind_ephemeral().await;

    let console = tokio::spawn(run_fake_console(control_socket));

    let cfg = test_takion_config(control_port, stream_port);
    let transport = Transport::connect(Ipv4Addr::LOCALHOST, cfg, 9, Arc::new(NullEvents))
        .await
        .expect("handshake completes");

    console.await.expect("fake console task");

    assert_eq!(transport.state(), AssociationState::Connected);
    assert_eq!(transport.association().tag_remote(), FAKE_TAG_REMOTE);
    assert_eq!(
        transport.association().seq_remote_initial.load(Ordering::Acquire),
        FAKE_SEQ_REMOTE_INITIAL
    );

    transport.disconnect().await.expect("graceful disconnect");
}
