// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! End-to-end registration (§4.5) over the PS5 short-circuit transport
//! against a fake console, exercising the DATA-chunk receive dispatch fixed
//! in `src/takion/receive.rs` (see DESIGN.md).

use std::net::Ipv4Addr;

use takion_rp_core::{
    codec::b64_decode,
    registration::{build_registration_request, register},
    takion::header::{ChunkType, PacketType, parse_message, write_message},
};
use tokio::net::UdpSocket;

use crate::unit_tests::{bind_ephemeral, test_takion_config};

const PIN: &str = "12345678";
const PSN_ACCOUNT_LE8: [u8; 8] = [1, 2, 3, 4, 5, 6, 7, 8];

/// Waits for the registration request on either socket, then replies on the
/// same socket with a framed DATA chunk carrying the ASCII reply.
async fn run_fake_console(control_socket: UdpSocket, stream_socket: UdpSocket) {
    let mut cbuf = vec![0u8; 2048];
    let mut sbuf = vec![0u8; 2048];

    let (datagram, from_addr, reply_socket): (Vec<u8>, _, &UdpSocket) = tokio::select! {
        res = control_socket.recv_from(&mut cbuf) => {
            let (n, addr) = res.expect("recv on control socket");
            (cbuf[..n].to_vec(), addr, &control_socket)
        },
        res = stream_socket.recv_from(&mut sbuf) => {
            let (n, addr) = res.expect("recv on stream socket");
            (sbuf[..n].to_vec(), addr, &stream_socket)
        },
    };

    let parsed = parse_message(&datagram).expect("parses registration request");
    assert_eq!(parsed.chunk_type(), Some(ChunkType::Data));
    let body = std::str::from_utf8(parsed.payload).expect("request body is UTF-8");
    let expected = build_registration_request(PIN, &PSN_ACCOUNT_LE8).unwrap();
    assert_eq!(body, expected);

    let reply = "RGST 200 OK\r\nRegist-Key:8830739C\r\nMorning:\
                 000102030405060708090a0b0c0d0e0f\r\nDisplay-Name:living room ps5\r\n\r\n";
    let mut out = Vec::new();
    write_message(&mut out, PacketType::Data, 0, 0, 0, ChunkType::Data as u8, 0, reply.as_bytes());
    reply_socket.send_to(&out, from_addr).await.expect("send registration reply");
}

#[tokio::test]
async fn registration_round_trip_produces_valid_record() {
    let (control_socket, control_port) = bind_ephemeral().await;
    let (stream_socket, stream_port) = bind_ephemeral().await;

    let console = tokio::spawn(run_fake_console(control_socket, stream_socket));

    let mut takion_cfg = test_takion_config(control_port, stream_port);
    takion_cfg.ps5_version_threshold = 12;
    let registration_cfg = takion_rp_core::cfg::config::Config::default().registration;

    let record = register(
        Ipv4Addr::LOCALHOST,
        PIN,
        PSN_ACCOUNT_LE8,
        &registration_cfg,
        &takion_cfg,
        12,
    )
    .await
    .expect("registration exchange succeeds");

    console.await.expect("fake console task");

    assert_eq!(record.registkey_hex8, "8830739c");
    assert_eq!(record.display_name, "living room ps5");
    assert_eq!(
        record.morning_16,
        [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15]
    );
    assert_eq!(record.psn_account_le8, PSN_ACCOUNT_LE8);
    assert!(record.valid);
    assert_eq!(b64_decode(&record.psn_account_b64()).unwrap(), PSN_ACCOUNT_LE8);
}
