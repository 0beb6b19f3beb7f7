// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

#![allow(clippy::all)]

mod unit_tests {
    use std::{net::Ipv4Addr, time::Duration};

    use takion_rp_core::cfg::config::{Config, TakionConfig};
    use tokio::net::UdpSocket;

    /// Minimal `TakionConfig` for loopback tests: small buffers and short
    /// timeouts so a hung test fails fast instead of waiting out the
    /// production-sized 30s handshake expectation.
    pub fn test_takion_config(control_port: u16, stream_port: u16) -> TakionConfig {
        let mut cfg = Config::default().takion;
        cfg.control_port = control_port;
        cfg.stream_port = stream_port;
        cfg.recv_buffer_bytes = 8192;
        cfg.send_buffer_bytes = 8192;
        cfg.drain_timeout = Duration::from_millis(50);
        cfg.handshake_retries = 1;
        cfg.expectation_timeout = Duration::from_secs(2);
        cfg.select_timeout = Duration::from_millis(200);
        cfg.teardown_join_timeout = Duration::from_secs(2);
        cfg
    }

    /// Binds a loopback UDP socket on an OS-assigned ephemeral port,
    /// returning the socket and the port it bound to.
    pub async fn bind_ephemeral() -> (UdpSocket, u16) {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.expect("bind loopback");
        let port = socket.local_addr().expect("local_addr").port();
        (socket, port)
    }

    pub mod handshake_happy_path;
    pub mod ps5_short_circuit;
    pub mod registration_round_trip;
    pub mod wake_and_discovery_boundaries;
}
