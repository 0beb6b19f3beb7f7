// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! §8 scenario 6: `console_version >= ps5_version_threshold` skips the
//! INIT/COOKIE exchange entirely and reaches `connected` immediately.

use std::{net::Ipv4Addr, sync::Arc, time::Duration};

use takion_rp_core::takion::{events::NullEvents, transport::Transport, AssociationState};

use crate::unit_tests::{bind_ephemeral, test_takion_config};

#[tokio::test]
async fn ps5_console_version_skips_handshake_bytes() {
    let (control_socket, control_port) = bind_ephemeral().await;
    let (_stream_stub, stream_port) = bind_ephemeral().await;

    let mut cfg = test_takion_config(control_port, stream_port);
    cfg.ps5_version_threshold = 12;

    let transport = Transport::connect(Ipv4Addr::LOCALHOST, cfg, 12, Arc::new(NullEvents))
        .await
        .expect("PS5 short-circuit connects without a handshake round trip");

    assert_eq!(transport.state(), AssociationState::Connected);

    // No INIT/COOKIE bytes were ever sent to the console.
    let mut buf = [0u8; 64];
    let saw_bytes =
        tokio::time::timeout(Duration::from_millis(150), control_socket.recv(&mut buf)).await;
    assert!(saw_bytes.is_err(), "console observed unexpected handshake traffic");

    transport.disconnect().await.expect("graceful disconnect");
}
