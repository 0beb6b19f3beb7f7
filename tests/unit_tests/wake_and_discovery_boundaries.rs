// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Cross-module boundary: a registration reply's `registkey_hex8` must
//! produce, via `ConsoleRecord::wake_credential_dec`, the exact decimal
//! credential `wake::send_wake` puts on the wire (§4.2, §4.4, §8 scenario 1).

use std::net::Ipv4Addr;

use takion_rp_core::{credentials::ConsoleRecord, wake};

use crate::unit_tests::bind_ephemeral;

#[tokio::test]
async fn registered_credential_round_trips_into_a_real_wake_datagram() {
    let record = ConsoleRecord::new(
        "192.168.1.50",
        "living room ps5",
        "8830739c",
        [0u8; 16],
        [1, 2, 3, 4, 5, 6, 7, 8],
    )
    .expect("builds");
    assert!(record.valid);

    let wake_credential_dec = record.wake_credential_dec().expect("hex8 is well-formed");
    assert_eq!(wake_credential_dec, "2284864924");

    let (listener, port) = bind_ephemeral().await;
    let result = wake::send_wake(
        Ipv4Addr::LOCALHOST,
        port,
        &wake_credential_dec,
        std::time::Duration::from_millis(500),
    )
    .await;
    assert_eq!(result, wake::WakeResult::Success);

    let mut buf = [0u8; 256];
    let n = tokio::time::timeout(std::time::Duration::from_millis(500), listener.recv(&mut buf))
        .await
        .expect("recv before timeout")
        .expect("recv succeeds");
    let received = &buf[..n];

    assert_eq!(received.last(), Some(&0u8), "wake datagram must carry the trailing NUL");
    let body = std::str::from_utf8(&received[..n - 1]).expect("body is ASCII");
    assert_eq!(body, wake::build_wake_datagram(&wake_credential_dec));
}

#[tokio::test]
async fn structurally_invalid_record_is_rejected_before_any_network_call() {
    let record = ConsoleRecord::new(
        "192.168.1.50",
        "living room ps5",
        "8830739c",
        [0u8; 16],
        [0u8; 8], // all-zero PSN account id: invalid (§3)
    )
    .expect("builds despite invalidity");
    assert!(!record.valid);
}
