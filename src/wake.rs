// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Wake-on-LAN-style datagram builder and one-shot sender (§4.4). The
//! teacher's `models::nop::request` fluent builder is adapted here to an
//! ASCII line-oriented body instead of a binary BHS.

use std::{
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    time::Duration,
};

use anyhow::Context;
use tokio::{net::UdpSocket, time::timeout};
use tracing::{info, instrument, warn};

use crate::discovery::probe::DISCOVERY_PROTOCOL_VERSION;

/// Outcome of a wake attempt (§4.4). A successful send does not confirm the
/// console woke; that is the job of a subsequent discovery scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeResult {
    Success,
    InvalidCredential,
    Timeout,
    NetworkError,
}

/// Builds the wake datagram body for `hex8` (§4.4, §8 scenario 1). The
/// trailing NUL required on the wire is appended by the caller at send
/// time, not included in this string.
pub fn build_wake_datagram(wake_credential_dec: &str) -> String {
    format!(
        "WAKEUP * HTTP/1.1\nclient-type:vr\nauth-type:R\nmodel:w\napp-type:r\nuser-credential:\
         {wake_credential_dec}\ndevice-discovery-protocol-version:{DISCOVERY_PROTOCOL_VERSION}\n"
    )
}

/// Sends the wake datagram to `address:9302` (or `:987` for a PS4 target)
/// on a freshly created UDP socket (§4.4).
#[instrument(skip(wake_credential_dec))]
pub async fn send_wake(
    address: Ipv4Addr,
    port: u16,
    wake_credential_dec: &str,
    send_timeout: Duration,
) -> WakeResult {
    if wake_credential_dec.is_empty() || wake_credential_dec.parse::<u64>().is_err() {
        warn!("refusing to send wake with malformed user-credential {wake_credential_dec:?}");
        return WakeResult::InvalidCredential;
    }

    let body = build_wake_datagram(wake_credential_dec);
    let mut bytes = body.into_bytes();
    bytes.push(0u8); // trailing NUL, PS5 firmware expects it (§6).

    match send_once(address, port, &bytes, send_timeout).await {
        Ok(()) => {
            info!("sent wake datagram to {address}:{port}");
            WakeResult::Success
        },
        Err(SendError::Timeout) => WakeResult::Timeout,
        Err(SendError::Network(e)) => {
            warn!("wake send to {address}:{port} failed: {e:#}");
            WakeResult::NetworkError
        },
    }
}

enum SendError {
    Timeout,
    Network(anyhow::Error),
}

async fn send_once(
    address: Ipv4Addr,
    port: u16,
    bytes: &[u8],
    send_timeout: Duration,
) -> Result<(), SendError> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .await
        .context("binding ephemeral UDP socket for wake")
        .map_err(SendError::Network)?;
    let dest = SocketAddr::V4(SocketAddrV4::new(address, port));

    timeout(send_timeout, socket.send_to(bytes, dest))
        .await
        .map_err(|_| SendError::Timeout)?
        .context("sending wake datagram")
        .map(|_| ())
        .map_err(SendError::Network)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wake_datagram_matches_spec_fixture() {
        // §8 scenario 1: hex8 = "8830739c" -> user-credential=2284864924.
        let body = build_wake_datagram("2284864924");
        assert_eq!(
            body,
            "WAKEUP * HTTP/1.1\nclient-type:vr\nauth-type:R\nmodel:w\napp-type:r\n\
             user-credential:2284864924\ndevice-discovery-protocol-version:00030010\n"
        );
    }

    #[tokio::test]
    async fn invalid_credential_is_rejected_before_sending() {
        let result = send_wake(
            Ipv4Addr::new(192, 168, 1, 10),
            9302,
            "not-a-number",
            Duration::from_millis(100),
        )
        .await;
        assert_eq!(result, WakeResult::InvalidCredential);
    }

    #[tokio::test]
    async fn well_formed_credential_sends_successfully_to_loopback() {
        let result = send_wake(
            Ipv4Addr::new(127, 0, 0, 1),
            19302,
            "2284864924",
            Duration::from_millis(500),
        )
        .await;
        assert_eq!(result, WakeResult::Success);
    }
}
