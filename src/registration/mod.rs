// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The PIN + PSN-account-id registration exchange (§4.5): a dedicated Takion
//! transport drives a single request/response round trip and produces a
//! fully populated [`ConsoleRecord`] on success.
//!
//! The wire format is deliberately left open by the surrounding design; this
//! module settles on a line-oriented ASCII request in the same style as
//! `wake::build_wake_datagram`, and an ASCII reply carrying the two keys the
//! console hands back. Grounded on the teacher's CHAP login exchange
//! (`state_machine::login::login_chap`): a fixed sequence of
//! send-request/await-response steps, with the final step producing the
//! caller-visible value instead of driving further steps.

use std::{collections::HashMap, net::Ipv4Addr, sync::Arc, time::Instant};

use anyhow::{Context, Result, bail};
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use crate::{
    cfg::config::{RegistrationConfig, TakionConfig},
    codec::{b64_encode, is_eight_digit_pin},
    credentials::ConsoleRecord,
    discovery::probe::DISCOVERY_PROTOCOL_VERSION,
    error::CoreError,
    takion::{chunk::MediaHint, events::TransportEvents, transport::Transport},
};

/// Builds the ASCII registration request body (§4.5).
pub fn build_registration_request(pin: &str, psn_account_le8: &[u8; 8]) -> Result<String> {
    if !is_eight_digit_pin(pin) {
        bail!(CoreError::invalid_parameter(format!(
            "PIN must be exactly 8 ASCII digits, got {pin:?}"
        )));
    }
    Ok(format!(
        "REGIST * HTTP/1.1\nclient-type:vr\npin:{pin}\npsn-account-id:{}\n\
         device-discovery-protocol-version:{DISCOVERY_PROTOCOL_VERSION}\n",
        b64_encode(psn_account_le8)
    ))
}

/// A parsed registration reply: the two keys and the display name the
/// console offered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationReply {
    pub registkey_hex8: String,
    pub morning_16: [u8; 16],
    pub display_name: String,
}

/// Parses an ASCII registration reply. Tolerant of `\r\n` and bare `\n`,
/// case-insensitive header keys, matching `discovery::response`'s parser.
pub fn parse_registration_reply(input: &str) -> Result<RegistrationReply> {
    let mut headers: HashMap<String, String> = HashMap::new();
    for line in input.split('\n') {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let registkey_hex8 = headers
        .get("regist-key")
        .context("registration reply missing regist-key header")?
        .to_ascii_lowercase();
    let morning_hex = headers
        .get("morning")
        .context("registration reply missing morning header")?;
    let morning_bytes = crate::codec::hex_decode(morning_hex).context("decoding morning key")?;
    if morning_bytes.len() != 16 {
        bail!("morning key must decode to 16 bytes, got {}", morning_bytes.len());
    }
    let mut morning_16 = [0u8; 16];
    morning_16.copy_from_slice(&morning_bytes);

    let display_name = headers.get("display-name").cloned().unwrap_or_default();

    Ok(RegistrationReply {
        registkey_hex8,
        morning_16,
        display_name,
    })
}

/// Forwards every delivered DATA payload to an unbounded channel; the
/// registration exchange is the only consumer of a transport built for it.
struct RegistrationEvents {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl TransportEvents for RegistrationEvents {
    fn on_data(&self, _kind: MediaHint, payload: &[u8]) {
        let _ = self.tx.send(payload.to_vec());
    }
}

/// Drives the exchange to completion, retrying the request up to
/// `cfg.max_retries` additional times within `cfg.exchange_timeout`
/// (§4.5). `console_version` selects the PS4 vs. PS5 handshake path on the
/// dedicated transport this function opens and tears down.
#[instrument(skip(pin, psn_account_le8, cfg, takion_cfg))]
pub async fn register(
    peer: Ipv4Addr,
    pin: &str,
    psn_account_le8: [u8; 8],
    cfg: &RegistrationConfig,
    takion_cfg: &TakionConfig,
    console_version: u8,
) -> Result<ConsoleRecord> {
    if !is_eight_digit_pin(pin) {
        return Err(CoreError::invalid_parameter(format!(
            "PIN must be exactly 8 ASCII digits, got {pin:?}"
        ))
        .into());
    }
    if psn_account_le8.iter().all(|&b| b == 0) {
        return Err(CoreError::invalid_parameter(
            "PSN account id must not be all-zero".to_string(),
        )
        .into());
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let events: Arc<dyn TransportEvents> = Arc::new(RegistrationEvents { tx });

    let transport =
        Transport::connect(peer, takion_cfg.clone(), console_version, events).await?;

    let request = build_registration_request(pin, &psn_account_le8)?;
    let deadline = Instant::now() + cfg.exchange_timeout;
    let attempts = cfg.max_retries as u32 + 1;

    let mut last_err = None;
    let mut found_reply = None;
    for attempt in 1..=attempts {
        transport.send_data_chunk(request.as_bytes()).await?;

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            last_err = Some(CoreError::timeout(
                "registration exchange",
                cfg.exchange_timeout.as_millis() as u64,
            ));
            break;
        }

        match tokio::time::timeout(remaining, rx.recv()).await {
            Ok(Some(payload)) => match std::str::from_utf8(&payload)
                .context("registration reply was not valid UTF-8")
                .and_then(|s| parse_registration_reply(s))
            {
                Ok(reply) => {
                    found_reply = Some(reply);
                    break;
                },
                Err(e) => {
                    warn!("discarding unparseable registration reply: {e:#}");
                    last_err = Some(CoreError::protocol(e.to_string()));
                },
            },
            Ok(None) => {
                let _ = transport.disconnect().await;
                bail!(CoreError::protocol(
                    "registration transport closed before replying".to_string()
                ));
            },
            Err(_) => {
                debug!("registration attempt {attempt}/{attempts} timed out; retrying");
                last_err = Some(CoreError::timeout(
                    "registration exchange",
                    cfg.exchange_timeout.as_millis() as u64,
                ));
            },
        }
    }

    let Some(reply) = found_reply else {
        let _ = transport.disconnect().await;
        return Err(last_err
            .unwrap_or_else(|| CoreError::protocol("registration exchange exhausted retries"))
            .into());
    };

    let _ = transport.disconnect().await;

    let display_name = if reply.display_name.is_empty() {
        format!("console@{peer}")
    } else {
        reply.display_name
    };

    let record = ConsoleRecord::new(
        peer.to_string(),
        display_name,
        reply.registkey_hex8,
        reply.morning_16,
        psn_account_le8,
    )?;

    if !record.valid {
        return Err(CoreError::InvalidCredentials {
            message: "console returned a structurally invalid registration reply".to_string(),
        }
        .into());
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_matches_expected_shape() {
        let body = build_registration_request("12345678", &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        assert!(body.starts_with("REGIST * HTTP/1.1\n"));
        assert!(body.contains("pin:12345678\n"));
        assert!(body.contains(&format!(
            "psn-account-id:{}\n",
            b64_encode(&[1, 2, 3, 4, 5, 6, 7, 8])
        )));
    }

    #[test]
    fn rejects_malformed_pin() {
        assert!(build_registration_request("123", &[1; 8]).is_err());
    }

    #[test]
    fn parses_well_formed_reply() {
        let reply = parse_registration_reply(
            "RGST 200 OK\r\nRegist-Key:8830739C\r\nMorning:\
             000102030405060708090a0b0c0d0e0f\r\nDisplay-Name:living room ps5\r\n\r\n",
        )
        .expect("parses");
        assert_eq!(reply.registkey_hex8, "8830739c");
        assert_eq!(reply.display_name, "living room ps5");
        assert_eq!(
            reply.morning_16,
            [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15]
        );
    }

    #[test]
    fn rejects_reply_missing_morning_header() {
        assert!(parse_registration_reply("RGST 200 OK\nRegist-Key:8830739c\n").is_err());
    }
}
