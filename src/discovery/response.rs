// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Parses the HTTP-style discovery announce a console sends back (§4.3).
//! Tolerant of `\r\n` or bare `\n` line endings and case-insensitive on
//! header names, as required by §6.

use std::collections::HashMap;

use anyhow::{Context, Result, bail};

/// Observable console power state (§3, §4.3 GLOSSARY "Ready / Standby").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Ready,
    Standby,
    /// Responded, but neither the status code nor an override header let us
    /// tell ready from standby with confidence; treated as awake.
    UnknownAwake,
}

/// Console hardware family, from the `host-type` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleType {
    Ps4,
    Ps4Pro,
    Ps5,
    Ps5Digital,
    Unknown,
}

impl ConsoleType {
    fn from_header(v: &str) -> Self {
        let v = v.trim();
        if v.eq_ignore_ascii_case("PS5") {
            Self::Ps5
        } else if v.eq_ignore_ascii_case("PS5_DIGITAL") || v.eq_ignore_ascii_case("PS5-Digital") {
            Self::Ps5Digital
        } else if v.eq_ignore_ascii_case("PS4_PRO") || v.eq_ignore_ascii_case("PS4-Pro") {
            Self::Ps4Pro
        } else if v.eq_ignore_ascii_case("PS4") {
            Self::Ps4
        } else {
            Self::Unknown
        }
    }
}

/// Default `request_port` when `host-request-port` is absent (§3).
pub const DEFAULT_REQUEST_PORT: u16 = 9295;

/// A parsed discovery response, before it is merged into the results table.
#[derive(Debug, Clone)]
pub struct ParsedAnnounce {
    pub status_code: u16,
    pub state: PowerState,
    pub device_name: Option<String>,
    pub console_type: ConsoleType,
    pub host_id: Option<String>,
    pub request_port: u16,
    pub system_version: Option<String>,
}

/// Parses one HTTP-style discovery announce (§6, §8 scenario 3).
pub fn parse_announce(input: &str) -> Result<ParsedAnnounce> {
    let mut lines = input.split('\n').map(|l| l.trim_end_matches('\r'));

    let status_line = lines.next().context("empty discovery response")?;
    let status_code = parse_status_code(status_line)?;

    let mut headers: HashMap<String, String> = HashMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_ascii_lowercase(), v.trim().to_string());
        }
    }

    let request_port = headers
        .get("host-request-port")
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(DEFAULT_REQUEST_PORT);

    let console_type = headers
        .get("host-type")
        .map(String::as_str)
        .map(ConsoleType::from_header)
        .unwrap_or(ConsoleType::Unknown);

    let status_based_state = classify_status(status_code);
    let state = headers
        .iter()
        .find_map(|(k, v)| {
            matches!(k.as_str(), "host-state" | "ps-state" | "status" | "state" | "running-app")
                .then(|| classify_state_header(v))
                .flatten()
        })
        .unwrap_or(status_based_state);

    Ok(ParsedAnnounce {
        status_code,
        state,
        device_name: headers.get("host-name").cloned(),
        console_type,
        host_id: headers.get("host-id").cloned(),
        request_port,
        system_version: headers.get("system-version").cloned(),
    })
}

fn parse_status_code(status_line: &str) -> Result<u16> {
    // "HTTP/1.1 <code> <reason>"
    let mut parts = status_line.split_whitespace();
    parts.next().context("missing HTTP version in status line")?;
    let code = parts.next().context("missing status code in status line")?;
    code.parse::<u16>().with_context(|| format!("invalid status code: {code:?}"))
}

/// §4.3: 200 -> ready; 620 -> standby; any other `[200, 500)` -> ready
/// ("some firmware variants answer with 4xx"); `5xx` -> ready (service
/// issue but awake); anything else -> unknown-but-awake.
fn classify_status(code: u16) -> PowerState {
    if code == 620 {
        PowerState::Standby
    } else if (200..600).contains(&code) {
        PowerState::Ready
    } else {
        PowerState::UnknownAwake
    }
}

/// Overrides the status-code-based reading when an explicit state header is
/// present (§4.3).
fn classify_state_header(v: &str) -> Option<PowerState> {
    let v = v.trim().to_ascii_lowercase();
    match v.as_str() {
        "ready" | "awake" | "active" | "on" => Some(PowerState::Ready),
        "standby" | "sleep" | "rest" | "off" => Some(PowerState::Standby),
        _ => None,
    }
}

/// Checks whether the failed-classification case can even occur; kept as a
/// standalone helper so callers needn't reimplement the 620 special case.
pub fn is_standby(state: PowerState) -> bool {
    matches!(state, PowerState::Standby)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standby_response_with_host_id_and_request_port() {
        // §8 scenario 3.
        let input = "HTTP/1.1 620 Server Standby\r\nhost-id:ABCDEF0123456789\r\nhost-request-port:997\r\n\r\n";
        let parsed = parse_announce(input).expect("parses");
        assert_eq!(parsed.state, PowerState::Standby);
        assert_eq!(parsed.host_id.as_deref(), Some("ABCDEF0123456789"));
        assert_eq!(parsed.request_port, 997);
    }

    #[test]
    fn no_state_header_status_200_is_ready() {
        let parsed = parse_announce("HTTP/1.1 200 OK\n\n").expect("parses");
        assert_eq!(parsed.state, PowerState::Ready);
    }

    #[test]
    fn no_state_header_status_404_is_ready() {
        let parsed = parse_announce("HTTP/1.1 404 Not Found\n\n").expect("parses");
        assert_eq!(parsed.state, PowerState::Ready);
    }

    #[test]
    fn host_state_standby_overrides_200_status() {
        let input = "HTTP/1.1 200 OK\r\nhost-state: Standby\r\n\r\n";
        let parsed = parse_announce(input).expect("parses");
        assert_eq!(parsed.state, PowerState::Standby);
    }

    #[test]
    fn bare_lf_line_endings_are_tolerated() {
        let input = "HTTP/1.1 200 OK\nhost-name:Living Room\nhost-request-port:9295\n\n";
        let parsed = parse_announce(input).expect("parses");
        assert_eq!(parsed.device_name.as_deref(), Some("Living Room"));
        assert_eq!(parsed.request_port, 9295);
    }

    #[test]
    fn header_keys_are_case_insensitive() {
        let input = "HTTP/1.1 200 OK\r\nHOST-NAME:My PS5\r\n\r\n";
        let parsed = parse_announce(input).expect("parses");
        assert_eq!(parsed.device_name.as_deref(), Some("My PS5"));
    }

    #[test]
    fn missing_request_port_defaults_to_9295() {
        let parsed = parse_announce("HTTP/1.1 200 OK\n\n").expect("parses");
        assert_eq!(parsed.request_port, DEFAULT_REQUEST_PORT);
    }
}
