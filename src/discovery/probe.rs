// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Builds the broadcast discovery probe (§4.3, §6). The same ASCII text is
//! broadcast to both the PS5 port (9302) and the PS4 port (987); there is no
//! binary or PSN-bearing alternative.

/// Protocol version string carried by both the probe and the wake datagram.
pub const DISCOVERY_PROTOCOL_VERSION: &str = "00030010";

/// Builds the discovery probe body. The trailing NUL required on the wire
/// is appended by the caller at send time, not included in this string
/// (§8 scenario 2: "58 bytes, trailing NUL not included").
pub fn build_probe() -> String {
    format!("SRCH * HTTP/1.1\ndevice-discovery-protocol-version:{DISCOVERY_PROTOCOL_VERSION}\n")
}

/// A discovered console, ephemeral and scoped to one discovery session (§3).
#[derive(Debug, Clone)]
pub struct DiscoveredConsole {
    pub address: std::net::Ipv4Addr,
    pub device_name: Option<String>,
    pub host_id: Option<String>,
    pub console_type: super::response::ConsoleType,
    pub request_port: u16,
    pub is_ready: bool,
    pub discovered_at_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_matches_spec_fixture_exactly() {
        // §8 scenario 2.
        let probe = build_probe();
        assert_eq!(
            probe,
            "SRCH * HTTP/1.1\ndevice-discovery-protocol-version:00030010\n"
        );
        assert_eq!(probe.len(), 58);
    }
}
