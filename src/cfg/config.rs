// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

/// Top-level configuration for the Remote Play core, loaded from YAML.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// LAN discovery scanning parameters.
    pub discovery: DiscoveryConfig,
    /// Wake-on-LAN-style packet parameters.
    pub wake: WakeConfig,
    /// PIN + PSN-account-id registration exchange parameters.
    pub registration: RegistrationConfig,
    /// Takion transport parameters (ports, MTU, handshake retries).
    pub takion: TakionConfig,
    /// Session keepalive heartbeat parameters.
    pub keepalive: KeepaliveConfig,
    /// Credential store location and capacity.
    pub credentials: CredentialsConfig,
    /// Implementation/runtime parameters outside the protocol itself.
    pub runtime: RuntimeConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
/// LAN discovery scanning parameters (§4.3).
pub struct DiscoveryConfig {
    #[serde(rename = "Ps5Port")]
    /// UDP port used for PS5 discovery and wake (default 9302).
    pub ps5_port: u16,
    #[serde(rename = "Ps4Port")]
    /// UDP port used for PS4 discovery and wake (default 987).
    pub ps4_port: u16,
    #[serde(rename = "ScanIntervalMs", with = "serde_millis")]
    /// Interval between broadcast probes during a scan.
    pub scan_interval: Duration,
    #[serde(rename = "DefaultScanDuration", with = "serde_millis")]
    /// Default duration of a single scan (~2s).
    pub default_scan_duration: Duration,
    #[serde(rename = "LongScanDuration", with = "serde_millis")]
    /// Duration of a longer sweep (~10s).
    pub long_scan_duration: Duration,
    #[serde(rename = "SingleProbeTimeout", with = "serde_millis")]
    /// Budget for the single-console lightweight probe (~2s).
    pub single_probe_timeout: Duration,
    #[serde(rename = "ResultsTableCapacity")]
    /// Bound on the discovery results table (16 per §4.3).
    pub results_table_capacity: usize,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
/// Wake-on-LAN-style packet parameters (§4.4).
pub struct WakeConfig {
    #[serde(rename = "SendTimeout", with = "serde_millis")]
    /// Timeout for the one-shot UDP send.
    pub send_timeout: Duration,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
/// Registration exchange parameters (§4.5).
pub struct RegistrationConfig {
    #[serde(rename = "ExchangeTimeout", with = "serde_millis")]
    /// Overall timeout for the PIN+account-id exchange.
    pub exchange_timeout: Duration,
    #[serde(rename = "MaxRetries")]
    /// Number of retry attempts for transient failures.
    pub max_retries: u8,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
/// Takion transport parameters (§4.6).
pub struct TakionConfig {
    #[serde(rename = "ControlPort")]
    /// Default control-socket port (9295).
    pub control_port: u16,
    #[serde(rename = "StreamPort")]
    /// Default stream-socket port (9296).
    pub stream_port: u16,
    #[serde(rename = "MtuCeiling")]
    /// Ceiling for any single Takion message (typically 1500).
    pub mtu_ceiling: usize,
    #[serde(rename = "RecvBufferBytes")]
    /// Minimum receive-buffer size per socket (~100 KiB).
    pub recv_buffer_bytes: usize,
    #[serde(rename = "SendBufferBytes")]
    /// Minimum send-buffer size per socket (~64 KiB).
    pub send_buffer_bytes: usize,
    #[serde(rename = "DrainTimeout", with = "serde_millis")]
    /// Budget for draining stale bytes after (re)connecting (~1s).
    pub drain_timeout: Duration,
    #[serde(rename = "HandshakeRetries")]
    /// Handshake attempts before giving up (3 per §4.6.2).
    pub handshake_retries: u8,
    #[serde(rename = "ExpectationTimeout", with = "serde_millis")]
    /// Per-expectation receive timeout during the handshake (~30s).
    pub expectation_timeout: Duration,
    #[serde(rename = "SelectTimeout", with = "serde_millis")]
    /// `select` timeout in the steady-state receive loop (~1s).
    pub select_timeout: Duration,
    #[serde(rename = "TeardownJoinTimeout", with = "serde_millis")]
    /// Bound on waiting for the receive worker to join on teardown (~5s).
    pub teardown_join_timeout: Duration,
    #[serde(rename = "Ps5VersionThreshold")]
    /// Console protocol version at/above which the PS5 short-circuit
    /// handshake path is taken (§4.6.3).
    pub ps5_version_threshold: u8,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
/// Session keepalive parameters (§4.7).
pub struct KeepaliveConfig {
    #[serde(rename = "IntervalMs", with = "serde_millis")]
    /// Heartbeat interval (~1s).
    pub interval: Duration,
    #[serde(rename = "TimeoutMs", with = "serde_millis")]
    /// Per-attempt response timeout (~2s).
    pub timeout: Duration,
    #[serde(rename = "MaxConsecutiveFailures")]
    /// Consecutive failures before tripping to `failed` (5).
    pub max_consecutive_failures: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
/// Credential store location and capacity (§4.2).
pub struct CredentialsConfig {
    #[serde(rename = "Directory")]
    /// Directory holding one `<address>.reg` file per console.
    pub directory: String,
    #[serde(rename = "TableCapacity")]
    /// Bound on the in-memory table (16 per §4.2).
    pub table_capacity: usize,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
/// Runtime-only settings that do not map to protocol fields.
pub struct RuntimeConfig {
    #[serde(rename = "ConnectTimeout", with = "serde_millis")]
    /// Overall timeout for `Session::start`.
    pub connect_timeout: Duration,
    #[serde(rename = "LoggerConfigPath")]
    /// Path to the YAML logger configuration (see `cfg::logger`).
    pub logger_config_path: String,
}

impl Config {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let mut cfg: Config =
            serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Validates cross-field invariants named throughout the specification.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(
            self.takion.control_port != self.takion.stream_port,
            "Takion control_port and stream_port must differ ({} == {})",
            self.takion.control_port,
            self.takion.stream_port
        );
        ensure!(
            self.takion.handshake_retries >= 1,
            "Takion HandshakeRetries must be >= 1"
        );
        ensure!(
            self.takion.mtu_ceiling >= 64,
            "Takion MtuCeiling is implausibly small: {}",
            self.takion.mtu_ceiling
        );
        ensure!(
            self.keepalive.max_consecutive_failures >= 1,
            "Keepalive MaxConsecutiveFailures must be >= 1"
        );
        ensure!(
            self.credentials.table_capacity >= 1
                && self.credentials.table_capacity <= 16,
            "CredentialsConfig.TableCapacity must be in 1..=16, got {}",
            self.credentials.table_capacity
        );
        ensure!(
            self.discovery.results_table_capacity >= 1
                && self.discovery.results_table_capacity <= 16,
            "DiscoveryConfig.ResultsTableCapacity must be in 1..=16, got {}",
            self.discovery.results_table_capacity
        );
        ensure!(
            !self.credentials.directory.is_empty(),
            "CredentialsConfig.Directory must not be empty"
        );
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            discovery: DiscoveryConfig {
                ps5_port: 9302,
                ps4_port: 987,
                scan_interval: Duration::from_millis(500),
                default_scan_duration: Duration::from_secs(2),
                long_scan_duration: Duration::from_secs(10),
                single_probe_timeout: Duration::from_secs(2),
                results_table_capacity: 16,
            },
            wake: WakeConfig {
                send_timeout: Duration::from_secs(2),
            },
            registration: RegistrationConfig {
                exchange_timeout: Duration::from_secs(15),
                max_retries: 2,
            },
            takion: TakionConfig {
                control_port: 9295,
                stream_port: 9296,
                mtu_ceiling: 1500,
                recv_buffer_bytes: 100 * 1024,
                send_buffer_bytes: 64 * 1024,
                drain_timeout: Duration::from_secs(1),
                handshake_retries: 3,
                expectation_timeout: Duration::from_secs(30),
                select_timeout: Duration::from_secs(1),
                teardown_join_timeout: Duration::from_secs(5),
                ps5_version_threshold: 12,
            },
            keepalive: KeepaliveConfig {
                interval: Duration::from_secs(1),
                timeout: Duration::from_secs(2),
                max_consecutive_failures: 5,
            },
            credentials: CredentialsConfig {
                directory: "creds".to_string(),
                table_capacity: 16,
            },
            runtime: RuntimeConfig {
                connect_timeout: Duration::from_secs(20),
                logger_config_path: "config/logger.yaml".to_string(),
            },
        }
    }
}

/// Serde helper for representing `Duration` as a number of milliseconds.
mod serde_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}
