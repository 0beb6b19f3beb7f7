// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Taxonomic error kinds shared by every subsystem (discovery, wake,
//! registration, Takion, keepalive, the credential store).
//!
//! Subsystem internals propagate with `anyhow::Result` the way the teacher
//! codebase does; `CoreError` is the stable, matchable surface a UI layer
//! can downcast to when it needs to branch on *kind* rather than message.

use core::fmt;

use thiserror::Error;

/// A small, FFI/UI-friendly classification of a [`CoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidParameter,
    InvalidState,
    NotInitialized,
    NotRegistered,
    InvalidCredentials,
    Timeout,
    Network,
    Protocol,
    Memory,
    Offline,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::InvalidParameter => "invalid-parameter",
            ErrorKind::InvalidState => "invalid-state",
            ErrorKind::NotInitialized => "not-initialized",
            ErrorKind::NotRegistered => "not-registered",
            ErrorKind::InvalidCredentials => "invalid-credentials",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Network => "network",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Memory => "memory",
            ErrorKind::Offline => "offline",
        })
    }
}

/// The ten error kinds enumerated in the protocol's error-handling design,
/// each carrying a human-readable sentence and a short troubleshooting hint.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid-parameter: {message}")]
    InvalidParameter { message: String },

    #[error("invalid-state: {message} (hint: {hint})")]
    InvalidState { message: String, hint: &'static str },

    #[error("not-initialized: {subsystem} used before init")]
    NotInitialized { subsystem: &'static str },

    #[error(
        "not-registered: no usable credential record for {address} (hint: pair the \
         console first)"
    )]
    NotRegistered { address: String },

    #[error(
        "invalid-credentials: {message} (hint: re-run registration for this console)"
    )]
    InvalidCredentials { message: String },

    #[error("timeout: {operation} did not complete within {elapsed_ms} ms")]
    Timeout {
        operation: &'static str,
        elapsed_ms: u64,
    },

    #[error("network: {operation} failed: {source}")]
    Network {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("protocol: {message}")]
    Protocol { message: String },

    #[error("memory: allocation failed ({context})")]
    Memory { context: &'static str },

    #[error(
        "offline: no network connectivity (hint: check Wi-Fi and try again in a few \
         seconds)"
    )]
    Offline,
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::InvalidParameter { .. } => ErrorKind::InvalidParameter,
            CoreError::InvalidState { .. } => ErrorKind::InvalidState,
            CoreError::NotInitialized { .. } => ErrorKind::NotInitialized,
            CoreError::NotRegistered { .. } => ErrorKind::NotRegistered,
            CoreError::InvalidCredentials { .. } => ErrorKind::InvalidCredentials,
            CoreError::Timeout { .. } => ErrorKind::Timeout,
            CoreError::Network { .. } => ErrorKind::Network,
            CoreError::Protocol { .. } => ErrorKind::Protocol,
            CoreError::Memory { .. } => ErrorKind::Memory,
            CoreError::Offline => ErrorKind::Offline,
        }
    }

    /// A short troubleshooting hint surfaced to the UI layer, independent of
    /// whatever parameters the `Display` message embeds.
    pub fn hint(&self) -> &'static str {
        match self {
            CoreError::InvalidParameter { .. } => "check the value you passed in",
            CoreError::InvalidState { hint, .. } => hint,
            CoreError::NotInitialized { .. } => "call init before using this subsystem",
            CoreError::NotRegistered { .. } => "pair the console first",
            CoreError::InvalidCredentials { .. } => "re-run registration for this console",
            CoreError::Timeout { .. } => {
                "the console may be asleep or unreachable — try waking it"
            },
            CoreError::Network { .. } => "check that the console is on the same network",
            CoreError::Protocol { .. } => {
                "the console sent something this client does not understand"
            },
            CoreError::Memory { .. } => "the device is low on memory",
            CoreError::Offline => "check Wi-Fi and try again in a few seconds",
        }
    }

    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        CoreError::InvalidParameter {
            message: message.into(),
        }
    }

    pub fn invalid_state(message: impl Into<String>, hint: &'static str) -> Self {
        CoreError::InvalidState {
            message: message.into(),
            hint,
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        CoreError::Protocol {
            message: message.into(),
        }
    }

    pub fn timeout(operation: &'static str, elapsed_ms: u64) -> Self {
        CoreError::Timeout {
            operation,
            elapsed_ms,
        }
    }

    pub fn network(operation: &'static str, source: std::io::Error) -> Self {
        CoreError::Network { operation, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        let e = CoreError::invalid_parameter("PIN must be 8 digits");
        assert_eq!(e.kind(), ErrorKind::InvalidParameter);
        assert!(e.to_string().contains("PIN must be 8 digits"));
    }

    #[test]
    fn hint_is_present_for_every_kind() {
        let offline = CoreError::Offline;
        assert_eq!(offline.kind(), ErrorKind::Offline);
        assert!(!offline.hint().is_empty());
    }
}
