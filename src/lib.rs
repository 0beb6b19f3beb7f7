// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Core protocol engine for a PlayStation Remote Play client: discovery,
//! wake, registration, the Takion transport, keepalive, and the session
//! facade that composes them (see `SPEC_FULL.md`).

/// Configuration, CLI path resolution, and logger initialization.
pub mod cfg;
/// Pure codec helpers: hex/base64, PIN parsing (§4.1).
pub mod codec;
/// The credential store: persistence, migration, unified accessors (§4.2).
pub mod credentials;
/// LAN discovery: broadcast probe, response parsing, results table (§4.3).
pub mod discovery;
/// The taxonomic error kinds shared by every subsystem (§7).
pub mod error;
/// Session keepalive heartbeat (§4.7).
pub mod keepalive;
/// PIN + PSN-account-id registration exchange (§4.5).
pub mod registration;
/// The session facade composing discovery, wake, registration, takion, and
/// keepalive into a single connect/start/stop lifecycle (§4.8).
pub mod session;
/// The Takion transport: framing, handshake, receive loop, send API (§4.6).
pub mod takion;
/// Wake-on-LAN-style datagram builder and sender (§4.4).
pub mod wake;
