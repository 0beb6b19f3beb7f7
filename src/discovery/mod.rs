// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Emit broadcast probes, parse HTTP-style announces, and cache console
//! records (§4.3).

/// Discovery probe body and the ephemeral `DiscoveredConsole` type.
pub mod probe;
/// HTTP-style announce parsing and power-state classification.
pub mod response;
/// The scanning worker and bounded results table.
pub mod worker;

pub use probe::DiscoveredConsole;
pub use response::{ConsoleType, PowerState};
pub use worker::{DiscoveryResults, SingleProbeResult, probe_single, scan};
