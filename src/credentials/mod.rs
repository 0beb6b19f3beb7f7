// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Persist, load, migrate, and look up per-console credentials (§4.2).

/// Legacy on-disk key-field classification and repair (§4.2.1).
pub mod migrate;
/// `ConsoleRecord` and its derived fields and invariants (§3).
pub mod record;
/// The bounded in-memory table plus `<address>.reg` files (§4.2).
pub mod store;
/// On-disk framing for a single `.reg` file.
pub mod wire;

pub use record::{ConsoleRecord, UnifiedCredentials};
pub use store::CredentialStore;
