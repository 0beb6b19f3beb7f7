// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! A small capability interface a transport uses to deliver typed events to
//! a consumer without knowing its type (§9, replacing the source's raw
//! callback-pointer-plus-`void*` pattern).

use crate::{error::ErrorKind, takion::association::AssociationState, takion::chunk::MediaHint};

/// Implemented by whatever the session facade hands the transport: the UI
/// layer, a test harness, or a no-op sink.
pub trait TransportEvents: Send + Sync {
    /// A DATA chunk payload was delivered, with a best-effort media hint.
    fn on_data(&self, _kind: MediaHint, _payload: &[u8]) {}
    /// The association transitioned to a new state.
    fn on_state(&self, _state: AssociationState) {}
    /// The receive loop (or a send call) hit a fatal error.
    fn on_error(&self, _kind: ErrorKind, _message: &str) {}
}

/// A [`TransportEvents`] that does nothing, for tests and headless runs.
pub struct NullEvents;

impl TransportEvents for NullEvents {}
