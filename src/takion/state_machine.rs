// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! A small state-machine driver shared by the handshake exchange: each
//! state is a distinct type implementing [`StateMachine`], and a driving
//! context implements [`StateMachineCtx`] to run the loop to completion.
//! Transitions are declared once per state and matched exhaustively in the
//! driver, rather than peeked at ad hoc inside a shared receive path.

use anyhow::Result;
use tokio_util::sync::CancellationToken;

/// The outcome of a single state's `step`.
#[derive(Debug)]
pub enum Transition<S, R> {
    /// Move to state `S`, carrying an intermediate result.
    Next(S, R),
    /// Remain in the current state (used for retry-in-place steps).
    Stay(R),
    /// The machine is finished; this is the final result.
    Done(R),
}

/// A single state in a state machine driven by `Ctx`, producing `RespCtx`
/// on each step.
pub trait StateMachine<Ctx, RespCtx>: Sized {
    fn step(&self, ctx: &mut Ctx) -> impl Future<Output = RespCtx> + Send;
}

/// Drives a state machine held by `Self` to completion, honoring
/// cooperative cancellation at every step boundary.
pub trait StateMachineCtx<Ctx, Res> {
    fn execute(
        &mut self,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Res>> + Send;
}
