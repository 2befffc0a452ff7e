// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transaction handler contracts and completion signalling.
//!
//! Every multiplexed interaction is driven by a handler on each side:
//!
//! - a [`LocallyInitiatedHandler`] (LIT) on the side that opened the
//!   transaction, constructed *before* the first frame is sent, registered
//!   under an id from the local session's half of the id space;
//! - a [`RemotelyInitiatedHandler`] (RIT) on the peer, constructed lazily
//!   on first sight of the transaction id, resolved from the Initial
//!   frame's opcode via the instruction-set chain.
//!
//! Handlers deregister themselves when they decide the interaction is
//! finished; the transport never guesses at interaction boundaries.
//!
//! A LIT owns a [`CompletionSignal`], a one-shot event the handler fires
//! exactly once when its interaction concludes. Waiters observe success,
//! a distinct timeout failure, or a connection-closed failure if the
//! session dies with the transaction still in flight.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::session::Session;
use crate::Result;

// ============================================================================
// Message views
// ============================================================================

/// The first frame of a transaction, as seen by the receiving side.
#[derive(Debug, Clone, Copy)]
pub struct InitialMessage<'a> {
    pub transaction_id: u32,
    pub opcode: u8,
    pub payload: &'a [u8],
}

/// Any following frame of an already-open transaction.
#[derive(Debug, Clone, Copy)]
pub struct Message<'a> {
    pub transaction_id: u32,
    pub payload: &'a [u8],
}

// ============================================================================
// Handler contracts
// ============================================================================

/// Drives an interaction this endpoint started.
pub trait LocallyInitiatedHandler: Send + Sync {
    /// The id this handler was constructed with; immutable.
    fn transaction_id(&self) -> u32;

    /// One-shot event fired when the interaction concludes.
    fn completion(&self) -> &CompletionSignal;

    /// Called once, right after registration; expected to send the
    /// interaction's Initial frame.
    fn initialize_interaction(&self, session: &Session) -> Result<()>;

    /// Called for every Continuation frame addressed to this transaction.
    fn process_message(&self, session: &Session, message: &Message<'_>) -> Result<()>;
}

/// Services an interaction the peer started.
pub trait RemotelyInitiatedHandler: Send + Sync {
    /// The id this handler was constructed with; immutable.
    fn transaction_id(&self) -> u32;

    /// Called once with the transaction's Initial frame.
    fn process_initial_message(&self, session: &Session, message: &InitialMessage<'_>)
        -> Result<()>;

    /// Called for every following frame addressed to this transaction.
    fn process_message(&self, session: &Session, message: &Message<'_>) -> Result<()>;
}

// ============================================================================
// Completion signal
// ============================================================================

/// Why a completion wait did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionError {
    /// The session died with the transaction still in flight.
    ConnectionClosed,
    /// The waiter's deadline expired; the transaction was deregistered.
    TimedOut,
}

/// One-shot completion event.
///
/// Fired exactly once; the first of `complete`/`fail` wins and later
/// signals are ignored, so a handler completing concurrently with a
/// session-death sweep stays well-defined.
pub struct CompletionSignal {
    state: Mutex<Option<std::result::Result<(), CompletionError>>>,
    cond: Condvar,
}

impl CompletionSignal {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(None),
            cond: Condvar::new(),
        }
    }

    /// Signal success. No-op if already signalled.
    pub fn complete(&self) {
        self.signal(Ok(()));
    }

    /// Signal failure. No-op if already signalled.
    pub fn fail(&self, err: CompletionError) {
        self.signal(Err(err));
    }

    fn signal(&self, outcome: std::result::Result<(), CompletionError>) {
        let mut state = self.state.lock();
        if state.is_none() {
            *state = Some(outcome);
            self.cond.notify_all();
        }
    }

    /// Whether the signal has fired.
    pub fn is_signalled(&self) -> bool {
        self.state.lock().is_some()
    }

    /// Block until the signal fires.
    pub fn wait(&self) -> std::result::Result<(), CompletionError> {
        let mut state = self.state.lock();
        while state.is_none() {
            self.cond.wait(&mut state);
        }
        state.unwrap_or(Err(CompletionError::ConnectionClosed))
    }

    /// Block until the signal fires or `timeout` elapses.
    ///
    /// `None` means the deadline expired with the signal still unfired;
    /// the caller decides what that means (typically: deregister and
    /// fail the signal with [`CompletionError::TimedOut`]).
    pub fn wait_timeout(
        &self,
        timeout: Duration,
    ) -> Option<std::result::Result<(), CompletionError>> {
        let deadline = std::time::Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.is_none() {
            let now = std::time::Instant::now();
            if now >= deadline {
                return None;
            }
            let _ = self.cond.wait_for(&mut state, deadline - now);
        }
        *state
    }
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CompletionSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionSignal")
            .field("signalled", &self.is_signalled())
            .finish()
    }
}
