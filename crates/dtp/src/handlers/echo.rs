// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Echo interaction.
//!
//! The initiator sends its payload under [`opcode::ECHO`]; the peer
//! replies with the identical bytes as a Continuation under the same
//! transaction id and immediately deregisters. The initiator verifies the
//! reply against its request, deregisters (freeing the id), and fires its
//! completion signal. Payload equality under heavy concurrency is the
//! transport's own self-test.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::protocol::opcode;
use crate::session::Session;
use crate::transaction::{
    CompletionSignal, InitialMessage, LocallyInitiatedHandler, Message, RemotelyInitiatedHandler,
};
use crate::Result;

/// Locally-initiated side of an echo transaction.
pub struct EchoLith {
    transaction_id: u32,
    request: Vec<u8>,
    matched: AtomicBool,
    completion: CompletionSignal,
}

impl EchoLith {
    pub fn new(transaction_id: u32, request: Vec<u8>) -> Self {
        Self {
            transaction_id,
            request,
            matched: AtomicBool::new(false),
            completion: CompletionSignal::new(),
        }
    }

    /// Whether the echoed payload matched the request. Meaningful once the
    /// completion signal has fired successfully.
    pub fn matched(&self) -> bool {
        self.matched.load(Ordering::Acquire)
    }

    pub fn request(&self) -> &[u8] {
        &self.request
    }
}

impl LocallyInitiatedHandler for EchoLith {
    fn transaction_id(&self) -> u32 {
        self.transaction_id
    }

    fn completion(&self) -> &CompletionSignal {
        &self.completion
    }

    fn initialize_interaction(&self, session: &Session) -> Result<()> {
        session.send_initial(self.transaction_id, opcode::ECHO, &self.request)
    }

    fn process_message(&self, session: &Session, message: &Message<'_>) -> Result<()> {
        let matched = message.payload == self.request.as_slice();
        self.matched.store(matched, Ordering::Release);
        if !matched {
            log::warn!(
                "echo {:#010x}: reply of {} bytes did not match request of {}",
                self.transaction_id,
                message.payload.len(),
                self.request.len()
            );
        }
        session.deregister_local(self);
        self.completion.complete();
        Ok(())
    }
}

/// Remotely-initiated side of an echo transaction.
pub struct EchoRith {
    transaction_id: u32,
}

impl EchoRith {
    pub fn new(transaction_id: u32) -> Self {
        Self { transaction_id }
    }
}

impl RemotelyInitiatedHandler for EchoRith {
    fn transaction_id(&self) -> u32 {
        self.transaction_id
    }

    fn process_initial_message(
        &self,
        session: &Session,
        message: &InitialMessage<'_>,
    ) -> Result<()> {
        session.send_continuation(self.transaction_id, message.payload)?;
        session.deregister_remote(self);
        Ok(())
    }

    fn process_message(&self, _session: &Session, message: &Message<'_>) -> Result<()> {
        // The interaction is a single round trip; anything further is
        // ignored.
        log::trace!(
            "echo {:#010x}: ignoring unexpected continuation of {} bytes",
            self.transaction_id,
            message.payload.len()
        );
        Ok(())
    }
}
