// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Version query interaction.
//!
//! The initiator sends an empty Initial under [`opcode::GET_VERSION`]; the
//! peer answers with its crate version as a tiny length-prefixed ASCII
//! string and deregisters.

use parking_lot::Mutex;

use crate::protocol::{opcode, strings};
use crate::session::Session;
use crate::transaction::{
    CompletionSignal, InitialMessage, LocallyInitiatedHandler, Message, RemotelyInitiatedHandler,
};
use crate::Result;

/// Locally-initiated side of a version query.
pub struct VersionLith {
    transaction_id: u32,
    response: Mutex<Option<String>>,
    completion: CompletionSignal,
}

impl VersionLith {
    pub fn new(transaction_id: u32) -> Self {
        Self {
            transaction_id,
            response: Mutex::new(None),
            completion: CompletionSignal::new(),
        }
    }

    /// The peer's version string, once the completion signal has fired.
    pub fn response(&self) -> Option<String> {
        self.response.lock().clone()
    }
}

impl LocallyInitiatedHandler for VersionLith {
    fn transaction_id(&self) -> u32 {
        self.transaction_id
    }

    fn completion(&self) -> &CompletionSignal {
        &self.completion
    }

    fn initialize_interaction(&self, session: &Session) -> Result<()> {
        session.send_initial(self.transaction_id, opcode::GET_VERSION, &[])
    }

    fn process_message(&self, session: &Session, message: &Message<'_>) -> Result<()> {
        let (version, _) = strings::get_tiny(message.payload)?;
        *self.response.lock() = Some(version.to_string());
        session.deregister_local(self);
        self.completion.complete();
        Ok(())
    }
}

/// Remotely-initiated side of a version query.
pub struct VersionRith {
    transaction_id: u32,
}

impl VersionRith {
    pub fn new(transaction_id: u32) -> Self {
        Self { transaction_id }
    }
}

impl RemotelyInitiatedHandler for VersionRith {
    fn transaction_id(&self) -> u32 {
        self.transaction_id
    }

    fn process_initial_message(
        &self,
        session: &Session,
        _message: &InitialMessage<'_>,
    ) -> Result<()> {
        let mut payload = Vec::new();
        strings::put_tiny(&mut payload, env!("CARGO_PKG_VERSION"))?;
        session.send_continuation(self.transaction_id, &payload)?;
        session.deregister_remote(self);
        Ok(())
    }

    fn process_message(&self, _session: &Session, _message: &Message<'_>) -> Result<()> {
        Ok(())
    }
}
