// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Frame processor workers.
//!
//! Each worker owns a private inbound queue fed only by the reader's
//! sticky routing, so all frames of one transaction land on one worker in
//! wire order. A worker parses the transaction header, classifies the id
//! by its top bit, and dispatches:
//!
//! - own half: the locally-initiated handler must already exist (this side
//!   allocated the id); absence is a protocol violation;
//! - peer half: an existing remotely-initiated handler gets the frame as a
//!   continuation; first sight of the id reads the trailing opcode and
//!   builds the handler through the instruction-set chain.
//!
//! Protocol violations and handler errors terminate the session, never the
//! process. The frame buffer returns to the pool after dispatch.

use std::sync::Arc;

use crossbeam::channel::{Receiver, RecvTimeoutError};

use crate::protocol::wire::FrameView;
use crate::transaction::{InitialMessage, Message};
use crate::{Error, Result};

use super::Session;

pub(super) fn run(session: Arc<Session>, index: usize, rx: Receiver<Vec<u8>>) {
    while session.is_running() {
        let buf = match rx.recv_timeout(session.poll_timeout()) {
            Ok(buf) => buf,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let result = process_frame(&session, &buf);
        session.pool().give(buf);

        if let Err(e) = result {
            log::error!(
                "session {} worker {}: {}",
                session.session_id(),
                index,
                e
            );
            session.kill(Some(&e));
            break;
        }
    }

    log::trace!("session {}: worker {} exit", session.session_id(), index);
}

fn process_frame(session: &Session, frame: &[u8]) -> Result<()> {
    let view = FrameView::parse(frame)?;
    let transaction_id = view.transaction_id();

    if session.role().owns_id(transaction_id) {
        // This side allocated the id, so the handler must be registered.
        let handler = session
            .lit_handler(transaction_id)
            .ok_or(Error::UnknownTransaction(transaction_id))?;
        let message = Message {
            transaction_id,
            payload: view.continuation_payload(),
        };
        return handler.process_message(session, &message);
    }

    if let Some(handler) = session.rit_handler(transaction_id) {
        let message = Message {
            transaction_id,
            payload: view.continuation_payload(),
        };
        return handler.process_message(session, &message);
    }

    // First sight of a peer-initiated transaction: the frame is its
    // Initial message and must carry an opcode.
    let (opcode, payload) = view.initial_parts()?;
    let handler = session.create_and_register_remote(transaction_id, opcode)?;
    let message = InitialMessage {
        transaction_id,
        opcode,
        payload,
    };
    handler.process_initial_message(session, &message)
}
