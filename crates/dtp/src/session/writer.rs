// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Frame writer thread.
//!
//! Single-threaded; owns the stream for writing exclusively. Drains the
//! outbound queue one buffer at a time, writes exactly the embedded frame
//! length, and returns the buffer to the pool. Frames are never reordered
//! or interleaved: each is fully flushed before the next is taken, which
//! keeps frame atomicity on the wire.

use std::io::Write;
use std::sync::Arc;

use crossbeam::channel::{Receiver, RecvTimeoutError};

use crate::protocol::{wire, LENGTH_PREFIX_SIZE};
use crate::stream::BoxedStream;
use crate::Error;

use super::Session;

pub(super) fn run(session: Arc<Session>, mut stream: BoxedStream, rx: Receiver<Vec<u8>>) {
    while session.is_running() {
        let buf = match rx.recv_timeout(session.poll_timeout()) {
            Ok(buf) => buf,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        // Pool buffers are size-class rounded; the prefix is authoritative.
        let frame_len = wire::peek_frame_len(&buf).unwrap_or(0) as usize;
        if frame_len < LENGTH_PREFIX_SIZE || frame_len > buf.len() {
            debug_assert!(false, "outbound buffer with corrupt length prefix");
            log::error!(
                "session {}: dropping outbound buffer with corrupt length {}",
                session.session_id(),
                frame_len
            );
            session.pool().give(buf);
            continue;
        }

        match stream.write_all(&buf[..frame_len]).and_then(|()| stream.flush()) {
            Ok(()) => {
                log::trace!(
                    "session {}: frame out: len={}",
                    session.session_id(),
                    frame_len
                );
                session.pool().give(buf);
            }
            Err(e) => {
                session.pool().give(buf);
                if session.is_running() {
                    session.kill(Some(&Error::Io(e)));
                }
                break;
            }
        }
    }

    log::trace!("session {}: writer exit", session.session_id());
}
