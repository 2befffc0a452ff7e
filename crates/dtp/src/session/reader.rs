// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Frame reader thread.
//!
//! Single-threaded; owns the stream for reading exclusively. For a
//! Server-role session the very first byte read must be the elevation
//! byte. After that the loop is: read the 4-byte length prefix, take a
//! pooled buffer for the whole frame, copy the prefix into its first four
//! bytes, read exactly `frameLength - 4` more bytes (looping on partial
//! reads), then hand the buffer to the frame's sticky worker.
//!
//! Clean end-of-stream at a frame boundary is the normal disconnect path,
//! not an error; end-of-stream mid-frame is a truncated-frame violation.

use std::io::{self, Read};
use std::sync::Arc;

use crate::protocol::{wire, SessionRole, CONTINUATION_HEADER_SIZE, ELEVATE, LENGTH_PREFIX_SIZE};
use crate::stream::BoxedStream;
use crate::Error;

use super::Session;

enum ReadOutcome {
    Filled,
    /// End-of-stream before the first byte of the read.
    Eof,
}

/// Fill `buf` completely, retrying partial reads.
fn read_full(stream: &mut BoxedStream, buf: &mut [u8]) -> io::Result<ReadOutcome> {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => {
                if filled == 0 {
                    return Ok(ReadOutcome::Eof);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream closed mid-frame",
                ));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(ReadOutcome::Filled)
}

pub(super) fn run(session: Arc<Session>, mut stream: BoxedStream) {
    if session.role() == SessionRole::Server {
        let mut byte = [0u8; 1];
        match read_full(&mut stream, &mut byte) {
            Ok(ReadOutcome::Filled) if byte[0] == ELEVATE => {
                log::trace!("session {}: stream elevated", session.session_id());
            }
            Ok(ReadOutcome::Filled) => {
                session.kill(Some(&Error::ElevationFailed(byte[0])));
                return;
            }
            Ok(ReadOutcome::Eof) => {
                session.kill(None);
                return;
            }
            Err(e) => {
                session.kill(Some(&Error::Io(e)));
                return;
            }
        }
    }

    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    while session.is_running() {
        match read_full(&mut stream, &mut prefix) {
            Ok(ReadOutcome::Filled) => {}
            Ok(ReadOutcome::Eof) => {
                // Normal disconnect.
                session.kill(None);
                break;
            }
            Err(e) => {
                // A shutdown-triggered wakeup is not worth reporting.
                if session.is_running() {
                    session.kill(Some(&Error::Io(e)));
                }
                break;
            }
        }

        let frame_len = u32::from_le_bytes(prefix) as usize;
        if frame_len < CONTINUATION_HEADER_SIZE {
            session.kill(Some(&Error::TruncatedFrame { len: frame_len }));
            break;
        }
        if frame_len > session.max_frame_size() {
            session.kill(Some(&Error::FrameTooLarge {
                frame: frame_len,
                max: session.max_frame_size(),
            }));
            break;
        }

        let mut buf = match session.pool().take(frame_len) {
            Ok(buf) => buf,
            Err(e) => {
                session.kill(Some(&e));
                break;
            }
        };
        buf[..LENGTH_PREFIX_SIZE].copy_from_slice(&prefix);

        match read_full(&mut stream, &mut buf[LENGTH_PREFIX_SIZE..frame_len]) {
            Ok(ReadOutcome::Filled) => {}
            Ok(ReadOutcome::Eof) => {
                session.pool().give(buf);
                session.kill(Some(&Error::TruncatedFrame { len: frame_len }));
                break;
            }
            Err(e) => {
                session.pool().give(buf);
                if session.is_running() {
                    session.kill(Some(&Error::Io(e)));
                }
                break;
            }
        }

        // Length check above guarantees the id bytes are present.
        let transaction_id = wire::peek_transaction_id(&buf).unwrap_or(0);
        log::trace!(
            "session {}: frame in: len={} id={:#010x}",
            session.session_id(),
            frame_len,
            transaction_id
        );
        session.route_frame(transaction_id, buf);
    }

    log::trace!("session {}: reader exit", session.session_id());
}
