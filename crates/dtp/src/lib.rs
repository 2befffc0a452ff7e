// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # DTP - Duplex Transport Protocol
//!
//! A peer-to-peer transport that multiplexes many independent
//! request/response and streaming interactions over a single ordered byte
//! stream (TCP or Unix domain socket). Either endpoint may accept and/or
//! initiate connections; once connected, both sides are symmetric peers
//! that simultaneously originate and service transactions, told apart by a
//! transaction-id numbering scheme rather than fixed request/reply roles.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dtp::{EchoLith, Node, Result};
//!
//! fn main() -> Result<()> {
//!     let server = Node::builder().accept_tcp("127.0.0.1:0".parse().unwrap())?.build()?;
//!     let client = Node::builder().build()?;
//!
//!     let session = client.connect_tcp(server.listen_addr().unwrap())?;
//!
//!     // Round-trip a payload through the peer's built-in echo handler.
//!     let id = session.take_transaction_id()?;
//!     let echo = Arc::new(EchoLith::new(id, vec![1, 2, 3]));
//!     session.register_and_initialize(echo.clone())?;
//!     session.await_completion(&*echo, Some(std::time::Duration::from_secs(5)))?;
//!     assert!(echo.matched());
//!
//!     client.shutdown();
//!     server.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                              Node                                  |
//! |   ClientSource (accept) | session registry | instruction sets      |
//! +--------------------------------------------------------------------+
//! |                      Session (per connection)                      |
//! |   reader thread -> sticky-routed workers -> handler dispatch       |
//! |   senders -> outbound queue -> writer thread                       |
//! |   LIT/RIT transaction maps | per-session id allocator | buf pool   |
//! +--------------------------------------------------------------------+
//! |                        Wire framing                                |
//! |   frameLength u32 LE | transactionId u32 LE | [opcode u8] | bytes  |
//! +--------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Node`] | One local peer: accepts and/or dials connections |
//! | [`Session`] | One live connection; registers and drives transactions |
//! | [`LocallyInitiatedHandler`] | Drives an interaction this side started |
//! | [`RemotelyInitiatedHandler`] | Services an interaction the peer started |
//! | [`InstructionSet`] | Pluggable opcode -> handler-factory registry |
//! | [`CompletionSignal`] | One-shot completion event with timeout support |

/// Node and session tuning knobs.
pub mod config;
/// Built-in echo and version interaction handlers.
pub mod handlers;
/// Opcode dispatch: instruction sets and the factory registry.
pub mod instruction;
/// Node: local peer identity, accept loop, session registry.
pub mod node;
/// Wire constants, opcodes, framing, and string helpers.
pub mod protocol;
/// Runtime resource pools (frame buffers, transaction ids).
pub mod rt;
/// Session lifecycle and the reader/writer/worker pipeline.
pub mod session;
/// Accept-side abstraction over TCP/Unix listeners.
pub mod source;
/// Byte-stream substrate trait.
pub mod stream;
/// Transaction handler contracts and completion signalling.
pub mod transaction;

pub use config::{NodeConfig, SessionConfig};
pub use handlers::{EchoLith, EchoRith, VersionLith, VersionRith};
pub use instruction::{DefaultInstructionSet, InstructionSet, OpcodeRegistry};
pub use node::{Node, NodeBuilder, SessionObserver};
pub use protocol::{opcode, SessionRole, ELEVATE, MAX_FRAME_SIZE};
pub use session::Session;
pub use source::{AcceptCallback, ClientSource, NullClientSource, TcpClientSource};
#[cfg(unix)]
pub use source::UnixClientSource;
pub use stream::{BoxedStream, SessionStream};
pub use transaction::{
    CompletionError, CompletionSignal, InitialMessage, LocallyInitiatedHandler, Message,
    RemotelyInitiatedHandler,
};

/// Errors returned by DTP operations.
///
/// Send-side framing violations are rejected synchronously before any
/// I/O. Protocol violations terminate the offending session, never the
/// process, and never propagate to sibling sessions.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Framing
    // ========================================================================
    /// Frame (header + payload) exceeds the maximum frame size.
    FrameTooLarge { frame: usize, max: usize },
    /// Frame or field shorter than its declared or required length.
    TruncatedFrame { len: usize },
    /// Destination buffer too small for the encoded value.
    BufferTooSmall,
    /// Length-prefixed string payload is malformed.
    InvalidString(&'static str),

    // ========================================================================
    // Protocol violations
    // ========================================================================
    /// First byte from a client was not the elevation byte.
    ElevationFailed(u8),
    /// No instruction set could build a handler for the opcode.
    UnsupportedOpcode(u8),
    /// Frame referenced a local-half id with no registered handler.
    UnknownTransaction(u32),

    // ========================================================================
    // Connection & resources
    // ========================================================================
    /// The session died with the interaction still in flight.
    ConnectionClosed,
    /// Operation on a session that is already dead.
    SessionClosed,
    /// Completion wait deadline expired; the transaction was deregistered.
    TimedOut,
    /// The local half of the transaction-id space is fully allocated.
    IdSpaceExhausted,
    /// Underlying stream I/O failure.
    Io(std::io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::FrameTooLarge { frame, max } => {
                write!(f, "frame of {} bytes exceeds maximum of {}", frame, max)
            }
            Error::TruncatedFrame { len } => write!(f, "truncated frame (length {})", len),
            Error::BufferTooSmall => write!(f, "buffer too small for encoding"),
            Error::InvalidString(msg) => write!(f, "invalid string payload: {}", msg),
            Error::ElevationFailed(byte) => {
                write!(f, "expected elevation byte, got {:#04x}", byte)
            }
            Error::UnsupportedOpcode(opcode) => {
                write!(f, "no instruction set supports opcode {:#04x}", opcode)
            }
            Error::UnknownTransaction(id) => {
                write!(f, "frame references unknown local transaction {:#010x}", id)
            }
            Error::ConnectionClosed => write!(f, "connection closed mid-transaction"),
            Error::SessionClosed => write!(f, "session is closed"),
            Error::TimedOut => write!(f, "completion wait timed out"),
            Error::IdSpaceExhausted => write!(f, "transaction-id space exhausted"),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

/// Convenient alias for API results using the public [`Error`] type.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::FrameTooLarge {
            frame: 20_001,
            max: 20_000,
        };
        assert!(e.to_string().contains("20001"));
        assert!(Error::UnsupportedOpcode(0x42).to_string().contains("0x42"));
    }

    #[test]
    fn test_io_error_source() {
        use std::error::Error as _;
        let e = Error::from(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert!(e.source().is_some());
    }
}
