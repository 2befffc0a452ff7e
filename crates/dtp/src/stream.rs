// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SessionStream trait: the byte-stream substrate a session runs over.
//!
//! The transport core needs an ordered, reliable, bidirectional byte
//! stream with read/write/close, nothing substrate-specific. This trait
//! unifies TCP sockets and Unix domain sockets (the local-IPC substrate),
//! and lets tests plug in socket pairs.
//!
//! A session splits its stream into a reader clone and a writer clone, and
//! keeps a third control clone whose `shutdown_stream` unblocks the reader
//! when the session is torn down. Clones share one underlying socket, so
//! shutdown through any of them reaches all of them.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};

#[cfg(unix)]
use std::os::unix::net::UnixStream;

/// Abstraction over byte-oriented session substrates.
pub trait SessionStream: Read + Write + Send {
    /// Clone sharing the same underlying socket.
    fn try_clone_stream(&self) -> io::Result<BoxedStream>;

    /// Shut down both directions; blocked reads return end-of-stream.
    fn shutdown_stream(&self) -> io::Result<()>;

    /// Short peer description for log lines.
    fn peer_label(&self) -> String;
}

/// Type alias for a boxed SessionStream.
pub type BoxedStream = Box<dyn SessionStream>;

// ============================================================================
// TcpStream implementation
// ============================================================================

impl SessionStream for TcpStream {
    fn try_clone_stream(&self) -> io::Result<BoxedStream> {
        Ok(Box::new(TcpStream::try_clone(self)?))
    }

    fn shutdown_stream(&self) -> io::Result<()> {
        match TcpStream::shutdown(self, Shutdown::Both) {
            // Already torn down by the peer; nothing left to do.
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }

    fn peer_label(&self) -> String {
        self.peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "tcp:?".to_string())
    }
}

// ============================================================================
// UnixStream implementation
// ============================================================================

#[cfg(unix)]
impl SessionStream for UnixStream {
    fn try_clone_stream(&self) -> io::Result<BoxedStream> {
        Ok(Box::new(UnixStream::try_clone(self)?))
    }

    fn shutdown_stream(&self) -> io::Result<()> {
        match UnixStream::shutdown(self, Shutdown::Both) {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }

    fn peer_label(&self) -> String {
        match self.peer_addr() {
            Ok(addr) => match addr.as_pathname() {
                Some(path) => format!("unix:{}", path.display()),
                None => "unix:<unnamed>".to_string(),
            },
            Err(_) => "unix:?".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_unix_pair_round_trip() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut writer: BoxedStream = Box::new(a);
        let mut reader: BoxedStream = Box::new(b);

        writer.write_all(&[1, 2, 3]).unwrap();
        let mut buf = [0u8; 3];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3]);
    }

    #[cfg(unix)]
    #[test]
    fn test_shutdown_unblocks_clone() {
        let (a, _b) = UnixStream::pair().unwrap();
        let control = SessionStream::try_clone_stream(&a).unwrap();
        let mut read_half = SessionStream::try_clone_stream(&a).unwrap();

        let reader = std::thread::spawn(move || {
            let mut buf = [0u8; 1];
            read_half.read(&mut buf)
        });
        std::thread::sleep(std::time::Duration::from_millis(20));
        control.shutdown_stream().unwrap();

        // Shutdown surfaces as end-of-stream (Ok(0)) on the blocked read.
        assert_eq!(reader.join().unwrap().unwrap(), 0);
    }
}
