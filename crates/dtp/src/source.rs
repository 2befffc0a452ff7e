// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ClientSource: the "accept a new connection" abstraction.
//!
//! A node that accepts inbound connections owns exactly one client source.
//! The source runs its own accept thread and invokes a single callback
//! with each newly-accepted stream; shutdown is cancellable and joins the
//! thread. Pure-client nodes use [`NullClientSource`].
//!
//! The listener runs non-blocking with a poll-timeout loop so shutdown is
//! observed without an extra wakeup connection.

use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

#[cfg(unix)]
use std::os::unix::net::UnixListener;
#[cfg(unix)]
use std::path::{Path, PathBuf};

use crate::stream::BoxedStream;
use crate::Result;

const ACCEPT_POLL_TIMEOUT: Duration = Duration::from_millis(100);
const LISTEN_BACKLOG: i32 = 1024;

/// Callback invoked with each accepted stream.
pub type AcceptCallback = Arc<dyn Fn(BoxedStream) + Send + Sync>;

/// Source of inbound connections.
pub trait ClientSource: Send {
    /// Begin accepting; each new stream is handed to `on_accept`.
    fn start(&mut self, on_accept: AcceptCallback) -> Result<()>;

    /// Stop accepting and join the accept thread. Idempotent.
    fn shutdown(&mut self);
}

// ============================================================================
// TcpClientSource
// ============================================================================

/// Accepts TCP connections on a bound address.
pub struct TcpClientSource {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl TcpClientSource {
    /// Bind immediately; accepting starts with [`ClientSource::start`].
    ///
    /// Binding to port 0 picks an ephemeral port, readable afterwards via
    /// [`TcpClientSource::local_addr`].
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(LISTEN_BACKLOG)?;
        socket.set_nonblocking(true)?;

        let listener: TcpListener = socket.into();
        let local_addr = listener.local_addr()?;
        log::debug!("tcp client source bound to {}", local_addr);

        Ok(Self {
            listener: Some(listener),
            local_addr,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        })
    }

    /// The bound address (with the ephemeral port resolved).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl ClientSource for TcpClientSource {
    fn start(&mut self, on_accept: AcceptCallback) -> Result<()> {
        let listener = match self.listener.take() {
            Some(l) => l,
            None => return Ok(()), // already started
        };
        self.running.store(true, Ordering::Release);
        let running = Arc::clone(&self.running);

        self.thread = Some(
            std::thread::Builder::new()
                .name("dtp-accept-tcp".to_string())
                .spawn(move || {
                    while running.load(Ordering::Acquire) {
                        match listener.accept() {
                            Ok((stream, remote)) => {
                                log::debug!("accepted tcp connection from {}", remote);
                                // Accepted sockets may inherit non-blocking
                                // mode; sessions use blocking I/O.
                                if let Err(e) = stream.set_nonblocking(false) {
                                    log::warn!("failed to configure {}: {}", remote, e);
                                    continue;
                                }
                                let _ = stream.set_nodelay(true);
                                on_accept(Box::new(stream));
                            }
                            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                                std::thread::sleep(ACCEPT_POLL_TIMEOUT);
                            }
                            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                            Err(e) => {
                                log::error!("tcp accept error: {}", e);
                                std::thread::sleep(ACCEPT_POLL_TIMEOUT);
                            }
                        }
                    }
                    log::trace!("tcp accept thread exit");
                })?,
        );
        Ok(())
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        self.listener = None;
    }
}

impl Drop for TcpClientSource {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// UnixClientSource
// ============================================================================

/// Accepts connections on a Unix domain socket path.
#[cfg(unix)]
pub struct UnixClientSource {
    listener: Option<UnixListener>,
    path: PathBuf,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

#[cfg(unix)]
impl UnixClientSource {
    /// Bind to `path`, replacing a stale socket file if one is left over.
    pub fn bind<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        let listener = UnixListener::bind(&path)?;
        listener.set_nonblocking(true)?;
        log::debug!("unix client source bound to {}", path.display());

        Ok(Self {
            listener: Some(listener),
            path,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
impl ClientSource for UnixClientSource {
    fn start(&mut self, on_accept: AcceptCallback) -> Result<()> {
        let listener = match self.listener.take() {
            Some(l) => l,
            None => return Ok(()),
        };
        self.running.store(true, Ordering::Release);
        let running = Arc::clone(&self.running);

        self.thread = Some(
            std::thread::Builder::new()
                .name("dtp-accept-unix".to_string())
                .spawn(move || {
                    while running.load(Ordering::Acquire) {
                        match listener.accept() {
                            Ok((stream, _)) => {
                                log::debug!("accepted unix connection");
                                if let Err(e) = stream.set_nonblocking(false) {
                                    log::warn!("failed to configure unix stream: {}", e);
                                    continue;
                                }
                                on_accept(Box::new(stream));
                            }
                            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                                std::thread::sleep(ACCEPT_POLL_TIMEOUT);
                            }
                            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                            Err(e) => {
                                log::error!("unix accept error: {}", e);
                                std::thread::sleep(ACCEPT_POLL_TIMEOUT);
                            }
                        }
                    }
                    log::trace!("unix accept thread exit");
                })?,
        );
        Ok(())
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        self.listener = None;
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(unix)]
impl Drop for UnixClientSource {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// NullClientSource
// ============================================================================

/// Source for pure-client nodes; never yields a connection.
#[derive(Debug, Default)]
pub struct NullClientSource;

impl ClientSource for NullClientSource {
    fn start(&mut self, _on_accept: AcceptCallback) -> Result<()> {
        Ok(())
    }

    fn shutdown(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel;
    use std::net::TcpStream;

    #[test]
    fn test_tcp_source_accepts_and_shuts_down() {
        let mut source = TcpClientSource::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = source.local_addr();

        let (tx, rx) = channel::unbounded();
        let callback: AcceptCallback = Arc::new(move |stream| {
            tx.send(stream.peer_label()).unwrap();
        });
        source.start(callback).unwrap();

        let _client = TcpStream::connect(addr).unwrap();
        let label = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(label.contains("127.0.0.1"));

        source.shutdown();
        source.shutdown(); // idempotent
    }

    #[test]
    fn test_null_source_is_inert() {
        let mut source = NullClientSource;
        let callback: AcceptCallback = Arc::new(|_| panic!("null source accepted"));
        source.start(callback).unwrap();
        source.shutdown();
    }

    #[cfg(unix)]
    #[test]
    fn test_unix_source_accepts() {
        let dir = std::env::temp_dir().join(format!("dtp-src-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("accept.sock");

        let mut source = UnixClientSource::bind(&path).unwrap();
        let (tx, rx) = channel::unbounded();
        let callback: AcceptCallback = Arc::new(move |_stream| {
            tx.send(()).unwrap();
        });
        source.start(callback).unwrap();

        let _client = std::os::unix::net::UnixStream::connect(&path).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        source.shutdown();
        assert!(!path.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
