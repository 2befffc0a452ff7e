// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Node: the identity of one local DTP peer.
//!
//! A node owns an optional [`ClientSource`] (present only if it accepts
//! inbound connections), the registry of live sessions, and the default
//! instruction-set chain handed to every session. Both directions are
//! symmetric once connected: an accepting node's sessions take the Server
//! role, sessions it dials out take the Client role, and either can
//! originate and service transactions.
//!
//! ```no_run
//! use dtp::{Node, Result};
//!
//! fn main() -> Result<()> {
//!     // A peer that accepts connections on an ephemeral TCP port.
//!     let server = Node::builder().accept_tcp("127.0.0.1:0".parse().unwrap())?.build()?;
//!     let addr = server.listen_addr().unwrap();
//!
//!     // A pure-client peer dialing in.
//!     let client = Node::builder().build()?;
//!     let session = client.connect_tcp(addr)?;
//!     let _ = session;
//!
//!     client.shutdown();
//!     server.shutdown();
//!     Ok(())
//! }
//! ```

use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

#[cfg(unix)]
use std::os::unix::net::UnixStream;
#[cfg(unix)]
use std::path::Path;

use crate::config::NodeConfig;
use crate::instruction::{DefaultInstructionSet, InstructionSet};
use crate::protocol::SessionRole;
use crate::session::Session;
use crate::source::{AcceptCallback, ClientSource, TcpClientSource};
use crate::stream::BoxedStream;
use crate::{Error, Result};

#[cfg(unix)]
use crate::source::UnixClientSource;

/// Observer invoked with every session this node creates or accepts.
pub type SessionObserver = Arc<dyn Fn(&Arc<Session>) + Send + Sync>;

struct NodeInner {
    alive: Arc<AtomicBool>,
    config: NodeConfig,
    /// Default chain walked after a session's own sets; the built-in
    /// default set is always first.
    instruction_sets: Vec<Arc<dyn InstructionSet>>,
    sessions: Mutex<Vec<Arc<Session>>>,
    source: Mutex<Option<Box<dyn ClientSource>>>,
    observer: Option<SessionObserver>,
    next_session_id: AtomicU64,
}

impl NodeInner {
    fn register_session(&self, stream: BoxedStream, role: SessionRole) -> Result<Arc<Session>> {
        if !self.alive.load(Ordering::Acquire) {
            return Err(Error::SessionClosed);
        }
        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let session = Session::spawn(
            stream,
            role,
            session_id,
            Arc::clone(&self.alive),
            self.instruction_sets.clone(),
            self.config.session.clone(),
        )?;

        {
            let mut sessions = self.sessions.lock();
            sessions.retain(|s| s.is_alive());
            sessions.push(Arc::clone(&session));
        }

        if let Some(observer) = &self.observer {
            observer(&session);
        }
        Ok(session)
    }
}

/// One local DTP peer.
pub struct Node {
    inner: Arc<NodeInner>,
    listen_addr: Option<SocketAddr>,
}

impl Node {
    pub fn builder() -> NodeBuilder {
        NodeBuilder::new()
    }

    pub fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::Acquire)
    }

    /// The TCP address this node accepts on, if any.
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.listen_addr
    }

    /// Dial a TCP peer; the session takes the Client role.
    pub fn connect_tcp(&self, addr: SocketAddr) -> Result<Arc<Session>> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        self.connect_stream(Box::new(stream))
    }

    /// Dial a Unix-domain-socket peer; the session takes the Client role.
    #[cfg(unix)]
    pub fn connect_unix<P: AsRef<Path>>(&self, path: P) -> Result<Arc<Session>> {
        let stream = UnixStream::connect(path)?;
        self.connect_stream(Box::new(stream))
    }

    /// Run a Client-role session over an already-established stream.
    ///
    /// This is the substrate-agnostic entry point; any ordered, reliable,
    /// bidirectional byte stream works.
    pub fn connect_stream(&self, stream: BoxedStream) -> Result<Arc<Session>> {
        self.inner.register_session(stream, SessionRole::Client)
    }

    /// Snapshot of the currently live sessions.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        let mut sessions = self.inner.sessions.lock();
        sessions.retain(|s| s.is_alive());
        sessions.clone()
    }

    /// Stop accepting, kill every session, and join their threads.
    /// Idempotent.
    pub fn shutdown(&self) {
        if !self.inner.alive.swap(false, Ordering::AcqRel) {
            return;
        }
        log::debug!("node shutting down");

        let source = self.inner.source.lock().take();
        if let Some(mut source) = source {
            source.shutdown();
        }

        let sessions = std::mem::take(&mut *self.inner.sessions.lock());
        for session in sessions {
            session.shutdown();
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("alive", &self.is_alive())
            .field("listen_addr", &self.listen_addr)
            .field("sessions", &self.inner.sessions.lock().len())
            .finish()
    }
}

// ============================================================================
// NodeBuilder
// ============================================================================

/// Builder for [`Node`].
pub struct NodeBuilder {
    config: NodeConfig,
    instruction_sets: Vec<Arc<dyn InstructionSet>>,
    source: Option<Box<dyn ClientSource>>,
    listen_addr: Option<SocketAddr>,
    observer: Option<SessionObserver>,
}

impl NodeBuilder {
    pub fn new() -> Self {
        Self {
            config: NodeConfig::default(),
            instruction_sets: Vec::new(),
            source: None,
            listen_addr: None,
            observer: None,
        }
    }

    pub fn config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    /// Append an instruction set to the node's chain. Sets are probed in
    /// attachment order, after the built-in default set.
    pub fn instruction_set(mut self, set: Arc<dyn InstructionSet>) -> Self {
        self.instruction_sets.push(set);
        self
    }

    /// Accept inbound TCP connections on `addr` (port 0 = ephemeral).
    pub fn accept_tcp(mut self, addr: SocketAddr) -> Result<Self> {
        let source = TcpClientSource::bind(addr)?;
        self.listen_addr = Some(source.local_addr());
        self.source = Some(Box::new(source));
        Ok(self)
    }

    /// Accept inbound connections on a Unix domain socket at `path`.
    #[cfg(unix)]
    pub fn accept_unix<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        let source = UnixClientSource::bind(path)?;
        self.source = Some(Box::new(source));
        Ok(self)
    }

    /// Accept from a custom [`ClientSource`] implementation.
    pub fn client_source(mut self, source: Box<dyn ClientSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Observe every session the node creates or accepts.
    pub fn on_session<F>(mut self, observer: F) -> Self
    where
        F: Fn(&Arc<Session>) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub fn build(self) -> Result<Node> {
        let mut instruction_sets: Vec<Arc<dyn InstructionSet>> =
            vec![Arc::new(DefaultInstructionSet::new())];
        instruction_sets.extend(self.instruction_sets);

        let inner = Arc::new(NodeInner {
            alive: Arc::new(AtomicBool::new(true)),
            config: self.config,
            instruction_sets,
            sessions: Mutex::new(Vec::new()),
            source: Mutex::new(self.source),
            observer: self.observer,
            next_session_id: AtomicU64::new(1),
        });

        // The accept thread must not keep the node alive; sessions from a
        // source that outlives its node are refused.
        let weak: Weak<NodeInner> = Arc::downgrade(&inner);
        let callback: AcceptCallback = Arc::new(move |stream: BoxedStream| {
            if let Some(inner) = weak.upgrade() {
                if let Err(e) = inner.register_session(stream, SessionRole::Server) {
                    log::warn!("failed to start accepted session: {}", e);
                }
            }
        });

        if let Some(source) = inner.source.lock().as_mut() {
            source.start(callback)?;
        }

        Ok(Node {
            inner,
            listen_addr: self.listen_addr,
        })
    }
}

impl Default for NodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pure_client_node() {
        let node = Node::builder().build().unwrap();
        assert!(node.is_alive());
        assert!(node.listen_addr().is_none());
        assert!(node.sessions().is_empty());
        node.shutdown();
        assert!(!node.is_alive());
    }

    #[test]
    fn test_accepting_node_resolves_ephemeral_port() {
        let node = Node::builder()
            .accept_tcp("127.0.0.1:0".parse().unwrap())
            .unwrap()
            .build()
            .unwrap();
        let addr = node.listen_addr().unwrap();
        assert_ne!(addr.port(), 0);
        node.shutdown();
    }

    #[test]
    fn test_connect_after_shutdown_is_refused() {
        let server = Node::builder()
            .accept_tcp("127.0.0.1:0".parse().unwrap())
            .unwrap()
            .build()
            .unwrap();
        let addr = server.listen_addr().unwrap();

        let client = Node::builder().build().unwrap();
        client.shutdown();
        assert!(client.connect_tcp(addr).is_err());
        server.shutdown();
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let node = Node::builder().build().unwrap();
        node.shutdown();
        node.shutdown();
    }
}
