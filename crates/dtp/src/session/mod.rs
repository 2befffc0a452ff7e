// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! One live connection between two DTP peers.
//!
//! # Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                             Session                                |
//! |                                                                    |
//! |  stream ==> [reader thread] --(sticky route by id)--> [worker 0]   |
//! |                                                        [worker 1]  |
//! |                                                        [worker N]  |
//! |                                                            |       |
//! |                 LIT map <---- dispatch ----> RIT map      |       |
//! |                                                            v       |
//! |  stream <== [writer thread] <----- outbound queue <---- senders    |
//! +--------------------------------------------------------------------+
//! ```
//!
//! The reader owns the stream for reading, the writer for writing; no lock
//! guards the stream itself. Each complete inbound frame is routed to the
//! worker picked by `transaction_id % worker_count`, which pins every frame
//! of one transaction to one worker and so preserves per-transaction order
//! while distinct transactions still process in parallel.
//!
//! The session dies when either side disconnects, a protocol violation is
//! detected, or the owning node shuts down. Death fails every in-flight
//! locally-initiated completion with a connection-closed error so no caller
//! is left blocked forever.

mod processor;
mod reader;
mod writer;

use std::io::Write;
use std::sync::atomic::{fence, AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{unbounded, Sender};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use crate::config::SessionConfig;
use crate::instruction::InstructionSet;
use crate::protocol::{self, SessionRole, CONTINUATION_HEADER_SIZE, ELEVATE, INITIAL_HEADER_SIZE};
use crate::rt::{BufferPool, UniqueIdAllocator};
use crate::stream::BoxedStream;
use crate::transaction::{
    CompletionError, LocallyInitiatedHandler, RemotelyInitiatedHandler,
};
use crate::{Error, Result};

/// One live connection; symmetric peer endpoint.
pub struct Session {
    session_id: u64,
    role: SessionRole,
    peer: String,
    config: SessionConfig,

    alive: AtomicBool,
    node_alive: Arc<AtomicBool>,

    /// Ids for transactions this side initiates; scoped to the role's half.
    allocator: UniqueIdAllocator,

    /// In-flight transactions this side initiated.
    lit: DashMap<u32, Arc<dyn LocallyInitiatedHandler>>,

    /// In-flight transactions the peer initiated.
    rit: DashMap<u32, Arc<dyn RemotelyInitiatedHandler>>,

    /// Instruction sets attached to this session; probed before the node's.
    session_sets: RwLock<Vec<Arc<dyn InstructionSet>>>,

    /// The owning node's instruction-set chain (default set first).
    node_sets: Vec<Arc<dyn InstructionSet>>,

    pool: BufferPool,
    outbound_tx: Sender<Vec<u8>>,
    worker_txs: Vec<Sender<Vec<u8>>>,

    /// Control clone of the stream; `shutdown_stream` unblocks the reader.
    control: Mutex<BoxedStream>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    /// Split the stream, perform the client side of the elevation
    /// handshake, and spin up the reader/writer/worker threads.
    pub(crate) fn spawn(
        stream: BoxedStream,
        role: SessionRole,
        session_id: u64,
        node_alive: Arc<AtomicBool>,
        node_sets: Vec<Arc<dyn InstructionSet>>,
        config: SessionConfig,
    ) -> Result<Arc<Session>> {
        let peer = stream.peer_label();
        let read_half = stream.try_clone_stream()?;
        let mut write_half = stream.try_clone_stream()?;

        // The client elevates the bare stream to framed traffic before any
        // frame can be queued; the server's reader expects the byte as its
        // very first read.
        if role == SessionRole::Client {
            write_half.write_all(&[ELEVATE])?;
        }

        let (id_low, id_high) = role.id_range();
        let worker_count = config.effective_worker_threads();
        let (outbound_tx, outbound_rx) = unbounded();

        let mut worker_txs = Vec::with_capacity(worker_count);
        let mut worker_rxs = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let (tx, rx) = unbounded();
            worker_txs.push(tx);
            worker_rxs.push(rx);
        }

        let session = Arc::new(Session {
            session_id,
            role,
            peer,
            alive: AtomicBool::new(true),
            node_alive,
            allocator: UniqueIdAllocator::new(id_low, id_high),
            lit: DashMap::new(),
            rit: DashMap::new(),
            session_sets: RwLock::new(Vec::new()),
            node_sets,
            pool: BufferPool::new(config.max_frame_size, config.pool_retain_per_class),
            outbound_tx,
            worker_txs,
            control: Mutex::new(stream),
            threads: Mutex::new(Vec::new()),
            config,
        });

        let mut handles = Vec::with_capacity(worker_count + 2);

        for (index, rx) in worker_rxs.into_iter().enumerate() {
            let s = Arc::clone(&session);
            handles.push(
                std::thread::Builder::new()
                    .name(format!("dtp-worker-{}-{}", session_id, index))
                    .spawn(move || processor::run(s, index, rx))?,
            );
        }

        {
            let s = Arc::clone(&session);
            handles.push(
                std::thread::Builder::new()
                    .name(format!("dtp-writer-{}", session_id))
                    .spawn(move || writer::run(s, write_half, outbound_rx))?,
            );
        }
        {
            let s = Arc::clone(&session);
            handles.push(
                std::thread::Builder::new()
                    .name(format!("dtp-reader-{}", session_id))
                    .spawn(move || reader::run(s, read_half))?,
            );
        }

        *session.threads.lock() = handles;

        log::debug!(
            "session {} up: role={} peer={} workers={}",
            session_id,
            role,
            session.peer,
            worker_count
        );
        Ok(session)
    }

    // ------------------------------------------------------------------
    // Identity & liveness
    // ------------------------------------------------------------------

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    /// Short peer description for diagnostics.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.is_alive() && self.node_alive.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // Transaction ids and handler registries
    // ------------------------------------------------------------------

    /// Allocate a transaction id from this session's half of the id space.
    pub fn take_transaction_id(&self) -> Result<u32> {
        self.allocator.take()
    }

    /// Register a locally-initiated handler and drive its first frame.
    ///
    /// The handler's id must have come from [`Session::take_transaction_id`];
    /// registering the same id twice is a programming error and panics. If
    /// initialization fails, the registration is rolled back and the id is
    /// released; the handler must not be reused.
    pub fn register_and_initialize(
        &self,
        handler: Arc<dyn LocallyInitiatedHandler>,
    ) -> Result<()> {
        if !self.is_running() {
            return Err(Error::SessionClosed);
        }
        let transaction_id = handler.transaction_id();
        assert!(
            self.role.owns_id(transaction_id),
            "LIT id {:#010x} is not in the local {} half",
            transaction_id,
            self.role
        );
        let prev = self.lit.insert(transaction_id, Arc::clone(&handler));
        assert!(
            prev.is_none(),
            "transaction id {:#010x} already registered",
            transaction_id
        );

        if let Err(e) = handler.initialize_interaction(self) {
            self.deregister_local(&*handler);
            return Err(e);
        }
        Ok(())
    }

    /// Remove a locally-initiated handler and release its id.
    ///
    /// Removal strictly precedes the id release, with a fence between, so
    /// the id is never observably free while still mapped.
    pub fn deregister_local(&self, handler: &dyn LocallyInitiatedHandler) {
        let transaction_id = handler.transaction_id();
        if self.lit.remove(&transaction_id).is_some() {
            fence(Ordering::SeqCst);
            self.allocator.give(transaction_id);
        } else {
            // Lost the race against the session-death sweep; the sweep owns
            // cleanup and ids are not recycled on a dying session.
            log::trace!(
                "session {}: deregister of {:#010x} after death sweep",
                self.session_id,
                transaction_id
            );
        }
    }

    /// Remove a remotely-initiated handler.
    ///
    /// Ids in the peer's half are never recycled locally; the peer owns
    /// that half of the space.
    pub fn deregister_remote(&self, handler: &dyn RemotelyInitiatedHandler) {
        self.rit.remove(&handler.transaction_id());
    }

    /// Resolve `opcode` through the instruction-set chain and register the
    /// resulting handler under `transaction_id`.
    ///
    /// Session-attached sets are probed first, then the node's; first
    /// match wins. No match is an unsupported-opcode protocol error.
    pub fn create_and_register_remote(
        &self,
        transaction_id: u32,
        opcode: u8,
    ) -> Result<Arc<dyn RemotelyInitiatedHandler>> {
        let handler = {
            let session_sets = self.session_sets.read();
            session_sets
                .iter()
                .chain(self.node_sets.iter())
                .find_map(|set| set.create_handler(opcode, transaction_id))
        };
        let handler = handler.ok_or(Error::UnsupportedOpcode(opcode))?;

        let prev = self.rit.insert(transaction_id, Arc::clone(&handler));
        assert!(
            prev.is_none(),
            "remote transaction id {:#010x} already registered",
            transaction_id
        );
        Ok(handler)
    }

    /// Attach an instruction set probed before the owning node's chain.
    pub fn add_instruction_set(&self, set: Arc<dyn InstructionSet>) {
        self.session_sets.write().push(set);
    }

    pub(crate) fn lit_handler(&self, transaction_id: u32) -> Option<Arc<dyn LocallyInitiatedHandler>> {
        self.lit.get(&transaction_id).map(|e| Arc::clone(e.value()))
    }

    pub(crate) fn rit_handler(
        &self,
        transaction_id: u32,
    ) -> Option<Arc<dyn RemotelyInitiatedHandler>> {
        self.rit.get(&transaction_id).map(|e| Arc::clone(e.value()))
    }

    // ------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------

    /// Queue the Initial frame of a transaction.
    ///
    /// Oversized payloads are rejected here, before any byte is written to
    /// the wire.
    pub fn send_initial(&self, transaction_id: u32, opcode: u8, payload: &[u8]) -> Result<()> {
        let frame_len = INITIAL_HEADER_SIZE + payload.len();
        self.send_frame(frame_len, |buf| {
            protocol::wire::encode_initial(buf, transaction_id, opcode, payload)
        })
    }

    /// Queue a Continuation frame of an already-open transaction.
    pub fn send_continuation(&self, transaction_id: u32, payload: &[u8]) -> Result<()> {
        let frame_len = CONTINUATION_HEADER_SIZE + payload.len();
        self.send_frame(frame_len, |buf| {
            protocol::wire::encode_continuation(buf, transaction_id, payload)
        })
    }

    fn send_frame<F>(&self, frame_len: usize, encode: F) -> Result<()>
    where
        F: FnOnce(&mut [u8]) -> Result<usize>,
    {
        if !self.is_running() {
            return Err(Error::SessionClosed);
        }
        if frame_len > self.config.max_frame_size {
            return Err(Error::FrameTooLarge {
                frame: frame_len,
                max: self.config.max_frame_size,
            });
        }
        let mut buf = self.pool.take(frame_len)?;
        if let Err(e) = encode(&mut buf) {
            self.pool.give(buf);
            return Err(e);
        }
        if let Err(unsent) = self.outbound_tx.send(buf) {
            self.pool.give(unsent.0);
            return Err(Error::SessionClosed);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Completion waiting
    // ------------------------------------------------------------------

    /// Block until `handler`'s interaction concludes.
    ///
    /// With a timeout, expiry deregisters the transaction, releases its id,
    /// fails the completion signal with a distinct timed-out state, and
    /// returns [`Error::TimedOut`]. A session that dies mid-flight surfaces
    /// as [`Error::ConnectionClosed`].
    pub fn await_completion(
        &self,
        handler: &dyn LocallyInitiatedHandler,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let signal = handler.completion();
        let outcome = match timeout {
            None => signal.wait(),
            Some(dur) => match signal.wait_timeout(dur) {
                Some(outcome) => outcome,
                None => {
                    let transaction_id = handler.transaction_id();
                    if let Some((_, removed)) = self.lit.remove(&transaction_id) {
                        fence(Ordering::SeqCst);
                        self.allocator.give(transaction_id);
                        removed.completion().fail(CompletionError::TimedOut);
                        return Err(Error::TimedOut);
                    }
                    // The handler concluded (or the session died) between
                    // expiry and cleanup; take the decided outcome.
                    signal.wait()
                }
            },
        };
        outcome.map_err(|e| match e {
            CompletionError::ConnectionClosed => Error::ConnectionClosed,
            CompletionError::TimedOut => Error::TimedOut,
        })
    }

    // ------------------------------------------------------------------
    // Death & shutdown
    // ------------------------------------------------------------------

    /// Mark the session dead and unwind: shut the stream down (unblocking
    /// the reader), fail every pending locally-initiated completion, and
    /// drop both handler maps. Idempotent.
    pub(crate) fn kill(&self, reason: Option<&Error>) {
        if !self.alive.swap(false, Ordering::AcqRel) {
            return;
        }
        match reason {
            Some(e) => log::warn!(
                "session {} ({}): terminated: {}",
                self.session_id,
                self.peer,
                e
            ),
            None => log::debug!("session {} ({}): disconnected", self.session_id, self.peer),
        }

        if let Err(e) = self.control.lock().shutdown_stream() {
            log::trace!("session {}: stream shutdown: {}", self.session_id, e);
        }

        for entry in self.lit.iter() {
            entry.value().completion().fail(CompletionError::ConnectionClosed);
        }
        self.lit.clear();
        self.rit.clear();
    }

    /// Kill the session and join its threads.
    ///
    /// Must not be called from one of the session's own threads; those use
    /// the internal kill path and unwind on their own.
    pub fn shutdown(&self) {
        self.kill(None);
        let handles = std::mem::take(&mut *self.threads.lock());
        for handle in handles {
            if handle.join().is_err() {
                log::error!("session {}: thread panicked", self.session_id);
            }
        }
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Free ids remaining in this session's half of the id space.
    pub fn available_transaction_ids(&self) -> u64 {
        self.allocator.available()
    }

    /// In-flight locally-initiated transactions.
    pub fn pending_local(&self) -> usize {
        self.lit.len()
    }

    /// In-flight remotely-initiated transactions.
    pub fn pending_remote(&self) -> usize {
        self.rit.len()
    }

    pub(crate) fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub(crate) fn poll_timeout(&self) -> Duration {
        self.config.poll_timeout
    }

    pub(crate) fn max_frame_size(&self) -> usize {
        self.config.max_frame_size
    }

    /// Route one complete inbound frame to its sticky worker.
    pub(crate) fn route_frame(&self, transaction_id: u32, buf: Vec<u8>) {
        let index = transaction_id as usize % self.worker_txs.len();
        if let Err(unsent) = self.worker_txs[index].send(buf) {
            self.pool.give(unsent.0);
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("role", &self.role)
            .field("peer", &self.peer)
            .field("alive", &self.is_alive())
            .field("pending_local", &self.pending_local())
            .field("pending_remote", &self.pending_remote())
            .finish()
    }
}
