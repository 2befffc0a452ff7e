// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Opcode dispatch: instruction sets and the factory registry.
//!
//! When a frame opens a new remotely-initiated transaction, its opcode is
//! resolved to a handler by walking instruction sets in priority order:
//! sets attached to the session (in attachment order) first, then the
//! owning node's sets (in attachment order). First match wins; no match is
//! an unsupported-opcode protocol error.
//!
//! Resolution is a plain factory lookup: an [`OpcodeRegistry`] maps each
//! opcode to a boxed constructor closure. Handlers that need dependencies
//! beyond the transaction id get them by closure capture. Registries are
//! owned by their node or session; there is no process-wide dispatch state.

use std::collections::HashMap;
use std::sync::Arc;

use crate::transaction::RemotelyInitiatedHandler;

/// Constructor for a remotely-initiated handler, keyed by opcode.
pub type HandlerFactory = Box<dyn Fn(u32) -> Arc<dyn RemotelyInitiatedHandler> + Send + Sync>;

/// A pluggable opcode -> handler-factory mapping.
pub trait InstructionSet: Send + Sync {
    /// Build a handler for `opcode`, or report no match.
    fn create_handler(
        &self,
        opcode: u8,
        transaction_id: u32,
    ) -> Option<Arc<dyn RemotelyInitiatedHandler>>;
}

// ============================================================================
// OpcodeRegistry
// ============================================================================

/// Instruction set backed by an explicit opcode -> factory table.
///
/// Built once, then attached to a node or session; registration after
/// attachment is not supported (the table is immutable behind `Arc`).
#[derive(Default)]
pub struct OpcodeRegistry {
    factories: HashMap<u8, HandlerFactory>,
}

impl OpcodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `opcode` to `factory`, replacing any previous mapping.
    pub fn register<F>(&mut self, opcode: u8, factory: F) -> &mut Self
    where
        F: Fn(u32) -> Arc<dyn RemotelyInitiatedHandler> + Send + Sync + 'static,
    {
        self.factories.insert(opcode, Box::new(factory));
        self
    }

    /// Number of registered opcodes.
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl InstructionSet for OpcodeRegistry {
    fn create_handler(
        &self,
        opcode: u8,
        transaction_id: u32,
    ) -> Option<Arc<dyn RemotelyInitiatedHandler>> {
        self.factories.get(&opcode).map(|f| f(transaction_id))
    }
}

impl std::fmt::Debug for OpcodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut opcodes: Vec<u8> = self.factories.keys().copied().collect();
        opcodes.sort_unstable();
        f.debug_struct("OpcodeRegistry")
            .field("opcodes", &opcodes)
            .finish()
    }
}

// ============================================================================
// DefaultInstructionSet
// ============================================================================

/// The built-in instruction set every node carries first in its chain.
///
/// Covers the universally-required opcodes (echo, version query) so a bare
/// transport is self-testable without application handlers.
pub struct DefaultInstructionSet {
    registry: OpcodeRegistry,
}

impl DefaultInstructionSet {
    pub fn new() -> Self {
        use crate::handlers::echo::EchoRith;
        use crate::handlers::version::VersionRith;
        use crate::protocol::opcode;

        let mut registry = OpcodeRegistry::new();
        registry.register(opcode::ECHO, |tid| {
            Arc::new(EchoRith::new(tid)) as Arc<dyn RemotelyInitiatedHandler>
        });
        registry.register(opcode::GET_VERSION, |tid| {
            Arc::new(VersionRith::new(tid)) as Arc<dyn RemotelyInitiatedHandler>
        });
        Self { registry }
    }
}

impl Default for DefaultInstructionSet {
    fn default() -> Self {
        Self::new()
    }
}

impl InstructionSet for DefaultInstructionSet {
    fn create_handler(
        &self,
        opcode: u8,
        transaction_id: u32,
    ) -> Option<Arc<dyn RemotelyInitiatedHandler>> {
        self.registry.create_handler(opcode, transaction_id)
    }
}
