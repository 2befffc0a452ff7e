// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Built-in interaction handlers.
//!
//! These cover the universally-required opcodes wired into
//! [`DefaultInstructionSet`](crate::instruction::DefaultInstructionSet),
//! and double as reference implementations of the handler contracts.

pub mod echo;
pub mod version;

pub use echo::{EchoLith, EchoRith};
pub use version::{VersionLith, VersionRith};
