// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! mtx-tools
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Local execution transport backed by the registry's own handlers.
pub mod local;
/// Tool storage with per-tool defaults and introspection.
pub mod registry;
/// The invoke-by-name facade over a reliability session.
pub mod router;

pub use local::LocalSession;
pub use registry::{
    DEFAULT_MAX_TOOLS, KeyFn, RegistryError, ToolEntry, ToolHandler, ToolInfo, ToolRegistry,
};
pub use router::{RouterError, ToolBuilder, ToolRouter};
