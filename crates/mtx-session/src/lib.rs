// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! mtx-session
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// The reliability session and its call pipeline.
pub mod session;

pub use session::{CallError, CallOptions, McpTxSession};

// Re-export the transport seam so most callers need only this crate.
pub use mtx_transport::{
    BaseSession,
    wire::{Capabilities, InitializeOptions, InitializeResult, PeerCapabilities, Request},
};
