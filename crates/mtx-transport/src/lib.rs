// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! mtx-transport
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Wire types for tool-call requests and the capability handshake.
pub mod wire;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use wire::{InitializeOptions, InitializeResult, Request};

/// The underlying session the reliability layer wraps.
///
/// Three asynchronous operations: a capability handshake, an opaque
/// request/response exchange, and an optional close (default no-op).
#[async_trait]
pub trait BaseSession: Send + Sync {
    /// Perform the peer handshake and return the peer's capabilities.
    async fn initialize(&self, options: InitializeOptions) -> Result<InitializeResult>;

    /// Send one request and return the peer's response.
    ///
    /// The response is opaque to the reliability layer.
    async fn send_request(&self, request: Request) -> Result<Value>;

    /// Release transport resources. Implementations without anything to
    /// release can keep the default.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
