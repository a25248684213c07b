// SPDX-License-Identifier: MIT OR Apache-2.0
//! Local execution transport: the registered handlers are the peer.

use crate::registry::{ToolEntry, ToolRegistry};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use mtx_transport::BaseSession;
use mtx_transport::wire::{
    InitializeOptions, InitializeResult, METHOD_TOOLS_CALL, PeerCapabilities, Request,
};
use serde_json::Value;
use std::sync::{Arc, RwLock};

/// A [`BaseSession`] that executes `tools/call` requests against the shared
/// tool registry, in-process.
///
/// It advertises the `mcp_tx` extension (reliability metadata in `_meta` is
/// accepted and ignored), so a wrapping session exercises its full metadata
/// path even when execution never leaves the process.
pub struct LocalSession {
    registry: Arc<RwLock<ToolRegistry>>,
}

impl LocalSession {
    /// Execute against the given registry.
    #[must_use]
    pub fn new(registry: Arc<RwLock<ToolRegistry>>) -> Self {
        Self { registry }
    }

    fn lookup(&self, name: &str) -> Option<ToolEntry> {
        self.registry.read().expect("registry lock poisoned").get(name)
    }
}

#[async_trait]
impl BaseSession for LocalSession {
    async fn initialize(&self, _options: InitializeOptions) -> Result<InitializeResult> {
        Ok(InitializeResult {
            capabilities: Some(PeerCapabilities::with_extension()),
        })
    }

    async fn send_request(&self, request: Request) -> Result<Value> {
        if request.method != METHOD_TOOLS_CALL {
            return Err(anyhow!("unsupported method: {}", request.method));
        }

        let name = request.params.name;
        let entry = self
            .lookup(&name)
            .ok_or_else(|| anyhow!("unknown tool '{name}'"))?;

        entry
            .handler
            .invoke(Value::Object(request.params.arguments))
            .await
    }
}

impl std::fmt::Debug for LocalSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tools = self
            .registry
            .read()
            .map(|registry| registry.len())
            .unwrap_or_default();
        f.debug_struct("LocalSession").field("tools", &tools).finish()
    }
}
