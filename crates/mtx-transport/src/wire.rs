// SPDX-License-Identifier: MIT OR Apache-2.0
//! Wire shapes exchanged with the underlying session.
//!
//! Field names and enum strings here are part of the protocol and must stay
//! bit-exact: `tools/call`, `_meta`, `mcp_tx`, and the handshake
//! advertisement under `capabilities.experimental.mcp_tx`.

use mtx_core::{PROTOCOL_VERSION, RequestMeta};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Method string for tool invocation.
pub const METHOD_TOOLS_CALL: &str = "tools/call";

/// Key under `experimental` that carries the reliability extension.
pub const EXTENSION_KEY: &str = "mcp_tx";

/// Feature list advertised during the handshake.
pub const EXTENSION_FEATURES: [&str; 4] = ["ack", "retry", "idempotency", "transactions"];

/// The extension object advertised under `capabilities.experimental.mcp_tx`.
#[must_use]
pub fn extension_advertisement() -> Value {
    json!({
        "version": PROTOCOL_VERSION,
        "features": EXTENSION_FEATURES,
    })
}

// ── Outbound request ────────────────────────────────────────────────

/// A request sent through the underlying session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Method name, `tools/call` for tool invocation.
    pub method: String,
    /// Call parameters.
    pub params: CallParams,
}

/// Parameters of a `tools/call` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallParams {
    /// Tool name.
    pub name: String,
    /// Tool arguments; an empty object when the caller passed none.
    pub arguments: Map<String, Value>,
    /// Reliability metadata, present only when the peer negotiated the
    /// extension.
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<MetaEnvelope>,
}

/// Envelope placing [`RequestMeta`] under the `mcp_tx` key of `_meta`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaEnvelope {
    /// The reliability metadata.
    pub mcp_tx: RequestMeta,
}

impl Request {
    /// A plain `tools/call` request without reliability metadata.
    #[must_use]
    pub fn tool_call(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            method: METHOD_TOOLS_CALL.to_string(),
            params: CallParams {
                name: name.into(),
                arguments,
                meta: None,
            },
        }
    }

    /// A `tools/call` request carrying reliability metadata under
    /// `params._meta.mcp_tx`.
    #[must_use]
    pub fn tool_call_with_meta(
        name: impl Into<String>,
        arguments: Map<String, Value>,
        meta: RequestMeta,
    ) -> Self {
        Self {
            method: METHOD_TOOLS_CALL.to_string(),
            params: CallParams {
                name: name.into(),
                arguments,
                meta: Some(MetaEnvelope { mcp_tx: meta }),
            },
        }
    }
}

// ── Handshake ───────────────────────────────────────────────────────

/// Options passed to the underlying session's `initialize`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitializeOptions {
    /// Capabilities advertised to the peer.
    #[serde(default)]
    pub capabilities: Capabilities,
}

/// Capability object advertised to the peer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Capabilities {
    /// Experimental capability map; the reliability layer adds its own
    /// advertisement under [`EXTENSION_KEY`].
    #[serde(default)]
    pub experimental: Map<String, Value>,
}

/// What the peer returned from `initialize`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitializeResult {
    /// The peer's capabilities, when it reported any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<PeerCapabilities>,
}

/// The peer's capability object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeerCapabilities {
    /// The peer's experimental capability map. A missing map and an empty
    /// one mean the same thing: no extension support.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<Map<String, Value>>,
}

impl PeerCapabilities {
    /// Whether the peer negotiated the reliability extension.
    #[must_use]
    pub fn supports_extension(&self) -> bool {
        self.experimental
            .as_ref()
            .is_some_and(|experimental| experimental.contains_key(EXTENSION_KEY))
    }

    /// Capabilities advertising the reliability extension.
    #[must_use]
    pub fn with_extension() -> Self {
        let mut experimental = Map::new();
        experimental.insert(EXTENSION_KEY.to_string(), extension_advertisement());
        Self {
            experimental: Some(experimental),
        }
    }

    /// Capabilities with an empty `experimental` map.
    #[must_use]
    pub fn empty_experimental() -> Self {
        Self {
            experimental: Some(Map::new()),
        }
    }
}
