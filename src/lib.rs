// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! mcp-tx
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub use mtx_core::{
    ConfigError, ErrorCode, FinalStatus, MessageStatus, PROTOCOL_VERSION, RequestMeta,
    RequestTracker, ResponseMeta, RetryPolicy, SessionConfig, TxError, TxResult,
    sanitize_error_message,
};
pub use mtx_dedup::DedupCache;
pub use mtx_retry::{compute_delay, should_retry};
pub use mtx_session::{
    BaseSession, CallError, CallOptions, Capabilities, InitializeOptions, InitializeResult,
    McpTxSession, PeerCapabilities, Request,
};
pub use mtx_tools::{
    LocalSession, RegistryError, RouterError, ToolEntry, ToolHandler, ToolInfo, ToolRegistry,
    ToolRouter,
};
