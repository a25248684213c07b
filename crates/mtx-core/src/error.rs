// SPDX-License-Identifier: MIT OR Apache-2.0
//! Error taxonomy for the reliability layer.
//!
//! Every [`TxError`] carries a stable [`ErrorCode`], a retryable bit that the
//! retry engine honors ahead of any message inspection, and a structured
//! details map.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Stable error codes surfaced in failure results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Generic reliability-layer error.
    Error,
    /// A per-attempt timeout expired.
    Timeout,
    /// The underlying transport reported a connection or network failure.
    NetworkError,
    /// Messages arrived out of order; never retryable.
    SequenceError,
    /// The underlying error carried no code of its own.
    Unknown,
}

impl ErrorCode {
    /// Machine-readable code string, bit-exact on the wire.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "MCP_TX_ERROR",
            Self::Timeout => "MCP_TX_TIMEOUT",
            Self::NetworkError => "MCP_TX_NETWORK_ERROR",
            Self::SequenceError => "MCP_TX_SEQUENCE_ERROR",
            Self::Unknown => "UNKNOWN_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reliability-layer error with a stable code and a retryable bit.
#[derive(Debug, Clone, thiserror::Error)]
#[error("[{}] {message}", .code.as_str())]
pub struct TxError {
    /// Stable code for this error.
    pub code: ErrorCode,
    /// Human-readable message. May contain transport detail; sanitize before
    /// surfacing to callers.
    pub message: String,
    /// Whether the retry engine should consider another attempt.
    pub retryable: bool,
    /// Structured context, deterministic ordering.
    pub details: BTreeMap<String, Value>,
}

impl TxError {
    /// Generic, non-retryable error with the base code.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Error,
            message: message.into(),
            retryable: false,
            details: BTreeMap::new(),
        }
    }

    /// A per-attempt timeout. Retryable; `details` carries `timeout_ms`.
    #[must_use]
    pub fn timeout(message: impl Into<String>, timeout_ms: u64) -> Self {
        let mut details = BTreeMap::new();
        details.insert("timeout_ms".to_string(), Value::from(timeout_ms));
        Self {
            code: ErrorCode::Timeout,
            message: message.into(),
            retryable: true,
            details,
        }
    }

    /// A connection/network failure. Retryable; `details` carries the
    /// original error text when one is given.
    #[must_use]
    pub fn network(message: impl Into<String>, original: Option<String>) -> Self {
        let mut details = BTreeMap::new();
        if let Some(original) = original {
            details.insert("original_error".to_string(), Value::from(original));
        }
        Self {
            code: ErrorCode::NetworkError,
            message: message.into(),
            retryable: true,
            details,
        }
    }

    /// An ordering violation. Never retryable; `details` carries `expected`
    /// and `received`.
    #[must_use]
    pub fn sequence(message: impl Into<String>, expected: u64, received: u64) -> Self {
        let mut details = BTreeMap::new();
        details.insert("expected".to_string(), Value::from(expected));
        details.insert("received".to_string(), Value::from(received));
        Self {
            code: ErrorCode::SequenceError,
            message: message.into(),
            retryable: false,
            details,
        }
    }
}
