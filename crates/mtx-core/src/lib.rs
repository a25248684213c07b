// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! mtx-core
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Retry policy and session configuration.
pub mod config;
/// The `TxError` taxonomy with stable error codes and a retryable bit.
pub mod error;
/// Error-message sanitization for caller-facing and logged text.
pub mod sanitize;
/// Request/response metadata, the result wrapper, and the lifecycle tracker.
pub mod types;

pub use config::{ConfigError, RetryPolicy, SessionConfig};
pub use error::{ErrorCode, TxError};
pub use sanitize::sanitize_error_message;
pub use types::{
    FinalStatus, MessageStatus, PROTOCOL_VERSION, RequestMeta, RequestTracker, ResponseMeta,
    TxResult,
};
