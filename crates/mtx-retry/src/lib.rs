// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! mtx-retry
#![deny(unsafe_code)]
#![warn(missing_docs)]

use mtx_core::{RetryPolicy, TxError};
use std::time::Duration;

/// Decide whether `error` is worth another attempt under `policy`.
///
/// Errors from the reliability taxonomy carry their own retryable bit, which
/// always wins. For foreign errors the uppercased message is scanned for the
/// policy's retryable tokens.
#[must_use]
pub fn should_retry(policy: &RetryPolicy, error: &anyhow::Error) -> bool {
    if let Some(tx) = error.downcast_ref::<TxError>() {
        return tx.retryable;
    }

    let message = error.to_string().to_uppercase();
    policy
        .retryable_errors
        .iter()
        .any(|token| message.contains(token))
}

/// Compute the backoff delay before retrying the zero-indexed `attempt`.
///
/// `min(base × multiplier^attempt, max)`, with ±20% uniform jitter when the
/// policy enables it. The result is never below `base_delay_ms`.
#[must_use]
pub fn compute_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let base = policy.base_delay_ms as f64;
    let raw = base * policy.backoff_multiplier.powi(attempt as i32);
    let capped = raw.min(policy.max_delay_ms as f64);

    let delay = if policy.jitter {
        capped + capped * 0.2 * (fastrand::f64() * 2.0 - 1.0)
    } else {
        capped
    };

    Duration::from_millis(delay.max(base) as u64)
}
