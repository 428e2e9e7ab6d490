// Reconnect backoff policy
// Exponential delay with a fixed cap; the constants are compiled in.

use std::time::Duration;

/// Reconnect attempts allowed before a subscription is abandoned
pub const MAX_RETRIES: u32 = 5;

/// Delay before the first reconnect re-check
pub const BASE_BACKOFF_MS: u64 = 1_000;

/// Upper bound for any single delay
pub const MAX_BACKOFF_MS: u64 = 30_000;

/// Delay to wait before re-checking a job after `retry_count` failed attempts:
/// `min(BASE_BACKOFF_MS * 2^retry_count, MAX_BACKOFF_MS)`.
pub fn backoff_delay(retry_count: u32) -> Duration {
    let factor = 1u64.checked_shl(retry_count).unwrap_or(u64::MAX);
    let millis = BASE_BACKOFF_MS.saturating_mul(factor).min(MAX_BACKOFF_MS);
    Duration::from_millis(millis)
}

/// Whether another reconnect attempt is allowed
pub fn retries_remaining(retry_count: u32) -> bool {
    retry_count < MAX_RETRIES
}
