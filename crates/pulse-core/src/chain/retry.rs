//! ============================================================================
//! Confirmation Polling & RPC Error Classification
//! ============================================================================
//! Provides:
//! - Exponential backoff (with optional jitter) between receipt polls
//! - Error classification (transient vs revert vs stale nonce)
//!
//! Submissions are never retried here: a rejected `executeTransfer` is a
//! terminal failure for that attempt and the caller owns retry policy.
//! ============================================================================

use std::time::Duration;

/// Configuration for receipt polling
#[derive(Debug, Clone)]
pub struct ConfirmationConfig {
    /// Base delay between receipt polls (multiplied by 2^attempt)
    pub poll_interval_ms: u64,
    /// Maximum delay between receipt polls
    pub max_poll_interval_ms: u64,
    /// Stop waiting after this many polls. `None` waits for as long as the
    /// node keeps answering.
    pub max_polls: Option<u32>,
    /// Whether to add jitter to delays
    pub jitter: bool,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            max_poll_interval_ms: 8000,
            max_polls: None,
            jitter: true,
        }
    }
}

/// Error classification for RPC failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Node or network hiccup, the caller may retry later
    Transient,
    /// Rate limited by the RPC provider
    RateLimited,
    /// The contract rejected the call (revert, bad signature, balance)
    Revert,
    /// The agent account nonce was already used or is too low
    StaleNonce,
    /// Anything else that will not succeed on retry
    Permanent,
}

impl ErrorKind {
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::Transient | ErrorKind::RateLimited)
    }
}

/// Classify an RPC error message
pub fn classify_error(error: &str) -> ErrorKind {
    let lower = error.to_lowercase();

    if lower.contains("nonce too low")
        || lower.contains("already known")
        || lower.contains("replacement transaction underpriced")
    {
        return ErrorKind::StaleNonce;
    }

    if lower.contains("rate limit") || lower.contains("too many requests") || lower.contains("429") {
        return ErrorKind::RateLimited;
    }

    if lower.contains("execution reverted")
        || lower.contains("revert")
        || lower.contains("invalid signature")
        || lower.contains("insufficient balance")
        || lower.contains("expired")
    {
        return ErrorKind::Revert;
    }

    if lower.contains("insufficient funds") || lower.contains("intrinsic gas too low") {
        return ErrorKind::Permanent;
    }

    // Connection problems and unknown errors are treated as transient
    ErrorKind::Transient
}

/// Delay before receipt poll `attempt` (0-based)
pub fn calculate_delay(attempt: u32, config: &ConfirmationConfig) -> Duration {
    let multiplier = 2u64.saturating_pow(attempt.min(63));
    let base_delay = config.poll_interval_ms.saturating_mul(multiplier);
    let capped_delay = base_delay.min(config.max_poll_interval_ms);

    let final_delay = if config.jitter {
        // 0-50% extra
        let jitter_factor = 1.0 + (rand_simple() * 0.5);
        (capped_delay as f64 * jitter_factor) as u64
    } else {
        capped_delay
    };

    Duration::from_millis(final_delay)
}

/// Time-seeded pseudo-random number in [0.0, 1.0)
fn rand_simple() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}
