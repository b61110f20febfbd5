//! Backoff math for the retry queue.
//!
//! Kept pure and RNG-injectable so delay bounds can be asserted with a
//! seeded generator; production draws jitter from the thread-local RNG.

use std::time::Duration;

use rand::Rng;

use super::RetryOptions;

/// Delay before the next attempt, given how many attempts have failed.
///
/// `failed_attempts` is 1-indexed: the retry scheduled after the first
/// failure uses exponent 0 (no growth), after the second failure exponent
/// 1, and so on. With exponential backoff enabled the result lies in
/// `[delay * 2^(n-1), delay * 2^(n-1) + delay)`; with it disabled the
/// base delay is returned unchanged.
pub fn backoff_delay_with_rng<R: Rng + ?Sized>(
    options: &RetryOptions,
    failed_attempts: u32,
    rng: &mut R,
) -> Duration {
    if !options.exponential_backoff {
        return options.delay;
    }

    let exponent = failed_attempts.saturating_sub(1).min(31);
    let base_ms = options.delay.as_millis() as u64;
    let grown_ms = base_ms.saturating_mul(1u64 << exponent);
    let jitter_ms = if base_ms > 0 {
        rng.random_range(0..base_ms)
    } else {
        0
    };

    Duration::from_millis(grown_ms.saturating_add(jitter_ms))
}

/// Production entry point: jitter from the thread-local RNG.
pub fn backoff_delay(options: &RetryOptions, failed_attempts: u32) -> Duration {
    backoff_delay_with_rng(options, failed_attempts, &mut rand::rng())
}
