//! Wait-time estimation.
//!
//! Prefers a trailing statistic over completed tickets, falls back to the
//! queue's configured per-customer minutes, then to a fixed default. The
//! result is a local heuristic, recomputed on every mutation and by the
//! periodic sweep; it is never a committed SLA.

use crate::registry::QueueConfig;

use super::types::LineState;

/// Per-customer estimate when neither history nor configuration is available.
pub const DEFAULT_WAIT_MINUTES: u32 = 15;

/// Completions older than this no longer influence the estimate.
pub const TRAILING_WINDOW_MS: u64 = 24 * 60 * 60 * 1000;

/// Per-customer minutes for one queue.
pub fn per_customer_minutes(line: &LineState, config: &QueueConfig, now: u64) -> u32 {
    if let Some(mean_ms) = trailing_mean_ms(line, now) {
        return ((mean_ms as f64) / 60_000.0).round() as u32;
    }
    config
        .avg_service_time_minutes
        .unwrap_or(DEFAULT_WAIT_MINUTES)
}

/// Expected wait in minutes for a ticket at 1-based `position`.
#[inline]
pub fn eta_minutes(position: u32, per_customer_minutes: u32) -> u32 {
    per_customer_minutes.saturating_mul(position)
}

/// Mean of `served_at - created_at` over completions inside the trailing
/// window, or `None` when the sample is empty.
fn trailing_mean_ms(line: &LineState, now: u64) -> Option<u64> {
    let cutoff = now.saturating_sub(TRAILING_WINDOW_MS);
    let mut sum: u128 = 0;
    let mut count: u64 = 0;
    for sample in line.completions.iter() {
        if sample.completed_at >= cutoff {
            sum += sample.waited_ms as u128;
            count += 1;
        }
    }
    if count == 0 {
        None
    } else {
        Some((sum / count as u128) as u64)
    }
}
