//! Envelope clock sources.
//!
//! Every outbound envelope is stamped with both clocks: `mono_ms` is
//! milliseconds since the first call in this process (comparable only
//! within one bridge lifetime), `wall_unix_ms` is Unix wall time used for
//! action TTL arithmetic.

use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Milliseconds on the process-local monotonic clock.
#[must_use]
pub fn mono_ms() -> u64 {
    static ANCHOR: OnceLock<Instant> = OnceLock::new();
    let anchor = ANCHOR.get_or_init(Instant::now);
    u64::try_from(anchor.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Milliseconds on the Unix wall clock. A clock before the epoch reads
/// as zero rather than failing.
#[must_use]
pub fn wall_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
