// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
///
/// Expiry bookkeeping is persisted as an absolute timestamp rather than a relative countdown so
/// it survives process restarts.
pub type Timestamp = u64;

/// Current wall-clock time.
pub fn now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
