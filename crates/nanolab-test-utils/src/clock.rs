// SPDX-FileCopyrightText: 2026 Nanolab Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Manual clock helpers.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use nanolab_core::ManualClock;

/// Mid-morning UTC on a fixed date, far from midnight.
pub fn fixed_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, 9, 30, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// A manual clock at [`fixed_start`].
pub fn fixed_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(fixed_start()))
}

/// A manual clock `secs_before` seconds ahead of the next UTC midnight.
pub fn clock_before_midnight(secs_before: i64) -> Arc<ManualClock> {
    let midnight = Utc
        .with_ymd_and_hms(2026, 3, 15, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    Arc::new(ManualClock::new(
        midnight - chrono::Duration::seconds(secs_before),
    ))
}
