// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Certificate expiry classification.
//!
//! Timestamps use the Windows `FILETIME` base: 100-nanosecond ticks since
//! 1601-01-01 UTC. Certificates read from the in-memory backend are converted
//! into the same representation so the policy has a single code path.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Ticks per second (100-nanosecond scale).
pub const TICKS_PER_SECOND: u64 = 10_000_000;

/// Seconds per day.
pub const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Ticks between 1601-01-01 and 1970-01-01.
const UNIX_EPOCH_TICKS: u64 = 116_444_736_000_000_000;

/// Absolute UTC timestamp in 100-nanosecond ticks since 1601-01-01.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FileTime(pub u64);

impl FileTime {
    /// Current system time.
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    /// Build from the two 32-bit halves of a Windows `FILETIME`.
    pub fn from_parts(low: u32, high: u32) -> Self {
        Self(((high as u64) << 32) | low as u64)
    }

    /// Convert a [`SystemTime`]. Times before 1601 clamp to zero.
    pub fn from_system_time(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(after) => Self(UNIX_EPOCH_TICKS.saturating_add(duration_to_ticks(after))),
            Err(e) => Self(UNIX_EPOCH_TICKS.saturating_sub(duration_to_ticks(e.duration()))),
        }
    }

    /// Convert seconds relative to the Unix epoch.
    pub fn from_unix_seconds(secs: i64) -> Self {
        let ticks = (secs.unsigned_abs()).saturating_mul(TICKS_PER_SECOND);
        if secs >= 0 {
            Self(UNIX_EPOCH_TICKS.saturating_add(ticks))
        } else {
            Self(UNIX_EPOCH_TICKS.saturating_sub(ticks))
        }
    }

    /// Convert back to a [`SystemTime`].
    pub fn to_system_time(self) -> SystemTime {
        if self.0 >= UNIX_EPOCH_TICKS {
            UNIX_EPOCH + ticks_to_duration(self.0 - UNIX_EPOCH_TICKS)
        } else {
            UNIX_EPOCH - ticks_to_duration(UNIX_EPOCH_TICKS - self.0)
        }
    }

    /// Whole seconds relative to the Unix epoch.
    pub fn unix_seconds(self) -> i64 {
        (self.0 as i128 - UNIX_EPOCH_TICKS as i128).div_euclid(TICKS_PER_SECOND as i128) as i64
    }

    /// Add whole seconds, saturating at the representable range.
    pub fn saturating_add_seconds(self, secs: u64) -> Self {
        Self(self.0.saturating_add(secs.saturating_mul(TICKS_PER_SECOND)))
    }

    /// Subtract whole seconds, saturating at zero.
    pub fn saturating_sub_seconds(self, secs: u64) -> Self {
        Self(self.0.saturating_sub(secs.saturating_mul(TICKS_PER_SECOND)))
    }

    /// Add whole days, saturating at the representable range.
    pub fn saturating_add_days(self, days: u32) -> Self {
        self.saturating_add_seconds(days as u64 * SECONDS_PER_DAY)
    }
}

impl fmt::Display for FileTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.unix_seconds())
    }
}

fn duration_to_ticks(d: Duration) -> u64 {
    d.as_secs()
        .saturating_mul(TICKS_PER_SECOND)
        .saturating_add(d.subsec_nanos() as u64 / 100)
}

fn ticks_to_duration(ticks: u64) -> Duration {
    Duration::new(
        ticks / TICKS_PER_SECOND,
        ((ticks % TICKS_PER_SECOND) * 100) as u32,
    )
}

/// Certificate validity period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidityWindow {
    /// Start of validity (NotBefore).
    pub not_before: FileTime,
    /// End of validity (NotAfter).
    pub not_after: FileTime,
}

impl ValidityWindow {
    /// Create a validity window.
    pub fn new(not_before: FileTime, not_after: FileTime) -> Self {
        Self {
            not_before,
            not_after,
        }
    }
}

/// Check whether a certificate will have expired `days` days after `reference`.
///
/// Returns true iff `not_after` is strictly earlier than `reference + days`.
pub fn will_expire_within(window: &ValidityWindow, reference: FileTime, days: u32) -> bool {
    let threshold = reference.saturating_add_days(days);
    window.not_after < threshold
}
