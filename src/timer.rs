// Copyright (c) 2023 The TQUIC Authors.
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

use strum::EnumCount;
use strum_macros::EnumCount;
use strum_macros::EnumIter;

use crate::time::Timestamp;

#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, EnumIter, EnumCount)]
pub enum Timer {
    /// When to recompute the pacing interval of the cohort
    PacingRecalc,

    /// When to report per-flow status lines
    StatusReport,
}

/// Associated timeout values with each `Timer`
#[derive(Debug, Copy, Clone, Default)]
pub struct TimerTable {
    expires: [Option<Timestamp>; Timer::COUNT],
}

impl TimerTable {
    /// Set expiration time for the given timer
    pub fn set(&mut self, timer: Timer, time: Timestamp) {
        self.expires[timer as usize] = Some(time);
    }

    /// Get the minimum expiration time of all timers
    pub fn next_timeout(&self) -> Option<Timestamp> {
        self.expires.iter().filter_map(|&x| x).min()
    }

    /// Check whether the given timer is expired
    pub fn is_expired(&self, timer: Timer, after: Timestamp) -> bool {
        self.expires[timer as usize].map_or(false, |x| x <= after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn timer_operation() {
        let mut timers = TimerTable::default();
        assert_eq!(timers.next_timeout(), None);

        let now = Timestamp::from_secs(1);
        let recalc_time = now + Duration::from_millis(200);
        let status_time = now + Duration::from_millis(3000);
        timers.set(Timer::PacingRecalc, recalc_time);
        timers.set(Timer::StatusReport, status_time);

        assert_eq!(timers.next_timeout(), Some(recalc_time));

        // Rescheduling replaces the previous expiration.
        timers.set(Timer::PacingRecalc, status_time + Duration::from_secs(1));
        assert_eq!(timers.next_timeout(), Some(status_time));
    }

    #[test]
    fn timer_expiration() {
        let mut timers = TimerTable::default();
        let now = Timestamp::ZERO;
        let recalc_time = now + Duration::from_millis(200);
        let status_time = now + Duration::from_millis(3000);
        timers.set(Timer::PacingRecalc, recalc_time);
        timers.set(Timer::StatusReport, status_time);

        assert!(!timers.is_expired(Timer::PacingRecalc, now));
        assert!(!timers.is_expired(Timer::StatusReport, now));

        let now = recalc_time;
        assert!(timers.is_expired(Timer::PacingRecalc, now));
        assert!(!timers.is_expired(Timer::StatusReport, now));

        let now = status_time;
        assert!(timers.is_expired(Timer::PacingRecalc, now));
        assert!(timers.is_expired(Timer::StatusReport, now));
    }
}
