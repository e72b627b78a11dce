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

use std::fmt;
use std::time::Duration;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// A data rate in bits per second.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bandwidth {
    bits_per_second: u64,
}

impl Bandwidth {
    pub const ZERO: Bandwidth = Bandwidth { bits_per_second: 0 };

    /// The rate at which `bytes` were carried over `interval`.
    ///
    /// A zero interval carries no rate information and yields `ZERO`.
    pub fn new(bytes: u64, interval: Duration) -> Self {
        let nanos = interval.as_nanos();
        if nanos == 0 {
            return Bandwidth::ZERO;
        }

        let bits = bytes as u128 * 8 * NANOS_PER_SEC / nanos;
        Bandwidth {
            bits_per_second: bits.min(u64::MAX as u128) as u64,
        }
    }

    pub const fn from_bits_per_second(bits_per_second: u64) -> Self {
        Bandwidth { bits_per_second }
    }

    /// Negative and non-finite inputs map to `ZERO`.
    pub fn from_mbps(mbps: f64) -> Self {
        if !mbps.is_finite() || mbps <= 0.0 {
            return Bandwidth::ZERO;
        }
        Bandwidth {
            bits_per_second: (mbps * 1e6).round() as u64,
        }
    }

    pub const fn as_bits_per_second(&self) -> u64 {
        self.bits_per_second
    }

    pub fn as_mbps(&self) -> f64 {
        self.bits_per_second as f64 / 1e6
    }

    pub fn is_zero(&self) -> bool {
        self.bits_per_second == 0
    }
}

impl fmt::Debug for Bandwidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}bps", self.bits_per_second)
    }
}

impl fmt::Display for Bandwidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3} Mb/s", self.as_mbps())
    }
}
