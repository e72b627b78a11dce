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

//! Fairpace estimates the delivery rate and latency of reliable byte streams
//! under congestion control, and uses those estimates to pace acknowledgments
//! so that flows competing for a bottleneck converge toward a fair share.
//!
//! ## Components
//!
//! * **Delivery rate sampling**: a sender-side sampler turning "segment sent"
//!   and "segment acknowledged" events into one delivery rate sample per
//!   acknowledgment, with app-limited detection.
//! * **Windowed statistics**: a receiver-side collector keeping the most
//!   recent packet records of a flow and deriving its throughput and latency.
//! * **Fairness-aware pacing**: a periodic controller comparing each flow of a
//!   cohort against a target fair share, and spacing the acknowledgments of
//!   over-consuming flows through a calibrated rate-to-interval model.
//!
//! All components are driven by a discrete-event kernel: they never read a
//! clock, the current virtual time is passed to every callback.
//!
//! ## Get started
//!
//! ```
//! use std::time::Duration;
//! use fairpace::pacing::{Cohort, PacingController, PacingHandler, ScaleParams};
//! use fairpace::{Config, FlowClass, PacketStamp, Timestamp};
//!
//! struct Transport;
//!
//! impl PacingHandler for Transport {
//!     fn set_pacing_interval(&mut self, flow_id: u64, interval: Duration) {
//!         println!("flow {} paced by {:?}", flow_id, interval);
//!     }
//! }
//!
//! let mut conf = Config::new();
//! conf.set_scale_params(ScaleParams::new(0.0, 20_000_000.0, 0.0, 0.004)?);
//!
//! let mut cohort = Cohort::new();
//! cohort.add_flow(1, conf.max_packet_records())?;
//!
//! let mut controller = PacingController::from_config(&conf)?;
//! controller.start(Timestamp::ZERO)?;
//!
//! let stamp = PacketStamp::new(Timestamp::from_millis(1), FlowClass::Primary);
//! cohort.on_packet_delivered(1, &stamp, 1500, Timestamp::from_millis(11))?;
//!
//! if let Some(now) = controller.timeout() {
//!     controller.on_timeout(now, &mut cohort, &mut Transport);
//! }
//! # Ok::<(), fairpace::error::Error>(())
//! ```

use std::time::Duration;

use crate::pacing::RateModelKind;
use crate::pacing::ScaleParams;

/// Default number of packet records kept by each receiver.
pub const DEFAULT_MAX_PACKET_RECORDS: usize = 1000;

/// Default delay between cohort start and the first pacing recalculation.
pub const DEFAULT_WARMUP: Duration = Duration::from_secs(5);

/// Default pacing recalculation period.
pub const DEFAULT_RECALC_PERIOD: Duration = Duration::from_micros(1 << 30);

/// Default period of status lines.
pub const DEFAULT_STATUS_PERIOD: Duration = Duration::from_secs(2);

/// Default ratio of the target a flow may reach before being paced.
pub const DEFAULT_FAIRNESS_HEADROOM: f64 = 1.2;

/// A specialized [`Result`] type for fairpace operations.
///
/// This type is used throughout the public API for any operation that can
/// produce an error.
///
/// [`Result`]: https://doc.rust-lang.org/std/result/enum.Result.html
pub type Result<T> = std::result::Result<T, Error>;

/// Configurations of the pacing core, validated once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of records kept by each receiver.
    max_packet_records: usize,

    /// Configurations about the pacing controller.
    pacing: PacingConfig,
}

impl Config {
    /// Create default configuration.
    ///
    /// The configuration may be customized by calling related set methods.
    /// Calibration bounds have no default and must be provided before a
    /// `PacingController` can be created.
    ///
    /// ## Examples:
    ///
    /// ```
    /// let mut conf = fairpace::Config::new();
    /// conf.set_max_packet_records(2000)?;
    /// conf.set_target_throughput_mbps(Some(10.0))?;
    /// # Ok::<(), fairpace::error::Error>(())
    /// ```
    pub fn new() -> Self {
        Self {
            max_packet_records: DEFAULT_MAX_PACKET_RECORDS,
            pacing: PacingConfig::default(),
        }
    }

    /// Set the number of packet records kept by each receiver.
    /// The default value is 1000. Zero is rejected.
    pub fn set_max_packet_records(&mut self, v: usize) -> Result<()> {
        if v == 0 {
            return Err(Error::InvalidConfig(
                "max packet records must be positive".into(),
            ));
        }
        self.max_packet_records = v;
        Ok(())
    }

    pub fn max_packet_records(&self) -> usize {
        self.max_packet_records
    }

    /// Set the delay between cohort start and the first recalculation.
    /// The default value is 5 seconds.
    pub fn set_warmup(&mut self, v: Duration) {
        self.pacing.warmup = v;
    }

    /// Set the pacing recalculation period.
    /// The default value is 2^30 microseconds. Zero is rejected.
    pub fn set_recalc_period(&mut self, v: Duration) -> Result<()> {
        if v.is_zero() {
            return Err(Error::InvalidConfig(
                "recalculation period must be positive".into(),
            ));
        }
        self.pacing.recalc_period = v;
        Ok(())
    }

    /// Set the period of status lines. Zero turns them off.
    /// The default value is 2 seconds.
    pub fn set_status_period(&mut self, v: Duration) {
        self.pacing.status_period = v;
    }

    /// Set a fixed target throughput in Mb/s. `None` uses the mean throughput
    /// of the cohort, which is the default.
    pub fn set_target_throughput_mbps(&mut self, v: Option<f64>) -> Result<()> {
        if let Some(target) = v {
            if !target.is_finite() || target <= 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "invalid target throughput {}",
                    target
                )));
            }
        }
        self.pacing.target_throughput_mbps = v;
        Ok(())
    }

    /// Set the ratio of the target a flow may reach before being paced.
    /// The default value is 1.2. Values under 1.0 are rejected.
    pub fn set_fairness_headroom(&mut self, v: f64) -> Result<()> {
        if !v.is_finite() || v < 1.0 {
            return Err(Error::InvalidConfig(format!(
                "invalid fairness headroom {}",
                v
            )));
        }
        self.pacing.fairness_headroom = v;
        Ok(())
    }

    /// Set the calibration bounds of the rate-to-interval model.
    pub fn set_scale_params(&mut self, v: ScaleParams) {
        self.pacing.scale_params = Some(v);
    }

    /// Load the calibration bounds of the rate-to-interval model from a file
    /// holding `f_min,f_max,o_min,o_max`.
    pub fn load_scale_params(&mut self, path: &str) -> Result<()> {
        self.pacing.scale_params = Some(ScaleParams::from_file(path)?);
        Ok(())
    }

    /// Set the rate-to-interval model.
    /// The default is the identity linear model.
    pub fn set_rate_model(&mut self, v: RateModelKind) {
        self.pacing.rate_model = v;
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

/// Configurations about the pacing controller.
#[doc(hidden)]
#[derive(Debug, Clone)]
pub struct PacingConfig {
    /// Delay between cohort start and the first recalculation.
    pub warmup: Duration,

    /// Period between two recalculations.
    pub recalc_period: Duration,

    /// Period between two status reports. Zero disables them.
    pub status_period: Duration,

    /// Fixed target throughput, or the cohort mean when absent.
    pub target_throughput_mbps: Option<f64>,

    /// Ratio of the target a flow may reach before being paced.
    pub fairness_headroom: f64,

    /// Calibration bounds of the rate-to-interval model.
    pub scale_params: Option<ScaleParams>,

    /// Rate-to-interval model.
    pub rate_model: RateModelKind,
}

impl Default for PacingConfig {
    fn default() -> PacingConfig {
        PacingConfig {
            warmup: DEFAULT_WARMUP,
            recalc_period: DEFAULT_RECALC_PERIOD,
            status_period: DEFAULT_STATUS_PERIOD,
            target_throughput_mbps: None,
            fairness_headroom: DEFAULT_FAIRNESS_HEADROOM,
            scale_params: None,
            rate_model: RateModelKind::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[ctor::ctor]
    fn init() {
        env_logger::builder()
            .filter_level(log::LevelFilter::Trace)
            .format_timestamp_millis()
            .is_test(true)
            .init();
    }

    #[test]
    fn config_defaults() {
        let conf = Config::default();
        assert_eq!(conf.max_packet_records(), 1000);
        assert_eq!(conf.pacing.warmup, Duration::from_secs(5));
        assert_eq!(conf.pacing.recalc_period, Duration::from_micros(1 << 30));
        assert_eq!(conf.pacing.status_period, Duration::from_secs(2));
        assert_eq!(conf.pacing.target_throughput_mbps, None);
        assert_eq!(conf.pacing.fairness_headroom, 1.2);
        assert_eq!(conf.pacing.scale_params, None);
        assert_eq!(conf.pacing.rate_model, RateModelKind::default());
    }

    #[test]
    fn max_packet_records() -> Result<()> {
        let mut conf = Config::new();
        assert!(matches!(
            conf.set_max_packet_records(0),
            Err(Error::InvalidConfig(_))
        ));
        assert_eq!(conf.max_packet_records(), DEFAULT_MAX_PACKET_RECORDS);

        conf.set_max_packet_records(10)?;
        assert_eq!(conf.max_packet_records(), 10);
        Ok(())
    }

    #[test]
    fn target_throughput() -> Result<()> {
        let mut conf = Config::new();
        for v in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                conf.set_target_throughput_mbps(Some(v)),
                Err(Error::InvalidConfig(_))
            ));
        }
        assert_eq!(conf.pacing.target_throughput_mbps, None);

        conf.set_target_throughput_mbps(Some(10.0))?;
        assert_eq!(conf.pacing.target_throughput_mbps, Some(10.0));
        conf.set_target_throughput_mbps(None)?;
        assert_eq!(conf.pacing.target_throughput_mbps, None);
        Ok(())
    }

    #[test]
    fn fairness_headroom() -> Result<()> {
        let mut conf = Config::new();
        for v in [0.9, 0.0, f64::NAN] {
            assert!(matches!(
                conf.set_fairness_headroom(v),
                Err(Error::InvalidConfig(_))
            ));
        }
        assert_eq!(conf.pacing.fairness_headroom, DEFAULT_FAIRNESS_HEADROOM);

        conf.set_fairness_headroom(1.0)?;
        assert_eq!(conf.pacing.fairness_headroom, 1.0);
        Ok(())
    }

    #[test]
    fn periods() -> Result<()> {
        let mut conf = Config::new();
        assert!(matches!(
            conf.set_recalc_period(Duration::ZERO),
            Err(Error::InvalidConfig(_))
        ));
        conf.set_recalc_period(Duration::from_millis(100))?;
        assert_eq!(conf.pacing.recalc_period, Duration::from_millis(100));

        conf.set_warmup(Duration::ZERO);
        assert_eq!(conf.pacing.warmup, Duration::ZERO);
        conf.set_status_period(Duration::ZERO);
        assert_eq!(conf.pacing.status_period, Duration::ZERO);
        Ok(())
    }

    #[test]
    fn load_scale_params() -> Result<()> {
        let mut conf = Config::new();
        let dir = tempfile::tempdir()?;
        let missing = dir.path().join("calibration.csv");
        assert!(matches!(
            conf.load_scale_params(&missing.to_string_lossy()),
            Err(Error::IoError(_))
        ));

        let path = dir.path().join("calibration.csv");
        let mut file = std::fs::File::create(&path)?;
        writeln!(file, "0,20000000,0,0.004")?;
        conf.load_scale_params(&path.to_string_lossy())?;
        assert_eq!(
            conf.pacing.scale_params,
            Some(ScaleParams::new(0.0, 20_000_000.0, 0.0, 0.004)?)
        );

        let mut file = std::fs::File::create(&path)?;
        writeln!(file, "0,20000000,0")?;
        assert!(matches!(
            conf.load_scale_params(&path.to_string_lossy()),
            Err(Error::InvalidCalibration(_))
        ));
        Ok(())
    }
}

pub use crate::bandwidth::Bandwidth;
pub use crate::delivery_rate::DeliveryRateSampler;
pub use crate::delivery_rate::RateSample;
pub use crate::error::Error;
pub use crate::pacing::Cohort;
pub use crate::pacing::PacingController;
pub use crate::stamp::FlowClass;
pub use crate::stamp::PacketStamp;
pub use crate::time::Timestamp;
pub use crate::window_stats::FlowStats;
pub use crate::window_stats::WindowedStatsCollector;

#[path = "pacing/pacing.rs"]
pub mod pacing;

mod bandwidth;
mod codec;
pub mod delivery_rate;
pub mod error;
pub mod stamp;
pub mod time;
#[doc(hidden)]
pub mod timer;
pub mod window_stats;
