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

use std::time::Duration;

use log::debug;
use log::info;
use log::trace;
use log::warn;

use crate::pacing::build_rate_model;
use crate::pacing::Cohort;
use crate::pacing::PacingHandler;
use crate::pacing::RateToIntervalModel;
use crate::pacing::ScaleParams;
use crate::stamp::FlowClass;
use crate::time::Timestamp;
use crate::timer::Timer;
use crate::timer::TimerTable;
use crate::Config;
use crate::Error;
use crate::Result;

/// Nanoseconds per microsecond, the unit of the unscaled model output.
const NANOS_PER_MICRO: f64 = 1_000.0;

/// Bits per second in one Mb/s.
const BPS_PER_MBPS: f64 = 1_000_000.0;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PacingControllerState {
    /// Waiting for the warm-up delay to elapse.
    Idle,

    /// Recalculating the pacing of the cohort periodically.
    Active,
}

/// Periodic controller pacing the acknowledgments of over-consuming flows.
#[derive(Debug)]
pub struct PacingController {
    state: PacingControllerState,

    /// Delay between start and the first recalculation.
    warmup: Duration,

    recalc_period: Duration,

    /// Zero disables status lines.
    status_period: Duration,

    /// Configured target; the cohort mean is used when absent.
    fixed_target_mbps: Option<f64>,

    fairness_headroom: f64,

    scale_params: ScaleParams,

    model: Box<dyn RateToIntervalModel>,

    timers: TimerTable,

    start_time: Option<Timestamp>,

    activated_at: Option<Timestamp>,

    /// Target used by the latest recalculation.
    target_mbps: Option<f64>,

    /// Interval computed by the latest recalculation.
    pacing_interval: Duration,

    recalculations: u64,
}

impl PacingController {
    /// Create a controller using the given model.
    ///
    /// Fails if the configuration carries no calibration bounds.
    pub fn new(conf: &Config, model: Box<dyn RateToIntervalModel>) -> Result<Self> {
        let scale_params = conf.pacing.scale_params.ok_or_else(|| {
            Error::InvalidCalibration("no calibration bounds configured".into())
        })?;

        Ok(Self {
            state: PacingControllerState::Idle,
            warmup: conf.pacing.warmup,
            recalc_period: conf.pacing.recalc_period,
            status_period: conf.pacing.status_period,
            fixed_target_mbps: conf.pacing.target_throughput_mbps,
            fairness_headroom: conf.pacing.fairness_headroom,
            scale_params,
            model,
            timers: TimerTable::default(),
            start_time: None,
            activated_at: None,
            target_mbps: None,
            pacing_interval: Duration::ZERO,
            recalculations: 0,
        })
    }

    /// Create a controller using the model selected by the configuration.
    pub fn from_config(conf: &Config) -> Result<Self> {
        let model = build_rate_model(&conf.pacing.rate_model)?;
        Self::new(conf, model)
    }

    /// Start the controller at cohort start time.
    pub fn start(&mut self, now: Timestamp) -> Result<()> {
        if self.start_time.is_some() {
            return Err(Error::InvalidState("pacing controller already started".into()));
        }

        self.start_time = Some(now);
        self.timers.set(Timer::PacingRecalc, now + self.warmup);
        if !self.status_period.is_zero() {
            self.timers.set(Timer::StatusReport, now + self.status_period);
        }
        debug!(
            "now={:?} pacing controller started, model {}, warmup {:?}, recalc period {:?}",
            now,
            self.model.name(),
            self.warmup,
            self.recalc_period
        );
        Ok(())
    }

    pub fn state(&self) -> PacingControllerState {
        self.state
    }

    /// Earliest time the controller needs `on_timeout` to be called.
    pub fn timeout(&self) -> Option<Timestamp> {
        self.timers.next_timeout()
    }

    /// Run the expired periodic tasks. Each task reschedules itself.
    pub fn on_timeout(
        &mut self,
        now: Timestamp,
        cohort: &mut Cohort,
        handler: &mut dyn PacingHandler,
    ) {
        if self.timers.is_expired(Timer::StatusReport, now) {
            self.report_status(now, cohort, handler);
            self.timers.set(Timer::StatusReport, now + self.status_period);
        }

        if self.timers.is_expired(Timer::PacingRecalc, now) {
            if self.state == PacingControllerState::Idle {
                self.state = PacingControllerState::Active;
                self.activated_at = Some(now);
                info!(
                    "now={:?} pacing controller active, {} flows",
                    now,
                    cohort.len()
                );
            }
            self.recalculate(now, cohort, handler);
            self.timers.set(Timer::PacingRecalc, now + self.recalc_period);
        }
    }

    /// Recompute the pacing interval and apply it to the cohort.
    ///
    /// Members whose windowed throughput is under the headroom bound get
    /// their pacing cleared, the others get the new interval. Returns the
    /// interval, or `None` when there is no target to work from.
    pub fn recalculate(
        &mut self,
        now: Timestamp,
        cohort: &mut Cohort,
        handler: &mut dyn PacingHandler,
    ) -> Option<Duration> {
        let target = match self.fixed_target_mbps {
            Some(target) => target,
            None => match cohort.mean_throughput_mbps() {
                Some(mean) => mean,
                None => {
                    debug!("now={:?} pacing skipped, empty cohort", now);
                    return None;
                }
            },
        };

        let interval = self.pacing_interval_for(target);
        self.target_mbps = Some(target);
        self.pacing_interval = interval;
        self.recalculations += 1;

        let bound = self.fairness_headroom * target;
        for member in cohort.iter_mut() {
            let throughput = member.stats().throughput_mbps();
            let applied = if throughput < bound {
                Duration::ZERO
            } else {
                interval
            };
            trace!(
                "now={:?} pacing flow {} throughput {:.3} Mb/s bound {:.3} Mb/s interval {:?}",
                now,
                member.flow_id(),
                throughput,
                bound,
                applied
            );
            member.pacing_mut().update(applied, now);
            handler.set_pacing_interval(member.flow_id(), applied);
        }

        Some(interval)
    }

    /// Interval between acknowledgments for the given target rate.
    pub fn pacing_interval_for(&self, target_mbps: f64) -> Duration {
        let input = self.scale_params.scale(target_mbps * BPS_PER_MBPS);
        let output = self.model.evaluate(input);
        let acks_per_micro = self.scale_params.unscale(output);
        debug!(
            "pacing target {:.3} Mb/s, model {} input {:.6} output {:.6}, unscaled {:.9}",
            target_mbps,
            self.model.name(),
            input,
            output,
            acks_per_micro
        );

        match interval_from_rate(acks_per_micro) {
            Some(interval) => interval,
            None => {
                warn!(
                    "pacing model {} output {} unusable, pacing disabled",
                    self.model.name(),
                    acks_per_micro
                );
                Duration::ZERO
            }
        }
    }

    /// Target used by the latest recalculation.
    pub fn target_mbps(&self) -> Option<f64> {
        self.target_mbps
    }

    /// Interval computed by the latest recalculation.
    pub fn pacing_interval(&self) -> Duration {
        self.pacing_interval
    }

    pub fn scale_params(&self) -> &ScaleParams {
        &self.scale_params
    }

    pub fn recalculations(&self) -> u64 {
        self.recalculations
    }

    pub fn start_time(&self) -> Option<Timestamp> {
        self.start_time
    }

    /// Time of the transition to `Active`.
    pub fn activated_at(&self) -> Option<Timestamp> {
        self.activated_at
    }

    fn report_status(&self, now: Timestamp, cohort: &Cohort, handler: &dyn PacingHandler) {
        for member in cohort.iter() {
            let stats = member.stats();
            let pending = match member.collector().flow_class() {
                Some(FlowClass::Primary) => handler.pending_acks(member.flow_id()),
                _ => None,
            };
            match pending {
                Some(pending) => info!(
                    "now={:?} flow {} throughput {:.3} Mb/s, avg latency {:?}, pending acks {}",
                    now,
                    member.flow_id(),
                    stats.throughput_mbps(),
                    stats.avg_latency(),
                    pending
                ),
                None => info!(
                    "now={:?} flow {} throughput {:.3} Mb/s, avg latency {:?}",
                    now,
                    member.flow_id(),
                    stats.throughput_mbps(),
                    stats.avg_latency()
                ),
            }
        }

        if let Some(start) = self.start_time {
            if let Some(index) = cohort.fairness_index(now - start) {
                info!("now={:?} cohort fairness index {:.4}", now, index);
            }
        }
    }
}

/// Convert a rate in acknowledgments per microsecond into the interval
/// between two acknowledgments.
fn interval_from_rate(acks_per_micro: f64) -> Option<Duration> {
    if !acks_per_micro.is_finite() || acks_per_micro <= 0.0 {
        return None;
    }
    let nanos = (NANOS_PER_MICRO / acks_per_micro).round();
    Some(Duration::from_nanos(nanos as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pacing::LinearModel;
    use crate::stamp::PacketStamp;
    use rustc_hash::FxHashMap;

    #[derive(Default)]
    struct RecordingHandler {
        intervals: Vec<(u64, Duration)>,
        pending: FxHashMap<u64, usize>,
    }

    impl PacingHandler for RecordingHandler {
        fn set_pacing_interval(&mut self, flow_id: u64, interval: Duration) {
            self.intervals.push((flow_id, interval));
        }

        fn pending_acks(&self, flow_id: u64) -> Option<usize> {
            self.pending.get(&flow_id).copied()
        }
    }

    fn config(target: Option<f64>) -> Result<Config> {
        let mut conf = Config::new();
        conf.set_scale_params(ScaleParams::new(0.0, 20_000_000.0, 0.0, 0.004)?);
        conf.set_target_throughput_mbps(target)?;
        conf.set_warmup(Duration::from_secs(5));
        conf.set_recalc_period(Duration::from_secs(1))?;
        conf.set_status_period(Duration::ZERO);
        Ok(conf)
    }

    /// Deliver `bytes_per_half_second` twice, giving a one second window.
    fn deliver(cohort: &mut Cohort, flow_id: u64, bytes_per_half_second: u64) -> Result<()> {
        for i in 0..2 {
            let stamp = PacketStamp::new(Timestamp::from_millis(500 * i), FlowClass::Primary);
            let recv = Timestamp::from_millis(500 * (i + 1));
            cohort.on_packet_delivered(flow_id, &stamp, bytes_per_half_second, recv)?;
        }
        Ok(())
    }

    #[test]
    fn controller_missing_calibration() {
        let conf = Config::new();
        assert!(matches!(
            PacingController::from_config(&conf),
            Err(Error::InvalidCalibration(_))
        ));
    }

    #[test]
    fn controller_interval_from_model() -> Result<()> {
        let ctl = PacingController::from_config(&config(None)?)?;
        // 10 Mb/s scales to 0.5, unscaled to 0.002 acks per microsecond.
        assert_eq!(ctl.pacing_interval_for(10.0), Duration::from_micros(500));
        assert_eq!(ctl.pacing_interval_for(20.0), Duration::from_micros(250));
        assert_eq!(ctl.pacing_interval_for(0.0), Duration::ZERO);

        let model = Box::new(LinearModel::new(-1.0, 0.0)?);
        let ctl = PacingController::new(&config(None)?, model)?;
        assert_eq!(ctl.pacing_interval_for(10.0), Duration::ZERO);
        Ok(())
    }

    #[test]
    fn controller_under_bound_cleared() -> Result<()> {
        let mut ctl = PacingController::from_config(&config(Some(10.0))?)?;
        let mut cohort = Cohort::new();
        let mut handler = RecordingHandler::default();
        cohort.add_flow(1, 100)?;
        deliver(&mut cohort, 1, 500_000)?;
        assert_eq!(cohort.get(1).unwrap().stats().throughput_mbps(), 8.0);

        let now = Timestamp::from_secs(5);
        assert_eq!(
            ctl.recalculate(now, &mut cohort, &mut handler),
            Some(Duration::from_micros(500))
        );
        assert_eq!(ctl.target_mbps(), Some(10.0));
        assert_eq!(handler.intervals, vec![(1, Duration::ZERO)]);

        let pacing = cohort.get(1).unwrap().pacing();
        assert!(!pacing.is_paced());
        assert_eq!(pacing.last_recalculated(), Some(now));
        Ok(())
    }

    #[test]
    fn controller_over_bound_paced() -> Result<()> {
        let mut ctl = PacingController::from_config(&config(Some(10.0))?)?;
        let mut cohort = Cohort::new();
        let mut handler = RecordingHandler::default();
        cohort.add_flow(1, 100)?;
        cohort.add_flow(2, 100)?;
        deliver(&mut cohort, 1, 937_500)?;
        deliver(&mut cohort, 2, 500_000)?;
        assert_eq!(cohort.get(1).unwrap().stats().throughput_mbps(), 15.0);

        let now = Timestamp::from_secs(5);
        ctl.recalculate(now, &mut cohort, &mut handler);
        assert_eq!(
            handler.intervals,
            vec![(1, Duration::from_micros(500)), (2, Duration::ZERO)]
        );
        assert_eq!(
            cohort.get(1).unwrap().pacing().current_interval(),
            Duration::from_micros(500)
        );
        assert!(!cohort.get(2).unwrap().pacing().is_paced());
        Ok(())
    }

    #[test]
    fn controller_cohort_mean_target() -> Result<()> {
        let mut ctl = PacingController::from_config(&config(None)?)?;
        let mut cohort = Cohort::new();
        let mut handler = RecordingHandler::default();

        // Nothing to work from yet.
        let now = Timestamp::from_secs(5);
        assert_eq!(ctl.recalculate(now, &mut cohort, &mut handler), None);
        assert_eq!(ctl.target_mbps(), None);

        cohort.add_flow(1, 100)?;
        cohort.add_flow(2, 100)?;
        cohort.add_flow(3, 100)?;
        deliver(&mut cohort, 1, 500_000)?;
        deliver(&mut cohort, 2, 1_500_000)?;

        // Mean of 8, 24 and 0 Mb/s, giving a bound of 12.8 Mb/s.
        let interval = ctl.recalculate(now, &mut cohort, &mut handler);
        assert_eq!(ctl.target_mbps(), Some(32.0 / 3.0));
        assert!(interval.map_or(false, |d| !d.is_zero()));
        assert_eq!(ctl.pacing_interval(), interval.unwrap_or_default());

        let paced: Vec<u64> = handler
            .intervals
            .iter()
            .filter(|(_, d)| !d.is_zero())
            .map(|(id, _)| *id)
            .collect();
        assert_eq!(paced, vec![2]);
        assert_eq!(handler.intervals.len(), 3);
        Ok(())
    }

    #[test]
    fn controller_warmup() -> Result<()> {
        let mut ctl = PacingController::from_config(&config(Some(10.0))?)?;
        let mut cohort = Cohort::new();
        let mut handler = RecordingHandler::default();
        cohort.add_flow(1, 100)?;
        deliver(&mut cohort, 1, 937_500)?;

        assert_eq!(ctl.timeout(), None);
        ctl.start(Timestamp::ZERO)?;
        assert!(matches!(
            ctl.start(Timestamp::ZERO),
            Err(Error::InvalidState(_))
        ));
        assert_eq!(ctl.state(), PacingControllerState::Idle);
        assert_eq!(ctl.timeout(), Some(Timestamp::from_secs(5)));

        // Stay idle before the warm-up delay.
        ctl.on_timeout(Timestamp::from_secs(4), &mut cohort, &mut handler);
        assert_eq!(ctl.state(), PacingControllerState::Idle);
        assert!(handler.intervals.is_empty());
        assert_eq!(ctl.recalculations(), 0);

        ctl.on_timeout(Timestamp::from_secs(5), &mut cohort, &mut handler);
        assert_eq!(ctl.state(), PacingControllerState::Active);
        assert_eq!(ctl.activated_at(), Some(Timestamp::from_secs(5)));
        assert_eq!(ctl.recalculations(), 1);
        assert_eq!(handler.intervals.len(), 1);
        assert_eq!(ctl.timeout(), Some(Timestamp::from_secs(6)));

        // Reschedule every recalculation period, never leaving Active.
        for secs in 6..10 {
            ctl.on_timeout(Timestamp::from_secs(secs), &mut cohort, &mut handler);
            assert_eq!(ctl.state(), PacingControllerState::Active);
            assert_eq!(ctl.timeout(), Some(Timestamp::from_secs(secs + 1)));
        }
        assert_eq!(ctl.activated_at(), Some(Timestamp::from_secs(5)));
        assert_eq!(ctl.recalculations(), 5);
        assert_eq!(handler.intervals.len(), 5);
        Ok(())
    }

    #[test]
    fn controller_status_report() -> Result<()> {
        let mut conf = config(Some(10.0))?;
        conf.set_status_period(Duration::from_secs(2));
        let mut ctl = PacingController::from_config(&conf)?;
        let mut cohort = Cohort::new();
        let mut handler = RecordingHandler::default();
        handler.pending.insert(1, 3);
        cohort.add_flow(1, 100)?;
        cohort.add_flow(2, 100)?;
        deliver(&mut cohort, 1, 500_000)?;

        ctl.start(Timestamp::ZERO)?;
        assert_eq!(ctl.timeout(), Some(Timestamp::from_secs(2)));

        // Status lines do not touch the pacing.
        ctl.on_timeout(Timestamp::from_secs(2), &mut cohort, &mut handler);
        assert_eq!(ctl.state(), PacingControllerState::Idle);
        assert!(handler.intervals.is_empty());
        assert_eq!(ctl.timeout(), Some(Timestamp::from_secs(4)));

        ctl.on_timeout(Timestamp::from_secs(4), &mut cohort, &mut handler);
        assert_eq!(ctl.timeout(), Some(Timestamp::from_secs(5)));
        Ok(())
    }

    #[test]
    fn interval_conversion() {
        assert_eq!(interval_from_rate(1.0), Some(Duration::from_micros(1)));
        assert_eq!(interval_from_rate(0.001), Some(Duration::from_millis(1)));
        assert_eq!(interval_from_rate(0.0), None);
        assert_eq!(interval_from_rate(-1.0), None);
        assert_eq!(interval_from_rate(f64::NAN), None);
        assert_eq!(interval_from_rate(f64::INFINITY), None);
    }
}
