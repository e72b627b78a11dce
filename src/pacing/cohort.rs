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

use log::trace;
use rustc_hash::FxHashMap;

use crate::stamp::PacketStamp;
use crate::time::Timestamp;
use crate::window_stats::FlowStats;
use crate::window_stats::WindowedStatsCollector;
use crate::Error;
use crate::Result;

/// Transport endpoints that space acknowledgments on behalf of the cohort.
pub trait PacingHandler {
    /// Space outgoing acknowledgments of the flow by `interval`. A zero
    /// interval disables pacing.
    fn set_pacing_interval(&mut self, flow_id: u64, interval: Duration);

    /// Acknowledgments held back by pacing, if the transport tracks them.
    fn pending_acks(&self, _flow_id: u64) -> Option<usize> {
        None
    }
}

/// Pacing applied to a flow by the latest recalculation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacingState {
    current_interval: Duration,
    last_recalculated: Option<Timestamp>,
}

impl PacingState {
    /// Interval currently enforced between acknowledgments.
    pub fn current_interval(&self) -> Duration {
        self.current_interval
    }

    /// Time of the latest recalculation, if any.
    pub fn last_recalculated(&self) -> Option<Timestamp> {
        self.last_recalculated
    }

    pub fn is_paced(&self) -> bool {
        !self.current_interval.is_zero()
    }

    pub(crate) fn update(&mut self, interval: Duration, now: Timestamp) {
        self.current_interval = interval;
        self.last_recalculated = Some(now);
    }
}

/// A flow sharing the bottleneck.
#[derive(Debug)]
pub struct FlowMember {
    flow_id: u64,
    collector: WindowedStatsCollector,
    pacing: PacingState,
}

impl FlowMember {
    pub fn flow_id(&self) -> u64 {
        self.flow_id
    }

    pub fn collector(&self) -> &WindowedStatsCollector {
        &self.collector
    }

    /// Statistics over the current window of the flow.
    pub fn stats(&self) -> FlowStats {
        self.collector.current_stats()
    }

    pub fn pacing(&self) -> &PacingState {
        &self.pacing
    }

    pub(crate) fn pacing_mut(&mut self) -> &mut PacingState {
        &mut self.pacing
    }
}

/// Flows competing for one bottleneck, in registration order.
#[derive(Debug, Default)]
pub struct Cohort {
    members: Vec<FlowMember>,
    index: FxHashMap<u64, usize>,
}

impl Cohort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a flow whose receiver keeps at most `capacity` records.
    pub fn add_flow(&mut self, flow_id: u64, capacity: usize) -> Result<()> {
        if self.index.contains_key(&flow_id) {
            return Err(Error::DuplicateFlow(flow_id));
        }

        let collector = WindowedStatsCollector::new(capacity)?;
        self.index.insert(flow_id, self.members.len());
        self.members.push(FlowMember {
            flow_id,
            collector,
            pacing: PacingState::default(),
        });
        trace!("cohort add flow {}, {} members", flow_id, self.members.len());
        Ok(())
    }

    /// Feed a packet delivered to the receiver of the flow.
    pub fn on_packet_delivered(
        &mut self,
        flow_id: u64,
        stamp: &PacketStamp,
        size: u64,
        now: Timestamp,
    ) -> Result<()> {
        let idx = *self
            .index
            .get(&flow_id)
            .ok_or(Error::UnknownFlow(flow_id))?;
        self.members[idx]
            .collector
            .on_packet_delivered(stamp, size, now);
        Ok(())
    }

    pub fn get(&self, flow_id: u64) -> Option<&FlowMember> {
        self.index.get(&flow_id).map(|&i| &self.members[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &FlowMember> {
        self.members.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut FlowMember> {
        self.members.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Mean of the windowed member throughputs, in Mb/s. Members without
    /// enough data count as zero.
    pub fn mean_throughput_mbps(&self) -> Option<f64> {
        if self.members.is_empty() {
            return None;
        }

        let sum: f64 = self.members.iter().map(|m| m.stats().throughput_mbps()).sum();
        Some(sum / self.members.len() as f64)
    }

    /// Jain's fairness index over the lifetime throughput of the members,
    /// given how long the cohort has been running.
    pub fn fairness_index(&self, elapsed: Duration) -> Option<f64> {
        jain_index(
            self.members
                .iter()
                .map(|m| m.collector.lifetime_throughput(elapsed).as_bits_per_second() as f64),
        )
    }

    /// Jain's fairness index over the windowed throughput of the members.
    pub fn window_fairness_index(&self) -> Option<f64> {
        jain_index(
            self.members
                .iter()
                .map(|m| m.stats().throughput().as_bits_per_second() as f64),
        )
    }
}

/// `(Σx)² / (n·Σx²)`, ranging from `1/n` when one value carries everything to
/// 1 when all values are equal.
fn jain_index(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (mut n, mut sum, mut sum_sq) = (0_usize, 0.0, 0.0);
    for x in values {
        n += 1;
        sum += x;
        sum_sq += x * x;
    }

    if n == 0 || sum_sq == 0.0 {
        return None;
    }
    Some(sum * sum / (n as f64 * sum_sq))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stamp::FlowClass;

    fn deliver(cohort: &mut Cohort, flow_id: u64, size: u64, send_ms: u64, recv_ms: u64) {
        let stamp = PacketStamp::new(Timestamp::from_millis(send_ms), FlowClass::Primary);
        cohort
            .on_packet_delivered(flow_id, &stamp, size, Timestamp::from_millis(recv_ms))
            .unwrap();
    }

    #[test]
    fn cohort_membership() -> Result<()> {
        let mut cohort = Cohort::new();
        assert!(cohort.is_empty());
        assert_eq!(cohort.mean_throughput_mbps(), None);

        cohort.add_flow(7, 10)?;
        cohort.add_flow(3, 10)?;
        assert_eq!(cohort.add_flow(7, 10), Err(Error::DuplicateFlow(7)));
        assert!(matches!(cohort.add_flow(9, 0), Err(Error::InvalidConfig(_))));
        assert_eq!(cohort.len(), 2);

        // Registration order is kept.
        let ids: Vec<u64> = cohort.iter().map(|m| m.flow_id()).collect();
        assert_eq!(ids, vec![7, 3]);

        let stamp = PacketStamp::default();
        assert_eq!(
            cohort.on_packet_delivered(1, &stamp, 100, Timestamp::ZERO),
            Err(Error::UnknownFlow(1))
        );

        cohort.on_packet_delivered(3, &stamp, 100, Timestamp::ZERO)?;
        assert_eq!(cohort.get(3).map(|m| m.collector().total_packets()), Some(1));
        assert_eq!(cohort.get(7).map(|m| m.collector().total_packets()), Some(0));
        assert!(cohort.get(1).is_none());

        let member = cohort.get(7).unwrap();
        assert!(!member.pacing().is_paced());
        assert_eq!(member.pacing().last_recalculated(), None);
        Ok(())
    }

    #[test]
    fn cohort_mean_counts_empty_members() -> Result<()> {
        let mut cohort = Cohort::new();
        cohort.add_flow(1, 100)?;
        cohort.add_flow(2, 100)?;
        cohort.add_flow(3, 100)?;

        // 1_250_000 bytes over 1 s on flow 1 and 625_000 bytes on flow 2.
        deliver(&mut cohort, 1, 625_000, 0, 500);
        deliver(&mut cohort, 1, 625_000, 500, 1000);
        deliver(&mut cohort, 2, 312_500, 0, 500);
        deliver(&mut cohort, 2, 312_500, 500, 1000);

        assert_eq!(cohort.get(1).unwrap().stats().throughput_mbps(), 10.0);
        assert_eq!(cohort.get(2).unwrap().stats().throughput_mbps(), 5.0);
        assert!(cohort.get(3).unwrap().stats().is_empty());
        assert_eq!(cohort.mean_throughput_mbps(), Some(5.0));
        Ok(())
    }

    #[test]
    fn cohort_fairness() -> Result<()> {
        let mut cohort = Cohort::new();
        assert_eq!(cohort.fairness_index(Duration::from_secs(1)), None);

        for id in 0..4 {
            cohort.add_flow(id, 100)?;
        }
        assert_eq!(cohort.fairness_index(Duration::from_secs(1)), None);
        assert_eq!(cohort.window_fairness_index(), None);

        // A single flow carries all the bytes.
        deliver(&mut cohort, 0, 125_000, 0, 500);
        deliver(&mut cohort, 0, 125_000, 500, 1000);
        assert_eq!(cohort.fairness_index(Duration::from_secs(1)), Some(0.25));
        assert_eq!(cohort.window_fairness_index(), Some(0.25));

        // Every flow carries the same bytes.
        for id in 1..4 {
            deliver(&mut cohort, id, 125_000, 0, 500);
            deliver(&mut cohort, id, 125_000, 500, 1000);
        }
        assert_eq!(cohort.fairness_index(Duration::from_secs(1)), Some(1.0));
        assert_eq!(cohort.window_fairness_index(), Some(1.0));
        Ok(())
    }
}
