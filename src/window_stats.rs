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

//! Receiver-side throughput and latency over a bounded window of the most
//! recently delivered packets.

use std::collections::VecDeque;
use std::time::Duration;

use log::trace;

use crate::bandwidth::Bandwidth;
use crate::stamp::FlowClass;
use crate::stamp::PacketStamp;
use crate::time::Timestamp;
use crate::Error;
use crate::Result;

/// Upper bound of records allocated up front, whatever the window capacity.
const MAX_PREALLOCATED_RECORDS: usize = 4096;

/// A delivered packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketRecord {
    /// Origination time carried by the packet stamp.
    pub send_time: Timestamp,

    /// Time the packet was delivered to the receiver.
    pub recv_time: Timestamp,

    /// Packet size in bytes.
    pub size: u64,
}

/// Statistics derived from the current window.
///
/// The default value is the empty sentinel reported while the window holds
/// too little data to measure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowStats {
    throughput: Bandwidth,
    avg_latency: Duration,
    records: usize,
}

impl FlowStats {
    /// Whether this is the empty sentinel.
    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    /// Average throughput over the window.
    pub fn throughput(&self) -> Bandwidth {
        self.throughput
    }

    pub fn throughput_mbps(&self) -> f64 {
        self.throughput.as_mbps()
    }

    /// Mean one-way latency over the window.
    pub fn avg_latency(&self) -> Duration {
        self.avg_latency
    }

    /// Round-trip estimate, assuming a symmetric path.
    pub fn avg_rtt(&self) -> Duration {
        self.avg_latency.saturating_mul(2)
    }

    /// Number of records the statistics were computed over.
    pub fn records(&self) -> usize {
        self.records
    }
}

/// Per-receiver bounded buffer of packet records.
#[derive(Debug)]
pub struct WindowedStatsCollector {
    /// Records in arrival order, oldest first.
    records: VecDeque<PacketRecord>,

    /// Maximum number of records kept.
    capacity: usize,

    /// Class of the flow, latched on the first packet.
    flow_class: Option<FlowClass>,

    /// Bytes received over the lifetime of the flow.
    total_rx_bytes: u64,

    /// Packets received over the lifetime of the flow.
    total_packets: u64,
}

impl WindowedStatsCollector {
    /// Create a collector keeping at most `capacity` records.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidConfig(
                "packet record capacity must be positive".into(),
            ));
        }

        Ok(Self {
            records: VecDeque::with_capacity(capacity.min(MAX_PREALLOCATED_RECORDS) + 1),
            capacity,
            flow_class: None,
            total_rx_bytes: 0,
            total_packets: 0,
        })
    }

    /// Record a packet delivered at `recv_time`, evicting the oldest record
    /// once the window is over capacity.
    pub fn on_packet_delivered(&mut self, stamp: &PacketStamp, size: u64, recv_time: Timestamp) {
        if self.flow_class.is_none() {
            self.flow_class = Some(stamp.flow_class());
        }

        self.total_rx_bytes = self.total_rx_bytes.saturating_add(size);
        self.total_packets += 1;

        self.records.push_back(PacketRecord {
            send_time: stamp.send_time(),
            recv_time,
            size,
        });
        if self.records.len() > self.capacity {
            self.records.pop_front();
        }

        trace!(
            "now={:?} stats collector received {} bytes sent at {:?}, window {}/{}",
            recv_time,
            size,
            stamp.send_time(),
            self.records.len(),
            self.capacity
        );
    }

    /// Throughput and mean latency over the current window.
    ///
    /// Returns the empty sentinel until the window spans a non-zero duration,
    /// which needs at least two records.
    pub fn current_stats(&self) -> FlowStats {
        let (first, last) = match (self.records.front(), self.records.back()) {
            (Some(first), Some(last)) if self.records.len() >= 2 => (first, last),
            _ => return FlowStats::default(),
        };

        let span = last.recv_time.saturating_duration_since(first.send_time);
        if span.is_zero() {
            return FlowStats::default();
        }

        let mut bytes: u64 = 0;
        let mut latency_nanos: u128 = 0;
        for r in &self.records {
            bytes = bytes.saturating_add(r.size);
            latency_nanos += r.recv_time.saturating_duration_since(r.send_time).as_nanos();
        }

        let avg_nanos = latency_nanos / self.records.len() as u128;
        FlowStats {
            throughput: Bandwidth::new(bytes, span),
            avg_latency: Duration::from_nanos(avg_nanos.min(u64::MAX as u128) as u64),
            records: self.records.len(),
        }
    }

    /// Average throughput over the lifetime of the flow, given how long it
    /// has been running.
    pub fn lifetime_throughput(&self, elapsed: Duration) -> Bandwidth {
        Bandwidth::new(self.total_rx_bytes, elapsed)
    }

    /// Records in the window, oldest first.
    pub fn records(&self) -> impl Iterator<Item = &PacketRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Class of the flow, once a packet has been seen.
    pub fn flow_class(&self) -> Option<FlowClass> {
        self.flow_class
    }

    pub fn total_rx_bytes(&self) -> u64 {
        self.total_rx_bytes
    }

    pub fn total_packets(&self) -> u64 {
        self.total_packets
    }
}
