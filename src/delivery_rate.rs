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

//! A generic algorithm for a reliable byte-stream sender to estimate the
//! current delivery rate of its data on the fly, following the Linux TCP
//! rate sampler.
//!
//! See
//! <https://datatracker.ietf.org/doc/html/draft-cheng-iccrg-delivery-rate-estimation-02>.

use std::cmp;
use std::mem;
use std::time::Duration;

use log::trace;

use crate::bandwidth::Bandwidth;
use crate::time::Timestamp;

/// Half-open range of stream sequence numbers `[start, end)` covered by a
/// segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ByteRange {
    start: u64,
    end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    /// Number of bytes covered by the range.
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Rate bookkeeping stamped on a segment each time it is transmitted.
///
/// See
/// <https://datatracker.ietf.org/doc/html/draft-cheng-iccrg-delivery-rate-estimation-02#section-3.1.2>.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxRateInfo {
    /// P.delivered: C.delivered when the segment was sent.
    pub delivered: u64,

    /// P.delivered_time: C.delivered_time when the segment was sent.
    /// `None` before the segment is sent and once it has been counted as
    /// delivered.
    pub delivered_time: Option<Timestamp>,

    /// P.first_sent_time: C.first_sent_time when the segment was sent.
    pub first_sent_time: Timestamp,

    /// P.is_app_limited: whether the sender was application-limited when the
    /// segment was sent.
    pub is_app_limited: bool,
}

/// An in-flight segment held by the sender's retransmission buffer.
///
/// The buffer owns the item. The sampler only stamps `rate` on transmission
/// and marks it delivered on acknowledgment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxItem {
    /// Sequence numbers covered by the segment.
    pub seq: ByteRange,

    /// Time of the most recent (re)transmission of the segment.
    pub last_sent: Timestamp,

    /// Rate bookkeeping captured at the most recent transmission.
    pub rate: TxRateInfo,
}

impl TxItem {
    pub fn new(seq: ByteRange, last_sent: Timestamp) -> Self {
        Self {
            seq,
            last_sent,
            rate: TxRateInfo::default(),
        }
    }

    /// Size of the segment in bytes.
    pub fn seq_size(&self) -> u64 {
        self.seq.len()
    }

    /// Whether the sampler has already accounted the segment as delivered.
    pub fn is_delivered(&self) -> bool {
        self.rate.delivered_time.is_none()
    }
}

/// Rate sample output.
///
/// See
/// <https://datatracker.ietf.org/doc/html/draft-cheng-iccrg-delivery-rate-estimation-02#section-3.1.3>.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateSample {
    /// rs.delivery_rate: rs.delivered / rs.interval.
    delivery_rate: Bandwidth,

    /// rs.is_app_limited: P.is_app_limited from the most recent segment
    /// delivered.
    is_app_limited: bool,

    /// rs.interval: length of the sampling interval. Zero marks an invalid
    /// sample.
    interval: Duration,

    /// rs.delivered: bytes marked as delivered over the sampling interval.
    delivered: u64,

    /// rs.prior_delivered: P.delivered from the most recent segment delivered.
    prior_delivered: u64,

    /// rs.prior_time: P.delivered_time from the most recent segment delivered.
    prior_time: Option<Timestamp>,

    /// Send time interval calculated from the most recent segment delivered.
    send_elapsed: Duration,

    /// ACK time interval calculated from the most recent segment delivered.
    ack_elapsed: Duration,

    /// Bytes freshly acknowledged or selectively acknowledged by this ACK.
    acked_sacked: u64,

    /// Bytes freshly marked lost by this ACK.
    bytes_lost: u64,
}

impl RateSample {
    /// Whether the sample carries rate information. Invalid samples must be
    /// skipped by consumers.
    pub fn is_valid(&self) -> bool {
        self.prior_time.is_some() && !self.interval.is_zero()
    }

    /// Delivery rate, or zero for an invalid sample.
    pub fn delivery_rate(&self) -> Bandwidth {
        self.delivery_rate
    }

    pub fn is_app_limited(&self) -> bool {
        self.is_app_limited
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn prior_delivered(&self) -> u64 {
        self.prior_delivered
    }

    pub fn prior_time(&self) -> Option<Timestamp> {
        self.prior_time
    }

    pub fn send_elapsed(&self) -> Duration {
        self.send_elapsed
    }

    pub fn ack_elapsed(&self) -> Duration {
        self.ack_elapsed
    }

    pub fn acked_sacked(&self) -> u64 {
        self.acked_sacked
    }

    pub fn bytes_lost(&self) -> u64 {
        self.bytes_lost
    }

    fn invalidate(&mut self) {
        self.delivered = 0;
        self.interval = Duration::ZERO;
        self.delivery_rate = Bandwidth::ZERO;
    }
}

/// The last non-app-limited sample, or the highest app-limited one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateTracker {
    /// Bytes delivered over the tracked interval.
    pub delivered: u64,

    /// Length of the tracked interval.
    pub interval: Duration,

    /// Whether the tracked sample was application-limited.
    pub app_limited: bool,
}

impl RateTracker {
    pub fn bandwidth(&self) -> Bandwidth {
        Bandwidth::new(self.delivered, self.interval)
    }
}

/// Delivery rate sampler of a sending endpoint.
///
/// See <https://datatracker.ietf.org/doc/html/draft-cheng-iccrg-delivery-rate-estimation-02#section-3.1.1>.
#[derive(Debug, Default)]
pub struct DeliveryRateSampler {
    /// Unique trace id for debug logging.
    trace_id: String,

    /// C.delivered: total bytes delivered so far over the lifetime of the
    /// connection.
    delivered: u64,

    /// C.delivered_time: time C.delivered was last updated.
    delivered_time: Timestamp,

    /// C.first_sent_time: send time of the segment most recently marked as
    /// delivered, or of the first segment sent after an idle period.
    first_sent_time: Timestamp,

    /// C.app_limited: the end of the application-limited bubble in delivered
    /// bytes, or 0 if the connection is not application-limited.
    app_limited: u64,

    /// P.delivered of the segment most recently marked as delivered.
    tx_item_delivered: u64,

    /// Best recent rate.
    tracker: RateTracker,

    /// Sample being accumulated for the current ACK.
    sample: RateSample,

    /// Sample produced for the previous ACK.
    last_sample: RateSample,
}

impl DeliveryRateSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the unique trace id for debug logging.
    pub fn set_trace_id(&mut self, trace_id: &str) {
        self.trace_id = trace_id.to_string();
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Upon each segment transmission.
    ///
    /// `is_start_of_transmission` is true when nothing was in flight before
    /// the segment. The segment's `last_sent` is taken as the current time.
    ///
    /// See <https://datatracker.ietf.org/doc/html/draft-cheng-iccrg-delivery-rate-estimation-02#section-3.2>.
    pub fn on_segment_sent(&mut self, item: &mut TxItem, is_start_of_transmission: bool) {
        // Any ACK after an idle start indicates the network delivered the
        // whole flight between now and that ACK.
        if is_start_of_transmission {
            trace!(
                "{} now={:?} rate sampler starting transmission delivered={}",
                self.trace_id,
                item.last_sent,
                self.delivered
            );
            self.first_sent_time = item.last_sent;
            self.delivered_time = item.last_sent;
        }

        item.rate = TxRateInfo {
            delivered: self.delivered,
            delivered_time: Some(self.delivered_time),
            first_sent_time: self.first_sent_time,
            is_app_limited: self.is_app_limited(),
        };
    }

    /// Mark the connection application-limited if there is less than one full
    /// segment of unsent data and the congestion window is not the limit.
    ///
    /// See <https://datatracker.ietf.org/doc/html/draft-cheng-iccrg-delivery-rate-estimation-02#section-3.4>.
    pub fn on_app_limited_check(
        &mut self,
        cwnd: u64,
        in_flight: u64,
        segment_size: u64,
        tail_seq: u64,
        next_tx_seq: u64,
    ) {
        if tail_seq.saturating_sub(next_tx_seq) < segment_size && in_flight < cwnd {
            self.app_limited = cmp::max(self.delivered.saturating_add(in_flight), 1);
            trace!(
                "{} rate sampler app-limited until delivered={} cwnd={} inflight={}",
                self.trace_id,
                self.app_limited,
                cwnd,
                in_flight
            );
        }
        // The marker is cleared by generate_sample once the bubble is acked.
    }

    /// Update the sample when a segment is newly acknowledged or selectively
    /// acknowledged at `now`.
    ///
    /// See <https://datatracker.ietf.org/doc/html/draft-cheng-iccrg-delivery-rate-estimation-02#section-3.3>.
    pub fn on_segment_delivered(&mut self, item: &mut TxItem, now: Timestamp) {
        let prior_time = match item.rate.delivered_time {
            Some(t) => t,
            // Already SACKed, or never sent.
            None => return,
        };

        self.delivered = self.delivered.saturating_add(item.seq_size());
        self.delivered_time = now;

        // Update info using the most informative segment.
        if self.sample.prior_time.is_none() || item.rate.delivered > self.sample.prior_delivered {
            self.sample.prior_delivered = item.rate.delivered;
            self.sample.prior_time = Some(prior_time);
            self.sample.is_app_limited = item.rate.is_app_limited;
            self.sample.send_elapsed = item
                .last_sent
                .saturating_duration_since(item.rate.first_sent_time);
            self.sample.ack_elapsed = now.saturating_duration_since(prior_time);
            self.first_sent_time = item.last_sent;
        }

        // Mark the segment delivered so it is not counted again when it is
        // cumulatively acked after being SACKed.
        item.rate.delivered_time = None;
        self.tx_item_delivered = item.rate.delivered;

        trace!(
            "{} now={:?} rate sampler delivered seq={:?} total={} prior_delivered={}",
            self.trace_id,
            now,
            item.seq,
            self.delivered,
            self.sample.prior_delivered
        );
    }

    /// Upon receiving an ACK, produce the rate sample for the segments
    /// delivered by it.
    ///
    /// `delivered` and `lost` are the bytes newly acked and newly marked lost
    /// by the ACK. The returned sample is invalid if no timing reference is
    /// available, if the peer reneged on selective acknowledgments, or if the
    /// sampling interval is shorter than `min_rtt`.
    pub fn generate_sample(
        &mut self,
        delivered: u64,
        lost: u64,
        is_sack_reneg: bool,
        min_rtt: Duration,
    ) -> RateSample {
        // Clear app-limited field if bubble is ACKed and gone.
        if self.app_limited != 0 && self.delivered > self.app_limited {
            self.app_limited = 0;
        }

        let mut rs = mem::take(&mut self.sample);
        rs.acked_sacked = delivered;
        rs.bytes_lost = lost;

        // Samples taken during a SACK reneging event may overestimate the rate
        // by including data that was SACKed before the reneg.
        if rs.prior_time.is_none() || is_sack_reneg {
            rs.invalidate();
            return self.finish_sample(rs);
        }

        // Sending data and receiving ACKs are separate pipeline phases; use
        // the longer one.
        rs.interval = cmp::max(rs.send_elapsed, rs.ack_elapsed);
        rs.delivered = self.delivered.saturating_sub(rs.prior_delivered);

        // An interval shorter than min_rtt over-estimates the rate.
        if rs.interval < min_rtt || rs.interval.is_zero() {
            rs.invalidate();
            rs.prior_time = None;
            return self.finish_sample(rs);
        }

        rs.delivery_rate = Bandwidth::new(rs.delivered, rs.interval);

        // Record the last non-app-limited or the highest app-limited rate.
        if !rs.is_app_limited
            || rs.delivered as u128 * self.tracker.interval.as_nanos()
                >= self.tracker.delivered as u128 * rs.interval.as_nanos()
        {
            self.tracker = RateTracker {
                delivered: rs.delivered,
                interval: rs.interval,
                app_limited: rs.is_app_limited,
            };
        }

        self.finish_sample(rs)
    }

    fn finish_sample(&mut self, rs: RateSample) -> RateSample {
        trace!(
            "{} rate sample valid={} delivered={} interval={:?} rate={:?} app_limited={}",
            self.trace_id,
            rs.is_valid(),
            rs.delivered,
            rs.interval,
            rs.delivery_rate,
            rs.is_app_limited
        );
        self.last_sample = rs;
        rs
    }

    /// Check if application limited.
    pub fn is_app_limited(&self) -> bool {
        self.app_limited != 0
    }

    /// End of the application-limited bubble, 0 if not application-limited.
    pub fn app_limited_marker(&self) -> u64 {
        self.app_limited
    }

    /// C.delivered.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// C.delivered_time.
    pub fn delivered_time(&self) -> Timestamp {
        self.delivered_time
    }

    /// C.first_sent_time.
    pub fn first_sent_time(&self) -> Timestamp {
        self.first_sent_time
    }

    /// P.delivered of the segment most recently marked as delivered.
    pub fn tx_item_delivered(&self) -> u64 {
        self.tx_item_delivered
    }

    /// Sample produced for the most recent ACK.
    pub fn last_sample(&self) -> &RateSample {
        &self.last_sample
    }

    /// Last non-app-limited or highest app-limited sample.
    pub fn tracked_rate(&self) -> &RateTracker {
        &self.tracker
    }
}
