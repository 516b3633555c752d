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

use rustc_hash::FxHashMap;

/// Smoothing of RTT samples as described in RFC 6298 Section 2, with exact
/// integer arithmetic on microseconds.
///
/// Divisions truncate toward zero on the signed deltas, so that two
/// implementations fed with the same samples end up with the same state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RttFilter {
    /// Exponentially weighted moving average of the samples.
    smoothed_rtt: u64,

    /// Mean variation of the samples.
    rttvar: u64,

    /// The minimum sample observed.
    min_rtt: u64,

    /// The number of samples consumed, including the first one.
    samples: u64,
}

impl RttFilter {
    /// Create a filter seeded with the first sample.
    pub fn new(sample: u64) -> Self {
        RttFilter {
            smoothed_rtt: sample,
            rttvar: sample / 2,
            min_rtt: sample,
            samples: 1,
        }
    }

    pub fn smoothed_rtt(&self) -> u64 {
        self.smoothed_rtt
    }

    pub fn rttvar(&self) -> u64 {
        self.rttvar
    }

    pub fn min_rtt(&self) -> u64 {
        self.min_rtt
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Feed a new sample. Return whether it is a new minimum.
    pub fn update(&mut self, sample: u64) -> bool {
        let delta = sample as i64 - self.smoothed_rtt as i64;
        self.smoothed_rtt = (self.smoothed_rtt as i64 + delta / 8) as u64;

        let var_delta = delta.abs() - self.rttvar as i64;
        self.rttvar = (self.rttvar as i64 + var_delta / 4) as u64;

        let new_min = sample < self.min_rtt;
        if new_min {
            self.min_rtt = sample;
        }

        // The variation never falls below a quarter of the minimum RTT.
        self.rttvar = self.rttvar.max(self.min_rtt / 4);
        self.samples += 1;
        new_min
    }
}

/// RTT estimation for a network path
pub struct RttEstimator {
    /// The smoothed statistics, once a sample was taken.
    filter: Option<RttFilter>,

    /// The RTT reported before any sample.
    initial_rtt: u64,

    /// The most recent RTT sample.
    latest_rtt: u64,

    /// The largest ACK delay reported by the peer for this path.
    max_ack_delay: u64,

    /// The retransmission timeout.
    retransmit_timer: u64,

    /// Floor of the retransmission timeout.
    min_retransmit_timer: u64,
}

impl RttEstimator {
    pub fn new(initial_rtt: u64, initial_retransmit_timer: u64, min_retransmit_timer: u64) -> Self {
        Self {
            filter: None,
            initial_rtt,
            latest_rtt: initial_rtt,
            max_ack_delay: 0,
            retransmit_timer: initial_retransmit_timer.max(min_retransmit_timer),
            min_retransmit_timer,
        }
    }

    /// Return the current best RTT estimation.
    pub fn smoothed_rtt(&self) -> u64 {
        self.filter.map_or(self.initial_rtt, |f| f.smoothed_rtt())
    }

    /// Return the variation in the RTT samples using a mean variation.
    pub fn rttvar(&self) -> u64 {
        self.filter.map_or(self.initial_rtt / 2, |f| f.rttvar())
    }

    /// Return the minimum RTT observed so far for this estimator.
    pub fn min_rtt(&self) -> u64 {
        self.filter.map_or(self.initial_rtt, |f| f.min_rtt())
    }

    /// Return the latest rtt sample
    pub fn latest_rtt(&self) -> u64 {
        self.latest_rtt
    }

    pub fn max_ack_delay(&self) -> u64 {
        self.max_ack_delay
    }

    pub fn retransmit_timer(&self) -> u64 {
        self.retransmit_timer
    }

    /// Return whether at least one sample was taken.
    pub fn has_samples(&self) -> bool {
        self.filter.is_some()
    }

    /// Return the number of samples taken.
    pub fn samples(&self) -> u64 {
        self.filter.map_or(0, |f| f.samples())
    }

    /// Track the largest ACK delay reported by the peer.
    pub fn on_ack_delay(&mut self, ack_delay: u64) {
        self.max_ack_delay = self.max_ack_delay.max(ack_delay);
    }

    /// Update estimator with the given RTT sample. Return whether the minimum
    /// RTT changed.
    pub fn update(&mut self, rtt: u64) -> bool {
        self.latest_rtt = rtt;

        let new_min = match self.filter.as_mut() {
            Some(filter) => filter.update(rtt),
            None => {
                self.filter = Some(RttFilter::new(rtt));
                true
            }
        };

        let timer = self.smoothed_rtt() + 4 * self.rttvar() + self.max_ack_delay;
        self.retransmit_timer = timer.max(self.min_retransmit_timer);
        new_min
    }
}

impl std::fmt::Debug for RttEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "srtt={}", self.smoothed_rtt())?;
        write!(f, " rttvar={}", self.rttvar())?;
        write!(f, " min_rtt={}", self.min_rtt())?;
        write!(f, " latest_rtt={}", self.latest_rtt)?;
        write!(f, " rto={}", self.retransmit_timer)?;
        Ok(())
    }
}

/// RTT statistics of packets sent on one uniflow and acknowledged on another.
#[derive(Debug, Clone, Copy)]
pub struct TupleStats {
    /// The smoothed statistics.
    pub filter: RttFilter,

    /// The delayed ACK threshold derived from the minimum RTT of the tuple.
    pub max_ack_delay: u64,

    /// The number of samples taken.
    pub nb_updates: u64,
}

impl TupleStats {
    fn new(sample: u64, lower: u64) -> Self {
        TupleStats {
            filter: RttFilter::new(sample),
            max_ack_delay: (sample / 4).max(lower),
            nb_updates: 1,
        }
    }

    fn update(&mut self, sample: u64, lower: u64, upper: u64) {
        self.nb_updates += 1;
        if self.filter.update(sample) {
            self.max_ack_delay = (sample / 4).clamp(lower, upper);
        }
    }
}

/// Statistics of every (receiving uniflow, sending uniflow) pair that got at
/// least one sample.
#[derive(Default)]
pub struct TupleStatsMap {
    stats: FxHashMap<(usize, usize), TupleStats>,
}

impl TupleStatsMap {
    /// Feed a sample for the tuple, creating it on first use.
    pub fn on_rtt_sample(
        &mut self,
        recv_uniflow: usize,
        send_uniflow: usize,
        sample: u64,
        lower: u64,
        upper: u64,
    ) -> &TupleStats {
        self.stats
            .entry((recv_uniflow, send_uniflow))
            .and_modify(|s| s.update(sample, lower, upper))
            .or_insert_with(|| TupleStats::new(sample, lower))
    }

    /// Return the statistics of the tuple, if it was ever sampled.
    pub fn get(&self, recv_uniflow: usize, send_uniflow: usize) -> Option<&TupleStats> {
        self.stats.get(&(recv_uniflow, send_uniflow))
    }

    /// Drop the statistics involving a closed receiving uniflow.
    pub fn remove_recv_uniflow(&mut self, recv_uniflow: usize) {
        self.stats.retain(|&(r, _), _| r != recv_uniflow);
    }

    /// Drop the statistics involving a closed sending uniflow.
    pub fn remove_send_uniflow(&mut self, send_uniflow: usize) {
        self.stats.retain(|&(_, s), _| s != send_uniflow);
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }
}
