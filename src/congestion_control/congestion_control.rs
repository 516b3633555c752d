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

pub use dummy::Dummy;

/// Statistics about the RTT measurements delivered to a notifier.
#[derive(Debug, Default, Clone)]
pub struct CongestionStats {
    /// Number of RTT measurements.
    pub rtt_measurements: u64,

    /// The most recent RTT sample, in microseconds.
    pub latest_rtt: u64,

    /// The minimum RTT sample, in microseconds.
    pub min_rtt: Option<u64>,
}

/// Events of the loss recovery machinery that a congestion control algorithm
/// reacts to.
///
/// The window sizing itself lives outside this crate. The recovery only tells
/// the algorithm about RTT measurements.
pub trait CongestionNotifier {
    /// Name of congestion control algorithm.
    fn name(&self) -> &str;

    /// A positive RTT sample was taken for a packet sent on `path_id`.
    fn on_rtt_measurement(&mut self, path_id: usize, rtt_sample: u64, now: u64);

    /// Congestion stats.
    fn stats(&self) -> &CongestionStats;
}

impl fmt::Debug for dyn CongestionNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "congestion notifier {}.", self.name())
    }
}

#[path = "dummy.rs"]
mod dummy;
