// Copyright (c) 2024 The TQUIC Authors.
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

use log::*;

use super::CongestionNotifier;
use super::CongestionStats;

/// Dummy is a congestion notifier that only keeps statistics.
/// It is intended to be used for testing and experiments.
#[derive(Debug, Default)]
pub struct Dummy {
    /// Per-path count of RTT measurements.
    samples_per_path: Vec<u64>,

    /// Congestion statistics.
    stats: CongestionStats,
}

impl Dummy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the number of RTT measurements for packets sent on the path.
    pub fn samples_on_path(&self, path_id: usize) -> u64 {
        self.samples_per_path.get(path_id).copied().unwrap_or(0)
    }
}

impl CongestionNotifier for Dummy {
    fn name(&self) -> &str {
        "DUMMY"
    }

    fn on_rtt_measurement(&mut self, path_id: usize, rtt_sample: u64, now: u64) {
        trace!("{} rtt measurement path={} sample={} now={}", self.name(), path_id, rtt_sample, now);

        if self.samples_per_path.len() <= path_id {
            self.samples_per_path.resize(path_id + 1, 0);
        }
        self.samples_per_path[path_id] += 1;

        self.stats.rtt_measurements = self.stats.rtt_measurements.saturating_add(1);
        self.stats.latest_rtt = rtt_sample;
        self.stats.min_rtt = Some(self.stats.min_rtt.map_or(rtt_sample, |m| m.min(rtt_sample)));
    }

    fn stats(&self) -> &CongestionStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dummy_init() {
        let d = Dummy::new();
        assert_eq!(d.name(), "DUMMY");
        assert_eq!(d.stats().rtt_measurements, 0);
        assert_eq!(d.stats().min_rtt, None);
        assert_eq!(d.samples_on_path(0), 0);
    }

    #[test]
    fn dummy_stats() {
        let mut d = Dummy::new();
        d.on_rtt_measurement(0, 50_000, 1_000_000);
        d.on_rtt_measurement(2, 30_000, 1_010_000);
        d.on_rtt_measurement(2, 40_000, 1_020_000);

        assert_eq!(d.stats().rtt_measurements, 3);
        assert_eq!(d.stats().latest_rtt, 40_000);
        assert_eq!(d.stats().min_rtt, Some(30_000));
        assert_eq!(d.samples_on_path(0), 1);
        assert_eq!(d.samples_on_path(1), 0);
        assert_eq!(d.samples_on_path(2), 2);

        let boxed: Box<dyn CongestionNotifier> = Box::new(d);
        assert_eq!(format!("{:?}", boxed), "congestion notifier DUMMY.");
    }
}
