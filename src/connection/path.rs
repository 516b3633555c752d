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

use slab::Slab;

use super::rtt::RttEstimator;
use super::space::PacketNumSpace;
use super::space::PacketNumSpaceMap;
use super::space::SpaceId;
use crate::as_micros;
use crate::error::Error;
use crate::qlog;
use crate::qlog::events::EventData;
use crate::RecoveryConfig;
use crate::Result;

/// A network path on which QUIC packets can be sent.
pub struct Path {
    /// RTT estimation of the path.
    pub(crate) rtt: RttEstimator,

    /// Packet number spaces of the path.
    pub(crate) spaces: PacketNumSpaceMap,

    /// Index of the uniflow used to send packets on this path, if any.
    send_uniflow: Option<usize>,

    /// Index of the uniflow used to receive packets on this path, if any.
    recv_uniflow: Option<usize>,

    /// Statistics about the path.
    pub(super) stats: PathStats,

    /// It tracks the last metrics used for emitting qlog RecoveryMetricsUpdated
    /// event.
    last_metrics: RecoveryMetrics,

    /// Trace id.
    trace_id: String,
}

impl Path {
    /// Create a new path
    pub(crate) fn new(conf: &RecoveryConfig, trace_id: &str) -> Self {
        Self {
            rtt: RttEstimator::new(
                as_micros(conf.initial_rtt),
                as_micros(conf.initial_retransmit_timer),
                as_micros(conf.min_retransmit_timer),
            ),
            spaces: PacketNumSpaceMap::new(conf.max_sack_ranges, as_micros(conf.ack_delay_local_min)),
            send_uniflow: None,
            recv_uniflow: None,
            stats: PathStats::default(),
            last_metrics: RecoveryMetrics::default(),
            trace_id: trace_id.to_string(),
        }
    }

    /// Update trace id, appending path id.
    #[doc(hidden)]
    pub fn update_trace_id(&mut self, path_id: usize) {
        self.trace_id.push_str(&(format!("-{}", path_id)));
    }

    /// Return the trace id of the path.
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Return the RTT estimation of the path.
    pub fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }

    /// Get an immutable reference to the specified space of the path.
    pub fn space(&self, space_id: SpaceId) -> Result<&PacketNumSpace> {
        self.spaces
            .get(space_id)
            .ok_or_else(|| Error::InvalidOperation(format!("no space {:?}", space_id)))
    }

    /// Get an mutable reference to the specified space of the path.
    pub fn space_mut(&mut self, space_id: SpaceId) -> Result<&mut PacketNumSpace> {
        self.spaces
            .get_mut(space_id)
            .ok_or_else(|| Error::InvalidOperation(format!("no space {:?}", space_id)))
    }

    /// Return the uniflow used to send packets on the path.
    pub fn send_uniflow(&self) -> Option<usize> {
        self.send_uniflow
    }

    /// Return the uniflow used to receive packets on the path.
    pub fn recv_uniflow(&self) -> Option<usize> {
        self.recv_uniflow
    }

    pub(crate) fn set_uniflows(&mut self, send_uniflow: Option<usize>, recv_uniflow: Option<usize>) {
        self.send_uniflow = send_uniflow;
        self.recv_uniflow = recv_uniflow;
    }

    /// Return statistics about the path
    pub fn stats(&self) -> &PathStats {
        &self.stats
    }

    /// Write a qlog RecoveryMetricsUpdated event if any recovery metric is updated.
    pub(crate) fn qlog_recovery_metrics_updated(&mut self, qlog: &mut qlog::QlogWriter, now: u64) {
        let mut updated = false;

        let mut min_rtt = None;
        if self.last_metrics.min_rtt != self.rtt.min_rtt() {
            self.last_metrics.min_rtt = self.rtt.min_rtt();
            min_rtt = Some(self.last_metrics.min_rtt as f32 / 1000.0);
            updated = true;
        }

        let mut smoothed_rtt = None;
        if self.last_metrics.smoothed_rtt != self.rtt.smoothed_rtt() {
            self.last_metrics.smoothed_rtt = self.rtt.smoothed_rtt();
            smoothed_rtt = Some(self.last_metrics.smoothed_rtt as f32 / 1000.0);
            updated = true;
        }

        let mut latest_rtt = None;
        if self.last_metrics.latest_rtt != self.rtt.latest_rtt() {
            self.last_metrics.latest_rtt = self.rtt.latest_rtt();
            latest_rtt = Some(self.last_metrics.latest_rtt as f32 / 1000.0);
            updated = true;
        }

        let mut rtt_variance = None;
        if self.last_metrics.rttvar != self.rtt.rttvar() {
            self.last_metrics.rttvar = self.rtt.rttvar();
            rtt_variance = Some(self.last_metrics.rttvar as f32 / 1000.0);
            updated = true;
        }

        if !updated {
            return;
        }

        let ev_data = EventData::RecoveryMetricsUpdated {
            min_rtt,
            smoothed_rtt,
            latest_rtt,
            rtt_variance,
            pto_count: None,
            congestion_window: None,
            bytes_in_flight: None,
            ssthresh: None,
            packets_in_flight: None,
            pacing_rate: None,
        };
        qlog.add_group_event_data(now, &self.trace_id, ev_data).ok();
    }
}

impl std::fmt::Debug for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} ", self.trace_id)?;
        write!(f, "{:?}", self.rtt)?;
        Ok(())
    }
}

/// Statistics about a path.
#[derive(Debug, Default, Clone)]
pub struct PathStats {
    /// The number of QUIC packets received.
    pub recv_count: u64,

    /// The number of duplicate QUIC packets received.
    pub dup_recv_count: u64,

    /// The number of QUIC packets sent.
    pub sent_count: u64,

    /// The number of ACK frames processed.
    pub ack_count: u64,

    /// The number of RTT samples taken for packets sent on the path.
    pub rtt_sample_count: u64,

    /// The number of received packet numbers not recorded because the SACK
    /// list could not grow.
    pub sack_alloc_failures: u64,
}

/// Metrics used for emitting qlog RecoveryMetricsUpdated event.
#[derive(Default)]
struct RecoveryMetrics {
    /// The minimum RTT observed on the path
    min_rtt: u64,

    /// The smoothed RTT of the path
    smoothed_rtt: u64,

    /// The most recent RTT sample.
    latest_rtt: u64,

    /// The RTT variance
    rttvar: u64,
}

/// Path manager for a QUIC connection
pub(crate) struct PathMap {
    /// The paths of the connection, indexed by path identifier.
    paths: Slab<Path>,
}

impl PathMap {
    pub fn new() -> Self {
        Self {
            paths: Slab::with_capacity(2),
        }
    }

    /// Get an immutable reference to the path identified by `path_id`
    pub fn get(&self, path_id: usize) -> Result<&Path> {
        self.paths
            .get(path_id)
            .ok_or_else(|| Error::InvalidOperation(format!("unknown path {}", path_id)))
    }

    /// Get an mutable reference to the path identified by `path_id`
    pub fn get_mut(&mut self, path_id: usize) -> Result<&mut Path> {
        self.paths
            .get_mut(path_id)
            .ok_or_else(|| Error::InvalidOperation(format!("unknown path {}", path_id)))
    }

    /// Insert a new path
    pub fn insert_path(&mut self, path: Path) -> usize {
        let pid = self.paths.insert(path);
        if let Some(path) = self.paths.get_mut(pid) {
            path.update_trace_id(pid);
        }
        pid
    }

    /// Remove a path, returning it.
    pub fn remove_path(&mut self, path_id: usize) -> Result<Path> {
        self.paths
            .try_remove(path_id)
            .ok_or_else(|| Error::InvalidOperation(format!("unknown path {}", path_id)))
    }

    /// Return an immutable iterator over all existing paths.
    pub fn iter(&self) -> slab::Iter<Path> {
        self.paths.iter()
    }

    /// Return the number of all paths
    pub fn len(&self) -> usize {
        self.paths.len()
    }
}

impl Default for PathMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qlog::tests::new_test_trace_seq;
    use crate::qlog::tests::SharedBuf;

    #[test]
    fn path_initial() -> Result<()> {
        let conf = RecoveryConfig::default();
        let path = Path::new(&conf, "conn");
        assert_eq!(path.trace_id(), "conn");
        assert_eq!(path.rtt().smoothed_rtt(), 333_000);
        assert_eq!(path.rtt().retransmit_timer(), 1_000_000);
        assert_eq!(path.space(SpaceId::Data)?.ack_delay_local, 1000);
        assert_eq!(path.send_uniflow(), None);
        assert_eq!(path.recv_uniflow(), None);
        assert_eq!(path.stats().recv_count, 0);
        Ok(())
    }

    #[test]
    fn path_map() -> Result<()> {
        let conf = RecoveryConfig::default();
        let mut paths = PathMap::default();
        assert_eq!(paths.len(), 0);
        assert!(paths.get(0).is_err());

        let p0 = paths.insert_path(Path::new(&conf, "conn"));
        let p1 = paths.insert_path(Path::new(&conf, "conn"));
        assert_eq!((p0, p1), (0, 1));
        assert_eq!(paths.get(p1)?.trace_id(), "conn-1");
        assert_eq!(paths.iter().count(), 2);

        paths.get_mut(p1)?.set_uniflows(Some(1), Some(2));
        assert_eq!(paths.get(p1)?.send_uniflow(), Some(1));
        assert_eq!(paths.get(p1)?.recv_uniflow(), Some(2));

        let removed = paths.remove_path(p0)?;
        assert_eq!(removed.trace_id(), "conn-0");
        assert_eq!(
            paths.get(p0).err(),
            Some(Error::InvalidOperation("unknown path 0".into()))
        );
        assert!(paths.remove_path(p0).is_err());
        assert_eq!(paths.len(), 1);
        Ok(())
    }

    #[test]
    fn qlog_metrics_updated() -> Result<()> {
        let conf = RecoveryConfig::default();
        let mut path = Path::new(&conf, "conn");
        path.update_trace_id(3);

        let buf = SharedBuf::default();
        let mut qlog = qlog::QlogWriter::new(
            None,
            None,
            new_test_trace_seq(),
            qlog::events::EventImportance::Base,
            Box::new(buf.clone()),
            0,
        );
        qlog.start()?;
        let header_len = buf.content().len();

        path.rtt.update(100_000);
        path.qlog_recovery_metrics_updated(&mut qlog, 1000);

        // Nothing changed since the last event.
        path.qlog_recovery_metrics_updated(&mut qlog, 2000);

        let events = &buf.content()[header_len..];
        assert_eq!(
            events,
            " {\"time\":1.0,\"name\":\"recovery:metrics_updated\",\"data\":{\"min_rtt\":100.0,\"smoothed_rtt\":100.0,\"latest_rtt\":100.0,\"rtt_variance\":50.0},\"group_id\":\"conn-3\"}\n"
        );
        Ok(())
    }
}
