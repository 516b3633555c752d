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

use log::*;

use self::path::Path;
use self::path::PathMap;
use self::path::PathStats;
use self::recovery::AckOutcome;
use self::recovery::Recovery;
use self::rtt::TupleStats;
use self::space::SentPacket;
use self::space::SpaceId;
use crate::as_micros;
use crate::codec;
use crate::congestion_control::CongestionNotifier;
use crate::error::Error;
use crate::qlog;
use crate::qlog::events;
use crate::ranges::SackOutcome;
use crate::ranges::SackRange;
use crate::RecoveryConfig;
use crate::Result;
use crate::TIMER_GRANULARITY;

/// Acknowledgment and RTT state of a (multipath) QUIC connection.
///
/// The connection does not parse or build frames. The caller tells it about
/// the packets it sends and receives and about the ACK frames it gets, and
/// reads back what is needed to write ACK frames.
pub struct Connection {
    /// Configurations shared by all paths.
    conf: RecoveryConfig,

    /// The paths of the connection.
    paths: PathMap,

    /// RTT estimation shared by all paths.
    recovery: Recovery,

    /// Qlog writer.
    qlog: Option<qlog::QlogWriter>,

    /// Unique trace id for debug logging.
    trace_id: String,
}

impl Connection {
    /// Create a connection without any path.
    pub fn new(conf: &RecoveryConfig, trace_id: &str) -> Self {
        let mut recovery = Recovery::new(conf);
        recovery.set_trace_id(trace_id);

        Connection {
            conf: conf.clone(),
            paths: PathMap::new(),
            recovery,
            qlog: None,
            trace_id: trace_id.to_string(),
        }
    }

    /// Set qlog output to the given [`writer`]
    ///
    /// `start_time` is the reference of the event times, in microseconds on
    /// the clock of the connection.
    ///
    /// [`Writer`]: https://doc.rust-lang.org/std/io/trait.Write.html
    pub fn set_qlog(
        &mut self,
        writer: Box<dyn std::io::Write + Send + Sync>,
        title: String,
        description: String,
        is_server: bool,
        start_time: u64,
    ) {
        let trace = qlog::TraceSeq::new(
            Some(title.to_string()),
            Some(description.to_string()),
            qlog::VantagePoint::new(Some(self.trace_id.clone()), is_server),
        );
        let level = events::EventImportance::Extra;
        let mut writer = qlog::QlogWriter::new(
            Some(title),
            Some(description),
            trace,
            level,
            writer,
            start_time,
        );
        writer.start().ok();

        // Write RecoveryParametersSet event to qlog
        let ev_data = events::EventData::RecoveryParametersSet {
            reordering_threshold: None,
            time_threshold: None,
            timer_granularity: Some(TIMER_GRANULARITY.as_millis() as u16),
            initial_rtt: Some(as_micros(self.conf.initial_rtt) as f32 / 1000.0),
            max_datagram_size: None,
            initial_congestion_window: None,
            minimum_congestion_window: None,
            loss_reduction_factor: None,
            persistent_congestion_threshold: None,
        };
        writer.add_event_data(start_time, ev_data).ok();

        self.qlog = Some(writer);
    }

    /// Set the congestion control algorithm told about RTT measurements.
    pub fn set_congestion_notifier(&mut self, congestion: Box<dyn CongestionNotifier>) {
        self.recovery.set_congestion_notifier(congestion);
    }

    /// Return the congestion control algorithm, if any.
    pub fn congestion_notifier(&self) -> Option<&dyn CongestionNotifier> {
        self.recovery.congestion_notifier()
    }

    /// Return the unique trace id.
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Add a new path on the connection, returning its identifier.
    pub fn add_path(&mut self) -> usize {
        let pid = self.paths.insert_path(Path::new(&self.conf, &self.trace_id));
        debug!("{} add path {}", self.trace_id, pid);
        pid
    }

    /// Remove a path and the statistics of its uniflows.
    ///
    /// Packets sent on the removed path that are acknowledged later are still
    /// matched, but no RTT sample is taken from them.
    pub fn remove_path(&mut self, path_id: usize) -> Result<()> {
        let path = self.paths.remove_path(path_id)?;
        self.recovery
            .on_uniflows_closed(path.send_uniflow(), path.recv_uniflow());
        debug!("{} remove path {:?}", self.trace_id, path);
        Ok(())
    }

    /// Set the uniflows on which the path sends and receives packets.
    pub fn set_uniflows(
        &mut self,
        path_id: usize,
        send_uniflow: Option<usize>,
        recv_uniflow: Option<usize>,
    ) -> Result<()> {
        let path = self.paths.get_mut(path_id)?;
        path.set_uniflows(send_uniflow, recv_uniflow);
        debug!(
            "{} uniflows send={:?} recv={:?}",
            path.trace_id(),
            send_uniflow,
            recv_uniflow
        );
        Ok(())
    }

    /// Return an immutable reference to the specified path.
    pub fn path(&self, path_id: usize) -> Result<&Path> {
        self.paths.get(path_id)
    }

    /// Return statistics about the specified path.
    pub fn path_stats(&self, path_id: usize) -> Result<&PathStats> {
        Ok(self.paths.get(path_id)?.stats())
    }

    /// Return an iterator over the identifiers of existing paths.
    pub fn path_ids(&self) -> impl Iterator<Item = usize> + '_ {
        self.paths.iter().map(|(pid, _)| pid)
    }

    /// Return the RTT statistics of packets sent on `send_uniflow` and
    /// acknowledged on `recv_uniflow`.
    pub fn tuple_stats(&self, recv_uniflow: usize, send_uniflow: usize) -> Option<&TupleStats> {
        self.recovery.tuple_stats(recv_uniflow, send_uniflow)
    }

    /// Keep track of a packet sent in the space of the path.
    pub fn on_packet_sent(
        &mut self,
        path_id: usize,
        space_id: SpaceId,
        pkt_num: u64,
        now: u64,
    ) -> Result<()> {
        let path = self.paths.get_mut(path_id)?;
        path.space_mut(space_id)?
            .on_packet_sent(SentPacket::new(pkt_num, now, path_id))?;
        path.stats.sent_count += 1;
        trace!(
            "now={} {} {:?} sent pn={}",
            now,
            path.trace_id(),
            space_id,
            pkt_num
        );
        Ok(())
    }

    /// Return whether the packet number was already received in the space
    /// of the path.
    pub fn is_pn_already_received(
        &self,
        path_id: usize,
        space_id: SpaceId,
        pkt_num: u64,
    ) -> Result<bool> {
        Ok(self
            .paths
            .get(path_id)?
            .space(space_id)?
            .is_pkt_num_received(pkt_num))
    }

    /// Record a packet number received in the space of the path.
    ///
    /// A packet number that can not be recorded because the SACK list can not
    /// grow results in `Error::AllocationFailure`; the packet is then left
    /// unacknowledged.
    pub fn on_packet_received(
        &mut self,
        path_id: usize,
        space_id: SpaceId,
        pkt_num: u64,
        now: u64,
    ) -> Result<SackOutcome> {
        let path = self.paths.get_mut(path_id)?;
        let ret = path.space_mut(space_id)?.record_received(pkt_num, now);
        match ret {
            Ok(SackOutcome::Recorded) => path.stats.recv_count += 1,
            Ok(SackOutcome::Duplicate) => {
                path.stats.dup_recv_count += 1;
                trace!(
                    "now={} {} {:?} duplicate pn={}",
                    now,
                    path.trace_id(),
                    space_id,
                    pkt_num
                );
            }
            Err(Error::AllocationFailure) => {
                path.stats.sack_alloc_failures += 1;
                warn!(
                    "now={} {} {:?} can not record pn={}",
                    now,
                    path.trace_id(),
                    space_id,
                    pkt_num
                );
            }
            Err(_) => (),
        }
        ret
    }

    /// Return whether recording `[pn_min, pn_max]` in the space of the path
    /// would fill a gap between received packet numbers.
    pub fn check_would_fill_hole(
        &self,
        path_id: usize,
        space_id: SpaceId,
        pn_min: u64,
        pn_max: u64,
    ) -> Result<bool> {
        Ok(self
            .paths
            .get(path_id)?
            .space(space_id)?
            .recv_pkt_nums
            .would_fill_hole(pn_min, pn_max))
    }

    /// Return the ranges of received packet numbers, highest first, as they
    /// appear in an ACK frame.
    pub fn ack_ranges(&self, path_id: usize, space_id: SpaceId) -> Result<Vec<SackRange>> {
        let space = self.paths.get(path_id)?.space(space_id)?;
        Ok(space.recv_pkt_nums.iter().copied().collect())
    }

    /// Return the ACK delay to advertise in an ACK frame, i.e. the time
    /// elapsed since the largest packet number arrived, in 16-bit float
    /// encoding.
    pub fn ack_delay(&self, path_id: usize, space_id: SpaceId, now: u64) -> Result<u16> {
        let delay = self
            .paths
            .get(path_id)?
            .space(space_id)?
            .ack_delay(now)
            .ok_or(Error::Done)?;
        Ok(codec::encode_float16(delay))
    }

    /// Process the largest acknowledged packet number of an ACK frame for the
    /// space of the path.
    ///
    /// `receiving_path` is the path on which the ACK frame arrived, if known.
    /// `ack_delay` is in microseconds.
    pub fn on_ack_received(
        &mut self,
        path_id: usize,
        space_id: SpaceId,
        largest_acked: u64,
        ack_delay: u64,
        receiving_path: Option<usize>,
        now: u64,
    ) -> Result<AckOutcome> {
        self.recovery.on_ack_received(
            &mut self.paths,
            largest_acked,
            ack_delay,
            space_id,
            path_id,
            receiving_path,
            self.qlog.as_mut(),
            now,
        )
    }

    /// Forget the sent packets covered by the ranges of an ACK frame received
    /// for the space of the path. Return the number of newly acknowledged
    /// packets.
    ///
    /// It is called after `on_ack_received`, which needs the record of the
    /// largest acknowledged packet to take an RTT sample.
    pub fn on_packets_acked(
        &mut self,
        path_id: usize,
        space_id: SpaceId,
        ranges: &[SackRange],
        now: u64,
    ) -> Result<usize> {
        let path = self.paths.get_mut(path_id)?;
        let space = path.space_mut(space_id)?;
        let newly_acked = space.on_packets_acked(ranges, now);
        let remaining = space.sent.len();
        trace!(
            "now={} {} {:?} newly acked={} sent records={}",
            now,
            path.trace_id(),
            space_id,
            newly_acked,
            remaining
        );
        Ok(newly_acked)
    }

    /// Forget every sent packet of the space of the path up to `pkt_num`,
    /// e.g. once they are declared lost. Return the number of records
    /// removed.
    pub fn discard_sent_packets(
        &mut self,
        path_id: usize,
        space_id: SpaceId,
        pkt_num: u64,
    ) -> Result<usize> {
        let path = self.paths.get_mut(path_id)?;
        let removed = path.space_mut(space_id)?.discard_sent_through(pkt_num);
        trace!(
            "{} {:?} discard sent packets through pn={} removed={}",
            path.trace_id(),
            space_id,
            pkt_num,
            removed
        );
        Ok(removed)
    }

    /// Discard a packet number space of the path, e.g. once the handshake
    /// keys are dropped.
    pub fn drop_space(&mut self, path_id: usize, space_id: SpaceId) -> Result<()> {
        let path = self.paths.get_mut(path_id)?;
        path.spaces.drop(space_id);
        debug!("{} drop space {:?}", path.trace_id(), space_id);
        Ok(())
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} paths={}", self.trace_id, self.paths.len())?;
        if let Some(congestion) = self.recovery.congestion_notifier() {
            write!(f, " congestion={}", congestion.name())?;
        }
        Ok(())
    }
}


pub mod path;
pub mod recovery;
pub mod rtt;
pub mod space;
