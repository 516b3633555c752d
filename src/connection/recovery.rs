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

use super::path::PathMap;
use super::rtt::TupleStats;
use super::rtt::TupleStatsMap;
use super::space::SentPacket;
use super::space::SpaceId;
use crate::as_micros;
use crate::congestion_control::CongestionNotifier;
use crate::qlog;
use crate::RecoveryConfig;
use crate::Result;

/// Result of processing the largest acknowledged packet number of an ACK.
#[derive(Debug, Clone, Default)]
pub struct AckOutcome {
    /// Whether the ACK acknowledges a packet number larger than any seen
    /// before in the packet number space.
    pub is_new_ack: bool,

    /// The metadata of the largest acknowledged packet, if it is still known.
    pub acked_pkt: Option<SentPacket>,

    /// The RTT sample taken from the ACK, if any.
    pub rtt_sample: Option<u64>,
}

/// RTT estimation from incoming acknowledgments.
///
/// The per-path statistics live in each path. The recovery keeps what is
/// shared by all paths of the connection: the statistics of uniflow pairs and
/// the congestion notifier.
pub struct Recovery {
    /// ACK delays at or above this value are not used for RTT estimation.
    max_ack_delay_trusted: u64,

    /// Lower bound of the locally chosen ACK delay.
    ack_delay_local_min: u64,

    /// Upper bound of the locally chosen ACK delay.
    ack_delay_local_max: u64,

    /// Whether the statistics of uniflow pairs are tracked.
    multipath: bool,

    /// Statistics of (receiving uniflow, sending uniflow) pairs.
    tuples: TupleStatsMap,

    /// Receiver of RTT measurements.
    congestion: Option<Box<dyn CongestionNotifier>>,

    /// Trace id.
    trace_id: String,
}

impl Recovery {
    pub(super) fn new(conf: &RecoveryConfig) -> Self {
        Recovery {
            max_ack_delay_trusted: as_micros(conf.max_ack_delay_trusted),
            ack_delay_local_min: as_micros(conf.ack_delay_local_min),
            ack_delay_local_max: as_micros(conf.ack_delay_local_max),
            multipath: conf.enable_multipath,
            tuples: TupleStatsMap::default(),
            congestion: None,
            trace_id: String::from(""),
        }
    }

    /// Set trace id.
    pub fn set_trace_id(&mut self, trace_id: &str) {
        self.trace_id = trace_id.to_string();
    }

    /// Set the receiver of RTT measurements.
    pub(super) fn set_congestion_notifier(&mut self, congestion: Box<dyn CongestionNotifier>) {
        self.congestion = Some(congestion);
    }

    pub(super) fn congestion_notifier(&self) -> Option<&dyn CongestionNotifier> {
        self.congestion.as_deref()
    }

    /// Return the statistics of a uniflow pair.
    pub(super) fn tuple_stats(&self, recv_uniflow: usize, send_uniflow: usize) -> Option<&TupleStats> {
        self.tuples.get(recv_uniflow, send_uniflow)
    }

    /// Forget the statistics of the uniflows of a closed path.
    pub(super) fn on_uniflows_closed(&mut self, send_uniflow: Option<usize>, recv_uniflow: Option<usize>) {
        if let Some(s) = send_uniflow {
            self.tuples.remove_send_uniflow(s);
        }
        if let Some(r) = recv_uniflow {
            self.tuples.remove_recv_uniflow(r);
        }
    }

    /// Handle the largest acknowledged packet number of an ACK frame.
    ///
    /// `sending_path` is the path whose packet number space is acknowledged,
    /// and `receiving_path` the path on which the ACK arrived, if known. The
    /// statistics are updated on the path that sent the acknowledged packet.
    ///
    /// Only an ACK whose largest acknowledged packet number is above the one
    /// known for the space is processed further. Older or repeated ACKs return
    /// right away with `is_new_ack == false`: no record lookup is done and
    /// `latest_time_acked` is left as is.
    ///
    /// The record of the largest acknowledged packet must still be in the sent
    /// queue, so this is called before the acknowledged records are drained
    /// with `Connection::on_packets_acked`.
    #[allow(clippy::too_many_arguments)]
    pub(super) fn on_ack_received(
        &mut self,
        paths: &mut PathMap,
        largest_acked: u64,
        ack_delay: u64,
        space_id: SpaceId,
        sending_path: usize,
        receiving_path: Option<usize>,
        qlog: Option<&mut qlog::QlogWriter>,
        now: u64,
    ) -> Result<AckOutcome> {
        let recv_uniflow = match receiving_path {
            Some(pid) => paths.get(pid)?.recv_uniflow(),
            None => None,
        };

        let path = paths.get_mut(sending_path)?;
        path.stats.ack_count += 1;
        let space = path.space_mut(space_id)?;

        let mut outcome = AckOutcome::default();
        match space.largest_acked_pkt {
            Some(largest) if largest_acked <= largest => {
                trace!(
                    "now={} {} {:?} old ack largest={} known={}",
                    now,
                    self.trace_id,
                    space_id,
                    largest_acked,
                    largest
                );
                return Ok(outcome);
            }
            _ => {
                space.largest_acked_pkt = Some(largest_acked);
                outcome.is_new_ack = true;
            }
        }

        if ack_delay >= self.max_ack_delay_trusted {
            trace!(
                "now={} {} {:?} stale ack delay={} largest={}",
                now,
                self.trace_id,
                space_id,
                ack_delay,
                largest_acked
            );
            return Ok(outcome);
        }

        let pkt = match space.find_sent(largest_acked) {
            Some(pkt) => pkt.clone(),
            None => {
                trace!(
                    "now={} {} {:?} no record of pn={}",
                    now,
                    self.trace_id,
                    space_id,
                    largest_acked
                );
                return Ok(outcome);
            }
        };

        space.latest_time_acked = space.latest_time_acked.max(pkt.time_sent);
        outcome.acked_pkt = Some(pkt.clone());
        let sample = now
            .checked_sub(ack_delay)
            .and_then(|t| t.checked_sub(pkt.time_sent))
            .filter(|s| *s > 0);
        let sample = match sample {
            Some(sample) => sample,
            None => {
                trace!(
                    "now={} {} {:?} non positive rtt sample {:?} ack_delay={}",
                    now,
                    self.trace_id,
                    space_id,
                    pkt,
                    ack_delay
                );
                return Ok(outcome);
            }
        };

        // The statistics belong to the path that sent the packet.
        let old_path = match paths.get_mut(pkt.path_id) {
            Ok(path) => path,
            Err(_) => {
                trace!(
                    "now={} {} sending path {} of {:?} is gone",
                    now,
                    self.trace_id,
                    pkt.path_id,
                    pkt
                );
                return Ok(outcome);
            }
        };
        old_path.rtt.on_ack_delay(ack_delay);

        if self.multipath {
            if let (Some(r), Some(s)) = (recv_uniflow, old_path.send_uniflow()) {
                let stats = self.tuples.on_rtt_sample(
                    r,
                    s,
                    sample,
                    self.ack_delay_local_min,
                    self.ack_delay_local_max,
                );
                trace!(
                    "now={} {} tuple recv={} send={} srtt={} rttvar={} updates={}",
                    now,
                    self.trace_id,
                    r,
                    s,
                    stats.filter.smoothed_rtt(),
                    stats.filter.rttvar(),
                    stats.nb_updates
                );
            }
        }

        let new_min = old_path.rtt.update(sample);
        old_path.stats.rtt_sample_count += 1;
        let min_rtt = old_path.rtt.min_rtt();
        trace!(
            "now={} {} rtt sample={} ack_delay={} {:?}",
            now,
            old_path.trace_id(),
            sample,
            ack_delay,
            old_path.rtt
        );

        if let Some(qlog) = qlog {
            old_path.qlog_recovery_metrics_updated(qlog, now);
        }

        if new_min {
            let (lower, upper) = (self.ack_delay_local_min, self.ack_delay_local_max);
            paths
                .get_mut(sending_path)?
                .space_mut(space_id)?
                .update_ack_delay_local(min_rtt, lower, upper);
        }

        if let Some(congestion) = self.congestion.as_mut() {
            congestion.on_rtt_measurement(pkt.path_id, sample, now);
        }

        outcome.rtt_sample = Some(sample);
        Ok(outcome)
    }
}
