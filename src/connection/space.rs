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

use std::collections::hash_map::Iter;
use std::collections::hash_map::IterMut;
use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use strum::IntoEnumIterator;
use strum_macros::EnumIter;

use crate::error::Error;
use crate::ranges::SackList;
use crate::ranges::SackOutcome;
use crate::ranges::SackRange;
use crate::Result;

/// Packet numbers are divided into three spaces in QUIC
pub const SPACE_COUNT: usize = 3;

/// Packet number space identifiers.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, EnumIter)]
#[repr(u8)]
pub enum SpaceId {
    /// Initial space for all Initial packets.
    Initial = 0,

    /// Handshake space for all Handhshake packets.
    Handshake = 1,

    /// Application data space for all 0-RTT and 1-RTT packets.
    Data = 2,
}

/// A packet number space is the context in which a packet can be processed
/// and acknowledged.
pub struct PacketNumSpace {
    /// The unique id for the packet number space.
    pub id: SpaceId,

    /// The packet numbers received, to be acknowledged.
    pub recv_pkt_nums: SackList,

    /// The time at which the packet of highest sequence number arrived.
    pub largest_rx_pkt_time: u64,

    /// The largest packet number acknowledged by the peer so far, if any.
    pub largest_acked_pkt: Option<u64>,

    /// The send time of the most recent packet known to be acknowledged.
    pub latest_time_acked: u64,

    /// The delayed ACK threshold chosen locally, in microseconds.
    pub ack_delay_local: u64,

    /// Sent packets metadata, oldest first.
    pub sent: VecDeque<SentPacket>,
}

impl PacketNumSpace {
    pub fn new(id: SpaceId, max_sack_ranges: usize, ack_delay_local: u64) -> Self {
        PacketNumSpace {
            id,
            recv_pkt_nums: SackList::new(max_sack_ranges),
            largest_rx_pkt_time: 0,
            largest_acked_pkt: None,
            latest_time_acked: 0,
            ack_delay_local,
            sent: VecDeque::new(),
        }
    }

    /// Return whether the packet number was already received.
    pub fn is_pkt_num_received(&self, pkt_num: u64) -> bool {
        self.recv_pkt_nums.contains(pkt_num)
    }

    /// Record a received packet number.
    ///
    /// The arrival time is kept if `pkt_num` is the highest packet number
    /// received so far, as the reference point of the next ACK delay.
    pub fn record_received(&mut self, pkt_num: u64, now: u64) -> Result<SackOutcome> {
        match self.recv_pkt_nums.largest() {
            Some(largest) if pkt_num <= largest => (),
            _ => self.largest_rx_pkt_time = now,
        }
        self.recv_pkt_nums.update(pkt_num, pkt_num)
    }

    /// Return the time elapsed since the highest packet number arrived.
    pub fn ack_delay(&self, now: u64) -> Option<u64> {
        self.recv_pkt_nums.largest()?;
        Some(now.saturating_sub(self.largest_rx_pkt_time))
    }

    /// Keep the metadata of a sent packet. Packet numbers must increase.
    pub fn on_packet_sent(&mut self, pkt: SentPacket) -> Result<()> {
        if let Some(last) = self.sent.back() {
            if pkt.pkt_num <= last.pkt_num {
                return Err(Error::InvalidOperation(format!(
                    "pn {} sent after {}",
                    pkt.pkt_num, last.pkt_num
                )));
            }
        }
        self.sent.push_back(pkt);
        Ok(())
    }

    /// Find the metadata of the sent packet `pkt_num`, walking from the newest
    /// packet to the oldest one.
    pub fn find_sent(&self, pkt_num: u64) -> Option<&SentPacket> {
        self.sent
            .iter()
            .rev()
            .find(|p| p.pkt_num <= pkt_num)
            .filter(|p| p.pkt_num == pkt_num)
    }

    /// Mark the sent packets covered by the acknowledged ranges, then remove
    /// the acknowledged records from the front of the queue. Return the
    /// number of newly acknowledged packets.
    ///
    /// Records that follow a packet not yet acknowledged stay in the queue
    /// until that packet is acknowledged or discarded.
    pub fn on_packets_acked(&mut self, ranges: &[SackRange], now: u64) -> usize {
        let mut ranges: SmallVec<[SackRange; 8]> = ranges.iter().copied().collect();
        ranges.sort_unstable_by_key(|r| r.start);

        let mut newly_acked = 0;
        let mut idx = 0;
        'ranges_loop: for r in ranges.iter() {
            while idx < self.sent.len() {
                let pkt = &mut self.sent[idx];
                // Note: packet numbers in both ranges and sent packets are in
                // ascending order.
                if pkt.pkt_num < r.start {
                    idx += 1;
                    continue;
                }
                if pkt.pkt_num > r.end {
                    continue 'ranges_loop;
                }

                if pkt.time_acked.is_none() {
                    pkt.time_acked = Some(now);
                    newly_acked += 1;
                }
                idx += 1;
            }
            break;
        }

        self.drain_sent_packets();
        newly_acked
    }

    /// Remove every sent record up to `pkt_num`, acknowledged or not, e.g.
    /// once the packets were declared lost. Acknowledged records that become
    /// the front of the queue are removed too. Return the number of records
    /// removed.
    pub fn discard_sent_through(&mut self, pkt_num: u64) -> usize {
        let len = self.sent.len();
        let n = self.sent.partition_point(|p| p.pkt_num <= pkt_num);
        self.sent.drain(..n);
        self.drain_sent_packets();
        len - self.sent.len()
    }

    /// Remove acknowledged records from the front of the queue.
    fn drain_sent_packets(&mut self) {
        let lowest_unacked = self
            .sent
            .iter()
            .position(|p| p.time_acked.is_none())
            .unwrap_or(self.sent.len());
        self.sent.drain(..lowest_unacked);
    }

    /// Update the ACK delay threshold from the minimum RTT of the path.
    pub fn update_ack_delay_local(&mut self, min_rtt: u64, lower: u64, upper: u64) {
        self.ack_delay_local = (min_rtt / 4).clamp(lower, upper);
    }
}

impl std::fmt::Debug for PacketNumSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?} recv={:?}", self.id, self.recv_pkt_nums)?;
        write!(f, " largest_acked={:?}", self.largest_acked_pkt)?;
        write!(f, " sent={}", self.sent.len())?;
        Ok(())
    }
}

/// All packet number spaces of a path.
pub struct PacketNumSpaceMap {
    /// Packet number spaces for Initial/Handshake/Data
    spaces: FxHashMap<SpaceId, PacketNumSpace>,
}

impl PacketNumSpaceMap {
    pub fn new(max_sack_ranges: usize, ack_delay_local: u64) -> Self {
        let spaces = SpaceId::iter()
            .map(|id| (id, PacketNumSpace::new(id, max_sack_ranges, ack_delay_local)))
            .collect();
        PacketNumSpaceMap { spaces }
    }

    /// Get an immutable reference to the specified space.
    pub fn get(&self, space_id: SpaceId) -> Option<&PacketNumSpace> {
        self.spaces.get(&space_id)
    }

    /// Get an mutable reference to the specified space.
    pub fn get_mut(&mut self, space_id: SpaceId) -> Option<&mut PacketNumSpace> {
        self.spaces.get_mut(&space_id)
    }

    /// Return an iterator over all spaces.
    pub fn iter(&self) -> Iter<'_, SpaceId, PacketNumSpace> {
        self.spaces.iter()
    }

    /// Return a mutable iterator over all spaces.
    pub fn iter_mut(&mut self) -> IterMut<'_, SpaceId, PacketNumSpace> {
        self.spaces.iter_mut()
    }

    /// Discard a packet number space, e.g. once the handshake keys are
    /// dropped.
    pub fn drop(&mut self, space_id: SpaceId) {
        self.spaces.remove(&space_id);
    }
}

impl Default for PacketNumSpaceMap {
    fn default() -> Self {
        Self::new(usize::MAX, crate::ACK_DELAY_LOCAL_MIN.as_micros() as u64)
    }
}

/// Metadata of sent packet
#[derive(Clone)]
pub struct SentPacket {
    /// The packet number of the sent packet.
    pub pkt_num: u64,

    /// The time the packet was sent.
    pub time_sent: u64,

    /// The path on which the packet was sent.
    pub path_id: usize,

    /// The time the packet was acknowledged, if it was.
    pub time_acked: Option<u64>,
}

impl SentPacket {
    pub fn new(pkt_num: u64, time_sent: u64, path_id: usize) -> Self {
        SentPacket {
            pkt_num,
            time_sent,
            path_id,
            time_acked: None,
        }
    }
}

impl std::fmt::Debug for SentPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "pn={:?}", self.pkt_num)?;
        write!(f, " time_sent={}", self.time_sent)?;
        write!(f, " path_id={}", self.path_id)?;

        Ok(())
    }
}
