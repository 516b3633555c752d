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

//! Packet acknowledgment tracking and RTT estimation for (multipath) QUIC
//! loss recovery.
//!
//! For every packet number space of every path of a connection, the crate
//! keeps:
//!
//! * **Received packet numbers**: a compact list of SACK ranges, used for
//!   duplicate detection and for building outgoing ACK frames.
//! * **ACK delay encoding**: the 16-bit float encoding of ACK delays used on
//!   the wire.
//! * **RTT estimation**: smoothed RTT, RTT variation, minimum RTT and the
//!   retransmission timer of each path, updated from incoming ACKs, plus the
//!   statistics of each (receiving uniflow, sending uniflow) pair when
//!   multipath is enabled.
//!
//! All times are microseconds on a clock provided by the caller. Nothing in the
//! crate blocks or performs I/O, except for the optional qlog writer.
//!
//! ## Get started
//!
//! ```
//! use tquic_ackrtt::Connection;
//! use tquic_ackrtt::RecoveryConfig;
//! use tquic_ackrtt::SpaceId;
//!
//! let mut conn = Connection::new(&RecoveryConfig::default(), "conn");
//! let pid = conn.add_path();
//! conn.on_packet_sent(pid, SpaceId::Data, 0, 1_000).unwrap();
//! let outcome = conn
//!     .on_ack_received(pid, SpaceId::Data, 0, 0, None, 51_000)
//!     .unwrap();
//! assert_eq!(outcome.rtt_sample, Some(50_000));
//! ```

use std::cmp;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use serde_with::serde_as;
use serde_with::DurationMilliSeconds;

/// The RECOMMENDED value of the timer granularity is 1 millisecond.
/// See RFC 9002 Section 6.1
pub const TIMER_GRANULARITY: Duration = Duration::from_millis(1);

/// Resumed connections over the same network MAY use the previous connection's
/// final smoothed RTT value as the resumed connection's initial RTT. When no
/// previous RTT is available, the initial RTT SHOULD be set to 333 milliseconds.
/// This results in handshakes starting with a PTO of 1 second, as recommended
/// for TCP's initial RTO
pub const INITIAL_RTT: Duration = Duration::from_millis(333);

/// The retransmission timer used before any RTT sample.
pub const INITIAL_RETRANSMIT_TIMER: Duration = Duration::from_secs(1);

/// Lower bound of the retransmission timer.
pub const MIN_RETRANSMIT_TIMER: Duration = Duration::from_millis(50);

/// ACK delays at or above this value are considered stale and are not used
/// for RTT estimation.
pub const ACK_DELAY_MAX: Duration = Duration::from_millis(10);

/// Lower bound of the locally chosen ACK delay.
pub const ACK_DELAY_LOCAL_MIN: Duration = Duration::from_millis(1);

/// Upper bound of the locally chosen ACK delay.
pub const ACK_DELAY_LOCAL_MAX: Duration = Duration::from_millis(10);

/// Default limit of SACK ranges per packet number space.
pub const MAX_SACK_RANGES: usize = usize::MAX;

/// Result type for ACK and RTT operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Configurations about acknowledgment tracking and RTT estimation.
///
/// It can be loaded from JSON, durations being expressed in milliseconds.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// The initial rtt, used before real rtt is estimated.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub initial_rtt: Duration,

    /// The retransmission timer used before real rtt is estimated.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub initial_retransmit_timer: Duration,

    /// Lower bound of the retransmission timer.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub min_retransmit_timer: Duration,

    /// ACK delays at or above this value are not trusted for RTT estimation.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_ack_delay_trusted: Duration,

    /// Lower bound of the locally chosen ACK delay.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub ack_delay_local_min: Duration,

    /// Upper bound of the locally chosen ACK delay.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub ack_delay_local_max: Duration,

    /// The maximum number of SACK ranges kept for a packet number space.
    pub max_sack_ranges: usize,

    /// Whether statistics are tracked per (receiving, sending) uniflow pair.
    pub enable_multipath: bool,
}

impl Default for RecoveryConfig {
    fn default() -> RecoveryConfig {
        RecoveryConfig {
            initial_rtt: INITIAL_RTT,
            initial_retransmit_timer: INITIAL_RETRANSMIT_TIMER,
            min_retransmit_timer: MIN_RETRANSMIT_TIMER,
            max_ack_delay_trusted: ACK_DELAY_MAX,
            ack_delay_local_min: ACK_DELAY_LOCAL_MIN,
            ack_delay_local_max: ACK_DELAY_LOCAL_MAX,
            max_sack_ranges: MAX_SACK_RANGES,
            enable_multipath: false,
        }
    }
}

impl RecoveryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration from JSON. Missing fields take their default
    /// value.
    pub fn from_json(s: &str) -> Result<Self> {
        let conf: RecoveryConfig =
            serde_json::from_str(s).map_err(|e| Error::InvalidConfig(format!("{}", e)))?;
        conf.validate()?;
        Ok(conf)
    }

    /// Set the initial RTT in milliseconds. The default value is 333ms.
    pub fn set_initial_rtt(&mut self, millis: u64) {
        self.initial_rtt = cmp::max(Duration::from_millis(millis), TIMER_GRANULARITY);
    }

    /// Set the initial retransmission timer in milliseconds. The default value
    /// is 1s.
    pub fn set_initial_retransmit_timer(&mut self, millis: u64) {
        self.initial_retransmit_timer = cmp::max(Duration::from_millis(millis), TIMER_GRANULARITY);
    }

    /// Set the lower bound of the retransmission timer in milliseconds. The
    /// default value is 50ms.
    pub fn set_min_retransmit_timer(&mut self, millis: u64) {
        self.min_retransmit_timer = cmp::max(Duration::from_millis(millis), TIMER_GRANULARITY);
    }

    /// Set the largest ACK delay in milliseconds that is trusted for RTT
    /// estimation. The default value is 10ms.
    pub fn set_max_ack_delay_trusted(&mut self, millis: u64) {
        self.max_ack_delay_trusted = cmp::max(Duration::from_millis(millis), TIMER_GRANULARITY);
    }

    /// Set the bounds of the locally chosen ACK delay in milliseconds. The
    /// default values are 1ms and 10ms.
    pub fn set_ack_delay_local_bounds(&mut self, min_millis: u64, max_millis: u64) {
        let min = cmp::max(Duration::from_millis(min_millis), TIMER_GRANULARITY);
        self.ack_delay_local_min = min;
        self.ack_delay_local_max = cmp::max(Duration::from_millis(max_millis), min);
    }

    /// Set the maximum number of SACK ranges kept for a packet number space.
    /// The default value is unlimited.
    pub fn set_max_sack_ranges(&mut self, v: usize) {
        self.max_sack_ranges = cmp::max(v, 1);
    }

    /// Enable statistics per (receiving, sending) uniflow pair.
    pub fn enable_multipath(&mut self, v: bool) {
        self.enable_multipath = v;
    }

    fn validate(&self) -> Result<()> {
        if self.ack_delay_local_min > self.ack_delay_local_max {
            return Err(Error::InvalidConfig("ack delay local bounds".into()));
        }
        if self.max_sack_ranges == 0 {
            return Err(Error::InvalidConfig("max sack ranges".into()));
        }
        if self.initial_rtt.is_zero() || self.min_retransmit_timer.is_zero() {
            return Err(Error::InvalidConfig("zero timer".into()));
        }
        Ok(())
    }
}

/// Convert a duration to microseconds, saturating on overflow.
pub(crate) fn as_micros(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}


pub use crate::codec::decode_float16;
pub use crate::codec::encode_float16;
pub use crate::congestion_control::CongestionNotifier;
pub use crate::congestion_control::CongestionStats;
pub use crate::connection::path::Path;
pub use crate::connection::path::PathStats;
pub use crate::connection::recovery::AckOutcome;
pub use crate::connection::space::SentPacket;
pub use crate::connection::space::SpaceId;
pub use crate::connection::Connection;
pub use crate::error::Error;
pub use crate::ranges::SackList;
pub use crate::ranges::SackOutcome;
pub use crate::ranges::SackRange;

#[path = "connection/connection.rs"]
pub mod connection;

#[path = "congestion_control/congestion_control.rs"]
pub mod congestion_control;

#[path = "qlog/qlog.rs"]
pub mod qlog;

pub mod codec;
pub mod error;
pub mod ranges;
