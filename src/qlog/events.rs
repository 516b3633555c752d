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

//! Concrete qlog event definitions for QUIC loss recovery
//! - draft-ietf-quic-qlog-quic-events-06

use serde::Deserialize;
use serde::Serialize;

/// Each event is specified as a generic object with a number of member fields
/// and their associated data.
#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Event {
    /// The "time" field indicates the timestamp at which the event occurred.
    pub time: f32,

    /// The data field is a generic object. It contains the per-event metadata
    /// and its form and semantics are defined per specific sort of event.
    #[serde(flatten)]
    pub data: EventData,

    /// Identifier of the group the event belongs to, e.g. the path that the
    /// metrics were measured on.
    pub group_id: Option<String>,
}

impl Event {
    pub fn new(time: f32, data: EventData) -> Self {
        Event {
            time,
            data,
            group_id: Default::default(),
        }
    }

    /// Return the importance of the event.
    pub fn importance(&self) -> EventImportance {
        self.data.importance()
    }
}

#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
#[serde(tag = "name", content = "data")]
pub enum EventData {
    /// This event groups initial parameters from both loss detection and congestion
    /// control into a single event. All these settings are typically set once and
    /// never change. Implementation that do, for some reason, change these
    /// parameters during execution, MAY emit the parameters_set event twice.
    #[serde(rename = "recovery:parameters_set")]
    RecoveryParametersSet {
        reordering_threshold: Option<u16>,
        time_threshold: Option<f32>,
        timer_granularity: Option<u16>,
        initial_rtt: Option<f32>,
        max_datagram_size: Option<u32>,
        initial_congestion_window: Option<u64>,
        minimum_congestion_window: Option<u32>,
        loss_reduction_factor: Option<f32>,
        persistent_congestion_threshold: Option<u16>,
    },

    /// This event is emitted when one or more of the observable recovery metrics
    /// changes value. This event SHOULD group all possible metric updates that
    /// happen at or around the same time in a single event (e.g., if min_rtt
    /// and smoothed_rtt change at the same time, they should be bundled in a
    /// single metrics_updated entry, rather than split out into two).
    /// Consequently, a metrics_updated event is only guaranteed to contain at
    /// least one of the listed metrics.
    #[serde(rename = "recovery:metrics_updated")]
    RecoveryMetricsUpdated {
        min_rtt: Option<f32>,
        smoothed_rtt: Option<f32>,
        latest_rtt: Option<f32>,
        rtt_variance: Option<f32>,
        pto_count: Option<u16>,
        congestion_window: Option<u64>,
        bytes_in_flight: Option<u64>,
        ssthresh: Option<u64>,
        packets_in_flight: Option<u64>,
        pacing_rate: Option<u64>,
    },
}

impl EventData {
    /// Return the importance of the event.
    pub fn importance(&self) -> EventImportance {
        match *self {
            EventData::RecoveryParametersSet { .. } => EventImportance::Base,
            EventData::RecoveryMetricsUpdated { .. } => EventImportance::Core,
        }
    }
}

/// An "importance indicator" in decreasing order of importance and expected
/// usage.
#[derive(Clone, Debug, PartialEq, PartialOrd)]
pub enum EventImportance {
    /// The "Core" events are the events that SHOULD be present in all qlog
    /// files for a given protocol.
    Core = 0,

    /// The "Base" events add additional debugging options and CAN be present
    /// in qlog files.
    Base = 1,

    /// The "Extra" events are considered mostly useful for low-level debugging
    /// of the implementation, rather than the protocol.
    Extra = 2,
}

impl EventImportance {
    /// Return true if this importance level is included by `other`.
    pub fn is_contained_in(&self, other: &EventImportance) -> bool {
        self <= other
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    #[test]
    fn importance() {
        assert!(EventImportance::Core.is_contained_in(&EventImportance::Base));
        assert!(EventImportance::Base.is_contained_in(&EventImportance::Base));
        assert!(!EventImportance::Extra.is_contained_in(&EventImportance::Base));
    }

    #[test]
    fn serialize_recovery_metrics_updated() {
        let mut event = Event::new(
            1.5,
            EventData::RecoveryMetricsUpdated {
                min_rtt: Some(60.0),
                smoothed_rtt: Some(95.0),
                latest_rtt: Some(60.0),
                rtt_variance: Some(47.5),
                pto_count: None,
                congestion_window: None,
                bytes_in_flight: None,
                ssthresh: None,
                packets_in_flight: None,
                pacing_rate: None,
            },
        );
        event.group_id = Some("conn-1".to_string());
        assert_eq!(event.importance(), EventImportance::Core);

        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"time":1.5,"name":"recovery:metrics_updated","data":{"min_rtt":60.0,"smoothed_rtt":95.0,"latest_rtt":60.0,"rtt_variance":47.5},"group_id":"conn-1"}"#
        );
    }

    #[test]
    fn serialize_recovery_parameters_set() {
        let data = EventData::RecoveryParametersSet {
            reordering_threshold: None,
            time_threshold: None,
            timer_granularity: Some(1),
            initial_rtt: Some(333.0),
            max_datagram_size: None,
            initial_congestion_window: None,
            minimum_congestion_window: None,
            loss_reduction_factor: None,
            persistent_congestion_threshold: None,
        };
        assert_eq!(data.importance(), EventImportance::Base);
        assert_eq!(
            serde_json::to_string(&data).unwrap(),
            r#"{"name":"recovery:parameters_set","data":{"timer_granularity":1,"initial_rtt":333.0}}"#
        );
    }
}
