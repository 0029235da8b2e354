//! Dispatcher configuration.
//!
//! All knobs are explicit values handed to the dispatcher at construction;
//! there is no process-wide mutable state. Tests that vary a knob construct
//! a new dispatcher.

use crate::filter::HttpHeaderFilter;
use crate::tracker::{DEATH_COUNTDOWN_ITERS, DEFAULT_INACTIVITY_DURATION};
use sockscope_types::{
    EndpointRole, Protocol, TrafficClass, CAPTURE_RECV_REQ, CAPTURE_RECV_RESP, CAPTURE_SEND_REQ,
    CAPTURE_SEND_RESP,
};
use std::time::Duration;

/// Which (direction, message-role) combinations to capture for a protocol.
#[derive(Clone, Copy, Debug)]
pub struct TrafficSelection {
    pub protocol: Protocol,
    pub mask: u32,
}

impl TrafficSelection {
    /// Capture both roles of `protocol`.
    pub fn full(protocol: Protocol) -> TrafficSelection {
        TrafficSelection {
            protocol,
            mask: CAPTURE_SEND_REQ | CAPTURE_RECV_RESP | CAPTURE_SEND_RESP | CAPTURE_RECV_REQ,
        }
    }

    /// Capture the client side of `protocol` (sent requests, received
    /// responses).
    pub fn requestor(protocol: Protocol) -> TrafficSelection {
        TrafficSelection {
            protocol,
            mask: CAPTURE_SEND_REQ | CAPTURE_RECV_RESP,
        }
    }

    /// True if a connection with this traffic class should be processed.
    pub fn allows(&self, traffic_class: TrafficClass) -> bool {
        if traffic_class.protocol != self.protocol {
            return false;
        }
        let required = match traffic_class.role {
            EndpointRole::Requestor => CAPTURE_SEND_REQ | CAPTURE_RECV_RESP,
            EndpointRole::Responder => CAPTURE_RECV_REQ | CAPTURE_SEND_RESP,
            EndpointRole::Unknown => return false,
        };
        self.mask & required == required
    }
}

/// Configuration passed to the dispatcher at construction.
#[derive(Clone, Debug)]
pub struct ConnectorConfig {
    /// Silence duration after which a connection's liveness is probed.
    pub inactivity_duration: Duration,
    /// Iteration ticks a tracker survives after being marked for death.
    pub death_countdown_iters: i32,
    /// Inclusion/exclusion filter applied to response headers before
    /// emission.
    pub response_header_filter: HttpHeaderFilter,
    /// Which (protocol, role) combinations are captured.
    pub selections: Vec<TrafficSelection>,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        ConnectorConfig {
            inactivity_duration: DEFAULT_INACTIVITY_DURATION,
            death_countdown_iters: DEATH_COUNTDOWN_ITERS,
            response_header_filter: HttpHeaderFilter::default_response_filter(),
            selections: vec![
                TrafficSelection::full(Protocol::Http1),
                TrafficSelection::full(Protocol::Http2),
            ],
        }
    }
}

impl ConnectorConfig {
    pub fn allows(&self, traffic_class: TrafficClass) -> bool {
        self.selections.iter().any(|s| s.allows(traffic_class))
    }
}
