//! Per-connection state and lifecycle.
//!
//! A [`ConnectionTracker`] owns the send and recv [`DataStream`]s of one
//! connection plus its open/close metadata. It is mutated only by the
//! dispatcher, which serializes all event delivery and runs the per-
//! iteration maintenance tick.
//!
//! Lifecycle: a tracker is alive (`death_countdown == -1`) until a close
//! event arrives, an older generation is reaped, or an inactivity probe
//! finds its fd gone. Marked trackers count down one per iteration tick and
//! are destroyed at zero, which gives late-arriving data a bounded window
//! to be included.

use crate::stream::DataStream;
use log::{debug, error, warn};
use sockscope_types::{
    parse_sock_addr, ConnId, ConnInfo, EndpointRole, Protocol, RemoteEndpoint, SocketDataEvent,
    TrafficClass,
};
use std::path::Path;
use std::time::{Duration, Instant};

/// Iteration ticks a tracker survives after being marked for death.
pub const DEATH_COUNTDOWN_ITERS: i32 = 3;

/// Default duration of silence before a connection's liveness is probed.
pub const DEFAULT_INACTIVITY_DURATION: Duration = Duration::from_secs(30);

/// Metadata recorded from the connection open event.
#[derive(Clone, Debug, Default)]
pub struct OpenInfo {
    pub timestamp_ns: u64,
    pub remote: Option<RemoteEndpoint>,
}

/// Metadata recorded from the connection close event. The sequence counts
/// are the totals the probe emitted per direction, used as completion
/// witnesses.
#[derive(Clone, Copy, Debug, Default)]
pub struct CloseInfo {
    pub timestamp_ns: u64,
    pub send_seq_num: u64,
    pub recv_seq_num: u64,
}

pub struct ConnectionTracker {
    conn_id: ConnId,
    traffic_class: TrafficClass,
    open_info: OpenInfo,
    close_info: CloseInfo,
    send_data: DataStream,
    recv_data: DataStream,
    num_send_events: u64,
    num_recv_events: u64,
    last_bpf_timestamp_ns: u64,
    last_update: Instant,
    /// Negative while alive; counts down to destruction once marked.
    death_countdown: i32,
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionTracker {
    pub fn new() -> ConnectionTracker {
        ConnectionTracker {
            conn_id: ConnId::default(),
            traffic_class: TrafficClass::default(),
            open_info: OpenInfo::default(),
            close_info: CloseInfo::default(),
            send_data: DataStream::new(),
            recv_data: DataStream::new(),
            num_send_events: 0,
            num_recv_events: 0,
            last_bpf_timestamp_ns: 0,
            last_update: Instant::now(),
            death_countdown: -1,
        }
    }

    pub fn add_conn_open_event(&mut self, info: &ConnInfo) {
        if self.open_info.timestamp_ns != 0 {
            error!("Clobbering existing conn open event [{:?}]", info.conn_id);
        }
        if self.is_zombie() {
            warn!(
                "Did not expect to receive open event after close [pid={}, fd={}, generation={}]",
                info.conn_id.pid, info.conn_id.fd, info.conn_id.generation
            );
        }

        self.update_timestamps(info.timestamp_ns);
        self.set_traffic_class(info.traffic_class);
        self.set_conn_id(info.conn_id);

        self.open_info.timestamp_ns = info.timestamp_ns;
        match parse_sock_addr(&info.addr) {
            Some(remote) => self.open_info.remote = Some(remote),
            None => warn!(
                "Could not parse remote address [pid={}, fd={}, family={}]",
                info.conn_id.pid, info.conn_id.fd, info.addr.family
            ),
        }
    }

    pub fn add_conn_close_event(&mut self, info: &ConnInfo, countdown: i32) {
        if self.close_info.timestamp_ns != 0 {
            error!("Clobbering existing conn close event [{:?}]", info.conn_id);
        }

        self.update_timestamps(info.timestamp_ns);
        self.set_conn_id(info.conn_id);

        self.close_info = CloseInfo {
            timestamp_ns: info.timestamp_ns,
            send_seq_num: info.wr_seq_num,
            recv_seq_num: info.rd_seq_num,
        };

        self.mark_for_death(countdown);
    }

    pub fn add_data_event(&mut self, event: SocketDataEvent) {
        if self.is_zombie() {
            warn!(
                "Did not expect to receive data event after close [pid={}, fd={}, generation={}]",
                event.conn_id.pid, event.conn_id.fd, event.conn_id.generation
            );
        }

        self.update_timestamps(event.timestamp_ns);
        self.set_conn_id(event.conn_id);
        self.set_traffic_class(event.traffic_class);

        let seq_num = event.seq_num;
        if event.kind.is_send() {
            // Duplicates do not count toward the completion witness.
            if self.send_data.add_event(seq_num, event) {
                self.num_send_events += 1;
            }
        } else if self.recv_data.add_event(seq_num, event) {
            self.num_recv_events += 1;
        }
    }

    /// Clean-completion predicate: the close event arrived and every
    /// fragment the probe emitted has been received.
    pub fn all_events_received(&self) -> bool {
        self.close_info.timestamp_ns != 0
            && self.num_send_events == self.close_info.send_seq_num
            && self.num_recv_events == self.close_info.recv_seq_num
    }

    fn set_conn_id(&mut self, conn_id: ConnId) {
        if self.conn_id != ConnId::default() && self.conn_id != conn_id {
            warn!(
                "Conn id changed on tracker: {:?} -> {:?}",
                self.conn_id, conn_id
            );
        }
        self.conn_id = conn_id;
    }

    /// Commit the traffic class on first sight; reject later changes.
    fn set_traffic_class(&mut self, traffic_class: TrafficClass) {
        debug_assert_eq!(
            self.traffic_class.protocol == Protocol::Unknown,
            self.traffic_class.role == EndpointRole::Unknown,
        );

        if self.traffic_class.protocol == Protocol::Unknown {
            self.traffic_class = traffic_class;
        } else if traffic_class.protocol != Protocol::Unknown
            && traffic_class != self.traffic_class
        {
            warn!(
                "Not allowed to change the traffic class of an active tracker: {:?} -> {:?}",
                self.traffic_class, traffic_class
            );
        }
    }

    fn update_timestamps(&mut self, bpf_timestamp_ns: u64) {
        self.last_bpf_timestamp_ns = self.last_bpf_timestamp_ns.max(bpf_timestamp_ns);
        self.last_update = Instant::now();
    }

    /// The request and response streams, resolved by role. None while the
    /// role is unknown.
    pub fn req_resp_data(&mut self) -> Option<(&mut DataStream, &mut DataStream)> {
        match self.traffic_class.role {
            EndpointRole::Requestor => Some((&mut self.send_data, &mut self.recv_data)),
            EndpointRole::Responder => Some((&mut self.recv_data, &mut self.send_data)),
            EndpointRole::Unknown => None,
        }
    }

    pub fn mark_for_death(&mut self, countdown: i32) {
        // A tracker that is already dying never gets its countdown extended.
        if self.death_countdown >= 0 {
            self.death_countdown = self.death_countdown.min(countdown);
        } else {
            self.death_countdown = countdown;
        }
    }

    pub fn is_zombie(&self) -> bool {
        self.death_countdown >= 0
    }

    pub fn ready_for_destruction(&self) -> bool {
        self.death_countdown == 0
    }

    /// Per-iteration maintenance: advance the death countdown and probe
    /// liveness after prolonged silence.
    pub fn iteration_tick(&mut self, inactivity_duration: Duration) {
        if self.death_countdown > 0 {
            self.death_countdown -= 1;
        }

        if self.last_update.elapsed() > inactivity_duration {
            self.handle_inactivity();
        }
    }

    /// The connection went quiet. If its fd is gone the process closed it
    /// and we lost the close event; otherwise it is idle but alive, and any
    /// stale unparseable fragments must not be joined to future traffic.
    fn handle_inactivity(&mut self) {
        let fd_file = format!("/proc/{}/fd/{}", self.conn_id.pid, self.conn_id.fd);

        if !Path::new(&fd_file).exists() {
            debug!(
                "Connection [pid={}, fd={}, generation={}] is dead; marking for destruction",
                self.conn_id.pid, self.conn_id.fd, self.conn_id.generation
            );
            self.mark_for_death(0);
        } else {
            self.send_data.reset();
            self.recv_data.reset();
        }
    }

    pub fn conn_id(&self) -> ConnId {
        self.conn_id
    }

    pub fn traffic_class(&self) -> TrafficClass {
        self.traffic_class
    }

    /// Open metadata (timestamp and remote endpoint).
    pub fn conn(&self) -> &OpenInfo {
        &self.open_info
    }

    pub fn close_info(&self) -> &CloseInfo {
        &self.close_info
    }

    pub fn send_data(&self) -> &DataStream {
        &self.send_data
    }

    pub fn recv_data(&self) -> &DataStream {
        &self.recv_data
    }

    pub fn num_send_events(&self) -> u64 {
        self.num_send_events
    }

    pub fn num_recv_events(&self) -> u64 {
        self.num_recv_events
    }

    pub fn last_bpf_timestamp_ns(&self) -> u64 {
        self.last_bpf_timestamp_ns
    }
}
