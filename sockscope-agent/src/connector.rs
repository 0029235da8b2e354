//! Event dispatcher.
//!
//! [`SocketTraceConnector`] owns every [`ConnectionTracker`], indexes
//! incoming probe events into them, and drives the per-iteration
//! maintenance pass: message extraction, request/response pairing, record
//! emission, death countdowns, and tracker destruction. All mutation goes
//! through this type, which keeps the trackers single-writer without locks.

use crate::clock;
use crate::config::{ConnectorConfig, TrafficSelection};
use crate::filter::HttpHeaderFilter;
use crate::sink::{HttpRecord, RecordSink};
use crate::tracker::ConnectionTracker;
use log::debug;
use sockscope_protocols::http1::HttpMessage;
use sockscope_protocols::http2::Http2Frame;
use sockscope_protocols::MessageKind;
use sockscope_types::{
    ConnId, ConnInfo, EndpointRole, Protocol, RemoteEndpoint, SocketDataEvent, SocketEvent,
};
use std::collections::BTreeMap;

/// Connection trackers bucketed by `(pid, fd)`, then by socket generation.
/// The two-level shape makes generation reaping a bucket-local scan and
/// keeps iteration order deterministic.
type TrackerMap = BTreeMap<(u32, i32), BTreeMap<u32, ConnectionTracker>>;

pub struct SocketTraceConnector {
    trackers: TrackerMap,
    config: ConnectorConfig,
    real_time_offset_ns: u64,
}

impl SocketTraceConnector {
    pub fn new(config: ConnectorConfig) -> SocketTraceConnector {
        SocketTraceConnector {
            trackers: TrackerMap::new(),
            config,
            real_time_offset_ns: 0,
        }
    }

    /// Capture the monotonic-to-wall-clock offset. Call once at startup,
    /// before the first event is accepted.
    pub fn init_clock_real_time_offset(&mut self) {
        self.real_time_offset_ns = clock::real_time_offset_ns();
    }

    pub fn clock_real_time_offset(&self) -> u64 {
        self.real_time_offset_ns
    }

    /// Replace the response-header filter at runtime.
    pub fn set_response_header_filter(&mut self, filter: HttpHeaderFilter) {
        self.config.response_header_filter = filter;
    }

    /// Replace which (protocol, role) combinations are captured.
    pub fn configure(&mut self, selections: Vec<TrafficSelection>) {
        self.config.selections = selections;
    }

    fn tracker_for(&mut self, conn_id: ConnId) -> &mut ConnectionTracker {
        self.trackers
            .entry((conn_id.pid, conn_id.fd))
            .or_default()
            .entry(conn_id.generation)
            .or_default()
    }

    pub fn accept_open_conn_event(&mut self, mut info: ConnInfo) {
        info.timestamp_ns += self.real_time_offset_ns;
        self.tracker_for(info.conn_id).add_conn_open_event(&info);
    }

    pub fn accept_close_conn_event(&mut self, mut info: ConnInfo) {
        info.timestamp_ns += self.real_time_offset_ns;
        let countdown = self.config.death_countdown_iters;
        self.tracker_for(info.conn_id)
            .add_conn_close_event(&info, countdown);
    }

    pub fn accept_data_event(&mut self, mut event: SocketDataEvent) {
        event.timestamp_ns += self.real_time_offset_ns;
        self.tracker_for(event.conn_id).add_data_event(event);
    }

    pub fn accept_event(&mut self, event: SocketEvent) {
        match event {
            SocketEvent::Open(info) => self.accept_open_conn_event(info),
            SocketEvent::Close(info) => self.accept_close_conn_event(info),
            SocketEvent::Data(data) => self.accept_data_event(data),
        }
    }

    pub fn get_connection_tracker(&self, conn_id: ConnId) -> Option<&ConnectionTracker> {
        self.trackers
            .get(&(conn_id.pid, conn_id.fd))?
            .get(&conn_id.generation)
    }

    pub fn num_active_connections(&self) -> usize {
        self.trackers.values().map(|bucket| bucket.len()).sum()
    }

    /// The per-iteration driver: extract messages from every tracker, pair
    /// requests with responses, emit surviving records, advance lifecycle
    /// countdowns, and destroy trackers that reached zero.
    ///
    /// Probe polling happens upstream; by the time this runs, all pending
    /// events have been accepted.
    pub fn transfer_data<S: RecordSink>(&mut self, sink: &mut S) {
        for bucket in self.trackers.values_mut() {
            // A newer generation on the same (pid, fd) proves the older
            // socket is gone even if its close event was lost.
            let max_generation = bucket.keys().next_back().copied().unwrap_or(0);
            for (&generation, tracker) in bucket.iter_mut() {
                if generation < max_generation {
                    tracker.mark_for_death(self.config.death_countdown_iters);
                }
                Self::process_tracker(&self.config, tracker, sink);
                tracker.iteration_tick(self.config.inactivity_duration);
            }
        }

        self.trackers.retain(|_, bucket| {
            bucket.retain(|_, tracker| !tracker.ready_for_destruction());
            !bucket.is_empty()
        });
    }

    fn process_tracker<S: RecordSink>(
        config: &ConnectorConfig,
        tracker: &mut ConnectionTracker,
        sink: &mut S,
    ) {
        let traffic_class = tracker.traffic_class();
        // Until the role is known we cannot tell requests from responses.
        if traffic_class.role == EndpointRole::Unknown {
            return;
        }
        if !config.allows(traffic_class) {
            return;
        }
        match traffic_class.protocol {
            Protocol::Http1 => Self::process_http1(config, tracker, sink),
            Protocol::Http2 => Self::process_http2(tracker),
            Protocol::Unknown => {}
        }
    }

    fn process_http1<S: RecordSink>(
        config: &ConnectorConfig,
        tracker: &mut ConnectionTracker,
        sink: &mut S,
    ) {
        let conn_id = tracker.conn_id();
        let (remote_addr, remote_port) = match &tracker.conn().remote {
            Some(RemoteEndpoint::Inet { ip, port }) => (ip.to_string(), *port),
            Some(RemoteEndpoint::Unix { path }) => (path.clone(), 0),
            None => (String::new(), 0),
        };

        let Some((req_stream, resp_stream)) = tracker.req_resp_data() else {
            return;
        };
        let requests = req_stream.extract_messages::<HttpMessage>(MessageKind::Request);
        let responses = resp_stream.extract_messages::<HttpMessage>(MessageKind::Response);

        // Emission is response-driven: each response pairs with the oldest
        // unconsumed request, or stands alone when the request side was not
        // captured. Requests without responses stay queued.
        while let Some(response) = responses.pop_front() {
            let request = requests.pop_front();
            if !config.response_header_filter.matches(&response) {
                continue;
            }
            sink.append(Self::build_record(
                conn_id,
                &remote_addr,
                remote_port,
                request,
                response,
            ));
        }
    }

    /// HTTP/2 tracing stops at framing: frames are extracted to keep the
    /// stream buffers bounded, then discarded.
    fn process_http2(tracker: &mut ConnectionTracker) {
        let conn_id = tracker.conn_id();
        let Some((req_stream, resp_stream)) = tracker.req_resp_data() else {
            return;
        };
        let requests = req_stream.extract_messages::<Http2Frame>(MessageKind::Request);
        let num_req_frames = requests.len();
        requests.clear();
        let responses = resp_stream.extract_messages::<Http2Frame>(MessageKind::Response);
        let num_resp_frames = responses.len();
        responses.clear();

        if num_req_frames + num_resp_frames > 0 {
            debug!(
                "Discarding {} send and {} recv HTTP/2 frames [pid={}, fd={}]",
                num_req_frames, num_resp_frames, conn_id.pid, conn_id.fd
            );
        }
    }

    fn build_record(
        conn_id: ConnId,
        remote_addr: &str,
        remote_port: u16,
        request: Option<HttpMessage>,
        response: HttpMessage,
    ) -> HttpRecord {
        let latency_ns = request
            .as_ref()
            .map(|req| response.timestamp_ns.saturating_sub(req.timestamp_ns))
            .unwrap_or(0);
        let (req_method, req_path, req_headers) = match request {
            Some(req) => {
                let req_headers = req.headers_string();
                (req.req_method, req.req_path, req_headers)
            }
            None => (String::new(), String::new(), String::new()),
        };

        HttpRecord {
            time_ns: response.timestamp_ns,
            pid: conn_id.pid,
            fd: conn_id.fd,
            remote_addr: remote_addr.to_string(),
            remote_port,
            req_method,
            req_path,
            req_headers,
            resp_status: response.resp_status,
            resp_headers: response.headers_string(),
            resp_body: String::from_utf8_lossy(&response.body).to_string(),
            latency_ns,
        }
    }
}
