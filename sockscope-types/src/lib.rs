#![cfg_attr(not(feature = "user"), no_std)]

//! Shared event types for the sockscope socket tracer.
//!
//! The `#[repr(C)]` raw structs in this crate are the ABI between the eBPF
//! probe (which lives in a separate repo) and the userspace core. The probe
//! emits three kinds of records over the perf ring: connection open,
//! connection close, and data fragments captured from send/recv syscalls.
//!
//! With the `user` feature enabled, this crate additionally provides owned
//! userspace mirrors of the raw structs (heap-allocated payloads, parsed
//! enums, serde derives) plus `aya::Pod` impls for reading raw records out
//! of kernel maps.

/// Maximum payload bytes captured per send/recv fragment.
pub const MSG_MAX_LEN: usize = 4096;

/// Maximum unix socket path bytes captured on connection open.
pub const UNIX_PATH_MAX_LEN: usize = 64;

/// Application protocol inferred by the probe for a connection.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "user", derive(serde::Serialize, serde::Deserialize))]
pub enum Protocol {
    Unknown = 0,
    Http1 = 1,
    Http2 = 2,
}

/// Which side of the request/response exchange the traced process is.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "user", derive(serde::Serialize, serde::Deserialize))]
pub enum EndpointRole {
    Unknown = 0,
    Requestor = 1,
    Responder = 2,
}

/// Syscall family a data fragment was captured from. Write/Send share the
/// send-side sequence counter; Read/Recv share the recv-side counter.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "user", derive(serde::Serialize, serde::Deserialize))]
pub enum DataEventKind {
    Write = 1,
    Send = 2,
    Read = 3,
    Recv = 4,
}

/// Capture-selection bits: which (direction, message-role) combinations the
/// core should trace for a protocol.
pub const CAPTURE_SEND_REQ: u32 = 1 << 0;
pub const CAPTURE_RECV_RESP: u32 = 1 << 1;
pub const CAPTURE_SEND_RESP: u32 = 1 << 2;
pub const CAPTURE_RECV_REQ: u32 = 1 << 3;

/// IP address (supports both IPv4 and IPv6).
#[repr(C)]
#[derive(Clone, Copy)]
pub union IpAddress {
    pub ipv4: u32,
    pub ipv6: [u8; 16],
}

impl IpAddress {
    pub const fn zero() -> Self {
        IpAddress { ipv4: 0 }
    }
}

/// Connection identity as assigned by the probe.
///
/// `generation` increments every time a new socket reuses a `(pid, fd)`
/// pair; `pid_start_time_ns` guards against pid reuse across process
/// restarts. Two events belong to the same connection iff all four fields
/// are equal.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawConnId {
    /// Process start time (ns since boot) of `pid`.
    pub pid_start_time_ns: u64,
    /// Process ID owning the socket.
    pub pid: u32,
    /// File descriptor of the socket within `pid`.
    pub fd: i32,
    /// Monotonic per-(pid, fd) socket generation.
    pub generation: u32,
    pub _pad: u32,
}

impl RawConnId {
    pub const fn new() -> Self {
        RawConnId {
            pid_start_time_ns: 0,
            pid: 0,
            fd: 0,
            generation: 0,
            _pad: 0,
        }
    }
}

/// Protocol/role classification as inferred by the probe.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawTrafficClass {
    /// One of the `Protocol` discriminants.
    pub protocol: u32,
    /// One of the `EndpointRole` discriminants.
    pub role: u32,
}

impl RawTrafficClass {
    pub const fn new() -> Self {
        RawTrafficClass {
            protocol: 0,
            role: 0,
        }
    }
}

/// Remote socket address captured at connect/accept time.
///
/// `family` follows the AF_* constants: 1 = unix, 2 = inet, 10 = inet6.
/// For inet families `addr`/`port` are populated (network byte order for
/// `addr`); for unix sockets `unix_path` holds a NUL-terminated path.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawSockAddr {
    pub family: u16,
    pub port: u16,
    pub addr: IpAddress,
    pub unix_path: [u8; UNIX_PATH_MAX_LEN],
}

impl RawSockAddr {
    pub const fn new() -> Self {
        RawSockAddr {
            family: 0,
            port: 0,
            addr: IpAddress::zero(),
            unix_path: [0; UNIX_PATH_MAX_LEN],
        }
    }
}

/// Connection open/close record.
///
/// For close records, `wr_seq_num` / `rd_seq_num` carry the total number of
/// write/read fragments the probe emitted for the connection; the core uses
/// them as completion witnesses.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawConnInfo {
    pub conn_id: RawConnId,
    /// Probe monotonic timestamp of the open/close.
    pub timestamp_ns: u64,
    pub traffic_class: RawTrafficClass,
    pub addr: RawSockAddr,
    pub _pad: u32,
    /// Total write-side fragments emitted (close records only).
    pub wr_seq_num: u64,
    /// Total read-side fragments emitted (close records only).
    pub rd_seq_num: u64,
}

impl RawConnInfo {
    pub const fn new() -> Self {
        RawConnInfo {
            conn_id: RawConnId::new(),
            timestamp_ns: 0,
            traffic_class: RawTrafficClass::new(),
            addr: RawSockAddr::new(),
            _pad: 0,
            wr_seq_num: 0,
            rd_seq_num: 0,
        }
    }
}

/// Fixed-size attributes of a captured data fragment.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawSocketDataEventAttr {
    pub conn_id: RawConnId,
    pub traffic_class: RawTrafficClass,
    /// One of the `DataEventKind` discriminants.
    pub event_type: u32,
    /// Valid bytes in `msg` (may be less than `MSG_MAX_LEN`).
    pub msg_size: u32,
    /// Probe monotonic timestamp of the syscall.
    pub timestamp_ns: u64,
    /// Direction-local, zero-based fragment sequence number.
    pub seq_num: u64,
}

impl RawSocketDataEventAttr {
    pub const fn new() -> Self {
        RawSocketDataEventAttr {
            conn_id: RawConnId::new(),
            traffic_class: RawTrafficClass::new(),
            event_type: 0,
            msg_size: 0,
            timestamp_ns: 0,
            seq_num: 0,
        }
    }
}

/// A captured send/recv fragment.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawSocketDataEvent {
    pub attr: RawSocketDataEventAttr,
    pub msg: [u8; MSG_MAX_LEN],
}

impl RawSocketDataEvent {
    pub const fn new() -> Self {
        RawSocketDataEvent {
            attr: RawSocketDataEventAttr::new(),
            msg: [0; MSG_MAX_LEN],
        }
    }
}

#[cfg(feature = "user")]
mod pod_impls {
    use super::*;
    // SAFETY: All types are #[repr(C)], Copy, and contain only primitive/array fields.
    unsafe impl aya::Pod for RawConnId {}
    unsafe impl aya::Pod for RawConnInfo {}
    unsafe impl aya::Pod for RawSocketDataEvent {}
}

#[cfg(feature = "user")]
mod userspace;

#[cfg(feature = "user")]
pub use userspace::*;
