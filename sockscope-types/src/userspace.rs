//! Owned userspace mirrors of the raw probe records.
//!
//! Raw records point into ring-buffer memory that the kernel will overwrite;
//! the userspace core therefore works on owned copies with heap-allocated
//! payloads and parsed enums.

use crate::{
    DataEventKind, EndpointRole, Protocol, RawConnInfo, RawSockAddr, RawSocketDataEvent,
    MSG_MAX_LEN,
};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

impl Protocol {
    pub fn from_raw(v: u32) -> Option<Protocol> {
        match v {
            0 => Some(Protocol::Unknown),
            1 => Some(Protocol::Http1),
            2 => Some(Protocol::Http2),
            _ => None,
        }
    }
}

impl EndpointRole {
    pub fn from_raw(v: u32) -> Option<EndpointRole> {
        match v {
            0 => Some(EndpointRole::Unknown),
            1 => Some(EndpointRole::Requestor),
            2 => Some(EndpointRole::Responder),
            _ => None,
        }
    }
}

impl DataEventKind {
    pub fn from_raw(v: u32) -> Option<DataEventKind> {
        match v {
            1 => Some(DataEventKind::Write),
            2 => Some(DataEventKind::Send),
            3 => Some(DataEventKind::Read),
            4 => Some(DataEventKind::Recv),
            _ => None,
        }
    }

    /// True for Write/Send (fragments of the traced process's output).
    pub fn is_send(self) -> bool {
        matches!(self, DataEventKind::Write | DataEventKind::Send)
    }
}

/// Owned connection identity. See [`crate::RawConnId`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnId {
    pub pid: u32,
    pub pid_start_time_ns: u64,
    pub fd: i32,
    pub generation: u32,
}

impl crate::RawConnId {
    pub fn to_owned_id(&self) -> ConnId {
        ConnId {
            pid: self.pid,
            pid_start_time_ns: self.pid_start_time_ns,
            fd: self.fd,
            generation: self.generation,
        }
    }
}

/// Parsed protocol/role classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficClass {
    pub protocol: Protocol,
    pub role: EndpointRole,
}

impl Default for TrafficClass {
    fn default() -> Self {
        TrafficClass {
            protocol: Protocol::Unknown,
            role: EndpointRole::Unknown,
        }
    }
}

impl crate::RawTrafficClass {
    /// Unrecognized discriminants decay to Unknown rather than dropping the event.
    pub fn to_owned_class(&self) -> TrafficClass {
        TrafficClass {
            protocol: Protocol::from_raw(self.protocol).unwrap_or(Protocol::Unknown),
            role: EndpointRole::from_raw(self.role).unwrap_or(EndpointRole::Unknown),
        }
    }
}

/// Owned copy of a captured remote socket address, still unparsed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SockAddr {
    pub family: u16,
    pub port: u16,
    /// Network-order address bytes; IPv4 occupies the first four.
    pub addr: [u8; 16],
    pub unix_path: Vec<u8>,
}

impl SockAddr {
    pub fn from_raw(raw: &RawSockAddr) -> SockAddr {
        let addr = unsafe { raw.addr.ipv6 };
        let path_len = raw
            .unix_path
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(raw.unix_path.len());
        SockAddr {
            family: raw.family,
            port: raw.port,
            addr,
            unix_path: raw.unix_path[..path_len].to_vec(),
        }
    }

    /// Convenience constructor for an IPv4 remote endpoint.
    pub fn inet(ip: Ipv4Addr, port: u16) -> SockAddr {
        let mut addr = [0u8; 16];
        addr[..4].copy_from_slice(&ip.octets());
        SockAddr {
            family: 2,
            port,
            addr,
            unix_path: Vec::new(),
        }
    }
}

/// A remote endpoint parsed out of a [`SockAddr`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteEndpoint {
    Inet { ip: IpAddr, port: u16 },
    Unix { path: String },
}

impl std::fmt::Display for RemoteEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteEndpoint::Inet { ip, port } => write!(f, "{}:{}", ip, port),
            RemoteEndpoint::Unix { path } => write!(f, "unix:{}", path),
        }
    }
}

/// Parse a captured address. Returns None for unknown families or malformed
/// unix paths; the caller decides whether that is worth a warning.
pub fn parse_sock_addr(addr: &SockAddr) -> Option<RemoteEndpoint> {
    match addr.family {
        1 => {
            let path = std::str::from_utf8(&addr.unix_path).ok()?;
            Some(RemoteEndpoint::Unix {
                path: path.to_string(),
            })
        }
        2 => {
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&addr.addr[..4]);
            Some(RemoteEndpoint::Inet {
                ip: IpAddr::V4(Ipv4Addr::from(octets)),
                port: addr.port,
            })
        }
        10 => Some(RemoteEndpoint::Inet {
            ip: IpAddr::V6(Ipv6Addr::from(addr.addr)),
            port: addr.port,
        }),
        _ => None,
    }
}

/// Owned connection open/close record.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ConnInfo {
    pub conn_id: ConnId,
    pub timestamp_ns: u64,
    pub traffic_class: TrafficClass,
    pub addr: SockAddr,
    pub wr_seq_num: u64,
    pub rd_seq_num: u64,
}

impl ConnInfo {
    pub fn from_raw(raw: &RawConnInfo) -> ConnInfo {
        ConnInfo {
            conn_id: raw.conn_id.to_owned_id(),
            timestamp_ns: raw.timestamp_ns,
            traffic_class: raw.traffic_class.to_owned_class(),
            addr: SockAddr::from_raw(&raw.addr),
            wr_seq_num: raw.wr_seq_num,
            rd_seq_num: raw.rd_seq_num,
        }
    }
}

/// Owned captured data fragment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SocketDataEvent {
    pub conn_id: ConnId,
    pub traffic_class: TrafficClass,
    pub kind: DataEventKind,
    pub timestamp_ns: u64,
    pub seq_num: u64,
    pub msg: Vec<u8>,
}

impl SocketDataEvent {
    /// Returns None when `event_type` is not a known syscall kind.
    pub fn from_raw(raw: &RawSocketDataEvent) -> Option<SocketDataEvent> {
        Some(SocketDataEvent {
            conn_id: raw.attr.conn_id.to_owned_id(),
            traffic_class: raw.attr.traffic_class.to_owned_class(),
            kind: DataEventKind::from_raw(raw.attr.event_type)?,
            timestamp_ns: raw.attr.timestamp_ns,
            seq_num: raw.attr.seq_num,
            msg: raw.msg_bytes().to_vec(),
        })
    }
}

impl RawSocketDataEvent {
    /// The captured payload bytes (up to `msg_size`).
    pub fn msg_bytes(&self) -> &[u8] {
        let len = (self.attr.msg_size as usize).min(MSG_MAX_LEN);
        &self.msg[..len]
    }
}

/// One record off the probe ring, as consumed by the dispatcher and as
/// serialized by the replay tooling.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SocketEvent {
    Open(ConnInfo),
    Close(ConnInfo),
    Data(SocketDataEvent),
}
