//! Integration tests for sockscope-types userspace helpers (requires `user` feature).
#![cfg(feature = "user")]

use sockscope_types::*;

// ---- sockaddr parsing ----

#[test]
fn parse_ipv4_loopback() {
    let mut raw = RawSockAddr::new();
    raw.family = 2;
    raw.port = 8080;
    raw.addr = IpAddress {
        ipv4: u32::to_be(0x7f000001),
    };
    let addr = SockAddr::from_raw(&raw);
    assert_eq!(
        parse_sock_addr(&addr),
        Some(RemoteEndpoint::Inet {
            ip: "127.0.0.1".parse().unwrap(),
            port: 8080,
        })
    );
}

#[test]
fn parse_ipv6_localhost() {
    let mut raw = RawSockAddr::new();
    raw.family = 10;
    raw.port = 443;
    let mut bytes = [0u8; 16];
    bytes[15] = 1;
    raw.addr = IpAddress { ipv6: bytes };
    let addr = SockAddr::from_raw(&raw);
    match parse_sock_addr(&addr) {
        Some(RemoteEndpoint::Inet { ip, port }) => {
            assert_eq!(ip.to_string(), "::1");
            assert_eq!(port, 443);
        }
        other => panic!("expected inet endpoint, got {:?}", other),
    }
}

#[test]
fn parse_unix_path() {
    let mut raw = RawSockAddr::new();
    raw.family = 1;
    let path = b"/run/app.sock\0";
    raw.unix_path[..path.len()].copy_from_slice(path);
    let addr = SockAddr::from_raw(&raw);
    assert_eq!(
        parse_sock_addr(&addr),
        Some(RemoteEndpoint::Unix {
            path: "/run/app.sock".to_string(),
        })
    );
}

#[test]
fn parse_unknown_family_is_none() {
    let addr = SockAddr::from_raw(&RawSockAddr::new()); // family = 0
    assert_eq!(parse_sock_addr(&addr), None);
}

#[test]
fn remote_endpoint_display() {
    let ep = RemoteEndpoint::Inet {
        ip: "192.168.1.1".parse().unwrap(),
        port: 80,
    };
    assert_eq!(ep.to_string(), "192.168.1.1:80");
    let ep = RemoteEndpoint::Unix {
        path: "/tmp/x".to_string(),
    };
    assert_eq!(ep.to_string(), "unix:/tmp/x");
}

// ---- raw -> owned conversion ----

#[test]
fn data_event_payload_truncated_to_msg_size() {
    let mut raw = RawSocketDataEvent::new();
    raw.attr.event_type = 2; // Send
    raw.attr.msg_size = 5;
    raw.msg[..8].copy_from_slice(b"hello!!!");
    assert_eq!(raw.msg_bytes(), b"hello");

    let owned = SocketDataEvent::from_raw(&raw).unwrap();
    assert_eq!(owned.msg, b"hello");
    assert_eq!(owned.kind, DataEventKind::Send);
}

#[test]
fn data_event_oversized_msg_size_clamped() {
    let mut raw = RawSocketDataEvent::new();
    raw.attr.event_type = 3; // Read
    raw.attr.msg_size = u32::MAX;
    assert_eq!(raw.msg_bytes().len(), MSG_MAX_LEN);
    let owned = SocketDataEvent::from_raw(&raw).unwrap();
    assert_eq!(owned.msg.len(), MSG_MAX_LEN);
}

#[test]
fn data_event_unknown_type_rejected() {
    let mut raw = RawSocketDataEvent::new();
    raw.attr.event_type = 99;
    assert!(SocketDataEvent::from_raw(&raw).is_none());
}

#[test]
fn conn_info_conversion_carries_identity() {
    let mut raw = RawConnInfo::new();
    raw.conn_id.pid = 12345;
    raw.conn_id.fd = 3;
    raw.conn_id.generation = 2;
    raw.conn_id.pid_start_time_ns = 777;
    raw.timestamp_ns = 50;
    raw.traffic_class.protocol = 1;
    raw.traffic_class.role = 1;
    raw.wr_seq_num = 4;
    raw.rd_seq_num = 5;

    let info = ConnInfo::from_raw(&raw);
    assert_eq!(
        info.conn_id,
        ConnId {
            pid: 12345,
            pid_start_time_ns: 777,
            fd: 3,
            generation: 2,
        }
    );
    assert_eq!(info.traffic_class.protocol, Protocol::Http1);
    assert_eq!(info.traffic_class.role, EndpointRole::Requestor);
    assert_eq!((info.wr_seq_num, info.rd_seq_num), (4, 5));
}

#[test]
fn unrecognized_traffic_class_decays_to_unknown() {
    let raw = RawTrafficClass {
        protocol: 42,
        role: 42,
    };
    let tc = raw.to_owned_class();
    assert_eq!(tc.protocol, Protocol::Unknown);
    assert_eq!(tc.role, EndpointRole::Unknown);
}

// ---- serde round-trips (replay format) ----

#[test]
fn socket_event_json_round_trip() {
    let event = SocketEvent::Data(SocketDataEvent {
        conn_id: ConnId {
            pid: 1,
            pid_start_time_ns: 2,
            fd: 3,
            generation: 4,
        },
        traffic_class: TrafficClass {
            protocol: Protocol::Http1,
            role: EndpointRole::Requestor,
        },
        kind: DataEventKind::Recv,
        timestamp_ns: 100,
        seq_num: 0,
        msg: b"HTTP/1.1 200 OK\r\n".to_vec(),
    });
    let json = serde_json::to_string(&event).unwrap();
    let back: SocketEvent = serde_json::from_str(&json).unwrap();
    match back {
        SocketEvent::Data(d) => {
            assert_eq!(d.seq_num, 0);
            assert_eq!(d.kind, DataEventKind::Recv);
            assert_eq!(d.msg, b"HTTP/1.1 200 OK\r\n");
        }
        other => panic!("expected data event, got {:?}", other),
    }
}
