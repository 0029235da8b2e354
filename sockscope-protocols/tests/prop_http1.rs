use proptest::prelude::*;
use sockscope_protocols::http1::HttpMessage;
use sockscope_protocols::{BufferPosition, EventParser, MessageKind, StreamMessage};
use std::collections::VecDeque;

// ---------------------------------------------------------------------------
// Property: parse_one never panics on arbitrary bytes
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn parse_request_never_panics(
        data in proptest::collection::vec(any::<u8>(), 0..2048),
    ) {
        let _ = HttpMessage::parse_one(MessageKind::Request, &data);
    }

    #[test]
    fn parse_response_never_panics(
        data in proptest::collection::vec(any::<u8>(), 0..2048),
    ) {
        let _ = HttpMessage::parse_one(MessageKind::Response, &data);
    }
}

// ---------------------------------------------------------------------------
// Strategy for generating valid HTTP messages
// ---------------------------------------------------------------------------

fn http_method_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("GET".to_string()),
        Just("POST".to_string()),
        Just("PUT".to_string()),
        Just("DELETE".to_string()),
        Just("PATCH".to_string()),
        Just("HEAD".to_string()),
        Just("OPTIONS".to_string()),
    ]
}

fn http_path_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("/".to_string()),
        Just("/index.html".to_string()),
        Just("/api/v2/items".to_string()),
        "/[a-z/]{1,50}".prop_map(|s| format!("/{s}")),
    ]
}

fn http_header_strategy() -> impl Strategy<Value = (String, String)> {
    prop_oneof![
        Just(("Host".to_string(), "example.com".to_string())),
        Just(("Content-Type".to_string(), "application/json".to_string())),
        Just(("User-Agent".to_string(), "test-agent/1.0".to_string())),
        Just(("Accept".to_string(), "*/*".to_string())),
    ]
}

fn build_request(method: &str, path: &str, headers: &[(String, String)], body: &str) -> Vec<u8> {
    let mut raw = format!("{method} {path} HTTP/1.1\r\n");
    for (k, v) in headers {
        raw.push_str(&format!("{k}: {v}\r\n"));
    }
    raw.push_str(&format!("Content-Length: {}\r\n\r\n{body}", body.len()));
    raw.into_bytes()
}

fn build_response(status: u16, reason: &str, body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
    .into_bytes()
}

// ---------------------------------------------------------------------------
// Property: generated valid messages parse correctly (round-trip)
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn valid_request_round_trip(
        method in http_method_strategy(),
        path in http_path_strategy(),
        headers in proptest::collection::vec(http_header_strategy(), 0..5),
        body in "[a-zA-Z0-9 ]{0,100}",
    ) {
        let raw = build_request(&method, &path, &headers, &body);
        let mut parser = EventParser::new();
        parser.append(&raw, 42);
        let mut out: VecDeque<HttpMessage> = VecDeque::new();
        let result = parser.parse_messages(MessageKind::Request, &mut out);

        prop_assert_eq!(out.len(), 1);
        let msg = &out[0];
        prop_assert_eq!(&msg.req_method, &method);
        prop_assert_eq!(&msg.req_path, &path);
        prop_assert_eq!(&msg.body, body.as_bytes());
        prop_assert_eq!(msg.timestamp_ns, 42);
        prop_assert_eq!(result.end_position, BufferPosition { seq: 1, offset: 0 });
    }

    #[test]
    fn valid_response_round_trip(
        status in prop_oneof![Just(200u16), Just(201u16), Just(400u16), Just(404u16), Just(500u16)],
        reason in prop_oneof![
            Just("OK".to_string()),
            Just("Not Found".to_string()),
            Just("Internal Server Error".to_string()),
        ],
        body in "[a-zA-Z0-9 ]{0,100}",
    ) {
        let raw = build_response(status, &reason, &body);
        let mut parser = EventParser::new();
        parser.append(&raw, 7);
        let mut out: VecDeque<HttpMessage> = VecDeque::new();
        parser.parse_messages(MessageKind::Response, &mut out);

        prop_assert_eq!(out.len(), 1);
        prop_assert_eq!(out[0].resp_status, status);
        prop_assert_eq!(&out[0].resp_reason, &reason);
        prop_assert_eq!(&out[0].body, body.as_bytes());
    }
}

// ---------------------------------------------------------------------------
// Property: chunked transfer coding round-trips and never panics
// ---------------------------------------------------------------------------

fn build_chunked_response(chunks: &[String]) -> Vec<u8> {
    let mut raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec();
    for chunk in chunks {
        raw.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
        raw.extend_from_slice(chunk.as_bytes());
        raw.extend_from_slice(b"\r\n");
    }
    raw.extend_from_slice(b"0\r\n\r\n");
    raw
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn chunked_response_round_trip(
        chunks in proptest::collection::vec("[a-zA-Z0-9]{1,32}", 1..5),
    ) {
        let raw = build_chunked_response(&chunks);
        let mut parser = EventParser::new();
        parser.append(&raw, 3);
        let mut out: VecDeque<HttpMessage> = VecDeque::new();
        parser.parse_messages(MessageKind::Response, &mut out);

        prop_assert_eq!(out.len(), 1);
        let expected = chunks.concat();
        prop_assert_eq!(&out[0].body, expected.as_bytes());
    }

    #[test]
    fn chunked_tail_never_panics(
        tail in proptest::collection::vec(any::<u8>(), 0..256),
    ) {
        // Arbitrary bytes where the chunk-size line belongs, including
        // well-formed hex that would overflow position arithmetic.
        let mut raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec();
        raw.extend_from_slice(&tail);
        let _ = HttpMessage::parse_one(MessageKind::Response, &raw);
    }

    #[test]
    fn chunked_truncation_never_panics(
        truncate_at in 0usize..96,
    ) {
        let raw = build_chunked_response(&["hello".to_string(), "world".to_string()]);
        let truncated = &raw[..truncate_at.min(raw.len())];
        let _ = HttpMessage::parse_one(MessageKind::Response, truncated);
    }
}

// ---------------------------------------------------------------------------
// Property: splitting a message across fragments never changes the result
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn fragmentation_is_transparent(
        split_at in 1usize..120,
        body in "[a-zA-Z0-9]{1,40}",
    ) {
        let raw = build_response(200, "OK", &body);
        let split_at = split_at.min(raw.len() - 1);
        let (head, tail) = raw.split_at(split_at);

        let mut whole_parser = EventParser::new();
        whole_parser.append(&raw, 1);
        let mut whole: VecDeque<HttpMessage> = VecDeque::new();
        whole_parser.parse_messages(MessageKind::Response, &mut whole);

        let mut split_parser = EventParser::new();
        split_parser.append(head, 1);
        split_parser.append(tail, 2);
        let mut split: VecDeque<HttpMessage> = VecDeque::new();
        split_parser.parse_messages(MessageKind::Response, &mut split);

        prop_assert_eq!(whole.len(), 1);
        prop_assert_eq!(split.len(), 1);
        prop_assert_eq!(&whole[0].body, &split[0].body);
        prop_assert_eq!(whole[0].resp_status, split[0].resp_status);
        prop_assert_eq!(&whole[0].headers, &split[0].headers);
    }

    #[test]
    fn truncation_never_yields_a_message_with_wrong_body(
        truncate_at in 0usize..200,
        body in "[a-zA-Z0-9]{1,40}",
    ) {
        let raw = build_response(200, "OK", &body);
        let truncated = &raw[..truncate_at.min(raw.len())];

        let mut parser = EventParser::new();
        parser.append(truncated, 1);
        let mut out: VecDeque<HttpMessage> = VecDeque::new();
        parser.parse_messages(MessageKind::Response, &mut out);

        // Either the whole message parsed, or nothing did.
        if truncated.len() == raw.len() {
            prop_assert_eq!(out.len(), 1);
        } else if let Some(msg) = out.front() {
            prop_assert_eq!(&msg.body, body.as_bytes());
        }
    }
}
