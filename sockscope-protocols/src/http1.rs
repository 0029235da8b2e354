//! HTTP/1.x message parsing.
//!
//! Parses whole request/response messages off a reassembled stream: start
//! line, headers, and body (Content-Length or chunked transfer coding).
//! Partial input is reported as such so the caller can retry once more
//! fragments arrive; input that cannot be the head of a valid message is
//! reported as invalid and left in place.

use crate::{MessageKind, ParseOutcome, StreamMessage};
use nom::{
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, space1},
    combinator::opt,
    sequence::tuple,
    IResult,
};

/// One parsed HTTP/1.x message. Request fields are empty on responses and
/// vice versa.
#[derive(Clone, Debug, PartialEq)]
pub struct HttpMessage {
    pub kind: MessageKind,
    /// Minor version of `HTTP/1.x`.
    pub minor_version: u8,
    /// Headers in wire order; names lowercased, values verbatim.
    pub headers: Vec<(String, String)>,
    pub req_method: String,
    pub req_path: String,
    pub resp_status: u16,
    pub resp_reason: String,
    pub body: Vec<u8>,
    /// Capture timestamp of the fragment holding the message's first byte.
    pub timestamp_ns: u64,
}

impl HttpMessage {
    /// First header matching `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Headers flattened to `name: value` lines for columnar emission.
    pub fn headers_string(&self) -> String {
        let lines: Vec<String> = self
            .headers
            .iter()
            .map(|(n, v)| format!("{}: {}", n, v))
            .collect();
        lines.join("\n")
    }
}

impl StreamMessage for HttpMessage {
    fn parse_one(kind: MessageKind, buf: &[u8]) -> ParseOutcome<Self> {
        match kind {
            MessageKind::Request => parse_one_request(buf),
            MessageKind::Response => parse_one_response(buf),
        }
    }

    fn set_timestamp_ns(&mut self, timestamp_ns: u64) {
        self.timestamp_ns = timestamp_ns;
    }
}

const METHODS: &[&[u8]] = &[
    b"GET ",
    b"POST ",
    b"PUT ",
    b"DELETE ",
    b"PATCH ",
    b"HEAD ",
    b"OPTIONS ",
    b"CONNECT ",
];

const VERSIONS: &[&[u8]] = &[b"HTTP/1.1 ", b"HTTP/1.0 "];

/// True if `data` is (a prefix of) a plausible request start.
pub fn starts_like_request(data: &[u8]) -> bool {
    METHODS.iter().any(|m| {
        if data.len() >= m.len() {
            data.starts_with(m)
        } else {
            m.starts_with(data)
        }
    })
}

/// True if `data` is (a prefix of) a plausible status line start.
pub fn starts_like_response(data: &[u8]) -> bool {
    VERSIONS.iter().any(|v| {
        if data.len() >= v.len() {
            data.starts_with(v)
        } else {
            v.starts_with(data)
        }
    })
}

fn is_token_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&c)
}

fn parse_method(input: &[u8]) -> IResult<&[u8], &[u8]> {
    take_while1(|c: u8| c.is_ascii_uppercase())(input)
}

#[allow(clippy::type_complexity)]
fn parse_request_line(input: &[u8]) -> IResult<&[u8], (&[u8], &[u8], &[u8])> {
    let (input, method) = parse_method(input)?;
    let (input, _) = space1(input)?;
    let (input, path) = take_while1(|c: u8| c != b' ' && c != b'\r' && c != b'\n')(input)?;
    let (input, _) = space1(input)?;
    let (input, version) = take_while1(|c: u8| c != b'\r' && c != b'\n')(input)?;
    let (input, _) = tag(b"\r\n")(input)?;
    Ok((input, (method, path, version)))
}

#[allow(clippy::type_complexity)]
fn parse_status_line(input: &[u8]) -> IResult<&[u8], (&[u8], u16, &[u8])> {
    let (input, version) = take_while1(|c: u8| c != b' ' && c != b'\r')(input)?;
    let (input, _) = space1(input)?;
    let (input, code_bytes) = take_while1(|c: u8| c.is_ascii_digit())(input)?;
    let code: u16 = std::str::from_utf8(code_bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    let (input, _) = opt(space1)(input)?;
    // Reason phrase may be empty and runs to CRLF.
    let (input, reason) = take_while(|c: u8| c != b'\r' && c != b'\n')(input)?;
    let (input, _) = tag(b"\r\n")(input)?;
    Ok((input, (version, code, reason)))
}

fn parse_header(input: &[u8]) -> IResult<&[u8], (&[u8], &[u8])> {
    let (input, name) = take_while1(is_token_char)(input)?;
    let (input, _) = tuple((char(':'), opt(space1)))(input)?;
    let (input, value) = take_while(|c: u8| c != b'\r' && c != b'\n')(input)?;
    let (input, _) = tag(b"\r\n")(input)?;
    Ok((input, (name, value)))
}

/// Parse the header block (everything after the start line up to and
/// including the empty-line terminator). Returns None if any line is
/// malformed or the block does not end exactly at the terminator.
fn parse_headers(mut input: &[u8]) -> Option<Vec<(String, String)>> {
    let mut headers = Vec::new();
    loop {
        if input.starts_with(b"\r\n") {
            return if input.len() == 2 { Some(headers) } else { None };
        }
        match parse_header(input) {
            Ok((rest, (name, value))) => {
                headers.push((
                    String::from_utf8_lossy(name).to_lowercase(),
                    String::from_utf8_lossy(value).to_string(),
                ));
                input = rest;
            }
            Err(_) => return None,
        }
    }
}

fn minor_version_of(version: &[u8]) -> Option<u8> {
    if version == b"HTTP/1.0".as_slice() {
        Some(0)
    } else if version == b"HTTP/1.1".as_slice() {
        Some(1)
    } else {
        None
    }
}

enum BodyFraming {
    Complete { body: Vec<u8>, len: usize },
    NeedsMoreData,
    Malformed,
}

/// Determine the body of a message given its headers and the bytes that
/// follow the header block. `response_status` is None for requests.
///
/// Responses with a body-bearing status but no framing headers are treated
/// as having an empty body: blocking on read-until-close semantics would
/// stall the stream until an inactivity flush.
fn body_from_headers(
    headers: &[(String, String)],
    body_data: &[u8],
    response_status: Option<u16>,
) -> BodyFraming {
    let find = |name: &str| {
        headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    };

    if let Some(value) = find("content-length") {
        let Ok(content_length) = value.trim().parse::<usize>() else {
            return BodyFraming::Malformed;
        };
        if body_data.len() >= content_length {
            return BodyFraming::Complete {
                body: body_data[..content_length].to_vec(),
                len: content_length,
            };
        }
        return BodyFraming::NeedsMoreData;
    }

    if let Some(value) = find("transfer-encoding") {
        if value.to_ascii_lowercase().contains("chunked") {
            return match decode_chunked(body_data) {
                ChunkedOutcome::Complete { body, consumed } => BodyFraming::Complete {
                    body,
                    len: consumed,
                },
                ChunkedOutcome::NeedsMoreData => BodyFraming::NeedsMoreData,
                ChunkedOutcome::Malformed => BodyFraming::Malformed,
            };
        }
    }

    match response_status {
        // Requests have no body without explicit framing.
        None => BodyFraming::Complete {
            body: Vec::new(),
            len: 0,
        },
        // 1xx, 204 and 304 have no body by definition.
        Some(code) if (100..200).contains(&code) || code == 204 || code == 304 => {
            BodyFraming::Complete {
                body: Vec::new(),
                len: 0,
            }
        }
        Some(_) => BodyFraming::Complete {
            body: Vec::new(),
            len: 0,
        },
    }
}

enum ChunkedOutcome {
    Complete { body: Vec<u8>, consumed: usize },
    NeedsMoreData,
    Malformed,
}

/// Upper bound on a single chunk. Hex sizes beyond this are corrupt framing,
/// not data we should wait for.
const MAX_CHUNK_LEN: usize = (1 << 24) - 1;

/// Walk chunk boundaries of a chunked transfer-coded body.
///
/// Chunk format: `[hex-size][;ext]\r\n[data]\r\n`, terminated by `0\r\n\r\n`
/// (possibly with trailers between the terminal chunk and the final CRLF).
fn decode_chunked(data: &[u8]) -> ChunkedOutcome {
    let mut decoded = Vec::new();
    let mut pos = 0;

    loop {
        let line_end = match find_crlf(data, pos) {
            Some(idx) => idx,
            None => return ChunkedOutcome::NeedsMoreData,
        };

        let size_bytes = &data[pos..line_end];
        let size_part = match size_bytes.iter().position(|&b| b == b';') {
            Some(semi) => &size_bytes[..semi],
            None => size_bytes,
        };
        let Ok(size_str) = std::str::from_utf8(size_part) else {
            return ChunkedOutcome::Malformed;
        };
        let Ok(chunk_size) = usize::from_str_radix(size_str.trim(), 16) else {
            return ChunkedOutcome::Malformed;
        };
        if chunk_size > MAX_CHUNK_LEN {
            return ChunkedOutcome::Malformed;
        }

        pos = line_end + 2;

        if chunk_size == 0 {
            if data.len() < pos + 2 {
                return ChunkedOutcome::NeedsMoreData;
            }
            if data[pos..pos + 2] == *b"\r\n" {
                return ChunkedOutcome::Complete {
                    body: decoded,
                    consumed: pos + 2,
                };
            }
            // Trailers: scan for the final empty line.
            return match find_crlf_crlf(data, pos) {
                Some(idx) => ChunkedOutcome::Complete {
                    body: decoded,
                    consumed: idx + 4,
                },
                None => ChunkedOutcome::NeedsMoreData,
            };
        }

        let Some(chunk_end) = pos.checked_add(chunk_size) else {
            return ChunkedOutcome::Malformed;
        };
        let Some(crlf_end) = chunk_end.checked_add(2) else {
            return ChunkedOutcome::Malformed;
        };
        if data.len() < crlf_end {
            return ChunkedOutcome::NeedsMoreData;
        }
        decoded.extend_from_slice(&data[pos..chunk_end]);
        if data[chunk_end..crlf_end] != *b"\r\n" {
            return ChunkedOutcome::Malformed;
        }
        pos = crlf_end;
    }
}

fn find_crlf(data: &[u8], from: usize) -> Option<usize> {
    if from >= data.len() {
        return None;
    }
    data[from..]
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|p| from + p)
}

fn find_crlf_crlf(data: &[u8], from: usize) -> Option<usize> {
    if from >= data.len() {
        return None;
    }
    data[from..]
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| from + p)
}

fn parse_one_request(buf: &[u8]) -> ParseOutcome<HttpMessage> {
    if buf.is_empty() {
        return ParseOutcome::NeedsMoreData;
    }
    if !starts_like_request(buf) {
        return ParseOutcome::Invalid;
    }
    let Some(hdr_end) = find_crlf_crlf(buf, 0) else {
        return ParseOutcome::NeedsMoreData;
    };
    let head_len = hdr_end + 4;

    let (after_line, (method, path, version)) = match parse_request_line(&buf[..head_len]) {
        Ok(parsed) => parsed,
        Err(_) => return ParseOutcome::Invalid,
    };
    let Some(minor_version) = minor_version_of(version) else {
        return ParseOutcome::Invalid;
    };
    let Some(headers) = parse_headers(after_line) else {
        return ParseOutcome::Invalid;
    };

    match body_from_headers(&headers, &buf[head_len..], None) {
        BodyFraming::Complete { body, len } => {
            let consumed = head_len + len;
            ParseOutcome::Complete {
                message: HttpMessage {
                    kind: MessageKind::Request,
                    minor_version,
                    headers,
                    req_method: String::from_utf8_lossy(method).to_string(),
                    req_path: String::from_utf8_lossy(path).to_string(),
                    resp_status: 0,
                    resp_reason: String::new(),
                    body,
                    timestamp_ns: 0,
                },
                consumed,
            }
        }
        BodyFraming::NeedsMoreData => ParseOutcome::NeedsMoreData,
        BodyFraming::Malformed => ParseOutcome::Invalid,
    }
}

fn parse_one_response(buf: &[u8]) -> ParseOutcome<HttpMessage> {
    if buf.is_empty() {
        return ParseOutcome::NeedsMoreData;
    }
    if !starts_like_response(buf) {
        return ParseOutcome::Invalid;
    }
    let Some(hdr_end) = find_crlf_crlf(buf, 0) else {
        return ParseOutcome::NeedsMoreData;
    };
    let head_len = hdr_end + 4;

    let (after_line, (version, status, reason)) = match parse_status_line(&buf[..head_len]) {
        Ok(parsed) => parsed,
        Err(_) => return ParseOutcome::Invalid,
    };
    let Some(minor_version) = minor_version_of(version) else {
        return ParseOutcome::Invalid;
    };
    let Some(headers) = parse_headers(after_line) else {
        return ParseOutcome::Invalid;
    };

    match body_from_headers(&headers, &buf[head_len..], Some(status)) {
        BodyFraming::Complete { body, len } => {
            let consumed = head_len + len;
            ParseOutcome::Complete {
                message: HttpMessage {
                    kind: MessageKind::Response,
                    minor_version,
                    headers,
                    req_method: String::new(),
                    req_path: String::new(),
                    resp_status: status,
                    resp_reason: String::from_utf8_lossy(reason).to_string(),
                    body,
                    timestamp_ns: 0,
                },
                consumed,
            }
        }
        BodyFraming::NeedsMoreData => ParseOutcome::NeedsMoreData,
        BodyFraming::Malformed => ParseOutcome::Invalid,
    }
}
