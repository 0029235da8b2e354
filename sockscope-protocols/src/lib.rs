//! Application-protocol parsers for reassembled socket streams.
//!
//! A reassembly buffer hands this crate an ordered run of contiguous
//! fragments (byte views plus capture timestamps). [`EventParser`] walks
//! them as one logical stream, produces whole messages of the requested
//! type, and reports how far it got as a [`BufferPosition`] so the caller
//! can discard consumed fragments and resume mid-fragment next time.
//!
//! Two message types are supported: [`http1::HttpMessage`] (full HTTP/1.x
//! requests/responses, Content-Length and chunked bodies) and
//! [`http2::Http2Frame`] (raw HTTP/2 frames; stream assembly is the
//! caller's business).

pub mod http1;
pub mod http2;

use std::collections::VecDeque;

/// Which wire format to expect when a protocol distinguishes directions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Response,
}

/// Position within a run of fragments: `seq` fragments fully consumed,
/// `offset` bytes consumed of the next one.
///
/// `offset == 0` iff the last consumed fragment was consumed exactly to its
/// boundary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferPosition {
    pub seq: usize,
    pub offset: usize,
}

/// Why a parse pass stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseState {
    /// Ran out of bytes; more fragments may complete the next message.
    NeedsMoreData,
    /// The stream head does not parse as the expected format.
    Invalid,
}

/// Result of a parse pass over the appended fragments.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParseResult {
    pub end_position: BufferPosition,
    pub state: ParseState,
}

/// Outcome of attempting to parse one message from the head of a buffer.
#[derive(Debug)]
pub enum ParseOutcome<M> {
    /// A whole message occupying `consumed` bytes.
    Complete { message: M, consumed: usize },
    /// Bytes consumed without yielding a message (e.g. the HTTP/2 preface).
    Skip { consumed: usize },
    NeedsMoreData,
    Invalid,
}

/// A message type that can be incrementally parsed off a byte stream.
pub trait StreamMessage: Sized {
    fn parse_one(kind: MessageKind, buf: &[u8]) -> ParseOutcome<Self>;

    /// Stamp with the capture timestamp of the fragment holding the
    /// message's first byte.
    fn set_timestamp_ns(&mut self, timestamp_ns: u64);
}

/// Walks a run of contiguous fragments and extracts whole messages.
#[derive(Default)]
pub struct EventParser<'a> {
    fragments: Vec<(&'a [u8], u64)>,
}

impl<'a> EventParser<'a> {
    pub fn new() -> Self {
        EventParser {
            fragments: Vec::new(),
        }
    }

    /// Stage a fragment view with its capture timestamp.
    pub fn append(&mut self, view: &'a [u8], timestamp_ns: u64) {
        self.fragments.push((view, timestamp_ns));
    }

    /// Parse as many whole messages as the staged bytes allow, pushing them
    /// onto `out` in stream order.
    pub fn parse_messages<M: StreamMessage>(
        &self,
        kind: MessageKind,
        out: &mut VecDeque<M>,
    ) -> ParseResult {
        let mut buf = Vec::with_capacity(self.fragments.iter().map(|(v, _)| v.len()).sum());
        for (view, _) in &self.fragments {
            buf.extend_from_slice(view);
        }

        let mut pos = 0;
        let mut state = ParseState::NeedsMoreData;
        while pos < buf.len() {
            match M::parse_one(kind, &buf[pos..]) {
                ParseOutcome::Complete { mut message, consumed } => {
                    debug_assert!(consumed > 0, "complete message must consume bytes");
                    if consumed == 0 {
                        break;
                    }
                    message.set_timestamp_ns(self.timestamp_at(pos));
                    out.push_back(message);
                    pos += consumed;
                }
                ParseOutcome::Skip { consumed } => {
                    debug_assert!(consumed > 0, "skip must consume bytes");
                    if consumed == 0 {
                        break;
                    }
                    pos += consumed;
                }
                ParseOutcome::NeedsMoreData => {
                    state = ParseState::NeedsMoreData;
                    break;
                }
                ParseOutcome::Invalid => {
                    state = ParseState::Invalid;
                    break;
                }
            }
        }

        ParseResult {
            end_position: self.position_of(pos),
            state,
        }
    }

    /// Capture timestamp of the fragment containing byte `pos`.
    fn timestamp_at(&self, pos: usize) -> u64 {
        let mut start = 0;
        for (view, ts) in &self.fragments {
            if pos < start + view.len() {
                return *ts;
            }
            start += view.len();
        }
        self.fragments.last().map(|(_, ts)| *ts).unwrap_or(0)
    }

    /// Translate an absolute byte position into (fragments fully consumed,
    /// offset into the next).
    fn position_of(&self, pos: usize) -> BufferPosition {
        let mut remaining = pos;
        let mut seq = 0;
        for (view, _) in &self.fragments {
            if remaining < view.len() {
                return BufferPosition {
                    seq,
                    offset: remaining,
                };
            }
            remaining -= view.len();
            seq += 1;
        }
        BufferPosition { seq, offset: 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::http1::HttpMessage;
    use super::http2::Http2Frame;
    use super::*;

    const RESP0: &[u8] = b"HTTP/1.1 200 OK\r\n\
        Content-Type: json\r\n\
        Content-Length: 3\r\n\
        \r\n\
        foo";

    const RESP1: &[u8] = b"HTTP/1.1 200 OK\r\n\
        Content-Type: json\r\n\
        Content-Length: 3\r\n\
        \r\n\
        bar";

    #[test]
    fn two_responses_in_one_fragment() {
        let combined: Vec<u8> = [RESP0, RESP1].concat();
        let mut parser = EventParser::new();
        parser.append(&combined, 100);

        let mut out = VecDeque::new();
        let result = parser.parse_messages::<HttpMessage>(MessageKind::Response, &mut out);

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].body, b"foo");
        assert_eq!(out[1].body, b"bar");
        assert_eq!(result.end_position, BufferPosition { seq: 1, offset: 0 });
    }

    #[test]
    fn message_split_across_fragments() {
        let (head, tail) = RESP0.split_at(20);
        let mut parser = EventParser::new();
        parser.append(head, 100);
        parser.append(tail, 200);

        let mut out = VecDeque::new();
        let result = parser.parse_messages::<HttpMessage>(MessageKind::Response, &mut out);

        assert_eq!(out.len(), 1);
        // Timestamp comes from the fragment holding the first byte.
        assert_eq!(out[0].timestamp_ns, 100);
        assert_eq!(result.end_position, BufferPosition { seq: 2, offset: 0 });
    }

    #[test]
    fn incomplete_headers_consume_nothing() {
        let mut parser = EventParser::new();
        parser.append(b"HTTP/1.1 200 OK\r\nContent-Ty", 100);

        let mut out = VecDeque::new();
        let result = parser.parse_messages::<HttpMessage>(MessageKind::Response, &mut out);

        assert!(out.is_empty());
        assert_eq!(result.end_position, BufferPosition { seq: 0, offset: 0 });
        assert_eq!(result.state, ParseState::NeedsMoreData);
    }

    #[test]
    fn message_and_partial_second_reports_mid_fragment_offset() {
        let mut combined = RESP0.to_vec();
        combined.extend_from_slice(&RESP1[..10]);
        let mut parser = EventParser::new();
        parser.append(&combined, 100);

        let mut out = VecDeque::new();
        let result = parser.parse_messages::<HttpMessage>(MessageKind::Response, &mut out);

        assert_eq!(out.len(), 1);
        assert_eq!(
            result.end_position,
            BufferPosition {
                seq: 0,
                offset: RESP0.len(),
            }
        );
    }

    #[test]
    fn garbage_at_head_is_invalid() {
        let mut parser = EventParser::new();
        parser.append(b"\x00\x01\x02 definitely not http", 100);

        let mut out = VecDeque::new();
        let result = parser.parse_messages::<HttpMessage>(MessageKind::Response, &mut out);

        assert!(out.is_empty());
        assert_eq!(result.state, ParseState::Invalid);
        assert_eq!(result.end_position, BufferPosition { seq: 0, offset: 0 });
    }

    #[test]
    fn preface_is_skipped_before_frames() {
        let mut buf = http2::CONNECTION_PREFACE.to_vec();
        // SETTINGS frame, empty payload.
        buf.extend_from_slice(&[0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00]);
        let mut parser = EventParser::new();
        parser.append(&buf, 7);

        let mut out = VecDeque::new();
        let result = parser.parse_messages::<Http2Frame>(MessageKind::Request, &mut out);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].frame_type, http2::FRAME_TYPE_SETTINGS);
        assert_eq!(result.end_position, BufferPosition { seq: 1, offset: 0 });
    }
}
