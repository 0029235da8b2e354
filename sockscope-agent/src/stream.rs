//! Per-direction reassembly buffer.
//!
//! A [`DataStream`] holds the captured fragments of one direction of one
//! connection, keyed by their probe-assigned sequence numbers, together with
//! the messages parsed out of them so far. Fragments may arrive in any
//! order; parsing only ever walks the contiguous run starting at the lowest
//! buffered sequence number and halts at the first gap.

use log::{debug, error};
use sockscope_protocols::http1::HttpMessage;
use sockscope_protocols::http2::Http2Frame;
use sockscope_protocols::{EventParser, MessageKind, ParseState};
use sockscope_types::SocketDataEvent;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, VecDeque};

/// Accumulator for parsed messages. The concrete type is committed on the
/// first extraction and never changes for the lifetime of the stream.
#[derive(Debug, Default)]
pub enum MessageHolder {
    #[default]
    Empty,
    Http1(VecDeque<HttpMessage>),
    Http2(VecDeque<Http2Frame>),
}

impl MessageHolder {
    fn type_name(&self) -> &'static str {
        match self {
            MessageHolder::Empty => "empty",
            MessageHolder::Http1(_) => "http1",
            MessageHolder::Http2(_) => "http2",
        }
    }
}

/// A message type that a [`DataStream`] can accumulate.
pub trait StoredMessage: sockscope_protocols::StreamMessage {
    const TYPE_NAME: &'static str;

    fn new_holder() -> MessageHolder;
    fn holder(holder: &MessageHolder) -> Option<&VecDeque<Self>>;
    fn holder_mut(holder: &mut MessageHolder) -> Option<&mut VecDeque<Self>>;
}

impl StoredMessage for HttpMessage {
    const TYPE_NAME: &'static str = "http1";

    fn new_holder() -> MessageHolder {
        MessageHolder::Http1(VecDeque::new())
    }

    fn holder(holder: &MessageHolder) -> Option<&VecDeque<Self>> {
        match holder {
            MessageHolder::Http1(q) => Some(q),
            _ => None,
        }
    }

    fn holder_mut(holder: &mut MessageHolder) -> Option<&mut VecDeque<Self>> {
        match holder {
            MessageHolder::Http1(q) => Some(q),
            _ => None,
        }
    }
}

impl StoredMessage for Http2Frame {
    const TYPE_NAME: &'static str = "http2";

    fn new_holder() -> MessageHolder {
        MessageHolder::Http2(VecDeque::new())
    }

    fn holder(holder: &MessageHolder) -> Option<&VecDeque<Self>> {
        match holder {
            MessageHolder::Http2(q) => Some(q),
            _ => None,
        }
    }

    fn holder_mut(holder: &mut MessageHolder) -> Option<&mut VecDeque<Self>> {
        match holder {
            MessageHolder::Http2(q) => Some(q),
            _ => None,
        }
    }
}

/// Reassembly buffer for one direction of one connection.
#[derive(Debug, Default)]
pub struct DataStream {
    /// Buffered fragments keyed by sequence number.
    events: BTreeMap<u64, SocketDataEvent>,
    /// Bytes already consumed from the lowest-numbered fragment.
    offset: usize,
    messages: MessageHolder,
}

impl DataStream {
    pub fn new() -> DataStream {
        DataStream::default()
    }

    /// Buffer a fragment. A fragment with an already-buffered sequence
    /// number is rejected. Returns whether the fragment was inserted.
    pub fn add_event(&mut self, seq_num: u64, event: SocketDataEvent) -> bool {
        match self.events.entry(seq_num) {
            Entry::Occupied(_) => {
                error!("Clobbering data event, seq_num={}", seq_num);
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(event);
                true
            }
        }
    }

    /// Parse as many whole messages as the contiguous head of the buffer
    /// allows, append them to the typed accumulator, and return it.
    ///
    /// The accumulator's message type is committed on first call; calling
    /// with a different type later is a programmer error and panics.
    pub fn extract_messages<M: StoredMessage>(&mut self, kind: MessageKind) -> &mut VecDeque<M> {
        if matches!(self.messages, MessageHolder::Empty) {
            self.messages = M::new_holder();
        }
        if M::holder(&self.messages).is_none() {
            panic!(
                "DataStream holds {} messages and cannot change to {}; \
                 the message type is fixed once the first extraction commits it",
                self.messages.type_name(),
                M::TYPE_NAME,
            );
        }

        let orig_offset = self.offset;
        let start_seq = match self.events.keys().next() {
            Some(&seq) => seq,
            None => return M::holder_mut(&mut self.messages).unwrap(),
        };

        // Stage the contiguous run of fragments, resuming past any bytes of
        // the first fragment consumed by a previous call.
        let mut parser = EventParser::new();
        let mut next_seq = start_seq;
        for (&seq, event) in &self.events {
            if seq != next_seq {
                break;
            }
            let mut view: &[u8] = &event.msg;
            if seq == start_seq && orig_offset != 0 {
                debug_assert!(orig_offset < view.len());
                view = view.get(orig_offset..).unwrap_or(&[]);
            }
            parser.append(view, event.timestamp_ns);
            next_seq += 1;
        }

        let out = M::holder_mut(&mut self.messages).unwrap();
        let result = parser.parse_messages(kind, out);

        if result.state == ParseState::Invalid {
            debug!(
                "Unparseable bytes at stream head (seq_num={}); retaining until reset",
                start_seq + result.end_position.seq as u64
            );
        }

        // Erase fully consumed fragments. The reported offset is relative to
        // the staged views, so when no fragment boundary was crossed it adds
        // to the offset we resumed from.
        let consumed = result.end_position.seq;
        for seq in start_seq..start_seq + consumed as u64 {
            self.events.remove(&seq);
        }
        self.offset = if consumed == 0 {
            orig_offset + result.end_position.offset
        } else {
            result.end_position.offset
        };

        M::holder_mut(&mut self.messages).unwrap()
    }

    /// Drop all buffered fragments and parsed messages, and uncommit the
    /// message type. Leaves the stream indistinguishable from fresh.
    pub fn reset(&mut self) {
        self.events.clear();
        self.messages = MessageHolder::Empty;
        self.offset = 0;
    }

    /// True iff nothing is buffered and no messages of type `M` are pending.
    pub fn is_empty<M: StoredMessage>(&self) -> bool {
        if !self.events.is_empty() {
            return false;
        }
        match &self.messages {
            MessageHolder::Empty => true,
            holder => M::holder(holder).map(|q| q.is_empty()).unwrap_or(false),
        }
    }

    /// Number of buffered (not yet consumed) fragments.
    pub fn num_buffered(&self) -> usize {
        self.events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sockscope_types::{ConnId, DataEventKind, TrafficClass};

    fn data_event(seq_num: u64, msg: &[u8], timestamp_ns: u64) -> SocketDataEvent {
        SocketDataEvent {
            conn_id: ConnId::default(),
            traffic_class: TrafficClass::default(),
            kind: DataEventKind::Recv,
            timestamp_ns,
            seq_num,
            msg: msg.to_vec(),
        }
    }

    const RESP: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\nfoo";

    #[test]
    fn duplicate_seq_num_rejected() {
        let mut stream = DataStream::new();
        assert!(stream.add_event(0, data_event(0, b"first", 1)));
        assert!(!stream.add_event(0, data_event(0, b"second", 2)));
        assert_eq!(stream.num_buffered(), 1);
    }

    #[test]
    fn extract_single_message() {
        let mut stream = DataStream::new();
        stream.add_event(0, data_event(0, RESP, 100));
        let messages = stream.extract_messages::<HttpMessage>(MessageKind::Response);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].body, b"foo");
        assert_eq!(messages[0].timestamp_ns, 100);
        assert_eq!(stream.num_buffered(), 0);
    }

    #[test]
    fn gap_halts_extraction_until_filled() {
        let mut stream = DataStream::new();
        stream.add_event(0, data_event(0, RESP, 1));
        stream.add_event(2, data_event(2, RESP, 3));
        let messages = stream.extract_messages::<HttpMessage>(MessageKind::Response);
        assert_eq!(messages.len(), 1);

        stream.add_event(1, data_event(1, RESP, 2));
        let messages = stream.extract_messages::<HttpMessage>(MessageKind::Response);
        assert_eq!(messages.len(), 3);
        assert_eq!(stream.num_buffered(), 0);
    }

    #[test]
    fn partial_message_resumes_mid_fragment() {
        // One fragment holds a whole response plus the head of a second.
        let mut combined = RESP.to_vec();
        combined.extend_from_slice(&RESP[..10]);
        let mut stream = DataStream::new();
        stream.add_event(0, data_event(0, &combined, 1));

        let messages = stream.extract_messages::<HttpMessage>(MessageKind::Response);
        assert_eq!(messages.len(), 1);
        // Fragment 0 is partially consumed, so it stays buffered.
        assert_eq!(stream.num_buffered(), 1);

        stream.add_event(1, data_event(1, &RESP[10..], 2));
        let messages = stream.extract_messages::<HttpMessage>(MessageKind::Response);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].body, b"foo");
        assert_eq!(stream.num_buffered(), 0);
    }

    #[test]
    fn repeated_extraction_is_idempotent_without_new_data() {
        let mut stream = DataStream::new();
        stream.add_event(0, data_event(0, b"HTTP/1.1 200 OK\r\nContent-Le", 1));
        assert!(stream
            .extract_messages::<HttpMessage>(MessageKind::Response)
            .is_empty());
        assert!(stream
            .extract_messages::<HttpMessage>(MessageKind::Response)
            .is_empty());
        assert_eq!(stream.num_buffered(), 1);
    }

    #[test]
    fn reset_leaves_stream_fresh() {
        let mut stream = DataStream::new();
        stream.add_event(0, data_event(0, RESP, 1));
        stream.extract_messages::<HttpMessage>(MessageKind::Response);
        stream.add_event(5, data_event(5, b"garbage", 2));
        assert!(!stream.is_empty::<HttpMessage>());

        stream.reset();
        assert!(stream.is_empty::<HttpMessage>());
        assert_eq!(stream.num_buffered(), 0);

        // After reset the stream may commit a different message type.
        assert!(stream
            .extract_messages::<Http2Frame>(MessageKind::Request)
            .is_empty());
    }

    #[test]
    #[should_panic(expected = "cannot change")]
    fn message_type_conflict_panics() {
        let mut stream = DataStream::new();
        stream.add_event(0, data_event(0, RESP, 1));
        stream.extract_messages::<HttpMessage>(MessageKind::Response);
        stream.extract_messages::<Http2Frame>(MessageKind::Response);
    }

    #[test]
    fn is_empty_considers_pending_messages() {
        let mut stream = DataStream::new();
        assert!(stream.is_empty::<HttpMessage>());

        stream.add_event(0, data_event(0, RESP, 1));
        assert!(!stream.is_empty::<HttpMessage>());

        // Extraction consumes the fragment but leaves the parsed message pending.
        stream.extract_messages::<HttpMessage>(MessageKind::Response);
        assert!(!stream.is_empty::<HttpMessage>());

        stream
            .extract_messages::<HttpMessage>(MessageKind::Response)
            .clear();
        assert!(stream.is_empty::<HttpMessage>());
    }
}
