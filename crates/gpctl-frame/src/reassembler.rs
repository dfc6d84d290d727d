use bytes::{BufMut, BytesMut};
use tracing::{debug, trace};

use crate::codec::{
    continuation_sequence, is_continuation, next_sequence, parse_start_header, Message,
};
use crate::error::FrameError;

/// Result of feeding one notification frame to a [`Reassembler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feed {
    /// The frame completed a message.
    Complete(Message),
    /// The frame was accepted; more continuation frames are expected.
    Pending,
    /// The frame (and any partial message) was discarded.
    Dropped(DropReason),
}

/// Why a frame was discarded. Drops are never surfaced as errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// The start frame could not be parsed.
    Malformed(String),
    /// A continuation frame arrived with no message in progress.
    OrphanContinuation { sequence: u8 },
    /// A continuation frame skipped or repeated a sequence number.
    OutOfSequence { expected: u8, received: u8 },
}

#[derive(Debug)]
struct Partial {
    accumulated: BytesMut,
    remaining: usize,
    last_sequence: Option<u8>,
}

/// Per-channel reassembly state machine.
///
/// Idle until a start frame arrives; a start frame that already holds the
/// whole message completes immediately, otherwise the reassembler
/// accumulates correctly sequenced continuation frames until the announced
/// length is reached. A new start frame always discards any partial message.
#[derive(Debug, Default)]
pub struct Reassembler {
    partial: Option<Partial>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if no message is in progress.
    pub fn is_idle(&self) -> bool {
        self.partial.is_none()
    }

    /// Bytes still expected for the message in progress.
    pub fn remaining(&self) -> Option<usize> {
        self.partial.as_ref().map(|p| p.remaining)
    }

    /// Drop any message in progress.
    pub fn reset(&mut self) {
        self.partial = None;
    }

    /// Consume one raw notification frame.
    pub fn push(&mut self, frame: &[u8]) -> Feed {
        match frame.first() {
            Some(&control) if is_continuation(control) => {
                self.push_continuation(control, &frame[1..])
            }
            _ => self.push_start(frame),
        }
    }

    fn push_start(&mut self, frame: &[u8]) -> Feed {
        if let Some(stale) = self.partial.take() {
            debug!(
                accumulated = stale.accumulated.len(),
                remaining = stale.remaining,
                "new message started; discarding partial message"
            );
        }

        let header = match parse_start_header(frame) {
            Ok(header) => header,
            Err(err) => return drop_malformed(err),
        };

        let data = &frame[header.header_len..];
        if data.len() >= header.message_len {
            trace!(len = header.message_len, "single-frame message");
            return complete(BytesMut::from(&data[..header.message_len]));
        }

        let mut accumulated = BytesMut::with_capacity(header.message_len);
        accumulated.put_slice(data);
        let remaining = header.message_len - data.len();
        trace!(
            len = header.message_len,
            remaining,
            "multi-frame message started"
        );
        self.partial = Some(Partial {
            accumulated,
            remaining,
            last_sequence: None,
        });
        Feed::Pending
    }

    fn push_continuation(&mut self, control: u8, data: &[u8]) -> Feed {
        let received = continuation_sequence(control);
        let Some(partial) = self.partial.as_mut() else {
            trace!(sequence = received, "continuation with no message in progress");
            return Feed::Dropped(DropReason::OrphanContinuation { sequence: received });
        };

        let expected = next_sequence(partial.last_sequence);
        if received != expected {
            debug!(expected, received, "out-of-sequence continuation; dropping message");
            self.partial = None;
            return Feed::Dropped(DropReason::OutOfSequence { expected, received });
        }

        let take = data.len().min(partial.remaining);
        partial.accumulated.put_slice(&data[..take]);
        partial.remaining -= take;
        partial.last_sequence = Some(received);

        if partial.remaining > 0 {
            return Feed::Pending;
        }

        match self.partial.take() {
            Some(done) => complete(done.accumulated),
            None => Feed::Pending,
        }
    }
}

fn complete(bytes: BytesMut) -> Feed {
    match Message::from_bytes(bytes.freeze()) {
        Ok(message) => Feed::Complete(message),
        Err(err) => drop_malformed(err),
    }
}

fn drop_malformed(err: FrameError) -> Feed {
    debug!(error = %err, "dropping malformed frame");
    Feed::Dropped(DropReason::Malformed(err.to_string()))
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::codec::{packetize, DEFAULT_MTU};

    fn expect_complete(feed: Feed) -> Message {
        match feed {
            Feed::Complete(message) => message,
            other => panic!("expected complete message, got {other:?}"),
        }
    }

    #[test]
    fn single_frame_message_completes_immediately() {
        let mut reassembler = Reassembler::new();
        let message = expect_complete(reassembler.push(&[0x04, 0x13, 0x00, 0x46, 0x01]));

        assert_eq!(message.command_id, 0x13);
        assert_eq!(message.error_code, 0x00);
        assert_eq!(message.body.as_ref(), &[0x46, 0x01]);
        assert!(reassembler.is_idle());
    }

    #[test]
    fn trailing_bytes_beyond_announced_length_ignored() {
        let mut reassembler = Reassembler::new();
        let message = expect_complete(reassembler.push(&[0x02, 0x17, 0x00, 0xFF, 0xFF]));
        assert!(message.body.is_empty());
    }

    #[test]
    fn split_message_matches_single_frame_message() {
        let body: Vec<u8> = (0..50).collect();
        let original = Message::new(0x13, 0x00, body.clone());

        let mut reassembler = Reassembler::new();
        let frames = packetize(&original, DEFAULT_MTU).unwrap();
        assert!(frames.len() > 1);

        let mut result = None;
        for (i, frame) in frames.iter().enumerate() {
            match reassembler.push(frame) {
                Feed::Pending => assert!(i + 1 < frames.len()),
                Feed::Complete(message) => result = Some(message),
                Feed::Dropped(reason) => panic!("unexpected drop: {reason:?}"),
            }
        }

        let whole = packetize(&original, 1024).unwrap();
        assert_eq!(whole.len(), 1);
        let single = expect_complete(Reassembler::new().push(&whole[0]));

        assert_eq!(result, Some(single));
    }

    #[test]
    fn remaining_tracks_announced_length() {
        let mut reassembler = Reassembler::new();
        // extended-13 header announcing 30 bytes, 3 delivered.
        assert_eq!(reassembler.push(&[0x20, 30, 0x13, 0x00, 0x01]), Feed::Pending);
        assert_eq!(reassembler.remaining(), Some(27));

        assert_eq!(reassembler.push(&[0x80, 1, 2, 3, 4, 5]), Feed::Pending);
        assert_eq!(reassembler.remaining(), Some(22));
    }

    #[test]
    fn out_of_sequence_continuation_discards_buffer() {
        let mut reassembler = Reassembler::new();
        assert_eq!(reassembler.push(&[0x20, 10, 0x13, 0x00, 0xAA]), Feed::Pending);
        assert_eq!(reassembler.push(&[0x80, 0xBB, 0xBB]), Feed::Pending);

        let feed = reassembler.push(&[0x82, 0xCC, 0xCC]);
        assert_eq!(
            feed,
            Feed::Dropped(DropReason::OutOfSequence {
                expected: 1,
                received: 2
            })
        );
        assert!(reassembler.is_idle());

        // The next start frame is independent of the dropped bytes.
        let message = expect_complete(reassembler.push(&[0x03, 0x93, 0x00, 0x01]));
        assert_eq!(message.command_id, 0x93);
        assert_eq!(message.body.as_ref(), &[0x01]);
    }

    #[test]
    fn orphan_continuation_is_dropped() {
        let mut reassembler = Reassembler::new();
        assert_eq!(
            reassembler.push(&[0x80, 0x01]),
            Feed::Dropped(DropReason::OrphanContinuation { sequence: 0 })
        );
        assert!(reassembler.is_idle());
    }

    #[test]
    fn new_start_frame_discards_partial_message() {
        let mut reassembler = Reassembler::new();
        assert_eq!(reassembler.push(&[0x20, 40, 0x13, 0x00, 0xEE]), Feed::Pending);

        let message = expect_complete(reassembler.push(&[0x02, 0x01, 0x00]));
        assert_eq!(message.command_id, 0x01);
        assert!(reassembler.is_idle());

        // A continuation for the discarded message is now an orphan.
        assert!(matches!(
            reassembler.push(&[0x80, 0xEE]),
            Feed::Dropped(DropReason::OrphanContinuation { .. })
        ));
    }

    #[test]
    fn malformed_start_frame_is_dropped() {
        let mut reassembler = Reassembler::new();
        assert!(matches!(
            reassembler.push(&[0x60, 0x00]),
            Feed::Dropped(DropReason::Malformed(_))
        ));
        assert!(matches!(
            reassembler.push(&[]),
            Feed::Dropped(DropReason::Malformed(_))
        ));
    }

    #[test]
    fn sequence_numbers_wrap_after_sixteen_continuations() {
        let body = vec![0x5A; 16 + 19 * 17];
        let original = Message::new(0x13, 0x00, body);
        let frames = packetize(&original, DEFAULT_MTU).unwrap();
        assert_eq!(frames.len(), 18);
        assert_eq!(frames[17][0], 0x80);

        let mut reassembler = Reassembler::new();
        let mut completed = None;
        for frame in &frames {
            if let Feed::Complete(message) = reassembler.push(frame) {
                completed = Some(message);
            }
        }
        assert_eq!(completed, Some(original));
    }

    #[test]
    fn overlong_continuation_is_truncated_to_remaining() {
        let mut reassembler = Reassembler::new();
        assert_eq!(reassembler.push(&[0x20, 4, 0x13, 0x00]), Feed::Pending);
        let message = expect_complete(reassembler.push(&[0x80, 0x46, 0x50, 0xFF, 0xFF]));
        assert_eq!(message.body, Bytes::from_static(&[0x46, 0x50]));
    }
}
