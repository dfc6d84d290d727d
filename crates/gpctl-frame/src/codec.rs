use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Maximum bytes per outbound write on a BLE camera link.
pub const DEFAULT_MTU: usize = 20;

/// High bit of the control byte marks a continuation frame.
pub const CONTINUATION_FLAG: u8 = 0x80;

/// Continuation sequence numbers live in the low nibble and wrap at 16.
pub const SEQUENCE_MASK: u8 = 0x0F;

/// Every message carries at least a command id and an error code.
pub const MIN_MESSAGE_LEN: usize = 2;

const HEADER_KIND_SHIFT: u8 = 5;
const HEADER_KIND_MASK: u8 = 0x03;
const LENGTH_BITS_MASK: u8 = 0x1F;

/// Start-frame header encodings, selected by bits 6..5 of the control byte.
///
/// ```text
/// general      0b000L_LLLL                      (1 byte,  len <= 31)
/// extended-13  0b001L_LLLL LLLL_LLLL            (2 bytes, len <= 8191)
/// extended-16  0b0100_0000 LLLL_LLLL LLLL_LLLL  (3 bytes, len <= 65535)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderKind {
    General,
    Extended13,
    Extended16,
}

impl HeaderKind {
    /// Decode the header kind from a start frame's control byte.
    pub fn from_control(control: u8) -> Result<Self> {
        match (control >> HEADER_KIND_SHIFT) & HEADER_KIND_MASK {
            0b00 => Ok(HeaderKind::General),
            0b01 => Ok(HeaderKind::Extended13),
            0b10 => Ok(HeaderKind::Extended16),
            _ => Err(FrameError::ReservedHeader(control)),
        }
    }

    /// Header bytes preceding the command id.
    pub fn header_len(self) -> usize {
        match self {
            HeaderKind::General => 1,
            HeaderKind::Extended13 => 2,
            HeaderKind::Extended16 => 3,
        }
    }

    /// Largest message length this encoding can announce.
    pub fn max_message_len(self) -> usize {
        match self {
            HeaderKind::General => 0x1F,
            HeaderKind::Extended13 => 0x1FFF,
            HeaderKind::Extended16 => 0xFFFF,
        }
    }

    /// Smallest encoding able to announce `len`.
    pub fn for_length(len: usize) -> Result<Self> {
        [
            HeaderKind::General,
            HeaderKind::Extended13,
            HeaderKind::Extended16,
        ]
        .into_iter()
        .find(|kind| len <= kind.max_message_len())
        .ok_or(FrameError::MessageTooLarge {
            size: len,
            max: HeaderKind::Extended16.max_message_len(),
        })
    }
}

/// Parsed start-frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartHeader {
    pub kind: HeaderKind,
    /// Bytes to skip before the command id.
    pub header_len: usize,
    /// Announced length of the assembled message (command id onward).
    pub message_len: usize,
}

/// Returns true if the control byte marks a continuation frame.
pub fn is_continuation(control: u8) -> bool {
    control & CONTINUATION_FLAG != 0
}

/// Sequence number carried by a continuation control byte.
pub fn continuation_sequence(control: u8) -> u8 {
    control & SEQUENCE_MASK
}

/// Sequence number expected after `last` (0 for the first continuation).
pub fn next_sequence(last: Option<u8>) -> u8 {
    match last {
        None => 0,
        Some(seq) => seq.wrapping_add(1) & SEQUENCE_MASK,
    }
}

/// Parse the header of a non-continuation frame.
pub fn parse_start_header(frame: &[u8]) -> Result<StartHeader> {
    let control = *frame.first().ok_or(FrameError::EmptyFrame)?;
    let kind = HeaderKind::from_control(control)?;
    let header_len = kind.header_len();
    if frame.len() < header_len {
        return Err(FrameError::Truncated {
            needed: header_len,
            available: frame.len(),
        });
    }

    let message_len = match kind {
        HeaderKind::General => usize::from(control & LENGTH_BITS_MASK),
        HeaderKind::Extended13 => {
            (usize::from(control & LENGTH_BITS_MASK) << 8) | usize::from(frame[1])
        }
        HeaderKind::Extended16 => (usize::from(frame[1]) << 8) | usize::from(frame[2]),
    };
    if message_len < MIN_MESSAGE_LEN {
        return Err(FrameError::MessageTooShort(message_len));
    }

    Ok(StartHeader {
        kind,
        header_len,
        message_len,
    })
}

/// Append the start header announcing `message_len`.
pub fn encode_start_header(message_len: usize, dst: &mut BytesMut) -> Result<HeaderKind> {
    let kind = HeaderKind::for_length(message_len)?;
    match kind {
        HeaderKind::General => dst.put_u8(message_len as u8),
        HeaderKind::Extended13 => {
            dst.put_u8(0x20 | (message_len >> 8) as u8);
            dst.put_u8(message_len as u8);
        }
        HeaderKind::Extended16 => {
            dst.put_u8(0x40);
            dst.put_u16(message_len as u16);
        }
    }
    Ok(kind)
}

/// A complete, reassembled protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub command_id: u8,
    /// Zero on success; anything else is a device-reported failure.
    pub error_code: u8,
    pub body: Bytes,
}

impl Message {
    pub fn new(command_id: u8, error_code: u8, body: impl Into<Bytes>) -> Self {
        Self {
            command_id,
            error_code,
            body: body.into(),
        }
    }

    /// Split assembled bytes into command id, error code and body.
    pub fn from_bytes(mut bytes: Bytes) -> Result<Self> {
        if bytes.len() < MIN_MESSAGE_LEN {
            return Err(FrameError::MessageTooShort(bytes.len()));
        }
        let head = bytes.split_to(MIN_MESSAGE_LEN);
        Ok(Self {
            command_id: head[0],
            error_code: head[1],
            body: bytes,
        })
    }

    pub fn is_error(&self) -> bool {
        self.error_code != 0
    }

    /// Length as announced by a start header.
    pub fn wire_len(&self) -> usize {
        MIN_MESSAGE_LEN + self.body.len()
    }
}

/// Encode a message into notification frames of at most `mtu` bytes.
///
/// This is the device-side inverse of [`crate::Reassembler`]: one start frame
/// followed by as many continuation frames as needed.
pub fn packetize(message: &Message, mtu: usize) -> Result<Vec<Bytes>> {
    let kind = HeaderKind::for_length(message.wire_len())?;
    if mtu <= kind.header_len() {
        return Err(FrameError::InvalidMtu(mtu));
    }

    let mut content = BytesMut::with_capacity(message.wire_len());
    content.put_u8(message.command_id);
    content.put_u8(message.error_code);
    content.put_slice(&message.body);
    let content = content.freeze();

    let mut frames = Vec::new();
    let mut first = BytesMut::with_capacity(mtu);
    encode_start_header(message.wire_len(), &mut first)?;
    let take = content.len().min(mtu - kind.header_len());
    first.put_slice(&content[..take]);
    frames.push(first.freeze());

    let mut sequence = None;
    for chunk in content[take..].chunks(mtu - 1) {
        let seq = next_sequence(sequence);
        let mut frame = BytesMut::with_capacity(chunk.len() + 1);
        frame.put_u8(CONTINUATION_FLAG | seq);
        frame.put_slice(chunk);
        frames.push(frame.freeze());
        sequence = Some(seq);
    }

    Ok(frames)
}
