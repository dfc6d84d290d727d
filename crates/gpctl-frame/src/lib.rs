//! Framing for the camera control protocol.
//!
//! Outbound, the [`Fragmenter`] splits an encoded command into writes no
//! larger than the transport MTU and issues them strictly in order.
//! Inbound, a [`Reassembler`] per notifying channel turns start and
//! continuation frames back into complete [`Message`]s:
//! - a start frame carries a 1-3 byte header announcing the message length
//! - continuation frames carry a 1-byte header with a 4-bit sequence number
//!
//! Malformed or out-of-sequence input is dropped, never raised.

pub mod codec;
pub mod error;
pub mod fragmenter;
pub mod reassembler;

pub use codec::{
    packetize, parse_start_header, HeaderKind, Message, StartHeader, CONTINUATION_FLAG,
    DEFAULT_MTU, MIN_MESSAGE_LEN, SEQUENCE_MASK,
};
pub use error::{FrameError, Result};
pub use fragmenter::{fragments, Fragmenter, WriteTracker};
pub use reassembler::{DropReason, Feed, Reassembler};
