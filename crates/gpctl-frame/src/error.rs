use gpctl_transport::{ChannelRole, TransportError};

/// Errors that can occur while framing or sending messages.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// No channel is mapped for the role (not connected or not discovered).
    #[error("channel {0} unavailable")]
    ChannelUnavailable(ChannelRole),

    /// The transport failed one of the fragment writes.
    #[error("write to {role} failed: {source}")]
    WriteFailed {
        role: ChannelRole,
        source: TransportError,
    },

    /// A frame with no bytes at all.
    #[error("empty frame")]
    EmptyFrame,

    /// The control byte selects the reserved header encoding.
    #[error("reserved header encoding in control byte 0x{0:02x}")]
    ReservedHeader(u8),

    /// The frame ends inside its own header.
    #[error("truncated frame ({available} bytes, header needs {needed})")]
    Truncated { needed: usize, available: usize },

    /// The declared message cannot hold a command id and error code.
    #[error("message length {0} below minimum")]
    MessageTooShort(usize),

    /// The message does not fit any header encoding.
    #[error("message too large ({size} bytes, max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// The MTU cannot carry a single byte of payload.
    #[error("invalid mtu {0}")]
    InvalidMtu(usize),
}

pub type Result<T> = std::result::Result<T, FrameError>;
