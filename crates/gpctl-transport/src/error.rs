use crate::role::ChannelRole;

/// Errors that can occur in camera transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Discovery did not find every role the protocol needs.
    #[error("device incompatible: missing channels {missing:?}")]
    DeviceIncompatible { missing: Vec<ChannelRole> },

    /// The transport rejected or failed a write.
    #[error("write to {role} failed: {reason}")]
    WriteFailed { role: ChannelRole, reason: String },

    /// Reading a readable attribute failed.
    #[error("read from {role} failed: {reason}")]
    ReadFailed { role: ChannelRole, reason: String },

    /// Enabling notifications failed.
    #[error("subscribe to {role} failed: {reason}")]
    SubscribeFailed { role: ChannelRole, reason: String },

    /// The channel does not support the requested capability.
    #[error("{role} does not support {capability}")]
    Unsupported {
        role: ChannelRole,
        capability: &'static str,
    },

    /// The device is not connected.
    #[error("transport disconnected")]
    Disconnected,
}

pub type Result<T> = std::result::Result<T, TransportError>;
