//! Channel abstraction for write/notify camera transports.
//!
//! The camera exposes a handful of logical endpoints (command, settings,
//! query and their response counterparts). Each one is a [`Channel`] that
//! can be written to and subscribed for notifications. A [`Transport`]
//! discovers the channels of one connected device.
//!
//! This is the lowest layer of gpctl. Physical discovery and connection live
//! behind these traits; the [`memory`] transport is an in-process stand-in.

pub mod error;
pub mod memory;
pub mod role;
pub mod traits;

pub use error::{Result, TransportError};
pub use memory::{MemoryChannel, MemoryDevice, MemoryTransport};
pub use role::{ChannelRole, NOTIFYING_ROLES, REQUIRED_ROLES};
pub use traits::{
    Channel, ChannelMap, DeviceIdentity, DisconnectCallback, FrameCallback, SubscriptionHandle,
    Transport,
};
