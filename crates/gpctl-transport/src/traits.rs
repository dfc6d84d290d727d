use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{Result, TransportError};
use crate::role::{ChannelRole, REQUIRED_ROLES};

/// Callback invoked with every raw notification frame of a channel.
pub type FrameCallback = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Callback invoked once when the device drops the connection.
pub type DisconnectCallback = Box<dyn FnOnce() + Send>;

/// Opaque handle returned by [`Channel::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

/// Identity of the connected device as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Transport-level device id.
    pub id: String,
    /// Advertised device name.
    pub name: String,
}

impl DeviceIdentity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// One logical endpoint of a connected device.
///
/// Writes are not ordered across concurrent calls; callers that need ordering
/// must await each write before issuing the next.
pub trait Channel: Send + Sync + 'static {
    /// The role this channel was discovered under.
    fn role(&self) -> ChannelRole;

    /// Write one transmission unit.
    fn write(&self, data: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Read the current value of a readable attribute.
    fn read(&self) -> impl Future<Output = Result<Bytes>> + Send;

    /// Register `on_frame` for every notification on this channel.
    fn subscribe(&self, on_frame: FrameCallback) -> Result<SubscriptionHandle>;

    /// Drop a subscription. Unknown handles are ignored.
    fn unsubscribe(&self, handle: SubscriptionHandle);
}

/// A connected device that can enumerate its channels.
pub trait Transport: Send + Sync + 'static {
    type Channel: Channel;

    /// Identity of the device behind this transport.
    fn identity(&self) -> DeviceIdentity;

    /// Discover the channels the device exposes.
    fn discover(&self) -> impl Future<Output = Result<ChannelMap<Self::Channel>>> + Send;

    /// Register a callback for a device-initiated disconnect.
    fn on_disconnected(&self, callback: DisconnectCallback);

    /// Drop the physical connection.
    fn disconnect(&self) -> impl Future<Output = ()> + Send;
}

/// Mapping of role to discovered channel handle.
pub struct ChannelMap<C> {
    channels: BTreeMap<ChannelRole, C>,
}

impl<C> ChannelMap<C> {
    pub fn new() -> Self {
        Self {
            channels: BTreeMap::new(),
        }
    }

    /// Insert a channel for `role`, replacing any previous handle.
    pub fn insert(&mut self, role: ChannelRole, channel: C) {
        self.channels.insert(role, channel);
    }

    pub fn get(&self, role: ChannelRole) -> Option<&C> {
        self.channels.get(&role)
    }

    pub fn contains(&self, role: ChannelRole) -> bool {
        self.channels.contains_key(&role)
    }

    /// Mapped roles in declaration order.
    pub fn roles(&self) -> impl Iterator<Item = ChannelRole> + '_ {
        self.channels.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ChannelRole, &C)> + '_ {
        self.channels.iter().map(|(role, channel)| (*role, channel))
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Roles from [`REQUIRED_ROLES`] that have no channel.
    pub fn missing_required(&self) -> Vec<ChannelRole> {
        REQUIRED_ROLES
            .into_iter()
            .filter(|role| !self.contains(*role))
            .collect()
    }

    /// Fail with [`TransportError::DeviceIncompatible`] unless every required
    /// role is mapped.
    pub fn require(self) -> Result<Self> {
        let missing = self.missing_required();
        if missing.is_empty() {
            Ok(self)
        } else {
            Err(TransportError::DeviceIncompatible { missing })
        }
    }
}

impl<C> Default for ChannelMap<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> FromIterator<(ChannelRole, C)> for ChannelMap<C> {
    fn from_iter<I: IntoIterator<Item = (ChannelRole, C)>>(iter: I) -> Self {
        Self {
            channels: iter.into_iter().collect(),
        }
    }
}

impl<C> std::fmt::Debug for ChannelMap<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelMap")
            .field("roles", &self.channels.keys().collect::<Vec<_>>())
            .finish()
    }
}
