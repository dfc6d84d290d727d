//! In-process transport.
//!
//! [`MemoryTransport::pair`] returns the host side (a [`Transport`]) and the
//! device side ([`MemoryDevice`]). The device side observes every write,
//! injects notifications, serves readable attributes and can fail, delay or
//! drop the connection on demand.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::{Result, TransportError};
use crate::role::ChannelRole;
use crate::traits::{
    Channel, ChannelMap, DeviceIdentity, DisconnectCallback, FrameCallback, SubscriptionHandle,
    Transport,
};

/// A write observed by the device side.
pub type WriteEvent = (ChannelRole, Bytes);

struct Shared {
    identity: DeviceIdentity,
    state: Mutex<DeviceSide>,
}

#[derive(Default)]
struct DeviceSide {
    roles: BTreeSet<ChannelRole>,
    connected: bool,
    subscribers: BTreeMap<ChannelRole, Vec<(SubscriptionHandle, FrameCallback)>>,
    next_handle: u64,
    writes: Vec<WriteEvent>,
    write_listeners: Vec<mpsc::UnboundedSender<WriteEvent>>,
    attributes: BTreeMap<ChannelRole, Bytes>,
    failing_writes: BTreeSet<ChannelRole>,
    failing_reads: BTreeSet<ChannelRole>,
    write_delays: BTreeMap<ChannelRole, Duration>,
    drop_after: Option<WriteEvent>,
    disconnect_callbacks: Vec<DisconnectCallback>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, DeviceSide> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DeviceSide {
    /// Mark the link down and hand back the callbacks to run outside the lock.
    fn drop_link(&mut self) -> Vec<DisconnectCallback> {
        self.connected = false;
        self.subscribers.clear();
        std::mem::take(&mut self.disconnect_callbacks)
    }
}

/// Host side of an in-process device.
#[derive(Clone)]
pub struct MemoryTransport {
    shared: Arc<Shared>,
}

/// Device side of an in-process device.
#[derive(Clone)]
pub struct MemoryDevice {
    shared: Arc<Shared>,
}

/// A channel handle returned by [`MemoryTransport::discover`].
#[derive(Clone)]
pub struct MemoryChannel {
    role: ChannelRole,
    shared: Arc<Shared>,
}

impl MemoryTransport {
    /// Create a connected pair exposing `roles`.
    pub fn pair(
        identity: DeviceIdentity,
        roles: impl IntoIterator<Item = ChannelRole>,
    ) -> (MemoryTransport, MemoryDevice) {
        let state = DeviceSide {
            roles: roles.into_iter().collect(),
            connected: true,
            next_handle: 1,
            ..DeviceSide::default()
        };
        let shared = Arc::new(Shared {
            identity,
            state: Mutex::new(state),
        });
        (
            MemoryTransport {
                shared: Arc::clone(&shared),
            },
            MemoryDevice { shared },
        )
    }

    /// Create a connected pair exposing every known role.
    pub fn with_all_roles(identity: DeviceIdentity) -> (MemoryTransport, MemoryDevice) {
        Self::pair(identity, ChannelRole::ALL)
    }
}

impl Transport for MemoryTransport {
    type Channel = MemoryChannel;

    fn identity(&self) -> DeviceIdentity {
        self.shared.identity.clone()
    }

    async fn discover(&self) -> Result<ChannelMap<MemoryChannel>> {
        let mut state = self.shared.lock();
        state.connected = true;
        let map: ChannelMap<MemoryChannel> = state
            .roles
            .iter()
            .map(|role| {
                (
                    *role,
                    MemoryChannel {
                        role: *role,
                        shared: Arc::clone(&self.shared),
                    },
                )
            })
            .collect();
        debug!(roles = map.len(), "memory transport discovered channels");
        Ok(map)
    }

    fn on_disconnected(&self, callback: DisconnectCallback) {
        self.shared.lock().disconnect_callbacks.push(callback);
    }

    async fn disconnect(&self) {
        let mut state = self.shared.lock();
        state.connected = false;
        state.subscribers.clear();
        state.disconnect_callbacks.clear();
        debug!("memory transport disconnected by host");
    }
}

impl Channel for MemoryChannel {
    fn role(&self) -> ChannelRole {
        self.role
    }

    async fn write(&self, data: &[u8]) -> Result<()> {
        let delay = self.shared.lock().write_delays.get(&self.role).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.shared.lock();
        if !state.connected {
            return Err(TransportError::Disconnected);
        }
        if state.failing_writes.contains(&self.role) {
            return Err(TransportError::WriteFailed {
                role: self.role,
                reason: "write rejected by device".to_string(),
            });
        }

        let bytes = Bytes::copy_from_slice(data);
        trace!(role = %self.role, len = bytes.len(), "memory write");
        state.writes.push((self.role, bytes.clone()));
        state
            .write_listeners
            .retain(|tx| tx.send((self.role, bytes.clone())).is_ok());

        let event = (self.role, bytes);
        if state.drop_after.as_ref() == Some(&event) {
            state.drop_after = None;
            let callbacks = state.drop_link();
            drop(state);
            debug!(role = %self.role, "memory device dropped connection after write");
            for callback in callbacks {
                callback();
            }
        }
        Ok(())
    }

    async fn read(&self) -> Result<Bytes> {
        if !self.role.is_attribute() {
            return Err(TransportError::Unsupported {
                role: self.role,
                capability: "read",
            });
        }
        let state = self.shared.lock();
        if !state.connected {
            return Err(TransportError::Disconnected);
        }
        if state.failing_reads.contains(&self.role) {
            return Err(TransportError::ReadFailed {
                role: self.role,
                reason: "read rejected by device".to_string(),
            });
        }
        state
            .attributes
            .get(&self.role)
            .cloned()
            .ok_or_else(|| TransportError::ReadFailed {
                role: self.role,
                reason: "attribute has no value".to_string(),
            })
    }

    fn subscribe(&self, on_frame: FrameCallback) -> Result<SubscriptionHandle> {
        if !self.role.is_notifying() {
            return Err(TransportError::Unsupported {
                role: self.role,
                capability: "notify",
            });
        }
        let mut state = self.shared.lock();
        if !state.connected {
            return Err(TransportError::Disconnected);
        }
        let handle = SubscriptionHandle(state.next_handle);
        state.next_handle += 1;
        state
            .subscribers
            .entry(self.role)
            .or_default()
            .push((handle, on_frame));
        Ok(handle)
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        let mut state = self.shared.lock();
        if let Some(subs) = state.subscribers.get_mut(&self.role) {
            subs.retain(|(h, _)| *h != handle);
        }
    }
}

impl MemoryDevice {
    /// Deliver a notification frame to every subscriber of `role`.
    ///
    /// Returns the number of subscribers that received it.
    pub fn notify(&self, role: ChannelRole, frame: impl Into<Bytes>) -> usize {
        let frame = frame.into();
        let callbacks: Vec<FrameCallback> = {
            let state = self.shared.lock();
            if !state.connected {
                return 0;
            }
            state
                .subscribers
                .get(&role)
                .map(|subs| subs.iter().map(|(_, cb)| Arc::clone(cb)).collect())
                .unwrap_or_default()
        };
        trace!(%role, len = frame.len(), subscribers = callbacks.len(), "memory notify");
        for callback in &callbacks {
            callback(frame.clone());
        }
        callbacks.len()
    }

    /// Set the value returned by reads of an attribute role.
    pub fn set_attribute(&self, role: ChannelRole, value: impl Into<Bytes>) {
        self.shared.lock().attributes.insert(role, value.into());
    }

    /// Make writes to `role` fail (or succeed again).
    pub fn fail_writes(&self, role: ChannelRole, fail: bool) {
        let mut state = self.shared.lock();
        if fail {
            state.failing_writes.insert(role);
        } else {
            state.failing_writes.remove(&role);
        }
    }

    /// Make reads of `role` fail (or succeed again).
    pub fn fail_reads(&self, role: ChannelRole, fail: bool) {
        let mut state = self.shared.lock();
        if fail {
            state.failing_reads.insert(role);
        } else {
            state.failing_reads.remove(&role);
        }
    }

    /// Accept the next write of `payload` to `role`, then drop the link
    /// before the write returns.
    pub fn drop_after_write(&self, role: ChannelRole, payload: impl Into<Bytes>) {
        self.shared.lock().drop_after = Some((role, payload.into()));
    }

    /// Delay completion of every write to `role`.
    pub fn set_write_delay(&self, role: ChannelRole, delay: Duration) {
        self.shared.lock().write_delays.insert(role, delay);
    }

    /// Every completed write, in completion order.
    pub fn writes(&self) -> Vec<WriteEvent> {
        self.shared.lock().writes.clone()
    }

    /// Completed writes to a single role.
    pub fn writes_to(&self, role: ChannelRole) -> Vec<Bytes> {
        self.shared
            .lock()
            .writes
            .iter()
            .filter(|(r, _)| *r == role)
            .map(|(_, bytes)| bytes.clone())
            .collect()
    }

    pub fn clear_writes(&self) {
        self.shared.lock().writes.clear();
    }

    /// Stream of writes completed from now on.
    pub fn write_events(&self) -> mpsc::UnboundedReceiver<WriteEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.lock().write_listeners.push(tx);
        rx
    }

    /// Number of live subscriptions on `role`.
    pub fn subscriber_count(&self, role: ChannelRole) -> usize {
        self.shared
            .lock()
            .subscribers
            .get(&role)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn is_connected(&self) -> bool {
        self.shared.lock().connected
    }

    /// Simulate the device dropping the link.
    pub fn drop_connection(&self) {
        let callbacks = self.shared.lock().drop_link();
        debug!(callbacks = callbacks.len(), "memory device dropped connection");
        for callback in callbacks {
            callback();
        }
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("identity", &self.shared.identity)
            .finish()
    }
}

impl std::fmt::Debug for MemoryDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDevice")
            .field("identity", &self.shared.identity)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl std::fmt::Debug for MemoryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryChannel")
            .field("role", &self.role)
            .finish()
    }
}
