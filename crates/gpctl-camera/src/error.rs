use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use gpctl_transport::ChannelRole;
use tokio::sync::broadcast;
use tracing::warn;

use crate::state::DeviceStateStore;

/// Errors that can occur in camera operations.
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] gpctl_transport::TransportError),

    /// Frame-level error (unmapped channel, failed write).
    #[error("frame error: {0}")]
    Frame(#[from] gpctl_frame::FrameError),

    /// The operation needs a connected session.
    #[error("camera not connected")]
    NotConnected,

    /// The session ended while the operation was waiting.
    #[error("camera disconnected")]
    Disconnected,

    /// Recording did not stop in time during highlight-with-restart.
    #[error("recording did not stop within {0:?}")]
    StopTimeout(Duration),

    /// A bounded state wait expired.
    #[error("state wait timed out after {0:?}")]
    Timeout(Duration),

    /// A readable attribute held a value that could not be interpreted.
    #[error("invalid {role} value: {reason}")]
    InvalidAttribute { role: ChannelRole, reason: String },

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    Config(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CameraError>;

/// A message on the error stream.
///
/// Device-reported failures carry the role and command id they arrived on;
/// failures of background work (connect reads, polling) carry neither.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    pub role: Option<ChannelRole>,
    pub command_id: Option<u8>,
    pub message: String,
}

impl ErrorEvent {
    /// A nonzero error code returned by the device.
    pub fn device(role: ChannelRole, command_id: u8, code: u8) -> Self {
        Self {
            role: Some(role),
            command_id: Some(command_id),
            message: format!("{role} response error={code} cmd=0x{command_id:02x}"),
        }
    }

    /// A failed background operation.
    pub fn operation(operation: &str, err: &CameraError) -> Self {
        Self {
            role: None,
            command_id: None,
            message: format!("{operation}: {err}"),
        }
    }
}

impl fmt::Display for ErrorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Publishes error events and records the latest one in the device state.
#[derive(Clone)]
pub struct ErrorSink {
    tx: broadcast::Sender<ErrorEvent>,
    store: Arc<DeviceStateStore>,
}

impl ErrorSink {
    pub fn new(store: Arc<DeviceStateStore>, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, store }
    }

    pub fn emit(&self, event: ErrorEvent) {
        warn!(error = %event, "camera error");
        let message = event.message.clone();
        self.store.modify(|state| {
            state.last_error = Some(message);
            true
        });
        // No subscribers is fine; the stream is fire-and-forget.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ErrorEvent> {
        self.tx.subscribe()
    }
}

impl fmt::Debug for ErrorSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorSink")
            .field("receivers", &self.tx.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use gpctl_transport::DeviceIdentity;

    use super::*;

    #[test]
    fn device_event_names_role_and_command() {
        let event = ErrorEvent::device(ChannelRole::QueryResponse, 0x13, 2);
        assert_eq!(event.to_string(), "query-response response error=2 cmd=0x13");
        assert_eq!(event.role, Some(ChannelRole::QueryResponse));
        assert_eq!(event.command_id, Some(0x13));
    }

    #[test]
    fn operation_event_wraps_error() {
        let event = ErrorEvent::operation("read-battery", &CameraError::NotConnected);
        assert_eq!(event.message, "read-battery: camera not connected");
        assert!(event.role.is_none());
    }

    #[test]
    fn emit_records_last_error_and_broadcasts() {
        let store = Arc::new(DeviceStateStore::new());
        store.begin(&DeviceIdentity::new("dev", "Camera"));
        let sink = ErrorSink::new(store.clone(), 8);
        let mut rx = sink.subscribe();

        sink.emit(ErrorEvent::device(ChannelRole::CommandResponse, 0x01, 1));

        let event = rx.try_recv().expect("event should be broadcast");
        assert_eq!(event.command_id, Some(0x01));
        let state = store.snapshot().expect("state should exist");
        assert_eq!(state.last_error.as_deref(), Some(event.message.as_str()));
    }

    #[test]
    fn emit_without_state_or_subscribers_is_harmless() {
        let store = Arc::new(DeviceStateStore::new());
        let sink = ErrorSink::new(store.clone(), 8);
        sink.emit(ErrorEvent::operation("poll", &CameraError::Disconnected));
        assert!(store.snapshot().is_none());
    }
}
