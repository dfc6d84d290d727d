//! Camera control on top of the framing layer.
//!
//! [`Camera`] is the command surface: it connects through a
//! [`gpctl_transport::Transport`], writes commands through a
//! [`gpctl_frame::Fragmenter`] and feeds every notification through a single
//! dispatcher task into the [`StatusDecoder`], which updates the
//! [`DeviceStateStore`]. Observers follow the device through replay-latest
//! `watch` streams and an error `broadcast` stream.

pub mod busy;
pub mod camera;
pub mod commands;
pub mod config;
mod dispatcher;
pub mod error;
mod poller;
pub mod state;
pub mod status;

pub use busy::{BusyTracker, SessionWrites};
pub use camera::Camera;
pub use commands::{
    CameraCommand, ClockTime, PresetKey, CMD_HARDWARE_INFO, CMD_STATUS, CMD_STATUS_PUSH,
};
pub use config::CameraConfig;
pub use error::{CameraError, ErrorEvent, ErrorSink, Result};
pub use state::{DeviceState, DeviceStateStore};
pub use status::{DecodeOutcome, HardwareInfo, StatusDecoder, StatusRecord, StatusRecords};
