//! Control BLE action cameras over a write/notify transport.
//!
//! # Crate Structure
//!
//! - [`transport`] - Channel roles, the `Channel`/`Transport` traits and an in-memory transport
//! - [`frame`] - MTU fragmentation and notification reassembly
//! - [`camera`] - Status decoding, device state, the command surface and the poller

/// Re-export transport types.
pub mod transport {
    pub use gpctl_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use gpctl_frame::*;
}

/// Re-export camera types.
pub mod camera {
    pub use gpctl_camera::*;
}
