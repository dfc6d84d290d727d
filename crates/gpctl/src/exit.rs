use std::fmt;
use std::io;

use gpctl_camera::CameraError;
use gpctl_frame::FrameError;
use gpctl_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput => DATA_INVALID,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::ChannelUnavailable(_) | FrameError::WriteFailed { .. } => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        FrameError::InvalidMtu(_) => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn camera_error(context: &str, err: CameraError) -> CliError {
    match err {
        CameraError::Transport(err) => transport_error(context, err),
        CameraError::Frame(err) => frame_error(context, err),
        CameraError::StopTimeout(_) | CameraError::Timeout(_) => {
            CliError::new(TIMEOUT, format!("{context}: {err}"))
        }
        CameraError::Config(_) => CliError::new(USAGE, format!("{context}: {err}")),
        CameraError::Json(_) | CameraError::InvalidAttribute { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        CameraError::NotConnected | CameraError::Disconnected => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use gpctl_transport::ChannelRole;

    use super::*;

    #[test]
    fn stop_timeout_maps_to_timeout_code() {
        let err = camera_error(
            "highlight-restart",
            CameraError::StopTimeout(Duration::from_secs(8)),
        );
        assert_eq!(err.code, TIMEOUT);
        assert!(err.message.starts_with("highlight-restart: "));
    }

    #[test]
    fn unavailable_channel_is_transport_error() {
        let err = camera_error(
            "record",
            CameraError::Frame(FrameError::ChannelUnavailable(ChannelRole::Command)),
        );
        assert_eq!(err.code, TRANSPORT_ERROR);
    }

    #[test]
    fn malformed_frame_is_data_invalid() {
        assert_eq!(frame_error("decode", FrameError::EmptyFrame).code, DATA_INVALID);
        assert_eq!(frame_error("fragment", FrameError::InvalidMtu(0)).code, USAGE);
    }
}
