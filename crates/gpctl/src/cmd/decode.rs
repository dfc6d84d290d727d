use std::sync::Arc;

use gpctl_camera::{
    BusyTracker, DecodeOutcome, DeviceState, DeviceStateStore, ErrorSink, StatusDecoder,
};
use gpctl_frame::{DropReason, Feed, Message, Reassembler};
use gpctl_transport::{ChannelRole, DeviceIdentity};
use serde::Serialize;

use crate::cmd::{parse_hex, spaced_hex, DecodeArgs};
use crate::exit::{CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_json, print_raw, print_rows, state_rows, OutputFormat};

#[derive(Debug, Serialize)]
struct MessageOutput {
    command_id: String,
    error_code: u8,
    body: String,
    outcome: String,
}

#[derive(Debug, Serialize)]
struct DecodeReport {
    role: &'static str,
    messages: Vec<MessageOutput>,
    dropped: Vec<String>,
    incomplete_remaining: Option<usize>,
    errors: Vec<String>,
    state: Option<DeviceState>,
    #[serde(skip)]
    bodies: Vec<Message>,
}

impl DecodeReport {
    fn is_clean(&self) -> bool {
        self.dropped.is_empty() && self.incomplete_remaining.is_none()
    }
}

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let frames = args
        .frames
        .iter()
        .map(|frame| parse_hex(frame))
        .collect::<CliResult<Vec<_>>>()?;
    let report = decode_frames(args.role, &frames);

    match format {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Raw => {
            for message in &report.bodies {
                print_raw(&message.body);
            }
        }
        _ => {
            let rows = report
                .messages
                .iter()
                .map(|m| {
                    vec![
                        m.command_id.clone(),
                        m.error_code.to_string(),
                        m.body.clone(),
                        m.outcome.clone(),
                    ]
                })
                .collect();
            print_rows(format, &["COMMAND", "ERROR", "BODY", "OUTCOME"], rows);
            for reason in &report.dropped {
                println!("dropped: {reason}");
            }
            if let Some(remaining) = report.incomplete_remaining {
                println!("incomplete: {remaining} bytes outstanding");
            }
            for error in &report.errors {
                println!("device error: {error}");
            }
            if let Some(state) = &report.state {
                print_rows(format, &["FIELD", "VALUE"], state_rows(state));
            }
        }
    }

    Ok(if report.is_clean() { SUCCESS } else { DATA_INVALID })
}

fn decode_frames(role: ChannelRole, frames: &[Vec<u8>]) -> DecodeReport {
    let store = Arc::new(DeviceStateStore::new());
    store.begin(&DeviceIdentity::new("capture", "capture"));
    let errors = ErrorSink::new(Arc::clone(&store), frames.len().max(1));
    let mut error_rx = errors.subscribe();
    let decoder = StatusDecoder::new(Arc::clone(&store), Arc::new(BusyTracker::new()), errors);

    let mut reassembler = Reassembler::new();
    let mut report = DecodeReport {
        role: role.name(),
        messages: Vec::new(),
        dropped: Vec::new(),
        incomplete_remaining: None,
        errors: Vec::new(),
        state: None,
        bodies: Vec::new(),
    };

    for frame in frames {
        match reassembler.push(frame) {
            Feed::Complete(message) => {
                let outcome = decoder.decode(role, &message);
                report.messages.push(MessageOutput {
                    command_id: format!("0x{:02x}", message.command_id),
                    error_code: message.error_code,
                    body: spaced_hex(&message.body),
                    outcome: outcome_label(&outcome),
                });
                report.bodies.push(message);
            }
            Feed::Pending => {}
            Feed::Dropped(reason) => report.dropped.push(drop_label(&reason)),
        }
    }

    report.incomplete_remaining = reassembler.remaining();
    while let Ok(event) = error_rx.try_recv() {
        report.errors.push(event.to_string());
    }
    report.state = store.snapshot();
    report
}

fn outcome_label(outcome: &DecodeOutcome) -> String {
    match outcome {
        DecodeOutcome::DeviceError { code } => format!("device error {code}"),
        DecodeOutcome::HardwareInfo => "hardware info".to_string(),
        DecodeOutcome::Status { applied, truncated } if *truncated => {
            format!("status applied={applied} (truncated)")
        }
        DecodeOutcome::Status { applied, .. } => format!("status applied={applied}"),
        DecodeOutcome::Ack => "ack".to_string(),
    }
}

fn drop_label(reason: &DropReason) -> String {
    match reason {
        DropReason::Malformed(detail) => format!("malformed frame: {detail}"),
        DropReason::OrphanContinuation { sequence } => {
            format!("continuation {sequence} without a start frame")
        }
        DropReason::OutOfSequence { expected, received } => {
            format!("continuation {received} out of sequence (expected {expected})")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_status_push_into_state() {
        // recording=1, battery=77
        let frames = vec![vec![0x08, 0x93, 0x00, 0x01, 0x01, 0x01, 0x46, 0x01, 0x4D]];
        let report = decode_frames(ChannelRole::QueryResponse, &frames);

        assert!(report.is_clean());
        assert_eq!(report.messages.len(), 1);
        assert_eq!(report.messages[0].outcome, "status applied=2");
        let state = report.state.expect("state should be present");
        assert_eq!(state.recording, Some(true));
        assert_eq!(state.battery, Some(77));
    }

    #[test]
    fn reassembles_continuation_frames() {
        let frames = vec![
            vec![0x20, 0x0B, 0x13, 0x00, 0x46, 0x01, 0x40],
            vec![0x80, 0x36, 0x08, 0x00, 0x10, 0x00, 0x00],
        ];
        let report = decode_frames(ChannelRole::QueryResponse, &frames);

        assert!(report.is_clean(), "dropped: {:?}", report.dropped);
        let state = report.state.expect("state should be present");
        assert_eq!(state.battery, Some(0x40));
        assert_eq!(report.incomplete_remaining, None);
        assert_eq!(report.messages[0].outcome, "status applied=1 (truncated)");
    }

    #[test]
    fn reports_device_error_and_orphans() {
        let frames = vec![vec![0x82, 0x01], vec![0x02, 0x01, 0x02]];
        let report = decode_frames(ChannelRole::CommandResponse, &frames);

        assert!(!report.is_clean());
        assert_eq!(report.dropped, vec!["continuation 2 without a start frame"]);
        assert_eq!(report.messages[0].outcome, "device error 2");
        assert_eq!(
            report.errors,
            vec!["command-response response error=2 cmd=0x01".to_string()]
        );
    }

    #[test]
    fn leftover_partial_is_reported() {
        let frames = vec![vec![0x0A, 0x13, 0x00, 0x46, 0x01]];
        let report = decode_frames(ChannelRole::QueryResponse, &frames);

        assert_eq!(report.incomplete_remaining, Some(6));
        assert!(report.messages.is_empty());
    }
}
