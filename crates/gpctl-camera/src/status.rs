//! Decoding of complete protocol messages into device state.

use std::sync::Arc;

use gpctl_frame::Message;
use gpctl_transport::ChannelRole;
use tracing::{debug, trace};

use crate::busy::BusyTracker;
use crate::commands::{CMD_HARDWARE_INFO, CMD_STATUS, CMD_STATUS_PUSH};
use crate::error::{ErrorEvent, ErrorSink};
use crate::state::{DeviceState, DeviceStateStore};

pub const STATUS_RECORDING: u8 = 0x01;
pub const STATUS_CHARGING: u8 = 0x02;
pub const STATUS_HOT: u8 = 0x06;
pub const STATUS_BUSY: u8 = 0x08;
pub const STATUS_ELAPSED_SECONDS: u8 = 0x0D;
pub const STATUS_FREE_SPACE: u8 = 0x36;
pub const STATUS_BATTERY: u8 = 0x46;
pub const STATUS_COLD: u8 = 0x55;
pub const STATUS_PRESET: u8 = 0x61;

/// One `[id][len][value]` entry of a status bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusRecord<'a> {
    pub id: u8,
    pub value: &'a [u8],
}

/// Iterator over the records of a status bundle body.
///
/// Stops at the end of the body or at the first malformed record: an empty
/// value, a missing length byte, or a length running past the body.
#[derive(Debug, Clone)]
pub struct StatusRecords<'a> {
    body: &'a [u8],
    pos: usize,
    malformed: bool,
}

impl<'a> StatusRecords<'a> {
    pub fn new(body: &'a [u8]) -> Self {
        Self {
            body,
            pos: 0,
            malformed: false,
        }
    }

    /// True once iteration stopped on a malformed record.
    pub fn hit_malformed(&self) -> bool {
        self.malformed
    }
}

impl<'a> Iterator for StatusRecords<'a> {
    type Item = StatusRecord<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.malformed || self.pos >= self.body.len() {
            return None;
        }
        let rest = &self.body[self.pos..];
        let (id, len) = match rest {
            [id, len, ..] if *len > 0 && usize::from(*len) <= rest.len() - 2 => {
                (*id, usize::from(*len))
            }
            _ => {
                self.malformed = true;
                return None;
            }
        };
        self.pos += 2 + len;
        Some(StatusRecord {
            id,
            value: &rest[2..2 + len],
        })
    }
}

/// What [`StatusDecoder::decode`] did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// The device returned a nonzero error code; the body was not parsed.
    DeviceError { code: u8 },
    /// Hardware info reply applied.
    HardwareInfo,
    /// Status bundle: records applied and whether a malformed tail cut it short.
    Status { applied: usize, truncated: bool },
    /// A plain acknowledgement or an unrecognised command id.
    Ack,
}

#[derive(Default)]
struct BusyUpdate {
    recording: Option<bool>,
    device_busy: Option<bool>,
}

/// Turns complete messages into [`DeviceState`] updates.
///
/// Not reentrant; the dispatcher calls it from a single task.
#[derive(Debug)]
pub struct StatusDecoder {
    store: Arc<DeviceStateStore>,
    busy: Arc<BusyTracker>,
    errors: ErrorSink,
}

impl StatusDecoder {
    pub fn new(store: Arc<DeviceStateStore>, busy: Arc<BusyTracker>, errors: ErrorSink) -> Self {
        Self {
            store,
            busy,
            errors,
        }
    }

    pub fn decode(&self, role: ChannelRole, message: &Message) -> DecodeOutcome {
        if message.is_error() {
            self.errors.emit(ErrorEvent::device(
                role,
                message.command_id,
                message.error_code,
            ));
            return DecodeOutcome::DeviceError {
                code: message.error_code,
            };
        }

        match message.command_id {
            CMD_HARDWARE_INFO => {
                self.apply_hardware_info(&message.body);
                DecodeOutcome::HardwareInfo
            }
            CMD_STATUS | CMD_STATUS_PUSH => self.apply_status(&message.body),
            other => {
                trace!(%role, command_id = other, "acknowledged");
                DecodeOutcome::Ack
            }
        }
    }

    // One publish for the whole bundle.
    fn apply_status(&self, body: &[u8]) -> DecodeOutcome {
        let mut records = StatusRecords::new(body);
        let mut applied = 0usize;
        let mut busy = BusyUpdate::default();

        self.store.modify(|state| {
            for record in records.by_ref() {
                if apply_record(state, record, &mut busy) {
                    applied += 1;
                }
            }
            // Busy settles before observers see the new snapshot.
            if let Some(recording) = busy.recording {
                self.busy.set_recording(recording);
            }
            if let Some(device_busy) = busy.device_busy {
                self.busy.set_device_busy(device_busy);
            }
            applied > 0
        });

        let truncated = records.hit_malformed();
        if truncated {
            debug!(applied, "status bundle stopped at malformed record");
        }
        DecodeOutcome::Status { applied, truncated }
    }

    fn apply_hardware_info(&self, body: &[u8]) {
        let info = HardwareInfo::parse(body);
        if info.model_id.is_none() && info.model.is_none() {
            debug!(len = body.len(), "hardware info reply without model fields");
            return;
        }
        self.store.modify(|state| {
            info.apply(state);
            true
        });
    }
}

/// Returns true if the record changed a snapshot field.
fn apply_record(state: &mut DeviceState, record: StatusRecord<'_>, busy: &mut BusyUpdate) -> bool {
    let value = record.value;
    match record.id {
        STATUS_RECORDING => {
            let recording = flag(value);
            state.recording = Some(recording);
            busy.recording = Some(recording);
        }
        STATUS_ELAPSED_SECONDS => {
            let Some(bytes) = value.first_chunk::<4>() else {
                return false;
            };
            let seconds = u32::from_be_bytes(*bytes);
            state.elapsed_seconds = Some(seconds);
            state.recording = Some(seconds != 0);
            busy.recording = Some(seconds != 0);
        }
        STATUS_BUSY => {
            // Feeds the busy flag only; the snapshot has no field for it.
            busy.device_busy = Some(flag(value));
            return false;
        }
        STATUS_FREE_SPACE => {
            let Some(bytes) = value.first_chunk::<8>() else {
                return false;
            };
            state.remaining_space_bytes = Some(u64::from_le_bytes(*bytes));
        }
        STATUS_PRESET => state.preset = Some(String::from_utf8_lossy(value).into_owned()),
        STATUS_CHARGING => state.charging = Some(flag(value)),
        STATUS_HOT => state.hot = Some(flag(value)),
        STATUS_COLD => state.cold = Some(flag(value)),
        STATUS_BATTERY => state.battery = Some(value[0]),
        other => {
            trace!(status_id = other, len = value.len(), "ignoring unknown status");
            return false;
        }
    }
    true
}

// Records are never empty; the iterator rejects zero-length values.
fn flag(value: &[u8]) -> bool {
    value.first().is_some_and(|b| *b != 0)
}

/// Fields of a hardware info reply.
///
/// The body is a run of length-prefixed fields: model id (big-endian),
/// model name, then optionally board type, firmware version, serial number,
/// AP SSID and AP MAC address.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HardwareInfo {
    pub model_id: Option<u32>,
    pub model: Option<String>,
    pub board_type: Option<String>,
    pub firmware_version: Option<String>,
    pub serial_number: Option<String>,
    pub ap_ssid: Option<String>,
    pub ap_mac_address: Option<String>,
}

impl HardwareInfo {
    pub fn parse(body: &[u8]) -> Self {
        let mut fields = LengthPrefixed { rest: body };
        let mut info = HardwareInfo {
            model_id: fields.next().map(|raw| {
                raw.iter()
                    .take(4)
                    .fold(0u32, |acc, b| (acc << 8) | u32::from(*b))
            }),
            ..Self::default()
        };
        info.model = fields.next().map(text);
        info.board_type = fields.next().map(text);
        info.firmware_version = fields.next().map(text);
        info.serial_number = fields.next().map(text);
        info.ap_ssid = fields.next().map(text);
        info.ap_mac_address = fields.next().map(mac_text);
        info
    }

    fn apply(&self, state: &mut DeviceState) {
        fn set(slot: &mut Option<String>, value: &Option<String>) {
            if value.is_some() {
                slot.clone_from(value);
            }
        }
        if self.model_id.is_some() {
            state.model_id = self.model_id;
        }
        set(&mut state.model, &self.model);
        set(&mut state.board_type, &self.board_type);
        set(&mut state.firmware_version, &self.firmware_version);
        set(&mut state.serial_number, &self.serial_number);
        set(&mut state.ap_mac_address, &self.ap_mac_address);
        if state.wifi_ssid.is_none() {
            state.wifi_ssid.clone_from(&self.ap_ssid);
        }
    }
}

struct LengthPrefixed<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for LengthPrefixed<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let (&len, tail) = self.rest.split_first()?;
        let len = usize::from(len);
        if len > tail.len() {
            self.rest = &[];
            return None;
        }
        let (field, rest) = tail.split_at(len);
        self.rest = rest;
        Some(field)
    }
}

/// Attribute text as the device sends it: UTF-8, possibly NUL padded.
pub fn text(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches('\0')
        .to_string()
}

fn mac_text(raw: &[u8]) -> String {
    if raw.len() == 6 {
        raw.iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(":")
    } else {
        text(raw)
    }
}
