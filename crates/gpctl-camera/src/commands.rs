//! Static command table.
//!
//! Every payload is already framed with a general (1-byte) header, so the
//! fragmenter writes them as-is.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use chrono::{Datelike, NaiveDateTime, Timelike};
use gpctl_transport::ChannelRole;

/// Hardware info reply.
pub const CMD_HARDWARE_INFO: u8 = 0x3C;
/// Full status bundle (reply to a status query).
pub const CMD_STATUS: u8 = 0x13;
/// Partial status bundle pushed after registering for updates.
pub const CMD_STATUS_PUSH: u8 = 0x93;

/// Presets selectable with [`CameraCommand::Preset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PresetKey {
    VideoGroup,
    PhotoGroup,
    TimelapseGroup,
    Standard,
    Activity,
    Cinematic,
    Photo,
    LiveBurst,
    BurstPhoto,
    NightPhoto,
    TimeWarp,
    TimeLapse,
    NightLapse,
}

impl PresetKey {
    pub const ALL: [PresetKey; 13] = [
        PresetKey::VideoGroup,
        PresetKey::PhotoGroup,
        PresetKey::TimelapseGroup,
        PresetKey::Standard,
        PresetKey::Activity,
        PresetKey::Cinematic,
        PresetKey::Photo,
        PresetKey::LiveBurst,
        PresetKey::BurstPhoto,
        PresetKey::NightPhoto,
        PresetKey::TimeWarp,
        PresetKey::TimeLapse,
        PresetKey::NightLapse,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PresetKey::VideoGroup => "video-group",
            PresetKey::PhotoGroup => "photo-group",
            PresetKey::TimelapseGroup => "timelapse-group",
            PresetKey::Standard => "standard",
            PresetKey::Activity => "activity",
            PresetKey::Cinematic => "cinematic",
            PresetKey::Photo => "photo",
            PresetKey::LiveBurst => "live-burst",
            PresetKey::BurstPhoto => "burst-photo",
            PresetKey::NightPhoto => "night-photo",
            PresetKey::TimeWarp => "time-warp",
            PresetKey::TimeLapse => "time-lapse",
            PresetKey::NightLapse => "night-lapse",
        }
    }

    fn payload(self) -> &'static [u8] {
        match self {
            PresetKey::VideoGroup => &[0x04, 0x3E, 0x02, 0x03, 0xE8],
            PresetKey::PhotoGroup => &[0x04, 0x3E, 0x02, 0x03, 0xE9],
            PresetKey::TimelapseGroup => &[0x04, 0x3E, 0x02, 0x03, 0xEA],
            PresetKey::Standard => &[0x06, 0x40, 0x04, 0x00, 0x00, 0x00, 0x00],
            PresetKey::Activity => &[0x06, 0x40, 0x04, 0x00, 0x00, 0x00, 0x01],
            PresetKey::Cinematic => &[0x06, 0x40, 0x04, 0x00, 0x00, 0x00, 0x02],
            PresetKey::Photo => &[0x06, 0x40, 0x04, 0x00, 0x01, 0x00, 0x00],
            PresetKey::LiveBurst => &[0x06, 0x40, 0x04, 0x00, 0x01, 0x00, 0x01],
            PresetKey::BurstPhoto => &[0x06, 0x40, 0x04, 0x00, 0x01, 0x00, 0x02],
            PresetKey::NightPhoto => &[0x06, 0x40, 0x04, 0x00, 0x01, 0x00, 0x03],
            PresetKey::TimeWarp => &[0x06, 0x40, 0x04, 0x00, 0x02, 0x00, 0x00],
            PresetKey::TimeLapse => &[0x06, 0x40, 0x04, 0x00, 0x02, 0x00, 0x01],
            PresetKey::NightLapse => &[0x06, 0x40, 0x04, 0x00, 0x02, 0x00, 0x02],
        }
    }
}

impl fmt::Display for PresetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PresetKey {
    type Err = String;

    /// Accepts kebab-case, snake_case and camelCase spellings.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = normalize(s);
        PresetKey::ALL
            .into_iter()
            .find(|key| normalize(key.name()) == wanted)
            .ok_or_else(|| format!("unknown preset '{s}'"))
    }
}

fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| *c != '-' && *c != '_')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Wall-clock time as sent by the set-clock command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl ClockTime {
    pub fn from_datetime(dt: &NaiveDateTime) -> Self {
        // Field accessors are range-bounded; only the year needs clamping.
        Self {
            year: u16::try_from(dt.year()).unwrap_or(0),
            month: dt.month() as u8,
            day: dt.day() as u8,
            hour: dt.hour() as u8,
            minute: dt.minute() as u8,
            second: dt.second() as u8,
        }
    }

    /// The host's local time.
    pub fn now_local() -> Self {
        Self::from_datetime(&chrono::Local::now().naive_local())
    }
}

/// Every message the host can send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraCommand {
    KeepAlive,
    ShutterOn,
    ShutterOff,
    Sleep,
    Locate(bool),
    WifiAp(bool),
    Highlight,
    HardwareInfo,
    SetClock(ClockTime),
    Preset(PresetKey),
    RegisterAllStatus,
    QueryAllStatus,
    QueryFreeSpace,
    QueryPreset,
    QueryBattery,
}

impl CameraCommand {
    /// Fixed-payload commands, in display order.
    pub fn table() -> Vec<CameraCommand> {
        let mut table = vec![
            CameraCommand::KeepAlive,
            CameraCommand::ShutterOn,
            CameraCommand::ShutterOff,
            CameraCommand::Sleep,
            CameraCommand::Locate(true),
            CameraCommand::Locate(false),
            CameraCommand::WifiAp(true),
            CameraCommand::WifiAp(false),
            CameraCommand::Highlight,
            CameraCommand::HardwareInfo,
            CameraCommand::RegisterAllStatus,
            CameraCommand::QueryAllStatus,
            CameraCommand::QueryFreeSpace,
            CameraCommand::QueryPreset,
            CameraCommand::QueryBattery,
        ];
        table.extend(PresetKey::ALL.into_iter().map(CameraCommand::Preset));
        table
    }

    /// Role the command is written to.
    pub fn role(&self) -> ChannelRole {
        match self {
            CameraCommand::KeepAlive => ChannelRole::Settings,
            CameraCommand::RegisterAllStatus
            | CameraCommand::QueryAllStatus
            | CameraCommand::QueryFreeSpace
            | CameraCommand::QueryPreset
            | CameraCommand::QueryBattery => ChannelRole::Query,
            _ => ChannelRole::Command,
        }
    }

    pub fn name(&self) -> String {
        match self {
            CameraCommand::KeepAlive => "keep-alive".into(),
            CameraCommand::ShutterOn => "shutter-on".into(),
            CameraCommand::ShutterOff => "shutter-off".into(),
            CameraCommand::Sleep => "sleep".into(),
            CameraCommand::Locate(on) => format!("locate-{}", on_off(*on)),
            CameraCommand::WifiAp(on) => format!("wifi-ap-{}", on_off(*on)),
            CameraCommand::Highlight => "highlight".into(),
            CameraCommand::HardwareInfo => "hardware-info".into(),
            CameraCommand::SetClock(_) => "set-clock".into(),
            CameraCommand::Preset(key) => format!("preset-{key}"),
            CameraCommand::RegisterAllStatus => "register-all-status".into(),
            CameraCommand::QueryAllStatus => "query-all-status".into(),
            CameraCommand::QueryFreeSpace => "query-free-space".into(),
            CameraCommand::QueryPreset => "query-preset".into(),
            CameraCommand::QueryBattery => "query-battery".into(),
        }
    }

    /// Encoded payload, header included.
    pub fn encode(&self) -> Bytes {
        let fixed: &'static [u8] = match self {
            CameraCommand::KeepAlive => &[0x03, 0x5B, 0x01, 0x42],
            CameraCommand::ShutterOn => &[0x03, 0x01, 0x01, 0x01],
            CameraCommand::ShutterOff => &[0x03, 0x01, 0x01, 0x00],
            CameraCommand::Sleep => &[0x01, 0x05],
            CameraCommand::Locate(true) => &[0x03, 0x16, 0x01, 0x01],
            CameraCommand::Locate(false) => &[0x03, 0x16, 0x01, 0x00],
            CameraCommand::WifiAp(true) => &[0x03, 0x17, 0x01, 0x01],
            CameraCommand::WifiAp(false) => &[0x03, 0x17, 0x01, 0x00],
            CameraCommand::Highlight => &[0x01, 0x18],
            CameraCommand::HardwareInfo => &[0x01, CMD_HARDWARE_INFO],
            CameraCommand::Preset(key) => key.payload(),
            CameraCommand::RegisterAllStatus => &[0x01, 0x53],
            CameraCommand::QueryAllStatus => &[0x01, CMD_STATUS],
            CameraCommand::QueryFreeSpace => &[0x02, CMD_STATUS, 0x36],
            CameraCommand::QueryPreset => &[0x02, CMD_STATUS, 0x61],
            CameraCommand::QueryBattery => &[0x02, CMD_STATUS, 0x46],
            CameraCommand::SetClock(time) => {
                let [year_hi, year_lo] = time.year.to_be_bytes();
                return Bytes::from(vec![
                    0x09,
                    0x0D,
                    0x07,
                    year_hi,
                    year_lo,
                    time.month,
                    time.day,
                    time.hour,
                    time.minute,
                    time.second,
                ]);
            }
        };
        Bytes::from_static(fixed)
    }
}

fn on_off(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    #[test]
    fn header_byte_matches_payload_length() {
        for command in CameraCommand::table() {
            let bytes = command.encode();
            assert_eq!(
                usize::from(bytes[0]),
                bytes.len() - 1,
                "{}",
                command.name()
            );
        }
    }

    #[test]
    fn keep_alive_goes_to_settings() {
        assert_eq!(CameraCommand::KeepAlive.role(), ChannelRole::Settings);
        assert_eq!(
            CameraCommand::KeepAlive.encode().as_ref(),
            &[0x03, 0x5B, 0x01, 0x42]
        );
    }

    #[test]
    fn queries_go_to_query_role() {
        assert_eq!(CameraCommand::QueryFreeSpace.role(), ChannelRole::Query);
        assert_eq!(
            CameraCommand::QueryBattery.encode().as_ref(),
            &[0x02, 0x13, 0x46]
        );
        assert_eq!(CameraCommand::ShutterOn.role(), ChannelRole::Command);
    }

    #[test]
    fn preset_payloads() {
        assert_eq!(
            CameraCommand::Preset(PresetKey::TimelapseGroup).encode().as_ref(),
            &[0x04, 0x3E, 0x02, 0x03, 0xEA]
        );
        assert_eq!(
            CameraCommand::Preset(PresetKey::NightPhoto).encode().as_ref(),
            &[0x06, 0x40, 0x04, 0x00, 0x01, 0x00, 0x03]
        );
    }

    #[test]
    fn preset_names_parse_in_any_case_style() {
        assert_eq!("videoGroup".parse::<PresetKey>(), Ok(PresetKey::VideoGroup));
        assert_eq!("time-warp".parse::<PresetKey>(), Ok(PresetKey::TimeWarp));
        assert_eq!("live_burst".parse::<PresetKey>(), Ok(PresetKey::LiveBurst));
        assert!("slowmo".parse::<PresetKey>().is_err());
    }

    #[test]
    fn set_clock_encodes_year_big_endian() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 9)
            .and_then(|d| d.and_hms_opt(14, 5, 59))
            .expect("valid date");
        let command = CameraCommand::SetClock(ClockTime::from_datetime(&dt));
        assert_eq!(
            command.encode().as_ref(),
            &[0x09, 0x0D, 0x07, 0x07, 0xE8, 3, 9, 14, 5, 59]
        );
        assert_eq!(command.role(), ChannelRole::Command);
    }

    #[test]
    fn table_has_unique_names() {
        let table = CameraCommand::table();
        let mut names: Vec<String> = table.iter().map(CameraCommand::name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), table.len());
    }
}
