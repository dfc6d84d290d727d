use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::{Args, Subcommand};
use gpctl_camera::PresetKey;
use gpctl_transport::ChannelRole;

use crate::exit::{CliError, CliResult, DATA_INVALID, USAGE};
use crate::output::OutputFormat;

pub mod commands;
pub mod decode;
pub mod fragment;
pub mod simulate;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Reassemble and decode captured notification frames.
    Decode(DecodeArgs),
    /// Split a payload into MTU-sized writes.
    Fragment(FragmentArgs),
    /// List the command table with encoded payloads.
    Commands(CommandsArgs),
    /// Drive a simulated camera through a script of actions.
    Simulate(SimulateArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Decode(args) => decode::run(args, format),
        Command::Fragment(args) => fragment::run(args, format),
        Command::Commands(args) => commands::run(args, format),
        Command::Simulate(args) => simulate::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Notification frames in hex, one argument per frame.
    #[arg(required = true, value_name = "HEX")]
    pub frames: Vec<String>,
    /// Role the frames arrived on.
    #[arg(long, default_value = "query-response")]
    pub role: ChannelRole,
}

#[derive(Args, Debug)]
pub struct FragmentArgs {
    /// Payload in hex.
    #[arg(value_name = "HEX", required_unless_present = "command", conflicts_with = "command")]
    pub payload: Option<String>,
    /// Fragment the encoded payload of a named command instead.
    #[arg(long, value_name = "NAME")]
    pub command: Option<String>,
    /// Maximum bytes per write.
    #[arg(long, default_value_t = gpctl_frame::DEFAULT_MTU)]
    pub mtu: usize,
}

#[derive(Args, Debug, Default)]
pub struct CommandsArgs {
    /// Only list commands written to this role.
    #[arg(long)]
    pub role: Option<ChannelRole>,
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Actions to run in order (comma-separated or repeated).
    #[arg(value_name = "ACTION", value_delimiter = ',')]
    pub actions: Vec<Action>,
    /// Camera config file (JSON).
    #[arg(long, value_name = "FILE", env = "GPCTL_CONFIG")]
    pub config: Option<PathBuf>,
    /// Override the stop confirmation timeout (e.g. 8s, 500ms).
    #[arg(long)]
    pub stop_timeout: Option<String>,
    /// Pause after each action so notifications land (e.g. 100ms).
    #[arg(long, default_value = "100ms")]
    pub step: String,
    /// Disable the background poller.
    #[arg(long)]
    pub no_poll: bool,
    /// Simulated camera never confirms a stop.
    #[arg(long)]
    pub ignore_stop: bool,
    /// Advertised device name.
    #[arg(long, default_value = "GoPro 2233")]
    pub name: String,
    /// Simulated battery level (0-100).
    #[arg(long, default_value_t = 87, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub battery: u8,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// One scripted camera operation for `simulate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Record,
    Stop,
    Highlight,
    HighlightRestart,
    Sleep,
    Locate(bool),
    WifiAp(bool),
    Preset(PresetKey),
    SetClock,
    QueryFreeSpace,
    QueryPreset,
    QueryAllStatus,
    Battery,
    Wait(Duration),
}

impl Action {
    pub fn name(&self) -> String {
        match self {
            Action::Record => "record".into(),
            Action::Stop => "stop".into(),
            Action::Highlight => "highlight".into(),
            Action::HighlightRestart => "highlight-restart".into(),
            Action::Sleep => "sleep".into(),
            Action::Locate(on) => format!("locate-{}", if *on { "on" } else { "off" }),
            Action::WifiAp(on) => format!("wifi-{}", if *on { "on" } else { "off" }),
            Action::Preset(key) => format!("preset={key}"),
            Action::SetClock => "clock".into(),
            Action::QueryFreeSpace => "space".into(),
            Action::QueryPreset => "preset-query".into(),
            Action::QueryAllStatus => "status".into(),
            Action::Battery => "battery".into(),
            Action::Wait(d) => format!("wait={}ms", d.as_millis()),
        }
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(key) = s.strip_prefix("preset=") {
            return key.parse().map(Action::Preset);
        }
        if let Some(raw) = s.strip_prefix("wait=") {
            return parse_duration(raw)
                .map(Action::Wait)
                .map_err(|err| err.message);
        }
        let action = match s {
            "record" => Action::Record,
            "stop" => Action::Stop,
            "highlight" => Action::Highlight,
            "highlight-restart" => Action::HighlightRestart,
            "sleep" => Action::Sleep,
            "locate-on" => Action::Locate(true),
            "locate-off" => Action::Locate(false),
            "wifi-on" => Action::WifiAp(true),
            "wifi-off" => Action::WifiAp(false),
            "clock" => Action::SetClock,
            "space" => Action::QueryFreeSpace,
            "preset-query" => Action::QueryPreset,
            "status" => Action::QueryAllStatus,
            "battery" => Action::Battery,
            other => return Err(format!("unknown action '{other}'")),
        };
        Ok(action)
    }
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

/// Hex bytes, tolerating a `0x` prefix and space, colon or dash separators.
pub fn parse_hex(input: &str) -> CliResult<Vec<u8>> {
    let trimmed = input.trim();
    let trimmed = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let digits: String = trimmed
        .chars()
        .filter(|c| !matches!(c, ' ' | ':' | '-'))
        .collect();
    hex::decode(&digits).map_err(|err| CliError::new(DATA_INVALID, format!("invalid hex '{input}': {err}")))
}

/// Lower-case hex with a space between bytes.
pub fn spaced_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_durations() {
        assert_eq!(parse_duration("250ms").expect("ms should parse"), Duration::from_millis(250));
        assert_eq!(parse_duration("3s").expect("s should parse"), Duration::from_secs(3));
        assert_eq!(parse_duration("5").expect("bare should parse"), Duration::from_secs(5));
        assert_eq!(parse_duration("0ms").expect_err("zero should fail").code, USAGE);
    }

    #[test]
    fn parses_separated_hex() {
        assert_eq!(
            parse_hex("0x08:93:00").expect("hex should parse"),
            vec![0x08, 0x93, 0x00]
        );
        assert_eq!(
            parse_hex("03 5b 01 42").expect("hex should parse"),
            vec![0x03, 0x5B, 0x01, 0x42]
        );
        assert_eq!(parse_hex("0g").expect_err("bad hex should fail").code, DATA_INVALID);
    }

    #[test]
    fn formats_spaced_hex() {
        assert_eq!(spaced_hex(&[0x02, 0x13, 0x46]), "02 13 46");
        assert_eq!(spaced_hex(&[]), "");
    }

    #[test]
    fn parses_actions() {
        assert_eq!("wifi-off".parse::<Action>(), Ok(Action::WifiAp(false)));
        assert_eq!(
            "preset=cinematic".parse::<Action>(),
            Ok(Action::Preset(PresetKey::Cinematic))
        );
        assert!("wait=0ms".parse::<Action>().is_err());
        assert!("dance".parse::<Action>().is_err());
    }
}
