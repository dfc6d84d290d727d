//! A scripted stand-in for a camera, driven by the device side of a
//! [`MemoryTransport`](gpctl_transport::MemoryTransport).
//!
//! Every command the host sends fits in one write, so each observed write is
//! handled as a whole command. Replies go out packetized at the default MTU,
//! which exercises multi-frame reassembly for the larger bundles.

use gpctl_camera::status::{
    STATUS_BATTERY, STATUS_BUSY, STATUS_CHARGING, STATUS_COLD, STATUS_ELAPSED_SECONDS,
    STATUS_FREE_SPACE, STATUS_HOT, STATUS_PRESET, STATUS_RECORDING,
};
use gpctl_camera::{CameraCommand, PresetKey, CMD_HARDWARE_INFO, CMD_STATUS, CMD_STATUS_PUSH};
use gpctl_frame::{packetize, Message, DEFAULT_MTU};
use gpctl_transport::{ChannelRole, MemoryDevice};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const CMD_SHUTTER: u8 = 0x01;
const CMD_REGISTER_STATUS: u8 = 0x53;

const ALL_STATUS: [u8; 9] = [
    STATUS_RECORDING,
    STATUS_CHARGING,
    STATUS_HOT,
    STATUS_BUSY,
    STATUS_ELAPSED_SECONDS,
    STATUS_FREE_SPACE,
    STATUS_BATTERY,
    STATUS_COLD,
    STATUS_PRESET,
];

#[derive(Debug, Clone)]
pub struct SimOptions {
    /// Never confirm a shutter-off.
    pub ignore_stop: bool,
    pub battery: u8,
    pub free_space: u64,
    pub model: String,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            ignore_stop: false,
            battery: 87,
            free_space: 64 * 1024 * 1024 * 1024,
            model: "HERO-SIM".to_string(),
        }
    }
}

pub struct SimulatedCamera {
    device: MemoryDevice,
    options: SimOptions,
    recording: bool,
    elapsed: u32,
    preset: PresetKey,
}

impl SimulatedCamera {
    /// Wrap `device` and publish its readable attributes.
    pub fn new(device: MemoryDevice, options: SimOptions) -> Self {
        device.set_attribute(ChannelRole::ModelNumber, &b"3E"[..]);
        device.set_attribute(ChannelRole::BatteryLevel, vec![options.battery]);
        device.set_attribute(ChannelRole::WifiSsid, &b"GP-SIM\0"[..]);
        device.set_attribute(ChannelRole::WifiPassword, &b"sim-pass"[..]);
        device.set_attribute(ChannelRole::WifiState, &b"1"[..]);
        Self {
            device,
            options,
            recording: false,
            elapsed: 0,
            preset: PresetKey::Standard,
        }
    }

    /// Answer writes until the device side is dropped.
    pub fn spawn(mut self) -> JoinHandle<()> {
        let mut writes = self.device.write_events();
        tokio::spawn(async move {
            while let Some((role, bytes)) = writes.recv().await {
                self.handle(role, &bytes);
            }
        })
    }

    fn handle(&mut self, role: ChannelRole, write: &[u8]) {
        if let Some(key) = PresetKey::ALL
            .into_iter()
            .find(|key| CameraCommand::Preset(*key).encode().as_ref() == write)
        {
            self.preset = key;
            self.reply(ChannelRole::CommandResponse, write[1], &[]);
            self.push(&[STATUS_PRESET]);
            return;
        }

        let [_len, command_id, args @ ..] = write else {
            debug!(%role, len = write.len(), "ignoring short write");
            return;
        };
        match role {
            ChannelRole::Command => self.on_command(*command_id, args),
            ChannelRole::Settings => self.reply(ChannelRole::SettingsResponse, *command_id, &[]),
            ChannelRole::Query => self.on_query(*command_id, args),
            other => debug!(role = %other, "ignoring write"),
        }
    }

    fn on_command(&mut self, command_id: u8, args: &[u8]) {
        match (command_id, args) {
            (CMD_SHUTTER, [_, 1]) => {
                self.reply(ChannelRole::CommandResponse, command_id, &[]);
                self.recording = true;
                self.elapsed = 1;
                self.push(&[STATUS_RECORDING, STATUS_ELAPSED_SECONDS]);
            }
            (CMD_SHUTTER, [_, 0]) => {
                self.reply(ChannelRole::CommandResponse, command_id, &[]);
                if self.options.ignore_stop {
                    debug!("ignoring shutter off");
                    return;
                }
                self.recording = false;
                self.elapsed = 0;
                self.push(&[STATUS_RECORDING, STATUS_ELAPSED_SECONDS]);
            }
            (CMD_HARDWARE_INFO, _) => {
                let body = self.hardware_info();
                self.reply(ChannelRole::CommandResponse, command_id, &body);
            }
            _ => self.reply(ChannelRole::CommandResponse, command_id, &[]),
        }
    }

    fn on_query(&mut self, command_id: u8, args: &[u8]) {
        match command_id {
            CMD_REGISTER_STATUS => {
                self.reply(ChannelRole::QueryResponse, command_id, &[]);
                self.push(&ALL_STATUS);
            }
            CMD_STATUS if args.is_empty() => {
                let body = self.records(&ALL_STATUS);
                self.reply(ChannelRole::QueryResponse, CMD_STATUS, &body);
            }
            CMD_STATUS => {
                let body = self.records(args);
                self.reply(ChannelRole::QueryResponse, CMD_STATUS, &body);
            }
            _ => self.reply(ChannelRole::QueryResponse, command_id, &[]),
        }
    }

    fn push(&self, ids: &[u8]) {
        let body = self.records(ids);
        self.reply(ChannelRole::QueryResponse, CMD_STATUS_PUSH, &body);
    }

    fn reply(&self, role: ChannelRole, command_id: u8, body: &[u8]) {
        let message = Message::new(command_id, 0, body.to_vec());
        let frames = match packetize(&message, DEFAULT_MTU) {
            Ok(frames) => frames,
            Err(err) => {
                warn!(%role, command_id, error = %err, "cannot packetize reply");
                return;
            }
        };
        for frame in frames {
            self.device.notify(role, frame);
        }
    }

    fn records(&self, ids: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        for &id in ids {
            let value: Vec<u8> = match id {
                STATUS_RECORDING => vec![u8::from(self.recording)],
                STATUS_ELAPSED_SECONDS => self.elapsed.to_be_bytes().to_vec(),
                STATUS_FREE_SPACE => self.options.free_space.to_le_bytes().to_vec(),
                STATUS_BATTERY => vec![self.options.battery],
                STATUS_PRESET => self.preset.name().as_bytes().to_vec(),
                STATUS_CHARGING | STATUS_HOT | STATUS_BUSY | STATUS_COLD => vec![0],
                _ => continue,
            };
            body.push(id);
            body.push(value.len() as u8);
            body.extend_from_slice(&value);
        }
        body
    }

    fn hardware_info(&self) -> Vec<u8> {
        let fields: [&[u8]; 7] = [
            &[0x00, 0x00, 0x00, 0x3E],
            self.options.model.as_bytes(),
            b"0x05",
            b"H23.01.01.10.00",
            b"C3501324500000",
            b"GP-SIM",
            &[0x24, 0x74, 0xF7, 0x00, 0x22, 0x33],
        ];
        let mut body = Vec::new();
        for field in fields {
            body.push(field.len() as u8);
            body.extend_from_slice(field);
        }
        body
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use gpctl_camera::{Camera, CameraConfig, StatusRecords};
    use gpctl_transport::{DeviceIdentity, MemoryTransport};

    use super::*;

    fn sim_camera(options: SimOptions) -> Camera<MemoryTransport> {
        let (transport, device) =
            MemoryTransport::with_all_roles(DeviceIdentity::new("sim-1", "GoPro 2233"));
        SimulatedCamera::new(device, options).spawn();
        let config = CameraConfig {
            poll_enabled: false,
            ..CameraConfig::default()
        };
        Camera::with_config(transport, config).expect("config should be valid")
    }

    #[test]
    fn full_status_bundle_covers_every_decoded_status() {
        let (_transport, device) =
            MemoryTransport::with_all_roles(DeviceIdentity::new("sim-1", "GoPro 2233"));
        let sim = SimulatedCamera::new(device, SimOptions::default());
        let body = sim.records(&ALL_STATUS);

        let mut records = StatusRecords::new(&body);
        let ids: Vec<u8> = records.by_ref().map(|record| record.id).collect();
        assert!(!records.hit_malformed());
        assert_eq!(ids, ALL_STATUS.to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn connect_picks_up_hardware_info_and_status() {
        let camera = sim_camera(SimOptions::default());
        camera.connect().await.expect("connect should succeed");

        let state = camera
            .wait_for_state(|s| s.preset.is_some() && s.model.is_some(), Duration::from_secs(1))
            .await
            .expect("sim should report state");
        assert_eq!(state.model.as_deref(), Some("HERO-SIM"));
        assert_eq!(state.model_id, Some(0x3E));
        assert_eq!(state.preset.as_deref(), Some("standard"));
        assert_eq!(state.battery, Some(87));
        assert_eq!(state.remaining_space_bytes, Some(64 * 1024 * 1024 * 1024));
        assert_eq!(state.ap_mac_address.as_deref(), Some("24:74:f7:00:22:33"));
        assert_eq!(state.recording, Some(false));
        assert_eq!(state.wifi_ssid.as_deref(), Some("GP-SIM"));
        assert_eq!(state.last_error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn highlight_restart_round_trips() {
        let camera = sim_camera(SimOptions::default());
        camera.connect().await.expect("connect should succeed");
        camera.record().await.expect("record should send");
        camera
            .wait_for_state(|s| s.is_recording(), Duration::from_secs(1))
            .await
            .expect("recording should start");

        camera
            .highlight_with_restart()
            .await
            .expect("restart should succeed");
        assert_eq!(camera.state().and_then(|s| s.recording), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn ignored_stop_times_out() {
        let camera = sim_camera(SimOptions {
            ignore_stop: true,
            ..SimOptions::default()
        });
        camera.connect().await.expect("connect should succeed");
        camera.record().await.expect("record should send");
        camera
            .wait_for_state(|s| s.is_recording(), Duration::from_secs(1))
            .await
            .expect("recording should start");

        let err = camera
            .highlight_with_restart()
            .await
            .expect_err("stop should never be confirmed");
        assert!(matches!(err, gpctl_camera::CameraError::StopTimeout(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn preset_change_is_pushed() {
        let camera = sim_camera(SimOptions::default());
        camera.connect().await.expect("connect should succeed");
        camera
            .set_preset(PresetKey::TimeWarp)
            .await
            .expect("preset should send");

        let state = camera
            .wait_for_state(|s| s.preset.as_deref() == Some("time-warp"), Duration::from_secs(1))
            .await
            .expect("preset should be pushed");
        assert_eq!(state.preset.as_deref(), Some("time-warp"));
    }
}
