//! Record, tag a highlight with a restart, then stop, against an in-process
//! device that confirms every shutter change with a status push.
//!
//! Run with `cargo run -p gpctl --example record-cycle`.

use std::time::Duration;

use gpctl::camera::{Camera, CameraCommand, CameraConfig, CMD_STATUS_PUSH};
use gpctl::frame::{packetize, Message, DEFAULT_MTU};
use gpctl::transport::{ChannelRole, DeviceIdentity, MemoryDevice, MemoryTransport};

fn confirm_shutter(device: MemoryDevice) {
    let mut writes = device.write_events();
    tokio::spawn(async move {
        while let Some((role, bytes)) = writes.recv().await {
            let recording = if bytes == CameraCommand::ShutterOn.encode() {
                1
            } else if bytes == CameraCommand::ShutterOff.encode() {
                0
            } else {
                continue;
            };
            let ack = Message::new(bytes[1], 0, Vec::new());
            let push = Message::new(CMD_STATUS_PUSH, 0, vec![0x01, 0x01, recording]);
            let replies = [
                (ChannelRole::CommandResponse, ack),
                (ChannelRole::QueryResponse, push),
            ];
            for (reply_role, message) in replies {
                let Ok(frames) = packetize(&message, DEFAULT_MTU) else {
                    continue;
                };
                for frame in frames {
                    device.notify(reply_role, frame);
                }
            }
            println!("device: {role} write {:02x?}", bytes.as_ref());
        }
    });
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (transport, device) =
        MemoryTransport::with_all_roles(DeviceIdentity::new("demo-1", "GoPro 4242"));
    device.set_attribute(ChannelRole::ModelNumber, &b"3E"[..]);
    device.set_attribute(ChannelRole::BatteryLevel, vec![64u8]);
    confirm_shutter(device.clone());

    let config = CameraConfig {
        poll_enabled: false,
        settle_delay: Duration::from_millis(100),
        ..CameraConfig::default()
    };
    let camera = Camera::with_config(transport, config)?;
    camera.connect().await?;

    camera.record().await?;
    camera
        .wait_for_state(|s| s.is_recording(), Duration::from_secs(1))
        .await?;
    println!("recording");

    camera.highlight_with_restart().await?;
    println!("restarted; busy={}", camera.is_busy());

    camera.stop().await?;
    let state = camera
        .wait_for_state(|s| s.recording == Some(false), Duration::from_secs(1))
        .await?;
    println!("final state: {state:?}");

    camera.disconnect().await;
    Ok(())
}
