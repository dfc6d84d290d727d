use std::time::Duration;

use gpctl_camera::{Camera, CameraConfig, ClockTime, DeviceState, ErrorEvent};
use gpctl_transport::{DeviceIdentity, MemoryTransport};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::info;

use crate::cmd::{parse_duration, Action, SimulateArgs};
use crate::exit::{camera_error, io_error, CliError, CliResult, FAILURE, SUCCESS};
use crate::output::{print_json, print_rows, state_rows, OutputFormat};
use crate::sim::{SimOptions, SimulatedCamera};

#[derive(Debug, Serialize)]
struct StepOutput {
    action: String,
    result: String,
    revision: u64,
}

#[derive(Debug, Serialize)]
struct SimulateReport {
    steps: Vec<StepOutput>,
    errors: Vec<String>,
    state: Option<DeviceState>,
}

pub fn run(args: SimulateArgs, format: OutputFormat) -> CliResult<i32> {
    let config = load_config(&args)?;
    let step = parse_duration(&args.step)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .map_err(|err| io_error("runtime", err))?;

    runtime.block_on(async {
        tokio::select! {
            result = simulate(&args, config, step, format) => result,
            signal = tokio::signal::ctrl_c() => match signal {
                Ok(()) => {
                    info!("interrupted");
                    Err(CliError::new(FAILURE, "interrupted"))
                }
                Err(err) => Err(io_error("signal", err)),
            },
        }
    })
}

fn load_config(args: &SimulateArgs) -> CliResult<CameraConfig> {
    let mut config = match &args.config {
        Some(path) => CameraConfig::from_json_file(path)
            .map_err(|err| camera_error("config", err))?,
        None => CameraConfig::default(),
    };
    if let Some(raw) = &args.stop_timeout {
        config.stop_timeout = parse_duration(raw)?;
    }
    if args.no_poll {
        config.poll_enabled = false;
    }
    config
        .validate()
        .map_err(|err| camera_error("config", err))?;
    Ok(config)
}

async fn simulate(
    args: &SimulateArgs,
    config: CameraConfig,
    step: Duration,
    format: OutputFormat,
) -> CliResult<i32> {
    let (transport, device) =
        MemoryTransport::with_all_roles(DeviceIdentity::new("sim-0001", args.name.clone()));
    let options = SimOptions {
        ignore_stop: args.ignore_stop,
        battery: args.battery,
        ..SimOptions::default()
    };
    let sim = SimulatedCamera::new(device, options).spawn();

    let camera = Camera::with_config(transport, config)
        .map_err(|err| camera_error("config", err))?;
    let mut errors = camera.subscribe_errors();
    camera
        .connect()
        .await
        .map_err(|err| camera_error("connect", err))?;
    tokio::time::sleep(step).await;

    let mut steps = Vec::with_capacity(args.actions.len());
    let mut failure = None;
    for action in &args.actions {
        let name = action.name();
        match perform(&camera, action).await {
            Ok(result) => {
                tokio::time::sleep(step).await;
                steps.push(StepOutput {
                    action: name,
                    result,
                    revision: camera.revision(),
                });
            }
            Err(err) => {
                steps.push(StepOutput {
                    action: name.clone(),
                    result: format!("error: {err}"),
                    revision: camera.revision(),
                });
                failure = Some(camera_error(&name, err));
                break;
            }
        }
    }

    let report = SimulateReport {
        steps,
        errors: drain(&mut errors),
        state: camera.state(),
    };
    camera.disconnect().await;
    sim.abort();

    print_report(&report, format);
    match failure {
        Some(err) => Err(err),
        None => Ok(SUCCESS),
    }
}

async fn perform(
    camera: &Camera<MemoryTransport>,
    action: &Action,
) -> gpctl_camera::Result<String> {
    match action {
        Action::Record => camera.record().await?,
        Action::Stop => camera.stop().await?,
        Action::Highlight => camera.highlight().await?,
        Action::HighlightRestart => camera.highlight_with_restart().await?,
        Action::Sleep => camera.sleep().await?,
        Action::Locate(on) => camera.toggle_locate(*on).await?,
        Action::WifiAp(on) => camera.toggle_wifi_ap(*on).await?,
        Action::Preset(key) => camera.set_preset(*key).await?,
        Action::SetClock => camera.set_clock(ClockTime::now_local()).await?,
        Action::QueryFreeSpace => camera.query_free_space().await?,
        Action::QueryPreset => camera.query_preset().await?,
        Action::QueryAllStatus => camera.query_all_status().await?,
        Action::Battery => {
            return Ok(match camera.read_battery().await? {
                Some(percent) => format!("battery {percent}%"),
                None => "battery queried".to_string(),
            });
        }
        Action::Wait(duration) => tokio::time::sleep(*duration).await,
    }
    Ok("ok".to_string())
}

fn drain(errors: &mut broadcast::Receiver<ErrorEvent>) -> Vec<String> {
    let mut out = Vec::new();
    loop {
        match errors.try_recv() {
            Ok(event) => out.push(event.to_string()),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                out.push(format!("({skipped} errors dropped)"));
            }
            Err(_) => return out,
        }
    }
}

fn print_report(report: &SimulateReport, format: OutputFormat) {
    if let OutputFormat::Json = format {
        print_json(report);
        return;
    }
    let rows = report
        .steps
        .iter()
        .map(|s| vec![s.action.clone(), s.result.clone(), s.revision.to_string()])
        .collect();
    print_rows(format, &["ACTION", "RESULT", "REVISION"], rows);
    for error in &report.errors {
        println!("error event: {error}");
    }
    if let Some(state) = &report.state {
        print_rows(format, &["FIELD", "VALUE"], state_rows(state));
    }
}
