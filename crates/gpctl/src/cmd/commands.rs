use gpctl_camera::{CameraCommand, ClockTime};
use serde::Serialize;

use crate::cmd::{spaced_hex, CommandsArgs};
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_json, print_raw, print_rows, OutputFormat};

#[derive(Serialize)]
struct CommandOutput {
    name: String,
    role: &'static str,
    payload: String,
}

/// The fixed table plus set-clock stamped with the current local time.
pub fn all_commands() -> Vec<CameraCommand> {
    let mut commands = CameraCommand::table();
    commands.push(CameraCommand::SetClock(ClockTime::now_local()));
    commands
}

pub fn run(args: CommandsArgs, format: OutputFormat) -> CliResult<i32> {
    let commands: Vec<CameraCommand> = all_commands()
        .into_iter()
        .filter(|command| args.role.is_none_or(|role| command.role() == role))
        .collect();

    match format {
        OutputFormat::Json => {
            let out: Vec<CommandOutput> = commands
                .iter()
                .map(|command| CommandOutput {
                    name: command.name(),
                    role: command.role().name(),
                    payload: spaced_hex(&command.encode()),
                })
                .collect();
            print_json(&out);
        }
        OutputFormat::Raw => {
            for command in &commands {
                print_raw(&command.encode());
            }
        }
        _ => {
            let rows = commands
                .iter()
                .map(|command| {
                    vec![
                        command.name(),
                        command.role().to_string(),
                        spaced_hex(&command.encode()),
                    ]
                })
                .collect();
            print_rows(format, &["NAME", "ROLE", "PAYLOAD"], rows);
        }
    }
    Ok(SUCCESS)
}
