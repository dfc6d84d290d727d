use gpctl_frame::{fragments, FrameError};
use serde::Serialize;

use crate::cmd::commands::all_commands;
use crate::cmd::{parse_hex, spaced_hex, FragmentArgs};
use crate::exit::{frame_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_json, print_raw, print_rows, OutputFormat};

#[derive(Serialize)]
struct FragmentOutput {
    index: usize,
    len: usize,
    bytes: String,
}

#[derive(Serialize)]
struct FragmentReport {
    mtu: usize,
    payload_len: usize,
    fragments: Vec<FragmentOutput>,
}

pub fn run(args: FragmentArgs, format: OutputFormat) -> CliResult<i32> {
    if args.mtu == 0 {
        return Err(frame_error("fragment", FrameError::InvalidMtu(args.mtu)));
    }
    let payload = resolve_payload(&args)?;
    let chunks: Vec<&[u8]> = fragments(&payload, args.mtu).collect();

    match format {
        OutputFormat::Json => print_json(&FragmentReport {
            mtu: args.mtu,
            payload_len: payload.len(),
            fragments: chunks
                .iter()
                .enumerate()
                .map(|(index, chunk)| FragmentOutput {
                    index,
                    len: chunk.len(),
                    bytes: spaced_hex(chunk),
                })
                .collect(),
        }),
        OutputFormat::Raw => {
            for chunk in &chunks {
                print_raw(chunk);
            }
        }
        _ => {
            let rows = chunks
                .iter()
                .enumerate()
                .map(|(index, chunk)| {
                    vec![index.to_string(), chunk.len().to_string(), spaced_hex(chunk)]
                })
                .collect();
            print_rows(format, &["INDEX", "LEN", "BYTES"], rows);
        }
    }
    Ok(SUCCESS)
}

fn resolve_payload(args: &FragmentArgs) -> CliResult<Vec<u8>> {
    if let Some(name) = &args.command {
        return all_commands()
            .into_iter()
            .find(|command| command.name() == *name)
            .map(|command| command.encode().to_vec())
            .ok_or_else(|| CliError::new(USAGE, format!("unknown command '{name}'")));
    }
    match &args.payload {
        Some(hex) => parse_hex(hex),
        None => Err(CliError::new(USAGE, "no payload provided")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(payload: Option<&str>, command: Option<&str>) -> FragmentArgs {
        FragmentArgs {
            payload: payload.map(str::to_string),
            command: command.map(str::to_string),
            mtu: 20,
        }
    }

    #[test]
    fn resolves_named_command() {
        let payload = resolve_payload(&args(None, Some("query-battery")))
            .expect("known command should resolve");
        assert_eq!(payload, vec![0x02, 0x13, 0x46]);
    }

    #[test]
    fn unknown_command_is_usage_error() {
        let err = resolve_payload(&args(None, Some("warp-drive")))
            .expect_err("unknown command should fail");
        assert_eq!(err.code, USAGE);
    }

    #[test]
    fn zero_mtu_is_rejected() {
        let mut bad = args(Some("0102"), None);
        bad.mtu = 0;
        let err = run(bad, OutputFormat::Json).expect_err("zero mtu should fail");
        assert_eq!(err.code, USAGE);
    }
}
