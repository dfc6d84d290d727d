use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use gpctl_camera::DeviceState;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

pub fn print_json<T: Serialize>(out: &T) {
    println!(
        "{}",
        serde_json::to_string(out).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers.to_vec());
    for row in rows {
        table.add_row(row);
    }
    println!("{table}");
}

/// One `key=value` line per row.
pub fn print_pretty(headers: &[&str], rows: Vec<Vec<String>>) {
    for row in rows {
        let line = headers
            .iter()
            .zip(row)
            .map(|(header, value)| format!("{}={value}", header.to_lowercase()))
            .collect::<Vec<_>>()
            .join(" ");
        println!("{line}");
    }
}

pub fn print_rows(format: OutputFormat, headers: &[&str], rows: Vec<Vec<String>>) {
    match format {
        OutputFormat::Pretty => print_pretty(headers, rows),
        _ => print_table(headers, rows),
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

/// Snapshot fields that are known, sorted by field name.
pub fn state_rows(state: &DeviceState) -> Vec<Vec<String>> {
    let Ok(serde_json::Value::Object(fields)) = serde_json::to_value(state) else {
        return Vec::new();
    };
    fields
        .into_iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(field, value)| {
            let value = match value {
                serde_json::Value::String(text) => text,
                other => other.to_string(),
            };
            vec![field, value]
        })
        .collect()
}
