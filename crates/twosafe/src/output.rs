use std::io::IsTerminal;
use std::path::Path;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
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

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn print_table(header: &[&str], rows: Vec<Vec<String>>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header.to_vec());
    for row in rows {
        table.add_row(row);
    }
    println!("{table}");
}

#[derive(Serialize)]
struct SendReceipt<'a> {
    socket: String,
    verb: &'a str,
    path: &'a str,
    bytes: usize,
}

/// Confirms delivery only; the daemon never reports command results.
pub fn print_send_receipt(socket: &Path, verb: &str, path: &str, bytes: usize, format: OutputFormat) {
    let receipt = SendReceipt {
        socket: socket.display().to_string(),
        verb,
        path,
        bytes,
    };
    match format {
        OutputFormat::Json => print_json(&receipt),
        OutputFormat::Table => print_table(
            &["SOCKET", "VERB", "PATH", "BYTES"],
            vec![vec![
                receipt.socket.clone(),
                verb.to_string(),
                path.to_string(),
                bytes.to_string(),
            ]],
        ),
        OutputFormat::Pretty => {
            println!(
                "sent verb={} path={} bytes={} socket={}",
                verb, path, bytes, receipt.socket
            );
        }
    }
}
