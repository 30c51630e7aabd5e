use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use commlink_endpoint::FrameEvent;
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

#[derive(Serialize)]
struct FrameOutput<'a> {
    source: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    local: Option<&'a str>,
    size: usize,
    hex: String,
    text: Option<&'a str>,
    timestamp: String,
}

pub fn print_frame(event: &FrameEvent, format: OutputFormat) {
    let source = event.source.as_deref().unwrap_or("line");
    let payload = event.payload.as_ref();
    match format {
        OutputFormat::Json => {
            let out = FrameOutput {
                source,
                local: event.local.as_deref(),
                size: payload.len(),
                hex: hex(payload),
                text: printable_text(payload),
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SOURCE", "SIZE", "HEX", "TEXT"])
                .add_row(vec![
                    source.to_string(),
                    payload.len().to_string(),
                    hex(payload),
                    printable_text(payload).unwrap_or("").to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "source={} size={} payload={}",
                source,
                payload.len(),
                hex(payload)
            );
        }
        OutputFormat::Raw => print_raw(payload),
    }
}

#[derive(Serialize)]
struct PortsOutput<'a> {
    ports: &'a [String],
}

pub fn print_ports(ports: &[String], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(&PortsOutput { ports })
                    .unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["PORT"]);
            for port in ports {
                table.add_row(vec![port.clone()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            for port in ports {
                println!("{port}");
            }
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

/// Space-separated uppercase hex, the way equipment manuals print frames.
pub fn hex(payload: &[u8]) -> String {
    payload
        .iter()
        .map(|byte| format!("{byte:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Payload as text when it is printable ASCII apart from a trailing
/// terminator.
fn printable_text(payload: &[u8]) -> Option<&str> {
    let body = match payload.split_last() {
        Some((&last, rest)) if last == 0 || last == b'\n' || last == b'\r' => rest,
        _ => payload,
    };
    if body.is_empty() || !body.iter().all(|byte| byte.is_ascii_graphic() || *byte == b' ') {
        return None;
    }
    std::str::from_utf8(body).ok()
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_is_spaced_uppercase() {
        assert_eq!(hex(&[0x01, 0xAB, 0x00]), "01 AB 00");
        assert_eq!(hex(&[]), "");
    }

    #[test]
    fn printable_text_strips_terminator() {
        assert_eq!(printable_text(b"PING\x00"), Some("PING"));
        assert_eq!(printable_text(b"OK\r"), Some("OK"));
    }

    #[test]
    fn binary_payload_has_no_text() {
        assert_eq!(printable_text(&[0x01, 0x02, 0x00]), None);
        assert_eq!(printable_text(&[0x00]), None);
    }
}
