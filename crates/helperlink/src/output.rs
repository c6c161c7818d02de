use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use helperlink_frame::{FieldSet, Frame, Value};
use helperlink_peer::{CloseReason, ConnectionStatus};
use serde::Serialize;
use serde_json::json;

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
    generation: u16,
    sequence: u32,
    kind: String,
    command: Option<&'static str>,
    code: u16,
    fields: serde_json::Value,
    peer: &'a str,
    timestamp: String,
}

pub fn print_frame(frame: &Frame, peer: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = FrameOutput {
                generation: frame.generation.version(),
                sequence: frame.sequence,
                kind: frame.kind.to_string(),
                command: frame.command().map(|c| c.name()),
                code: frame.code,
                fields: fields_to_json(&frame.fields),
                peer,
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
                .set_header(vec!["GEN", "SEQ", "COMMAND", "CODE", "PEER", "FIELDS"])
                .add_row(vec![
                    frame.generation.version().to_string(),
                    frame.sequence.to_string(),
                    command_label(frame),
                    frame.code.to_string(),
                    peer.to_string(),
                    fields_to_json(&frame.fields).to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "gen={} seq={} command={} code={} peer={} fields={}",
                frame.generation.version(),
                frame.sequence,
                command_label(frame),
                frame.code,
                peer,
                fields_to_json(&frame.fields)
            );
        }
        OutputFormat::Raw => match frame.encode() {
            Ok(bytes) => print_raw(&bytes),
            Err(err) => tracing::warn!(error = %err, "frame cannot be re-encoded"),
        },
    }
}

#[derive(Serialize)]
struct StatusOutput<'a> {
    label: &'a str,
    generation: u16,
    generation_confirmed: bool,
    subsystem: Option<&'a str>,
    subscriptions: &'a [String],
    closed: Option<String>,
    failed: bool,
}

/// Print the final state of a connection.
pub fn print_status(label: &str, status: &ConnectionStatus, format: OutputFormat) {
    let closed = status.closed.as_ref().map(CloseReason::to_string);
    let failed = status.closed.as_ref().is_some_and(CloseReason::is_failure);
    match format {
        OutputFormat::Json => {
            let out = StatusOutput {
                label,
                generation: status.generation.version(),
                generation_confirmed: status.generation_confirmed,
                subsystem: status.subsystem.as_deref(),
                subscriptions: &status.subscriptions,
                closed,
                failed,
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
                .set_header(vec!["CONNECTION", "GEN", "SUBSYSTEM", "EVENTS", "CLOSED"])
                .add_row(vec![
                    label.to_string(),
                    generation_label(status),
                    status.subsystem.clone().unwrap_or_else(|| "-".to_string()),
                    status.subscriptions.join(","),
                    closed.unwrap_or_else(|| "open".to_string()),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            println!(
                "connection={} gen={} subsystem={} closed={}",
                label,
                generation_label(status),
                status.subsystem.as_deref().unwrap_or("-"),
                closed.as_deref().unwrap_or("open")
            );
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

/// Render a field set as a JSON object keyed by field id.
pub fn fields_to_json(fields: &FieldSet) -> serde_json::Value {
    let map = fields
        .iter()
        .map(|(id, value)| (id.to_string(), value_to_json(value)))
        .collect::<serde_json::Map<_, _>>();
    serde_json::Value::Object(map)
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Bool(v) => json!(v),
        Value::U8(v) => json!(v),
        Value::U16(v) => json!(v),
        Value::U32(v) => json!(v),
        Value::U64(v) => json!(v),
        Value::I32(v) => json!(v),
        Value::I64(v) => json!(v),
        Value::Str(v) => json!(v),
        Value::Bytes(v) => match std::str::from_utf8(v) {
            Ok(text) => json!(text),
            Err(_) => json!(format!("<binary {} bytes>", v.len())),
        },
        Value::StrList(v) => json!(v),
        Value::StrMap(pairs) => serde_json::Value::Object(
            pairs
                .iter()
                .map(|(k, v)| (k.clone(), json!(v)))
                .collect(),
        ),
        Value::Block(set) => fields_to_json(set),
        Value::BlockList(sets) => sets.iter().map(fields_to_json).collect(),
    }
}

fn command_label(frame: &Frame) -> String {
    match frame.command() {
        Some(command) => command.name().to_string(),
        None => frame.kind.to_string(),
    }
}

fn generation_label(status: &ConnectionStatus) -> String {
    if status.generation_confirmed {
        status.generation.version().to_string()
    } else {
        format!("{}?", status.generation.version())
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use helperlink_frame::Generation;

    use super::*;

    #[test]
    fn nested_fields_render_as_json() {
        let fields = FieldSet::new()
            .with(1, Value::U32(7))
            .with(
                2,
                Value::StrMap(vec![("Content-Type".to_string(), "text/plain".to_string())]),
            )
            .with(3, Value::Block(FieldSet::new().with(1, Value::Str("x".to_string()))))
            .with(4, Value::Bytes(bytes::Bytes::from_static(&[0xff, 0x00])));

        let rendered = fields_to_json(&fields);
        assert_eq!(rendered["1"], 7);
        assert_eq!(rendered["2"]["Content-Type"], "text/plain");
        assert_eq!(rendered["3"]["1"], "x");
        assert_eq!(rendered["4"], "<binary 2 bytes>");
    }

    #[test]
    fn unconfirmed_generation_is_marked() {
        let status = ConnectionStatus {
            generation: Generation::V3,
            generation_confirmed: false,
            subsystem: None,
            pending_http: 0,
            pending_writes: 0,
            subscriptions: vec![],
            closed: None,
        };
        assert_eq!(generation_label(&status), "3?");
    }
}
