use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use pioneers_frame::{ids, IdClass, Message, Packet};
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
struct PacketOutput<'a> {
    id: u8,
    id_name: &'a str,
    class: &'a str,
    index: u16,
    payload: String,
    peer: &'a str,
    timestamp: String,
}

pub fn print_packet(packet: &Packet, message: &Message, peer: &str, format: OutputFormat) {
    let class = class_name(IdClass::of(message.id));
    match format {
        OutputFormat::Json => {
            let out = PacketOutput {
                id: message.id,
                id_name: ids::id_name(message.id),
                class,
                index: message.index,
                payload: payload_preview(message),
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
                .set_header(vec!["ID", "INDEX", "PEER", "PAYLOAD"])
                .add_row(vec![
                    ids::id_name(message.id).to_string(),
                    message.index.to_string(),
                    peer.to_string(),
                    payload_preview(message),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "id={:#04x} ({}) index={} peer={} payload={}",
                message.id,
                ids::id_name(message.id),
                message.index,
                peer,
                payload_preview(message)
            );
        }
        OutputFormat::Raw => print_raw(packet.as_bytes()),
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn class_name(class: IdClass) -> &'static str {
    match class {
        IdClass::Measurement => "measurement",
        IdClass::Status => "status",
        IdClass::Message => "message",
        IdClass::Command => "command",
    }
}

/// Text for status and message packets, hex for everything else.
fn payload_preview(message: &Message) -> String {
    match IdClass::of(message.id) {
        IdClass::Status | IdClass::Message => message.text(),
        _ => message
            .data()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(" "),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
