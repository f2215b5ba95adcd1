//! Fault reporting: log locally, mirror as short status packets.

use pioneers_frame::{encode, Node, Packet, ProtocolError, PAYLOAD_SIZE};
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Error,
    /// Serious, but only operator commands and the burn-wire rule stop the
    /// mission.
    Fatal,
}

impl Severity {
    fn tag(self) -> &'static str {
        match self {
            Severity::Info => "I:",
            Severity::Error => "E:",
            Severity::Fatal => "F:",
        }
    }

    /// Emit `text` through `tracing` at this severity.
    pub fn log(self, text: &str) {
        match self {
            Severity::Info => info!(status = text, "status"),
            Severity::Error => error!(status = text, "status"),
            Severity::Fatal => error!(fatal = true, status = text, "status"),
        }
    }
}

/// `tag` + `text`, cut to fit a payload without splitting a character.
pub fn status_text(severity: Severity, text: &str) -> String {
    let mut out = String::with_capacity(PAYLOAD_SIZE);
    out.push_str(severity.tag());
    for ch in text.chars() {
        if out.len() + ch.len_utf8() > PAYLOAD_SIZE {
            break;
        }
        out.push(ch);
    }
    out
}

/// Builds this node's status and message packets with a running index.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    node: Node,
    index: u16,
}

impl StatusReporter {
    pub fn new(node: Node) -> Self {
        Self { node, index: 0 }
    }

    pub fn node(&self) -> Node {
        self.node
    }

    fn next_index(&mut self) -> u16 {
        let index = self.index;
        self.index = self.index.wrapping_add(1);
        index
    }

    /// Log `text` and build the matching status packet.
    pub fn status(&mut self, severity: Severity, text: &str) -> Result<Packet, ProtocolError> {
        severity.log(text);
        let index = self.next_index();
        encode(
            self.node.status_id(),
            index,
            status_text(severity, text).as_bytes(),
        )
    }

    /// Free-text message packet; text beyond one payload is dropped.
    pub fn message(&mut self, text: &str) -> Result<Packet, ProtocolError> {
        let index = self.next_index();
        let bytes = text.as_bytes();
        encode(
            self.node.message_id(),
            index,
            &bytes[..bytes.len().min(PAYLOAD_SIZE)],
        )
    }
}
