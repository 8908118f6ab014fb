//! Command framing and reply parsing for the pod protocol.
//!
//! ## Frame Format
//!
//! Commands are a single opcode byte, optionally followed by a payload:
//!
//! ```text
//! +--------+----------------+------+
//! | Opcode |    Payload     | 0x00 |
//! +--------+----------------+------+
//! | 1 byte |    variable    | 0/1  |
//! +--------+----------------+------+
//! ```
//!
//! There is no length prefix; the device detects the payload end from the
//! terminator (or from content, for unterminated commands). Replies are
//! newline-delimited text. Structured replies start with a two-character
//! tag echoing the command, followed by comma-separated fields:
//!
//! ```text
//! A5,<total_bytes>,<free_bytes>
//! ```

use crate::error::{Error, Result};

/// Terminator byte appended after a terminated command payload.
pub const PAYLOAD_TERMINATOR: u8 = 0x00;

/// Pod command opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Identity/welcome query (0xA0). Opaque one-line reply.
    Identity = 0xA0,

    /// List stored files (0xA1). Tagged reply with a file count.
    ListFiles = 0xA1,

    /// Download a file (0xA2). Opaque acknowledgement.
    DownloadFile = 0xA2,

    /// Upload a file (0xA3). Filename payload, then raw content bytes.
    UploadFile = 0xA3,

    /// Delete a file (0xA4). Filename payload without terminator.
    DeleteFile = 0xA4,

    /// Flash capacity query (0xA5). Tagged reply with total/free bytes.
    FlashInfo = 0xA5,

    /// Format the flash chip (0xA6). Opaque acknowledgement.
    FormatFlash = 0xA6,
}

impl Opcode {
    /// The reply tag for structured commands, `None` for opaque replies.
    pub fn tag(self) -> Option<&'static str> {
        match self {
            Self::ListFiles => Some("A1"),
            Self::FlashInfo => Some("A5"),
            _ => None,
        }
    }
}

/// An encodable command: opcode plus optional payload.
///
/// Immutable once constructed.
#[derive(Debug, Clone)]
pub struct Command {
    opcode: Opcode,
    payload: Vec<u8>,
    terminated: bool,
}

impl Command {
    /// A bare command with no payload.
    pub fn bare(opcode: Opcode) -> Self {
        Self {
            opcode,
            payload: Vec::new(),
            terminated: false,
        }
    }

    /// A command whose payload is followed by the `0x00` terminator.
    pub fn with_payload(opcode: Opcode, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            opcode,
            payload: payload.into(),
            terminated: true,
        }
    }

    /// A command whose payload is sent as-is, without a terminator.
    ///
    /// The delete command frames its filename this way; upload does not.
    /// The asymmetry matches the device firmware and must be preserved.
    pub fn with_unterminated_payload(opcode: Opcode, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            opcode,
            payload: payload.into(),
            terminated: false,
        }
    }

    /// Get the command opcode.
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Build the complete on-wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + self.payload.len() + 1);
        buf.push(self.opcode as u8);
        buf.extend_from_slice(&self.payload);
        if self.terminated {
            buf.push(PAYLOAD_TERMINATOR);
        }
        buf
    }
}

/// Check whether a raw reply line carries the expected two-character tag.
///
/// Only the first two decoded characters are compared; everything else on
/// the line is ignored here. Unsolicited log lines sharing the stream fail
/// this check and get skipped by the engine's bounded re-read.
pub fn matches_tag(raw_line: &[u8], tag: &str) -> bool {
    let text = String::from_utf8_lossy(raw_line);
    text.trim_end_matches(['\r', '\n']).starts_with(tag)
}

/// A validated structured reply: tag token plus comma-separated fields.
#[derive(Debug, Clone)]
pub struct TaggedReply {
    tag: &'static str,
    fields: Vec<String>,
}

impl TaggedReply {
    /// Parse and validate a raw reply line against the expected tag.
    ///
    /// Trailing CR/LF is stripped before splitting on `,`. The leading tag
    /// token is consumed; the remaining pieces become the fields.
    pub fn parse(tag: &'static str, raw_line: &[u8]) -> Result<Self> {
        if !matches_tag(raw_line, tag) {
            return Err(Error::Format(format!(
                "reply does not start with tag \"{tag}\""
            )));
        }

        let text = String::from_utf8_lossy(raw_line);
        let trimmed = text.trim_end_matches(['\r', '\n']);
        let fields = trimmed
            .split(',')
            .skip(1)
            .map(str::to_string)
            .collect();

        Ok(Self { tag, fields })
    }

    /// The reply tag.
    pub fn tag(&self) -> &'static str {
        self.tag
    }

    /// Number of fields after the tag.
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Get a field as text.
    pub fn field_str(&self, index: usize) -> Result<&str> {
        self.fields
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| {
                Error::Format(format!(
                    "\"{}\" reply is missing field {index}",
                    self.tag
                ))
            })
    }

    /// Get a field as a non-negative integer.
    pub fn field_u64(&self, index: usize) -> Result<u64> {
        let raw = self.field_str(index)?;
        raw.trim().parse::<u64>().map_err(|_| {
            Error::Format(format!(
                "\"{}\" reply field {index} is not a non-negative integer: {raw:?}",
                self.tag
            ))
        })
    }
}
