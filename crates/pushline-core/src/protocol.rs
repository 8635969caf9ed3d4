//! Stream vocabulary and message classification
//!
//! The server pushes line-delimited messages over a long-lived HTTP response
//! body. A handful of control words share the channel with data lines; this
//! module classifies a single line into a [`StreamMessage`] and parses the
//! pipe-delimited update payload of data lines.

use crate::error::{ProtocolError, ProtocolResult};

/// Relative path of the create-session endpoint.
pub const CREATE_SESSION_PATH: &str = "stream/create_session.txt";
/// Relative path of the bind-session endpoint.
pub const BIND_SESSION_PATH: &str = "stream/bind_session.txt";
/// Relative path of the control endpoint.
pub const CONTROL_PATH: &str = "stream/control.txt";

/// Control operation: create and activate a new table.
pub const OP_ADD: &str = "add";
/// Control operation: delete a previously created table.
pub const OP_DELETE: &str = "delete";
/// Control operation: force closure of an existing session.
pub const OP_DESTROY: &str = "destroy";

/// Success marker, first line of handshake and control responses.
pub const OK: &str = "OK";

/// Handshake header carrying the server-assigned session id.
pub const SESSION_ID_KEY: &str = "SessionId";
/// Handshake header carrying an optional control-link address override.
pub const CONTROL_ADDRESS_KEY: &str = "ControlAddress";

const PROBE: &str = "PROBE";
const ERROR: &str = "ERROR";
const LOOP: &str = "LOOP";
const SYNC_ERROR: &str = "SYNC ERROR";
const END: &str = "END";
const PREAMBLE: &str = "Preamble";

/// A single classified line of the push stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMessage {
    /// Keepalive; the stream stays open.
    Probe,
    /// The server asks the client to rebind the session on a fresh connection.
    Loop,
    /// Fatal server error; the session is over.
    Error(String),
    /// The server lost synchronization with the session.
    SyncError(String),
    /// Graceful server-initiated close.
    End(String),
    /// Informational preamble; ignored.
    Preamble,
    /// An update for a registered table.
    Data {
        /// Table key assigned at subscription time.
        table: u64,
        /// Pipe-delimited item update, see [`UpdateLine`].
        item_line: String,
    },
}

impl StreamMessage {
    /// Classify one non-empty stream line.
    ///
    /// Control words are matched first (exact `PROBE`, then by prefix in the
    /// protocol's priority order); everything else is a data message of the
    /// form `<table>,<item_line>`.
    pub fn classify(line: &str) -> ProtocolResult<Self> {
        if line == PROBE {
            return Ok(Self::Probe);
        }
        if let Some(rest) = line.strip_prefix(ERROR) {
            return Ok(Self::Error(rest.trim().to_string()));
        }
        if line.starts_with(LOOP) {
            return Ok(Self::Loop);
        }
        if let Some(rest) = line.strip_prefix(SYNC_ERROR) {
            return Ok(Self::SyncError(rest.trim().to_string()));
        }
        if let Some(rest) = line.strip_prefix(END) {
            return Ok(Self::End(rest.trim().to_string()));
        }
        if line.starts_with(PREAMBLE) {
            return Ok(Self::Preamble);
        }

        let (table, item_line) = line
            .split_once(',')
            .ok_or_else(|| ProtocolError::MalformedLine(line.to_string()))?;
        let table: u64 = table
            .parse()
            .map_err(|_| ProtocolError::InvalidTableKey(table.to_string()))?;
        Ok(Self::Data {
            table,
            item_line: item_line.to_string(),
        })
    }
}

/// A parsed data payload: `<position>|<token_1>|...|<token_k>`.
///
/// `position` is 1-based into the subscription's item list; `tokens[i]`
/// aligns with the subscription's `fields[i]`. Trailing fields may be absent
/// from an update, so `tokens` can be shorter than the schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateLine {
    /// 1-based item position.
    pub position: usize,
    /// Raw field tokens, still encoded.
    pub tokens: Vec<String>,
}

impl UpdateLine {
    /// Parse an item line, stripping any trailing line terminators.
    pub fn parse(item_line: &str) -> ProtocolResult<Self> {
        let item_line = item_line.trim_end_matches(['\r', '\n']);
        let mut parts = item_line.split('|');
        let position = parts.next().unwrap_or_default();
        let position: usize = position
            .parse()
            .map_err(|_| ProtocolError::InvalidPosition(position.to_string()))?;
        if position == 0 {
            return Err(ProtocolError::InvalidPosition("0".to_string()));
        }
        Ok(Self {
            position,
            tokens: parts.map(str::to_string).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_control_words() {
        assert_eq!(StreamMessage::classify("PROBE").unwrap(), StreamMessage::Probe);
        assert_eq!(StreamMessage::classify("LOOP").unwrap(), StreamMessage::Loop);
        assert_eq!(
            StreamMessage::classify("LOOP 5000").unwrap(),
            StreamMessage::Loop
        );
        assert_eq!(
            StreamMessage::classify("ERROR bad adapter").unwrap(),
            StreamMessage::Error("bad adapter".to_string())
        );
        assert_eq!(
            StreamMessage::classify("SYNC ERROR").unwrap(),
            StreamMessage::SyncError(String::new())
        );
        assert_eq!(
            StreamMessage::classify("END 31").unwrap(),
            StreamMessage::End("31".to_string())
        );
        assert_eq!(
            StreamMessage::classify("Preamble: handshake done").unwrap(),
            StreamMessage::Preamble
        );
    }

    #[test]
    fn test_sync_error_is_not_plain_error() {
        // "SYNC ERROR" must not be swallowed by the "ERROR" prefix match
        assert_eq!(
            StreamMessage::classify("SYNC ERROR detail").unwrap(),
            StreamMessage::SyncError("detail".to_string())
        );
    }

    #[test]
    fn test_classify_data_line() {
        assert_eq!(
            StreamMessage::classify("3,2|X|Y").unwrap(),
            StreamMessage::Data {
                table: 3,
                item_line: "2|X|Y".to_string()
            }
        );
    }

    #[test]
    fn test_classify_rejects_garbage() {
        assert!(matches!(
            StreamMessage::classify("no comma here"),
            Err(ProtocolError::MalformedLine(_))
        ));
        assert!(matches!(
            StreamMessage::classify("x,1|A"),
            Err(ProtocolError::InvalidTableKey(_))
        ));
    }

    #[test]
    fn test_update_line_parse() {
        let update = UpdateLine::parse("2|a|$|#|").unwrap();
        assert_eq!(update.position, 2);
        assert_eq!(update.tokens, vec!["a", "$", "#", ""]);
    }

    #[test]
    fn test_update_line_strips_terminators() {
        let update = UpdateLine::parse("1|A\r\n").unwrap();
        assert_eq!(update.tokens, vec!["A"]);
    }

    #[test]
    fn test_update_line_rejects_bad_position() {
        assert!(matches!(
            UpdateLine::parse("0|A"),
            Err(ProtocolError::InvalidPosition(_))
        ));
        assert!(matches!(
            UpdateLine::parse("first|A"),
            Err(ProtocolError::InvalidPosition(_))
        ));
    }
}
