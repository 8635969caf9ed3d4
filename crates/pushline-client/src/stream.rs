//! The stream connection: buffered line reading and the reader task
//!
//! One reader task runs per active stream connection. It pulls one line at a
//! time off the long-lived response body, classifies it against the protocol
//! vocabulary, and either routes data lines to the subscription table, keeps
//! looping on keepalives, or terminates. A LOOP directive makes the task
//! rebind the session: the successor task is spawned before this one
//! returns, so there is never more than one reader per session and never an
//! overlap.

use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use tracing::{debug, error, info, trace, warn};

use pushline_core::StreamMessage;

use crate::client::ClientInner;
use crate::error::{PushClientError, Result, ServerErrorKind};

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Buffered line reader over a streaming HTTP response body.
///
/// Chunks arrive on whatever boundaries the transport picked; lines are
/// reassembled here and handed out one at a time.
pub(crate) struct LineReader {
    bytes: ByteStream,
    buffer: Vec<u8>,
    done: bool,
}

impl LineReader {
    pub fn new(response: reqwest::Response) -> Self {
        Self::from_stream(Box::pin(response.bytes_stream()))
    }

    pub fn from_stream(bytes: ByteStream) -> Self {
        Self {
            bytes,
            buffer: Vec::new(),
            done: false,
        }
    }

    /// Read the next line, stripping the `\n` and a trailing `\r`.
    ///
    /// `Ok(None)` means the connection is exhausted.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
                let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
                let mut line = &raw[..raw.len() - 1];
                if line.last() == Some(&b'\r') {
                    line = &line[..line.len() - 1];
                }
                return Ok(Some(String::from_utf8_lossy(line).into_owned()));
            }

            if self.done {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                // final line without a terminator
                let raw = std::mem::take(&mut self.buffer);
                return Ok(Some(String::from_utf8_lossy(&raw).into_owned()));
            }

            match self.bytes.next().await {
                Some(Ok(chunk)) => self.buffer.extend_from_slice(&chunk),
                Some(Err(err)) => return Err(err.into()),
                None => self.done = true,
            }
        }
    }

    /// Drain whatever the server still has buffered; used to surface the
    /// full response of a refused handshake.
    pub async fn drain(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(Some(line)) = self.next_line().await {
            lines.push(line);
        }
        lines
    }
}

/// Body of the background reader task.
pub(crate) async fn run_stream(inner: Arc<ClientInner>, mut reader: LineReader) {
    debug!("Stream reader started");
    loop {
        let line = match reader.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                inner.handle_terminal(PushClientError::StreamTerminated);
                return;
            }
            Err(err) => {
                // a failed read is indistinguishable from a dropped connection
                error!("Stream read failed: {err}");
                inner.handle_terminal(PushClientError::StreamTerminated);
                return;
            }
        };

        if line.trim().is_empty() {
            inner.handle_terminal(PushClientError::StreamTerminated);
            return;
        }

        match StreamMessage::classify(&line) {
            Ok(StreamMessage::Probe) => trace!("PROBE"),
            Ok(StreamMessage::Preamble) => trace!("Preamble"),
            Ok(StreamMessage::Loop) => {
                debug!("LOOP, rebinding the session");
                if let Err(err) = inner.bind().await {
                    error!("Rebind failed: {err}");
                    inner.handle_terminal(err);
                }
                // on success the successor task owns the session from here
                return;
            }
            Ok(StreamMessage::Error(detail)) => {
                inner.handle_terminal(PushClientError::Server {
                    kind: ServerErrorKind::Refused,
                    detail,
                });
                return;
            }
            Ok(StreamMessage::SyncError(detail)) => {
                inner.handle_terminal(PushClientError::Server {
                    kind: ServerErrorKind::OutOfSync,
                    detail,
                });
                return;
            }
            Ok(StreamMessage::End(detail)) => {
                info!("Connection closed by the server");
                inner.handle_terminal(PushClientError::Server {
                    kind: ServerErrorKind::ClosedByPeer,
                    detail,
                });
                return;
            }
            Ok(StreamMessage::Data { table, item_line }) => {
                // a malformed or unroutable message never takes the stream down
                if let Err(err) = inner.dispatch(table, &item_line) {
                    warn!("Dropping undeliverable message: {err}");
                    inner.report(&err);
                }
            }
            Err(err) => {
                let err = PushClientError::Protocol(err);
                warn!("Malformed stream line: {err}");
                inner.report(&err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn reader_over(chunks: Vec<&'static str>) -> LineReader {
        let items: Vec<reqwest::Result<Bytes>> = chunks
            .into_iter()
            .map(|c| Ok(Bytes::from_static(c.as_bytes())))
            .collect();
        LineReader::from_stream(Box::pin(stream::iter(items)))
    }

    #[test]
    fn test_lines_split_across_chunks() {
        tokio_test::block_on(async {
            let mut reader = reader_over(vec!["PRO", "BE\r\n1,2|a", "|b\r\n"]);
            assert_eq!(reader.next_line().await.unwrap().unwrap(), "PROBE");
            assert_eq!(reader.next_line().await.unwrap().unwrap(), "1,2|a|b");
            assert_eq!(reader.next_line().await.unwrap(), None);
        });
    }

    #[test]
    fn test_bare_newlines_and_crlf_both_work() {
        tokio_test::block_on(async {
            let mut reader = reader_over(vec!["one\ntwo\r\n\r\n"]);
            assert_eq!(reader.next_line().await.unwrap().unwrap(), "one");
            assert_eq!(reader.next_line().await.unwrap().unwrap(), "two");
            // blank line comes through as an empty string, not end-of-stream
            assert_eq!(reader.next_line().await.unwrap().unwrap(), "");
            assert_eq!(reader.next_line().await.unwrap(), None);
        });
    }

    #[test]
    fn test_unterminated_final_line() {
        tokio_test::block_on(async {
            let mut reader = reader_over(vec!["OK\r\n", "tail"]);
            assert_eq!(reader.next_line().await.unwrap().unwrap(), "OK");
            assert_eq!(reader.next_line().await.unwrap().unwrap(), "tail");
            assert_eq!(reader.next_line().await.unwrap(), None);
        });
    }

    #[test]
    fn test_drain_collects_everything_left() {
        tokio_test::block_on(async {
            let mut reader = reader_over(vec!["ERROR\r\n2\r\nRefused\r\n"]);
            assert_eq!(reader.next_line().await.unwrap().unwrap(), "ERROR");
            assert_eq!(reader.drain().await, vec!["2", "Refused"]);
        });
    }
}
