//! Decoding of the upstream chat stream.
//!
//! The upstream answers a chat turn with a long-lived body of newline-separated
//! lines. Content lines look like `data:{...}` (no space after the colon, so
//! this is not SSE); anything else is keep-alive noise. A background task reads
//! the body line by line and hands typed [`DeltaEvent`]s to the consumer over a
//! single-slot channel, so a slow consumer throttles the socket reads and vice
//! versa.

use std::{borrow::Cow, io, pin::pin, time::Duration};

use bytes::Bytes;
use futures_util::{Stream, StreamExt as _};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::{
    codec::{AnyDelimiterCodec, FramedRead},
    io::StreamReader,
};
use tracing::debug;

use super::types::StreamFrame;
use crate::error::UpstreamError;

/// Endpoint label used in decode errors.
const CHAT_ENDPOINT: &str = "chat/Chat";

/// Only lines starting with this are decoded.
const FRAME_PREFIX: &[u8] = b"data:";

/// Longest line buffered before the stream is aborted.
pub(crate) const MAX_LINE_BYTES: usize = 1 << 20;

/// One event of a chat stream, in upstream order.
///
/// [`DeltaEvent::End`] and [`DeltaEvent::Error`] are terminal: exactly one of
/// them closes every stream and nothing follows it.
#[derive(Debug)]
pub enum DeltaEvent {
    /// A fragment of assistant text.
    Append { text: String, message_id: String },
    /// A frame whose `delta_type` this gateway does not know.
    Unknown { kind: String, message_id: String },
    Error(UpstreamError),
    End,
}

impl DeltaEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error(_) | Self::End)
    }
}

/// Consumer side of a chat stream.
pub type DeltaStream = ReceiverStream<DeltaEvent>;

/// Decode one raw line.
///
/// `Ok(None)` means the line carries nothing: blank, not a `data:{` frame, or a
/// heartbeat frame with an empty `delta_list`. Lines are raw bytes; invalid
/// UTF-8 outside a frame is skipped and inside one becomes U+FFFD.
pub(crate) fn parse_line(line: impl AsRef<[u8]>) -> Result<Option<DeltaEvent>, serde_json::Error> {
    let line = line.as_ref().trim_ascii();
    let Some(payload) = line.strip_prefix(FRAME_PREFIX) else {
        return Ok(None);
    };
    if !payload.starts_with(b"{") {
        return Ok(None);
    }

    let payload: Cow<'_, str> = String::from_utf8_lossy(payload);
    let frame: StreamFrame = serde_json::from_str(&payload)?;
    if frame.delta_list.is_empty() {
        return Ok(None);
    }

    let event = match frame.delta_type.as_str() {
        "append" => DeltaEvent::Append { text: frame.delta, message_id: frame.message_id },
        "error" => DeltaEvent::Error(UpstreamError::StreamAborted(format!(
            "upstream sent an error frame: {}",
            frame.delta
        ))),
        _ => DeltaEvent::Unknown { kind: frame.delta_type, message_id: frame.message_id },
    };
    Ok(Some(event))
}

/// Start draining `response` in the background and return its event stream.
pub(crate) fn spawn(response: reqwest::Response, idle_timeout: Duration) -> DeltaStream {
    let (tx, rx) = mpsc::channel(1);
    let body = response.bytes_stream().map(|chunk| chunk.map_err(io::Error::other));
    tokio::spawn(pump(body, tx, idle_timeout));
    ReceiverStream::new(rx)
}

/// Read `body` line by line, forwarding decoded events into `tx`.
///
/// Returns after sending a terminal event, or as soon as the receiver is
/// dropped; either way the body (and its connection) is dropped with it.
pub(crate) async fn pump<S>(body: S, tx: mpsc::Sender<DeltaEvent>, idle_timeout: Duration)
where
    S: Stream<Item = io::Result<Bytes>> + Send,
{
    let codec = AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), Vec::new(), MAX_LINE_BYTES);
    let mut lines = pin!(FramedRead::new(StreamReader::new(body), codec));

    loop {
        let next = tokio::select! {
            _ = tx.closed() => {
                debug!("stream consumer went away; closing upstream body");
                return;
            }
            next = tokio::time::timeout(idle_timeout, lines.next()) => next,
        };

        let event = match next {
            Err(_) => DeltaEvent::Error(UpstreamError::Timeout {
                what: "upstream chat stream",
                after: idle_timeout,
            }),
            Ok(None) => DeltaEvent::End,
            Ok(Some(Err(e))) => {
                DeltaEvent::Error(UpstreamError::StreamAborted(format!("reading body: {e}")))
            }
            Ok(Some(Ok(line))) => match parse_line(&line) {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(source) => {
                    DeltaEvent::Error(UpstreamError::Decode { endpoint: CHAT_ENDPOINT, source })
                }
            },
        };

        let terminal = event.is_terminal();
        if tx.send(event).await.is_err() || terminal {
            return;
        }
    }
}
