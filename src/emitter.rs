//! Turn a [`DeltaEvent`] stream into OpenAI-shaped output.
//!
//! Two modes:
//!
//! - **Buffered** ([`collect_completion`]): drain the stream and build one
//!   `chat.completion` object. An error anywhere fails the whole response.
//! - **Streaming** ([`stream_completion`]): forward each delta as its own
//!   `chat.completion.chunk` frame, then a finish chunk and `data: [DONE]`.
//!   An error ends the body with a transport error and no `[DONE]`, which
//!   clients must treat as a failed stream.
//!
//! Token usage is approximated by the number of appended deltas; the upstream
//! reports no real counts.

use std::{collections::VecDeque, pin::Pin};

use bytes::Bytes;
use futures_util::{stream, Stream, StreamExt as _};
use serde_json::{json, Value};
use tracing::{error, warn};

use crate::{error::UpstreamError, upstream::DeltaEvent};

/// Body of a streaming response, one frame per item.
pub type SseStream = Pin<Box<dyn Stream<Item = Result<Bytes, UpstreamError>> + Send>>;

/// Terminates every successful stream.
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

const FINISH_REASON: &str = "stop";

fn completion_id(message_id: &str) -> String {
    if message_id.is_empty() {
        format!("chatcmpl-{}", uuid::Uuid::new_v4())
    } else {
        message_id.to_owned()
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Drain `events` into a single `chat.completion` document.
pub async fn collect_completion<S>(mut events: S, model: &str) -> Result<Value, UpstreamError>
where
    S: Stream<Item = DeltaEvent> + Unpin,
{
    let mut reply = String::new();
    let mut message_id = String::new();
    let mut appended: u64 = 0;

    loop {
        match events.next().await {
            Some(DeltaEvent::Append { text, message_id: id }) => {
                appended += 1;
                reply.push_str(&text);
                message_id = id;
            }
            Some(DeltaEvent::Unknown { kind, .. }) => {
                warn!(%kind, "ignoring unknown upstream delta type");
            }
            Some(DeltaEvent::Error(e)) => {
                error!(error = %e, "upstream stream failed, discarding partial reply");
                return Err(e);
            }
            Some(DeltaEvent::End) => break,
            None => {
                return Err(UpstreamError::StreamAborted(
                    "stream closed without a terminal event".into(),
                ))
            }
        }
    }

    Ok(json!({
        "id": completion_id(&message_id),
        "object": "chat.completion",
        "created": now(),
        "model": model,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": reply },
            "finish_reason": FINISH_REASON,
        }],
        "usage": {
            "prompt_tokens": 0,
            "completion_tokens": appended,
            "total_tokens": appended,
        },
    }))
}

/// Build the `data: {...}\n` frame for one appended delta.
pub(crate) fn delta_frame(id: &str, model: &str, text: &str) -> Bytes {
    let chunk = json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": now(),
        "model": model,
        "choices": [{
            "index": 0,
            "delta": { "role": "assistant", "content": text },
            "finish_reason": null,
        }],
    });
    Bytes::from(format!("data: {chunk}\n"))
}

/// Build the closing frame that carries only the finish reason.
pub(crate) fn finish_frame(id: &str, model: &str) -> Bytes {
    let chunk = json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": now(),
        "model": model,
        "choices": [{ "index": 0, "delta": {}, "finish_reason": FINISH_REASON }],
    });
    Bytes::from(format!("data: {chunk}\n\n"))
}

struct StreamState<S> {
    events: S,
    model: String,
    message_id: String,
    /// Frames queued after the terminal event; `Some` once the stream ended.
    trailer: Option<VecDeque<Bytes>>,
}

/// Re-emit `events` as OpenAI chunk frames, one body item per frame.
pub fn stream_completion<S>(events: S, model: String) -> SseStream
where
    S: Stream<Item = DeltaEvent> + Unpin + Send + 'static,
{
    let state = StreamState { events, model, message_id: String::new(), trailer: None };

    Box::pin(stream::unfold(state, |mut st| async move {
        if let Some(trailer) = st.trailer.as_mut() {
            let frame = trailer.pop_front()?;
            return Some((Ok(frame), st));
        }

        loop {
            match st.events.next().await {
                Some(DeltaEvent::Append { text, message_id }) => {
                    if !message_id.is_empty() || st.message_id.is_empty() {
                        st.message_id = completion_id(&message_id);
                    }
                    let frame = delta_frame(&st.message_id, &st.model, &text);
                    return Some((Ok(frame), st));
                }
                Some(DeltaEvent::Unknown { kind, .. }) => {
                    warn!(%kind, "ignoring unknown upstream delta type");
                }
                Some(DeltaEvent::End) => {
                    let id = completion_id(&st.message_id);
                    let finish = finish_frame(&id, &st.model);
                    st.trailer = Some(VecDeque::from([Bytes::from_static(DONE_FRAME.as_bytes())]));
                    return Some((Ok(finish), st));
                }
                Some(DeltaEvent::Error(e)) => {
                    error!(error = %e, "upstream stream failed, aborting response");
                    st.trailer = Some(VecDeque::new());
                    return Some((Err(e), st));
                }
                None => {
                    let e = UpstreamError::StreamAborted(
                        "stream closed without a terminal event".into(),
                    );
                    error!(error = %e, "aborting response");
                    st.trailer = Some(VecDeque::new());
                    return Some((Err(e), st));
                }
            }
        }
    }))
}
