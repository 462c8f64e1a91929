//! The completion path: one OpenAI request in, one upstream turn out.
//!
//! ```text
//! request ─┬─ resolver::resolve  (history ∥ identity) ─┐
//!          └─ prompt::build_prompt ────────────────────┴─ UpstreamClient::chat ─ emitter
//! ```
//!
//! Exactly one chat turn is sent per request, and only after resolution
//! succeeded. Dropping the returned future or stream cancels every upstream
//! call still in flight.

use std::sync::Arc;

use anyhow::Context;
use serde_json::Value;
use tracing::debug;

use crate::{
    config::Config,
    emitter::{self, SseStream},
    openai::ChatCompletionRequest,
    prompt::build_prompt,
    resolver::{self, Resolution},
    upstream::{types::ChatTurnRequest, UpstreamClient},
};

/// Shared application state injected into every request handler via [`axum::extract::State`].
pub struct BridgeState {
    pub config: Arc<Config>,
    pub upstream: UpstreamClient,
    /// Gateway start time, reported by the health probe.
    pub started_at: std::time::Instant,
}

impl BridgeState {
    pub fn new(config: Arc<Config>) -> anyhow::Result<Self> {
        let upstream = UpstreamClient::new(&config.upstream)?;
        Ok(Self { config, upstream, started_at: std::time::Instant::now() })
    }
}

/// What the handler sends back.
pub enum Completion {
    Buffered(Value),
    Streaming(SseStream),
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buffered(v) => f.debug_tuple("Buffered").field(v).finish(),
            Self::Streaming(_) => f.write_str("Streaming(..)"),
        }
    }
}

/// Assemble the upstream turn for a resolved context.
pub fn chat_turn(
    state: &BridgeState,
    resolution: Resolution,
    model: &str,
    prompt: String,
) -> ChatTurnRequest {
    let knobs = state.config.upstream.chat;
    let Resolution { context, identity } = resolution;
    ChatTurnRequest {
        app_name: context.app_name,
        conversation_id: context.conversation_id,
        parent_message_id: context.parent_message_id,
        global_timeout: knobs.global_timeout,
        max_retries: knobs.max_retries,
        request_timeout: knobs.request_timeout,
        model_name: model.to_owned(),
        prompt,
        timestamp: chrono::Utc::now().timestamp_millis(),
        uid: identity.email,
        web_url: state.upstream.web_url().to_owned(),
        ..ChatTurnRequest::default()
    }
}

/// Run one chat completion against the upstream.
#[tracing::instrument(
    skip(state, token, request),
    fields(model = %request.model, stream = request.stream, turns = request.messages.len())
)]
pub async fn complete(
    state: &BridgeState,
    token: &str,
    request: ChatCompletionRequest,
) -> anyhow::Result<Completion> {
    let conversations = &state.config.conversations;
    let resolution = resolver::resolve(
        &state.upstream,
        token,
        &request.model,
        conversations,
        conversations.resolve_timeout(),
    )
    .await?;

    debug!(
        new_conversation = resolution.context.is_new(),
        conversation_id = %resolution.context.conversation_id,
        "sending chat turn"
    );

    let prompt = build_prompt(&request.messages);
    let turn = chat_turn(state, resolution, &request.model, prompt);
    let events = state
        .upstream
        .chat(token, &turn)
        .await
        .context("sending chat turn")?;

    if request.stream {
        Ok(Completion::Streaming(emitter::stream_completion(events, request.model)))
    } else {
        let document = emitter::collect_completion(events, &request.model)
            .await
            .context("collecting chat reply")?;
        Ok(Completion::Buffered(document))
    }
}
