//! HTTP client for the upstream conversation API.
//!
//! Every call is a `POST {base_url}/api/{endpoint}` with a JSON body and the
//! caller's bearer token. One [`UpstreamClient`] is built at startup and shared
//! by all requests; [`reqwest::Client`] pools connections internally, so the
//! gateway holds no other cross-request state.

pub mod stream;
pub mod types;

use std::time::Duration;

use anyhow::Context;
use reqwest::{header, Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};

pub use stream::{DeltaEvent, DeltaStream};
use types::{
    ChatTurnRequest, ConversationInfoRequest, ConversationInfoResponse, ListConversationsRequest,
    ListConversationsResponse, RenameConversationRequest, UserInfoResponse,
};

use crate::{config::UpstreamConfig, error::UpstreamError};

const LIST_CONVERSATIONS: &str = "chat/chatHistory";
const CONVERSATION_INFO: &str = "chat/conversationInfo";
const RENAME_CONVERSATION: &str = "chat/updateConversation";
const CHAT: &str = "chat/Chat";
const USER_INFO: &str = "user/info";

/// Shared client for the upstream conversation API.
#[derive(Clone)]
pub struct UpstreamClient {
    client: Client,
    base_url: String,
    web_url: String,
    timeout: Duration,
    stream_idle_timeout: Duration,
}

impl UpstreamClient {
    pub fn new(cfg: &UpstreamConfig) -> anyhow::Result<Self> {
        // No client-wide timeout: chat streams stay open for as long as the
        // upstream keeps talking. JSON calls set their own per-request timeout.
        let client = Client::builder()
            .user_agent(cfg.user_agent.as_str())
            .connect_timeout(cfg.timeout())
            .build()
            .context("building reqwest client")?;

        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            web_url: cfg.web_url().to_string(),
            timeout: cfg.timeout(),
            stream_idle_timeout: cfg.stream_idle_timeout(),
        })
    }

    /// Value the upstream expects in `web_url` fields.
    pub fn web_url(&self) -> &str {
        &self.web_url
    }

    fn post(&self, endpoint: &str, token: &str) -> RequestBuilder {
        let url = format!("{}/api/{}", self.base_url, endpoint);
        self.client.post(url).bearer_auth(token)
    }

    /// Send `request` and fail on transport errors or non-2xx statuses.
    async fn send(endpoint: &'static str, request: RequestBuilder) -> Result<Response, UpstreamError> {
        let response = request
            .send()
            .await
            .map_err(|source| UpstreamError::Transport { endpoint, source })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status { endpoint, status, body });
        }
        Ok(response)
    }

    async fn call<B, R>(&self, endpoint: &'static str, token: &str, body: Option<&B>) -> Result<R, UpstreamError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let mut request = self.post(endpoint, token).timeout(self.timeout);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = Self::send(endpoint, request).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|source| UpstreamError::Transport { endpoint, source })?;
        serde_json::from_slice(&bytes).map_err(|source| UpstreamError::Decode { endpoint, source })
    }

    /// `chat/chatHistory` — one page of the caller's conversations.
    pub async fn list_conversations(
        &self,
        token: &str,
        request: &ListConversationsRequest,
    ) -> Result<ListConversationsResponse, UpstreamError> {
        self.call(LIST_CONVERSATIONS, token, Some(request)).await
    }

    /// `chat/conversationInfo` — the stored exchanges of one conversation.
    pub async fn conversation_info(
        &self,
        token: &str,
        conversation_id: &str,
    ) -> Result<ConversationInfoResponse, UpstreamError> {
        let request = ConversationInfoRequest {
            conversation_id: conversation_id.to_owned(),
            is_v2: true,
            web_url: self.web_url.clone(),
        };
        self.call(CONVERSATION_INFO, token, Some(&request)).await
    }

    /// `chat/updateConversation` — retitle or (un)collect a conversation.
    pub async fn rename_conversation(
        &self,
        token: &str,
        request: &RenameConversationRequest,
    ) -> Result<(), UpstreamError> {
        let request = self.post(RENAME_CONVERSATION, token).timeout(self.timeout).json(request);
        Self::send(RENAME_CONVERSATION, request).await.map(drop)
    }

    /// `user/info` — identity behind `token`.
    pub async fn user_info(&self, token: &str) -> Result<UserInfoResponse, UpstreamError> {
        self.call::<(), _>(USER_INFO, token, None).await
    }

    /// `chat/Chat` — send one turn and stream the answer.
    ///
    /// Returns once the upstream has accepted the turn (2xx headers received);
    /// the body is then decoded in the background as it arrives. Headers must
    /// arrive within the stream idle timeout.
    pub async fn chat(&self, token: &str, request: &ChatTurnRequest) -> Result<DeltaStream, UpstreamError> {
        let request = self
            .post(CHAT, token)
            .header(header::ACCEPT, "*/*")
            .json(request);
        let response = tokio::time::timeout(self.stream_idle_timeout, Self::send(CHAT, request))
            .await
            .map_err(|_| UpstreamError::Timeout {
                what: "upstream chat response",
                after: self.stream_idle_timeout,
            })??;
        Ok(stream::spawn(response, self.stream_idle_timeout))
    }
}
