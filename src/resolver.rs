//! Work out which upstream conversation a turn continues, and on whose behalf.
//!
//! The upstream has no stateless completion call: every turn belongs to a
//! conversation and names its parent message. Two independent lookups run
//! concurrently and are joined fail-fast:
//!
//! 1. list the caller's conversations for the model, pick one, and read the id
//!    of its last message;
//! 2. fetch the caller's identity (the `uid` sent with the turn).
//!
//! If either lookup fails the other is cancelled and the request fails before
//! any turn is sent.

use std::time::Duration;

use rand::{seq::IndexedRandom as _, Rng};
use tracing::{debug, warn};

use crate::{
    config::{ConversationConfig, ConversationSelection},
    error::UpstreamError,
    upstream::{
        types::{ConversationSummary, ListConversationsRequest},
        UpstreamClient,
    },
};

/// Upstream coordinates for the next turn.
///
/// All-empty (the [`Default`]) means "start a new conversation".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationContext {
    pub app_name: String,
    pub conversation_id: String,
    pub parent_message_id: String,
}

impl ConversationContext {
    pub fn is_new(&self) -> bool {
        self.conversation_id.is_empty()
    }
}

/// Who the turn is sent on behalf of.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserIdentity {
    pub email: String,
}

/// Outcome of [`resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub context: ConversationContext,
    pub identity: UserIdentity,
}

/// Pick the conversation to continue from one page of history.
pub fn select_conversation<'a, R>(
    page: &'a [ConversationSummary],
    selection: ConversationSelection,
    rng: &mut R,
) -> Option<&'a ConversationSummary>
where
    R: Rng + ?Sized,
{
    match selection {
        ConversationSelection::Random => page.choose(rng),
        ConversationSelection::Latest => page.first(),
        ConversationSelection::New => None,
    }
}

/// Resolve the conversation context and user identity for `model`.
///
/// Both lookups share `deadline`; exceeding it fails the resolution.
#[tracing::instrument(skip(upstream, token, cfg), fields(selection = %cfg.selection))]
pub async fn resolve(
    upstream: &UpstreamClient,
    token: &str,
    model: &str,
    cfg: &ConversationConfig,
    deadline: Duration,
) -> Result<Resolution, UpstreamError> {
    let lookups = async {
        tokio::try_join!(
            conversation_context(upstream, token, model, cfg),
            identity(upstream, token),
        )
    };

    match tokio::time::timeout(deadline, lookups).await {
        Ok(Ok((context, identity))) => Ok(Resolution { context, identity }),
        Ok(Err(e)) => Err(UpstreamError::ResolutionFailed(Box::new(e))),
        Err(_) => Err(UpstreamError::ResolutionFailed(Box::new(UpstreamError::Timeout {
            what: "conversation resolution",
            after: deadline,
        }))),
    }
}

async fn conversation_context(
    upstream: &UpstreamClient,
    token: &str,
    model: &str,
    cfg: &ConversationConfig,
) -> Result<ConversationContext, UpstreamError> {
    if cfg.selection == ConversationSelection::New {
        return Ok(ConversationContext::default());
    }

    let page = upstream
        .list_conversations(token, &ListConversationsRequest::first_page(model, cfg.page_size))
        .await?;

    // The rng is not Send; keep it out of the await points below.
    let picked = select_conversation(&page.data, cfg.selection, &mut rand::rng()).cloned();
    let Some(conversation) = picked else {
        debug!("no prior conversation, starting a new one");
        return Ok(ConversationContext::default());
    };

    let info = upstream.conversation_info(token, &conversation.conversation_id).await?;
    let parent_message_id = match info.data.last() {
        Some(message) => message.message_id.clone(),
        None => {
            warn!(conversation_id = %conversation.conversation_id, "conversation has no messages");
            String::new()
        }
    };

    debug!(
        conversation_id = %conversation.conversation_id,
        %parent_message_id,
        candidates = page.data.len(),
        "continuing conversation"
    );

    Ok(ConversationContext {
        app_name: conversation.app_name,
        conversation_id: conversation.conversation_id,
        parent_message_id,
    })
}

async fn identity(upstream: &UpstreamClient, token: &str) -> Result<UserIdentity, UpstreamError> {
    let info = upstream.user_info(token).await?;
    Ok(UserIdentity { email: info.email })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use rand::{rngs::StdRng, SeedableRng};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::config::UpstreamConfig;

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn summaries(n: usize) -> Vec<ConversationSummary> {
        (0..n)
            .map(|i| ConversationSummary {
                conversation_id: format!("c{i}"),
                app_name: format!("app{i}"),
                ..ConversationSummary::default()
            })
            .collect()
    }

    fn client_for(server: &MockServer) -> UpstreamClient {
        UpstreamClient::new(&UpstreamConfig {
            base_url: server.uri(),
            timeout_ms: 5_000,
            ..UpstreamConfig::default()
        })
        .unwrap()
    }

    fn cfg(selection: ConversationSelection) -> ConversationConfig {
        ConversationConfig { selection, ..ConversationConfig::default() }
    }

    const DEADLINE: Duration = Duration::from_secs(5);

    async fn mount_user(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/api/user/info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "email": "u@x.io" })))
            .mount(server)
            .await;
    }

    async fn mount_history(server: &MockServer, data: serde_json::Value) {
        Mock::given(method("POST"))
            .and(path("/api/chat/chatHistory"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "total": 0, "data": data })))
            .mount(server)
            .await;
    }

    // -----------------------------------------------------------------------
    // select_conversation — pure, no I/O
    // -----------------------------------------------------------------------

    #[test]
    fn random_selection_always_returns_a_member_of_the_page() {
        let page = summaries(7);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let picked = select_conversation(&page, ConversationSelection::Random, &mut rng).unwrap();
            assert!(page.contains(picked));
        }
    }

    #[test]
    fn random_selection_eventually_reaches_every_entry() {
        let page = summaries(10);
        let mut rng = StdRng::seed_from_u64(42);
        let seen: HashSet<&str> = (0..500)
            .map(|_| {
                select_conversation(&page, ConversationSelection::Random, &mut rng)
                    .unwrap()
                    .conversation_id
                    .as_str()
            })
            .collect();
        assert_eq!(seen.len(), page.len(), "never picked some entries: {seen:?}");
    }

    #[test]
    fn latest_selection_takes_first_entry() {
        let page = summaries(3);
        let mut rng = StdRng::seed_from_u64(0);
        let picked = select_conversation(&page, ConversationSelection::Latest, &mut rng).unwrap();
        assert_eq!(picked.conversation_id, "c0");
    }

    #[test]
    fn empty_page_or_new_policy_selects_nothing() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(select_conversation(&[], ConversationSelection::Random, &mut rng).is_none());
        assert!(select_conversation(&summaries(3), ConversationSelection::New, &mut rng).is_none());
    }

    // -----------------------------------------------------------------------
    // resolve() against a mock upstream
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn empty_history_resolves_to_new_conversation() {
        let server = MockServer::start().await;
        mount_history(&server, json!([])).await;
        mount_user(&server).await;
        Mock::given(path("/api/chat/conversationInfo"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let res = resolve(&client_for(&server), "tok", "grok", &cfg(ConversationSelection::Random), DEADLINE)
            .await
            .unwrap();

        assert!(res.context.is_new());
        assert_eq!(res.context, ConversationContext::default());
        assert_eq!(res.identity.email, "u@x.io");
    }

    #[tokio::test]
    async fn existing_conversation_resumes_from_last_message() {
        let server = MockServer::start().await;
        mount_history(&server, json!([{ "conversation_id": "c1", "app_name": "app" }])).await;
        mount_user(&server).await;
        Mock::given(method("POST"))
            .and(path("/api/chat/conversationInfo"))
            .and(body_partial_json(json!({ "conversation_id": "c1", "isV2": true })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{ "message_id": "first" }, { "message_id": "last" }],
            })))
            .mount(&server)
            .await;

        let res = resolve(&client_for(&server), "tok", "grok", &cfg(ConversationSelection::Random), DEADLINE)
            .await
            .unwrap();

        assert_eq!(
            res.context,
            ConversationContext {
                app_name: "app".into(),
                conversation_id: "c1".into(),
                parent_message_id: "last".into(),
            }
        );
    }

    #[tokio::test]
    async fn conversation_without_messages_keeps_empty_parent() {
        let server = MockServer::start().await;
        mount_history(&server, json!([{ "conversation_id": "c1" }])).await;
        mount_user(&server).await;
        Mock::given(path("/api/chat/conversationInfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
            .mount(&server)
            .await;

        let res = resolve(&client_for(&server), "tok", "grok", &cfg(ConversationSelection::Latest), DEADLINE)
            .await
            .unwrap();
        assert_eq!(res.context.conversation_id, "c1");
        assert!(res.context.parent_message_id.is_empty());
    }

    #[tokio::test]
    async fn new_policy_skips_history_lookup() {
        let server = MockServer::start().await;
        mount_user(&server).await;
        Mock::given(path("/api/chat/chatHistory"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let res = resolve(&client_for(&server), "tok", "grok", &cfg(ConversationSelection::New), DEADLINE)
            .await
            .unwrap();
        assert!(res.context.is_new());
    }

    #[tokio::test]
    async fn history_failure_fails_resolution_even_if_identity_succeeds() {
        let server = MockServer::start().await;
        Mock::given(path("/api/chat/chatHistory"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        mount_user(&server).await;

        let err = resolve(&client_for(&server), "tok", "grok", &cfg(ConversationSelection::Random), DEADLINE)
            .await
            .unwrap_err();

        match err {
            UpstreamError::ResolutionFailed(inner) => {
                assert!(matches!(*inner, UpstreamError::Status { .. }), "inner: {inner:?}");
            }
            other => panic!("expected ResolutionFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn identity_failure_fails_resolution() {
        let server = MockServer::start().await;
        mount_history(&server, json!([])).await;
        Mock::given(path("/api/user/info"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = resolve(&client_for(&server), "tok", "grok", &cfg(ConversationSelection::Random), DEADLINE)
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::ResolutionFailed(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn slow_identity_does_not_delay_history_lookup() {
        let server = MockServer::start().await;
        Mock::given(path("/api/user/info"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "email": "u@x.io" }))
                    .set_delay(Duration::from_millis(400)),
            )
            .mount(&server)
            .await;
        Mock::given(path("/api/chat/chatHistory"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "data": [] }))
                    .set_delay(Duration::from_millis(400)),
            )
            .mount(&server)
            .await;

        // Run sequentially these would take ~800 ms.
        let started = std::time::Instant::now();
        resolve(&client_for(&server), "tok", "grok", &cfg(ConversationSelection::Random), DEADLINE)
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_millis(750), "took {:?}", started.elapsed());
    }

    #[tokio::test]
    async fn deadline_bounds_the_whole_resolution() {
        let server = MockServer::start().await;
        mount_history(&server, json!([])).await;
        Mock::given(path("/api/user/info"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let err = resolve(
            &client_for(&server),
            "tok",
            "grok",
            &cfg(ConversationSelection::Random),
            Duration::from_millis(100),
        )
        .await
        .unwrap_err();

        match err {
            UpstreamError::ResolutionFailed(inner) => {
                assert!(matches!(*inner, UpstreamError::Timeout { .. }), "inner: {inner:?}");
            }
            other => panic!("expected ResolutionFailed, got {other:?}"),
        }
    }
}
