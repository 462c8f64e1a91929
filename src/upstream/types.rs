//! Request and response bodies of the upstream conversation API.
//!
//! Response types default every field so that additions or omissions on the
//! upstream side never fail decoding.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// chat/chatHistory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ListConversationsRequest {
    pub keywords: String,
    pub model_names: Vec<String>,
    pub page_num: i64,
    pub page_size: i64,
}

impl ListConversationsRequest {
    /// First page of conversations held for `model`.
    pub fn first_page(model: &str, page_size: i64) -> Self {
        Self {
            keywords: String::new(),
            model_names: vec![model.to_owned()],
            page_num: 1,
            page_size,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ListConversationsResponse {
    pub total: i64,
    pub msg: String,
    // The upstream sends `null` for an empty history.
    #[serde(deserialize_with = "null_as_empty")]
    pub data: Vec<ConversationSummary>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConversationSummary {
    pub id: i64,
    pub conversation_id: String,
    pub model_name: String,
    pub conversation_title: String,
    pub app_name: String,
    pub is_collect: i64,
    pub parent_message_id: String,
    pub platform: i64,
    pub uid: String,
    pub create_time: String,
    pub create_timestamp: i64,
}

// ---------------------------------------------------------------------------
// chat/conversationInfo
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConversationInfoRequest {
    pub conversation_id: String,
    #[serde(rename = "isV2")]
    pub is_v2: bool,
    pub web_url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConversationInfoResponse {
    #[serde(deserialize_with = "null_as_empty")]
    pub data: Vec<ConversationMessage>,
    pub msg: String,
}

/// One exchange of a stored conversation. Only `message_id` is consumed.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConversationMessage {
    pub model_name: String,
    pub app_name: String,
    pub message_id: String,
    pub question_len: i64,
    pub create_time: String,
    pub update_time: String,
}

// ---------------------------------------------------------------------------
// chat/updateConversation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RenameConversationRequest {
    pub conversation_id: String,
    pub is_collect: i64,
    pub new_conversation_title: String,
}

// ---------------------------------------------------------------------------
// user/info
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UserInfoResponse {
    pub code: i64,
    pub email: String,
    pub msg: String,
    pub token: String,
}

// ---------------------------------------------------------------------------
// chat/Chat
// ---------------------------------------------------------------------------

/// Body of a single chat turn.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ChatTurnRequest {
    pub aireply: String,
    pub answer_again: bool,
    pub app_name: String,
    pub attachment_list: Vec<serde_json::Value>,
    pub conversation_id: String,
    pub global_timeout: i64,
    pub max_retries: i64,
    pub model_name: String,
    pub parent_message_id: String,
    pub prompt: String,
    pub request_timeout: i64,
    pub status: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub uid: String,
    pub web_url: String,
}

/// One `data:{...}` line of the chat stream.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StreamFrame {
    pub delta: String,
    pub delta_type: String,
    pub message_type: String,
    pub conversation_id: String,
    pub message_id: String,
    pub image_path: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub delta_list: Vec<DeltaItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeltaItem {
    pub delta: String,
    pub message_type: String,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn conversation_info_request_uses_camel_case_v2_flag() {
        let body = serde_json::to_value(ConversationInfoRequest {
            conversation_id: "c1".into(),
            is_v2: true,
            web_url: "https://w".into(),
        })
        .unwrap();
        assert_eq!(body, json!({ "conversation_id": "c1", "isV2": true, "web_url": "https://w" }));
    }

    #[test]
    fn list_response_tolerates_null_data() {
        let resp: ListConversationsResponse =
            serde_json::from_value(json!({ "total": 0, "msg": "ok", "data": null })).unwrap();
        assert!(resp.data.is_empty());
    }

    #[test]
    fn stream_frame_defaults_missing_fields() {
        let frame: StreamFrame = serde_json::from_str(r#"{"delta":"Hi"}"#).unwrap();
        assert_eq!(frame.delta, "Hi");
        assert!(frame.delta_type.is_empty());
        assert!(frame.delta_list.is_empty());
    }

    #[test]
    fn chat_turn_request_serializes_every_upstream_field() {
        let body = serde_json::to_value(ChatTurnRequest::default()).unwrap();
        let obj = body.as_object().unwrap();
        for key in [
            "aireply", "answer_again", "app_name", "attachment_list", "conversation_id",
            "global_timeout", "max_retries", "model_name", "parent_message_id", "prompt",
            "request_timeout", "status", "timestamp", "uid", "web_url",
        ] {
            assert!(obj.contains_key(key), "missing `{key}`");
        }
        assert_eq!(obj["attachment_list"], json!([]));
    }
}
