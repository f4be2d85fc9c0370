use serde::{Deserialize, Serialize};

use crate::models::{Chat, Message, Role};

// -- JWT Claims --

/// JWT claims issued at login and checked by the bearer middleware.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub name: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub phone: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user_id: i64,
    pub token: String,
}

// -- Chats --

/// One entry of the `members` list: either a bare user id or an object
/// carrying an explicit role.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MemberInput {
    Id(i64),
    Entry {
        user_id: i64,
        #[serde(default)]
        role: Option<Role>,
    },
}

impl MemberInput {
    pub fn user_id(&self) -> i64 {
        match self {
            Self::Id(id) => *id,
            Self::Entry { user_id, .. } => *user_id,
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Self::Id(_) => Role::Member,
            Self::Entry { role, .. } => role.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateChatRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub members: Vec<MemberInput>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateChatRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatEnvelope {
    pub message: String,
    pub chat: Chat,
}

#[derive(Debug, Deserialize)]
pub struct AddMembersRequest {
    pub user_ids: Vec<i64>,
    #[serde(default)]
    pub role: Option<Role>,
}

#[derive(Debug, Deserialize)]
pub struct RemoveMembersRequest {
    pub user_ids: Vec<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserChatsResponse {
    pub user_id: i64,
    pub chats: Vec<Chat>,
}

// -- Messages --

/// Content of a message to be sent, shared by single and bulk sends.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageDraft {
    pub text: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub reply_to_id: Option<i64>,
}

impl MessageDraft {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: None,
            reply_to_id: None,
        }
    }

    /// Type tag with the `"text"` fallback applied.
    pub fn kind_or_default(&self) -> &str {
        match self.kind.as_deref() {
            Some(kind) if !kind.trim().is_empty() => kind,
            _ => "text",
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub chat_id: i64,
    #[serde(flatten)]
    pub draft: MessageDraft,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessagePage {
    pub page: u32,
    pub limit: u32,
    pub total_messages: u64,
    pub messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchRequest {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub chat_name: Option<String>,
    pub messages: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateMessageRequest {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageUpdatedResponse {
    pub success: bool,
    pub message: String,
    pub message_id: i64,
    pub updated_text: String,
}

// -- Reactions --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReactionRequest {
    pub emoji: String,
}

// -- Generic --

/// Plain acknowledgement body, e.g. `{"message": "Marked as read"}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct Ack {
    pub message: String,
}

impl Ack {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
