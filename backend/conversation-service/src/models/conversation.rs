use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::{ConversationParticipant, Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationType {
    #[default]
    Individual,
    Group,
}

impl ConversationType {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "individual" => Some(Self::Individual),
            "group" => Some(Self::Group),
            _ => None,
        }
    }

    pub fn to_db(&self) -> &'static str {
        match self {
            Self::Individual => "individual",
            Self::Group => "group",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub conversation_type: ConversationType,
    pub title: Option<String>,
    pub avatar_url: Option<String>,
    /// Authoritative membership snapshot, may contain duplicates after repeated adds
    pub participants: Vec<Uuid>,
    #[serde(skip)]
    pub direct_pair_key: Option<String>,
    pub last_message_id: Option<Uuid>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn is_group(&self) -> bool {
        self.conversation_type == ConversationType::Group
    }

    pub fn has_participant(&self, user_id: Uuid) -> bool {
        self.participants.contains(&user_id)
    }

    /// True for a live one-on-one conversation between exactly `a` and `b`
    pub fn is_pair_of(&self, a: Uuid, b: Uuid) -> bool {
        self.conversation_type == ConversationType::Individual
            && self.participants.len() == 2
            && self.has_participant(a)
            && self.has_participant(b)
    }

    /// The participant that is not `user_id`, for one-on-one conversations
    pub fn counterpart_of(&self, user_id: Uuid) -> Option<Uuid> {
        if self.is_group() {
            return None;
        }
        self.participants.iter().copied().find(|p| *p != user_id)
    }
}

/// Canonical key for an unordered pair of users
pub fn pair_key(a: Uuid, b: Uuid) -> String {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    format!("{low}:{high}")
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewConversation {
    pub id: Uuid,
    pub conversation_type: ConversationType,
    pub title: Option<String>,
    pub avatar_url: Option<String>,
    pub participants: Vec<Uuid>,
    pub direct_pair_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateConversationRequest {
    #[serde(rename = "type", alias = "conversation_type", default)]
    pub conversation_type: ConversationType,
    #[validate(length(max = 255))]
    pub title: Option<String>,
    #[validate(length(max = 2048))]
    pub avatar_url: Option<String>,
    /// Other participants; the requester is implicit
    #[serde(default)]
    #[validate(length(max = 256))]
    pub participant_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AddParticipantsRequest {
    #[validate(length(min = 1, max = 256))]
    pub user_ids: Vec<Uuid>,
}

/// Conversation as returned to a specific caller
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub participant_details: Vec<ConversationParticipant>,
    pub last_message: Option<Message>,
    pub unread_count: i64,
}
