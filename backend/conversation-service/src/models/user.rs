use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Public profile fields attached to senders and participants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}
