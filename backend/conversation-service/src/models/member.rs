//! Membership rows and roles
//!
//! The normalized `conversation_participants` table mirrors the conversation's
//! `participants` array. The array decides access; rows carry role and
//! read-cursor state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::UserSummary;

/// Member role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    /// Regular member - can read and send messages
    Member = 0,
    /// Admin - can add participants to a group
    Admin = 1,
}

impl MemberRole {
    /// Parse role from database string
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "member" => Some(Self::Member),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    /// Convert role to database string
    pub fn to_db(&self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::Admin => "admin",
        }
    }

    pub fn is_privileged(&self) -> bool {
        *self >= MemberRole::Admin
    }
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db())
    }
}

impl std::str::FromStr for MemberRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db(s).ok_or_else(|| format!("Invalid role: {}", s))
    }
}

/// A membership row, active while `left_at` is null
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationParticipant {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub role: MemberRole,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
    pub last_read_at: Option<DateTime<Utc>>,
    /// Profile of `user_id`, absent when the user row is missing
    pub user: Option<UserSummary>,
}

impl ConversationParticipant {
    pub fn is_active(&self) -> bool {
        self.left_at.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewParticipant {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub role: MemberRole,
}
