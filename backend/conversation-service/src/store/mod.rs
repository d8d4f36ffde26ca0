//! Relational store seam
//!
//! Every read and write the conversation core issues goes through
//! [`ConversationStore`]. Postgres is the production implementation; the
//! in-memory one backs tests and local runs.

mod memory;
mod postgres;

pub use memory::InMemoryConversationStore;
pub use postgres::PgConversationStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::config::{Config, StoreBackend};
use crate::error::{AppError, AppResult};
use crate::models::{
    Conversation, ConversationParticipant, MemberRole, Message, NewConversation, NewMessage,
    NewParticipant,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{0}")]
    Database(String),

    /// A uniqueness rule rejected the write
    #[error("conflict: {0}")]
    Conflict(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(db.message().to_string())
            }
            _ => StoreError::Database(e.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Row writes that bring a conversation's membership rows in line with its array
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipRepair {
    pub insert: Vec<NewParticipant>,
    pub depart: Vec<Uuid>,
    pub promote: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairOutcome {
    pub rows_inserted: u64,
    pub rows_departed: u64,
    pub admins_promoted: u64,
}

impl MembershipRepair {
    /// Diff the array against `rows`.
    ///
    /// Array members without an active row get a `member` row; active rows whose
    /// user left the array are departed. When no array member holds an active
    /// admin row, the first array entry becomes admin (inserted as admin, or
    /// promoted if it already has a row).
    pub fn plan(conversation: &Conversation, rows: &[ConversationParticipant]) -> Self {
        let active: Vec<&ConversationParticipant> =
            rows.iter().filter(|row| row.is_active()).collect();
        let has_admin = active
            .iter()
            .any(|row| row.role.is_privileged() && conversation.has_participant(row.user_id));
        let first = conversation.participants.first().copied();

        let mut repair = MembershipRepair::default();
        let mut seen = HashSet::new();
        for &user_id in &conversation.participants {
            if !seen.insert(user_id) {
                continue;
            }
            let takes_admin = !has_admin && Some(user_id) == first;
            match active.iter().find(|row| row.user_id == user_id) {
                Some(row) if takes_admin && !row.role.is_privileged() => {
                    repair.promote = Some(user_id);
                }
                Some(_) => {}
                None => repair.insert.push(NewParticipant {
                    conversation_id: conversation.id,
                    user_id,
                    role: if takes_admin {
                        MemberRole::Admin
                    } else {
                        MemberRole::Member
                    },
                }),
            }
        }

        repair.depart = active
            .iter()
            .filter(|row| !conversation.has_participant(row.user_id))
            .map(|row| row.user_id)
            .collect();
        repair
    }

    pub fn is_empty(&self) -> bool {
        self.insert.is_empty() && self.depart.is_empty() && self.promote.is_none()
    }
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get_conversation(&self, id: Uuid) -> StoreResult<Option<Conversation>>;

    /// Individual conversations whose participants contain both users, oldest first
    async fn find_individual_conversations(
        &self,
        a: Uuid,
        b: Uuid,
    ) -> StoreResult<Vec<Conversation>>;

    /// Insert with `last_message_at = now`; a taken pair key is `StoreError::Conflict`
    async fn insert_conversation(&self, new: NewConversation) -> StoreResult<Conversation>;

    /// Conversations containing `user_id`, newest `last_message_at` first, nulls last
    async fn list_conversations_for(&self, user_id: Uuid) -> StoreResult<Vec<Conversation>>;

    /// Conversation ids in ascending order, strictly after `after`
    async fn list_conversation_ids(&self, after: Option<Uuid>, limit: i64)
        -> StoreResult<Vec<Uuid>>;

    /// Append to the participants array without deduplication
    async fn append_participants(
        &self,
        id: Uuid,
        user_ids: &[Uuid],
    ) -> StoreResult<Option<Conversation>>;

    /// Remove every occurrence of `user_id` from the array and release the pair key
    async fn remove_participant(&self, id: Uuid, user_id: Uuid)
        -> StoreResult<Option<Conversation>>;

    /// Insert membership rows, skipping users that already have an active row
    async fn insert_participants(&self, rows: &[NewParticipant]) -> StoreResult<u64>;

    async fn get_active_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Option<ConversationParticipant>>;

    /// All rows, active and departed, in join order
    async fn list_participants(
        &self,
        conversation_id: Uuid,
    ) -> StoreResult<Vec<ConversationParticipant>>;

    /// Stamp `left_at = now` on the active row
    async fn mark_participant_left(&self, conversation_id: Uuid, user_id: Uuid)
        -> StoreResult<u64>;

    /// Read the conversation and its rows, then apply [`MembershipRepair::plan`]
    /// without letting the array change in between. `None` if the conversation is gone.
    async fn repair_membership(&self, conversation_id: Uuid) -> StoreResult<Option<RepairOutcome>>;

    /// Move the active row's `last_read_at` up to the newest message already in
    /// the conversation; never moves it backwards
    async fn update_read_cursor(&self, conversation_id: Uuid, user_id: Uuid) -> StoreResult<u64>;

    /// Insert a message and point the conversation's last-message fields at it
    async fn append_message(&self, new: NewMessage) -> StoreResult<Message>;

    async fn get_message(&self, id: Uuid) -> StoreResult<Option<Message>>;

    /// Newest first
    async fn list_messages(
        &self,
        conversation_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Message>>;

    async fn last_message(&self, conversation_id: Uuid) -> StoreResult<Option<Message>>;

    /// Messages not sent by `user_id` created after `since` (all of them when `since` is None)
    async fn count_unread(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> StoreResult<i64>;

    /// Set the shared `is_read` flag on other senders' unread messages
    async fn mark_messages_read(&self, conversation_id: Uuid, reader_id: Uuid) -> StoreResult<u64>;

    async fn update_message(
        &self,
        id: Uuid,
        content: Option<String>,
        media_url: Option<String>,
    ) -> StoreResult<Option<Message>>;

    async fn delete_message(&self, id: Uuid) -> StoreResult<bool>;
}

/// Build the store selected by configuration
pub async fn connect(config: &Config) -> AppResult<Arc<dyn ConversationStore>> {
    match config.store {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory conversation store; data is lost on restart");
            Ok(Arc::new(InMemoryConversationStore::new()))
        }
        StoreBackend::Postgres => {
            let db_config = config
                .db
                .clone()
                .ok_or_else(|| AppError::Config("DATABASE_URL missing".into()))?;
            let pool = crate::db::init_pool(db_config).await?;
            if config.run_migrations {
                crate::db::run_migrations(&pool).await?;
            }
            Ok(Arc::new(PgConversationStore::new(pool)))
        }
    }
}
