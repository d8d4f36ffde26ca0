use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ConversationStore, MembershipRepair, RepairOutcome, StoreError, StoreResult};
use crate::models::{
    Conversation, ConversationParticipant, MemberRole, Message, NewConversation, NewMessage,
    NewParticipant, UserSummary,
};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, UserSummary>,
    conversations: HashMap<Uuid, Conversation>,
    /// Insertion order doubles as join order
    participants: Vec<ConversationParticipant>,
    /// Insertion order; timestamps are strictly increasing
    messages: Vec<Message>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl Tables {
    /// Wall clock, nudged forward so no two writes share a timestamp
    fn tick(&mut self) -> DateTime<Utc> {
        let mut now = Utc::now();
        if let Some(last) = self.last_timestamp {
            if now <= last {
                now = last + Duration::microseconds(1);
            }
        }
        self.last_timestamp = Some(now);
        now
    }

    fn with_user(&self, mut participant: ConversationParticipant) -> ConversationParticipant {
        participant.user = self.users.get(&participant.user_id).cloned();
        participant
    }

    fn with_sender(&self, mut message: Message) -> Message {
        message.sender = self.users.get(&message.sender_id).cloned();
        message
    }

    fn messages_newest_first(&self, conversation_id: Uuid) -> impl Iterator<Item = &Message> {
        self.messages
            .iter()
            .rev()
            .filter(move |m| m.conversation_id == conversation_id)
    }
}

/// Process-local store with the same observable semantics as Postgres
#[derive(Default)]
pub struct InMemoryConversationStore {
    tables: RwLock<Tables>,
    fail_participant_writes: AtomicBool,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a profile used for sender and participant summaries
    pub async fn upsert_user(&self, user: UserSummary) {
        self.tables.write().await.users.insert(user.id, user);
    }

    /// Make `insert_participants` fail until switched off again
    pub fn fail_participant_writes(&self, fail: bool) {
        self.fail_participant_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn get_conversation(&self, id: Uuid) -> StoreResult<Option<Conversation>> {
        Ok(self.tables.read().await.conversations.get(&id).cloned())
    }

    async fn find_individual_conversations(
        &self,
        a: Uuid,
        b: Uuid,
    ) -> StoreResult<Vec<Conversation>> {
        let tables = self.tables.read().await;
        let mut found: Vec<Conversation> = tables
            .conversations
            .values()
            .filter(|c| !c.is_group() && c.has_participant(a) && c.has_participant(b))
            .cloned()
            .collect();
        found.sort_by_key(|c| c.created_at);
        Ok(found)
    }

    async fn insert_conversation(&self, new: NewConversation) -> StoreResult<Conversation> {
        let mut tables = self.tables.write().await;

        if tables.conversations.contains_key(&new.id) {
            return Err(StoreError::Conflict(format!("conversation {} exists", new.id)));
        }
        if let Some(key) = &new.direct_pair_key {
            let taken = tables
                .conversations
                .values()
                .any(|c| c.direct_pair_key.as_deref() == Some(key.as_str()));
            if taken {
                return Err(StoreError::Conflict(format!("pair key {key} is taken")));
            }
        }

        let now = tables.tick();
        let conversation = Conversation {
            id: new.id,
            conversation_type: new.conversation_type,
            title: new.title,
            avatar_url: new.avatar_url,
            participants: new.participants,
            direct_pair_key: new.direct_pair_key,
            last_message_id: None,
            last_message_at: Some(now),
            created_at: now,
            updated_at: now,
        };
        tables
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn list_conversations_for(&self, user_id: Uuid) -> StoreResult<Vec<Conversation>> {
        let tables = self.tables.read().await;
        let mut found: Vec<Conversation> = tables
            .conversations
            .values()
            .filter(|c| c.has_participant(user_id))
            .cloned()
            .collect();
        // Option orders None first, so reversing the comparison puts nulls last
        found.sort_by(|x, y| {
            y.last_message_at
                .cmp(&x.last_message_at)
                .then_with(|| y.created_at.cmp(&x.created_at))
        });
        Ok(found)
    }

    async fn list_conversation_ids(
        &self,
        after: Option<Uuid>,
        limit: i64,
    ) -> StoreResult<Vec<Uuid>> {
        let tables = self.tables.read().await;
        let mut ids: Vec<Uuid> = tables
            .conversations
            .keys()
            .copied()
            .filter(|id| after.map_or(true, |a| *id > a))
            .collect();
        ids.sort();
        ids.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(ids)
    }

    async fn append_participants(
        &self,
        id: Uuid,
        user_ids: &[Uuid],
    ) -> StoreResult<Option<Conversation>> {
        let mut tables = self.tables.write().await;
        let now = tables.tick();
        Ok(tables.conversations.get_mut(&id).map(|c| {
            c.participants.extend_from_slice(user_ids);
            c.updated_at = now;
            c.clone()
        }))
    }

    async fn remove_participant(
        &self,
        id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Option<Conversation>> {
        let mut tables = self.tables.write().await;
        let now = tables.tick();
        Ok(tables.conversations.get_mut(&id).map(|c| {
            c.participants.retain(|p| *p != user_id);
            c.direct_pair_key = None;
            c.updated_at = now;
            c.clone()
        }))
    }

    async fn insert_participants(&self, rows: &[NewParticipant]) -> StoreResult<u64> {
        if self.fail_participant_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Database(
                "injected failure: conversation_participants unavailable".into(),
            ));
        }

        let mut tables = self.tables.write().await;
        let mut inserted = 0;
        for row in rows {
            let active = tables.participants.iter().any(|p| {
                p.conversation_id == row.conversation_id && p.user_id == row.user_id && p.is_active()
            });
            if active {
                continue;
            }
            let now = tables.tick();
            tables.participants.push(ConversationParticipant {
                id: Uuid::new_v4(),
                conversation_id: row.conversation_id,
                user_id: row.user_id,
                role: row.role,
                joined_at: now,
                left_at: None,
                last_read_at: None,
                user: None,
            });
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn get_active_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Option<ConversationParticipant>> {
        let tables = self.tables.read().await;
        Ok(tables
            .participants
            .iter()
            .find(|p| p.conversation_id == conversation_id && p.user_id == user_id && p.is_active())
            .cloned()
            .map(|p| tables.with_user(p)))
    }

    async fn list_participants(
        &self,
        conversation_id: Uuid,
    ) -> StoreResult<Vec<ConversationParticipant>> {
        let tables = self.tables.read().await;
        Ok(tables
            .participants
            .iter()
            .filter(|p| p.conversation_id == conversation_id)
            .cloned()
            .map(|p| tables.with_user(p))
            .collect())
    }

    async fn mark_participant_left(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<u64> {
        let mut tables = self.tables.write().await;
        let now = tables.tick();
        let mut updated = 0;
        for p in tables.participants.iter_mut().filter(|p| {
            p.conversation_id == conversation_id && p.user_id == user_id && p.is_active()
        }) {
            p.left_at = Some(now);
            updated += 1;
        }
        Ok(updated)
    }

    async fn repair_membership(&self, conversation_id: Uuid) -> StoreResult<Option<RepairOutcome>> {
        let mut tables = self.tables.write().await;
        let Some(conversation) = tables.conversations.get(&conversation_id).cloned() else {
            return Ok(None);
        };
        let rows: Vec<ConversationParticipant> = tables
            .participants
            .iter()
            .filter(|p| p.conversation_id == conversation_id)
            .cloned()
            .collect();

        let repair = MembershipRepair::plan(&conversation, &rows);
        let mut outcome = RepairOutcome::default();
        if !repair.insert.is_empty() && self.fail_participant_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Database(
                "injected failure: conversation_participants unavailable".into(),
            ));
        }

        for row in &repair.insert {
            let now = tables.tick();
            tables.participants.push(ConversationParticipant {
                id: Uuid::new_v4(),
                conversation_id,
                user_id: row.user_id,
                role: row.role,
                joined_at: now,
                left_at: None,
                last_read_at: None,
                user: None,
            });
            outcome.rows_inserted += 1;
        }

        let now = tables.tick();
        for p in tables
            .participants
            .iter_mut()
            .filter(|p| p.conversation_id == conversation_id && p.is_active())
        {
            if repair.depart.contains(&p.user_id) {
                p.left_at = Some(now);
                outcome.rows_departed += 1;
            } else if repair.promote == Some(p.user_id) {
                p.role = MemberRole::Admin;
                outcome.admins_promoted += 1;
            }
        }
        Ok(Some(outcome))
    }

    async fn update_read_cursor(&self, conversation_id: Uuid, user_id: Uuid) -> StoreResult<u64> {
        let mut tables = self.tables.write().await;
        let newest = tables
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .map(|m| m.created_at)
            .max();
        let mut updated = 0;
        for p in tables.participants.iter_mut().filter(|p| {
            p.conversation_id == conversation_id && p.user_id == user_id && p.is_active()
        }) {
            p.last_read_at = p.last_read_at.max(newest);
            updated += 1;
        }
        Ok(updated)
    }

    async fn append_message(&self, new: NewMessage) -> StoreResult<Message> {
        let mut tables = self.tables.write().await;
        if !tables.conversations.contains_key(&new.conversation_id) {
            return Err(StoreError::Database(format!(
                "conversation {} does not exist",
                new.conversation_id
            )));
        }

        let now = tables.tick();
        let message = Message {
            id: new.id,
            conversation_id: new.conversation_id,
            sender_id: new.sender_id,
            receiver_id: new.receiver_id,
            content: new.content,
            media_url: new.media_url,
            message_type: new.message_type,
            reply_to_id: new.reply_to_id,
            is_read: false,
            read_at: None,
            created_at: now,
            updated_at: None,
            sender: None,
        };
        tables.messages.push(message.clone());

        if let Some(conversation) = tables.conversations.get_mut(&message.conversation_id) {
            conversation.last_message_id = Some(message.id);
            conversation.last_message_at = Some(now);
            conversation.updated_at = now;
        }

        Ok(tables.with_sender(message))
    }

    async fn get_message(&self, id: Uuid) -> StoreResult<Option<Message>> {
        let tables = self.tables.read().await;
        Ok(tables
            .messages
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .map(|m| tables.with_sender(m)))
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Message>> {
        let tables = self.tables.read().await;
        Ok(tables
            .messages_newest_first(conversation_id)
            .skip(usize::try_from(offset).unwrap_or(0))
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .map(|m| tables.with_sender(m))
            .collect())
    }

    async fn last_message(&self, conversation_id: Uuid) -> StoreResult<Option<Message>> {
        let tables = self.tables.read().await;
        let last = tables.messages_newest_first(conversation_id).next().cloned();
        Ok(last.map(|m| tables.with_sender(m)))
    }

    async fn count_unread(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> StoreResult<i64> {
        let tables = self.tables.read().await;
        let count = tables
            .messages_newest_first(conversation_id)
            .filter(|m| m.sender_id != user_id)
            .filter(|m| since.map_or(true, |cursor| m.created_at > cursor))
            .count();
        Ok(count as i64)
    }

    async fn mark_messages_read(&self, conversation_id: Uuid, reader_id: Uuid) -> StoreResult<u64> {
        let mut tables = self.tables.write().await;
        let now = tables.tick();
        let mut updated = 0;
        for m in tables.messages.iter_mut().filter(|m| {
            m.conversation_id == conversation_id && m.sender_id != reader_id && !m.is_read
        }) {
            m.is_read = true;
            m.read_at = Some(now);
            updated += 1;
        }
        Ok(updated)
    }

    async fn update_message(
        &self,
        id: Uuid,
        content: Option<String>,
        media_url: Option<String>,
    ) -> StoreResult<Option<Message>> {
        let mut tables = self.tables.write().await;
        let now = tables.tick();
        let updated = tables.messages.iter_mut().find(|m| m.id == id).map(|m| {
            if let Some(content) = content {
                m.content = content;
            }
            if media_url.is_some() {
                m.media_url = media_url;
            }
            m.updated_at = Some(now);
            m.clone()
        });
        Ok(updated.map(|m| tables.with_sender(m)))
    }

    async fn delete_message(&self, id: Uuid) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        let before = tables.messages.len();
        tables.messages.retain(|m| m.id != id);
        for m in tables.messages.iter_mut().filter(|m| m.reply_to_id == Some(id)) {
            m.reply_to_id = None;
        }
        Ok(tables.messages.len() < before)
    }
}
