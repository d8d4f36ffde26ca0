//! Message Ledger: sends, replies, history pages, read state, edits and deletes

use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;
use validator::Validate;

use super::MembershipTracker;
use crate::error::{AppError, AppResult};
use crate::metrics::{record_membership_sync_failure, record_message_sent};
use crate::models::{
    Conversation, EditMessageRequest, Message, MessagePageQuery, NewMessage, SendMessageRequest,
};
use crate::store::ConversationStore;

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 100;

/// `(limit, offset)` for a 1-based page request
pub fn page_window(query: MessagePageQuery) -> AppResult<(i64, i64)> {
    let page = query.page.unwrap_or(1);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);

    if page < 1 {
        return Err(AppError::BadRequest("page must be at least 1".into()));
    }
    if !(1..=MAX_PAGE_SIZE).contains(&limit) {
        return Err(AppError::BadRequest(format!(
            "limit must be between 1 and {MAX_PAGE_SIZE}"
        )));
    }

    let limit = i64::from(limit);
    Ok((limit, (i64::from(page) - 1) * limit))
}

fn require_content(content: &str) -> AppResult<()> {
    if content.trim().is_empty() {
        return Err(AppError::BadRequest("content must not be empty".into()));
    }
    Ok(())
}

#[derive(Clone)]
pub struct MessageLedger {
    store: Arc<dyn ConversationStore>,
    membership: MembershipTracker,
}

impl MessageLedger {
    pub fn new(store: Arc<dyn ConversationStore>, membership: MembershipTracker) -> Self {
        Self { store, membership }
    }

    pub async fn send_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        request: SendMessageRequest,
    ) -> AppResult<Message> {
        let conversation = self
            .membership
            .check_participant(conversation_id, sender_id)
            .await?;
        self.append(&conversation, sender_id, request, None).await
    }

    /// Send a message that quotes `message_id` from the same conversation
    pub async fn reply_to_message(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        sender_id: Uuid,
        request: SendMessageRequest,
    ) -> AppResult<Message> {
        let conversation = self
            .membership
            .check_participant(conversation_id, sender_id)
            .await?;
        let target = self.message_in(conversation_id, message_id).await?;
        self.append(&conversation, sender_id, request, Some(target.id))
            .await
    }

    /// One page of history in chronological order
    pub async fn get_messages(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        query: MessagePageQuery,
    ) -> AppResult<Vec<Message>> {
        let (limit, offset) = page_window(query)?;
        self.membership
            .check_participant(conversation_id, user_id)
            .await?;

        let mut page = self
            .store
            .list_messages(conversation_id, limit, offset)
            .await?;
        page.reverse();
        Ok(page)
    }

    /// Flag other senders' messages as read and move the caller's read cursor
    pub async fn mark_as_read(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<()> {
        let conversation = self
            .membership
            .check_participant(conversation_id, user_id)
            .await?;

        let flagged = self
            .store
            .mark_messages_read(conversation_id, user_id)
            .await?;

        let moved = self
            .store
            .update_read_cursor(conversation_id, user_id)
            .await?;
        if moved == 0 {
            // Array says member, but the row write was lost earlier
            match self.membership.restore_row(&conversation, user_id).await {
                Ok(true) => {
                    self.store
                        .update_read_cursor(conversation_id, user_id)
                        .await?;
                }
                Ok(false) => {}
                Err(e) => {
                    record_membership_sync_failure("restore_row");
                    warn!(
                        conversation_id = %conversation_id,
                        user_id = %user_id,
                        error = %e,
                        "failed to restore membership row; read cursor not moved"
                    );
                }
            }
        }

        debug!(conversation_id = %conversation_id, user_id = %user_id, flagged, "marked as read");
        Ok(())
    }

    /// Only the sender may edit
    pub async fn edit_message(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        request: EditMessageRequest,
    ) -> AppResult<Message> {
        request.validate()?;
        if request.content.is_none() && request.media_url.is_none() {
            return Err(AppError::BadRequest(
                "nothing to update: provide content or media_url".into(),
            ));
        }
        if let Some(content) = &request.content {
            require_content(content)?;
        }

        self.membership
            .check_participant(conversation_id, user_id)
            .await?;
        let message = self.message_in(conversation_id, message_id).await?;
        if message.sender_id != user_id {
            return Err(AppError::Forbidden(
                "only the sender can edit this message".into(),
            ));
        }

        self.store
            .update_message(message_id, request.content, request.media_url)
            .await?
            .ok_or_else(|| AppError::NotFound("message not found".into()))
    }

    /// Hard delete; only the sender may delete
    pub async fn delete_message(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<()> {
        self.membership
            .check_participant(conversation_id, user_id)
            .await?;
        let message = self.message_in(conversation_id, message_id).await?;
        if message.sender_id != user_id {
            return Err(AppError::Forbidden(
                "only the sender can delete this message".into(),
            ));
        }

        if !self.store.delete_message(message_id).await? {
            return Err(AppError::NotFound("message not found".into()));
        }
        Ok(())
    }

    async fn message_in(&self, conversation_id: Uuid, message_id: Uuid) -> AppResult<Message> {
        self.store
            .get_message(message_id)
            .await?
            .filter(|m| m.conversation_id == conversation_id)
            .ok_or_else(|| AppError::NotFound("message not found".into()))
    }

    async fn append(
        &self,
        conversation: &Conversation,
        sender_id: Uuid,
        request: SendMessageRequest,
        reply_to_id: Option<Uuid>,
    ) -> AppResult<Message> {
        request.validate()?;
        require_content(&request.content)?;

        let message = self
            .store
            .append_message(NewMessage {
                id: Uuid::new_v4(),
                conversation_id: conversation.id,
                sender_id,
                receiver_id: conversation.counterpart_of(sender_id),
                content: request.content,
                media_url: request.media_url,
                message_type: request.message_type,
                reply_to_id,
            })
            .await?;

        record_message_sent(conversation.conversation_type);
        debug!(
            conversation_id = %conversation.id,
            message_id = %message.id,
            "message appended"
        );
        Ok(message)
    }
}
