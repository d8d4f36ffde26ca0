use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Conversation, ConversationSummary};
use crate::store::ConversationStore;

/// Composes a conversation with what a particular caller needs to render it
#[derive(Clone)]
pub struct SummaryBuilder {
    store: Arc<dyn ConversationStore>,
}

impl SummaryBuilder {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    pub async fn compose(
        &self,
        conversation: Conversation,
        requester_id: Uuid,
    ) -> AppResult<ConversationSummary> {
        let (participant_details, last_message, unread_count) = futures::try_join!(
            async {
                self.store
                    .list_participants(conversation.id)
                    .await
                    .map_err(AppError::from)
            },
            async {
                self.store
                    .last_message(conversation.id)
                    .await
                    .map_err(AppError::from)
            },
            self.unread_count(conversation.id, requester_id),
        )?;

        Ok(ConversationSummary {
            conversation,
            participant_details,
            last_message,
            unread_count,
        })
    }

    /// Messages from others newer than the caller's read cursor
    pub async fn unread_count(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<i64> {
        let cursor = self
            .store
            .get_active_participant(conversation_id, user_id)
            .await?
            .and_then(|row| row.last_read_at);

        Ok(self
            .store
            .count_unread(conversation_id, user_id, cursor)
            .await?)
    }
}
