//! Conversation Directory
//!
//! Creation rules per conversation type and one-on-one deduplication. A
//! one-on-one conversation carries a canonical pair key that the store keeps
//! unique, so two racing creators end up with the same conversation.

use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use super::{MembershipTracker, SummaryBuilder};
use crate::error::{AppError, AppResult};
use crate::models::{
    pair_key, Conversation, ConversationSummary, ConversationType, CreateConversationRequest,
    NewConversation,
};
use crate::store::{ConversationStore, StoreError};

#[derive(Clone)]
pub struct ConversationDirectory {
    store: Arc<dyn ConversationStore>,
    membership: MembershipTracker,
    summaries: SummaryBuilder,
}

impl ConversationDirectory {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        membership: MembershipTracker,
        summaries: SummaryBuilder,
    ) -> Self {
        Self {
            store,
            membership,
            summaries,
        }
    }

    pub async fn create_conversation(
        &self,
        requester_id: Uuid,
        request: CreateConversationRequest,
    ) -> AppResult<ConversationSummary> {
        request.validate()?;

        let conversation = match request.conversation_type {
            ConversationType::Individual => {
                let target = match request.participant_ids.as_slice() {
                    [target] => *target,
                    _ => {
                        return Err(AppError::BadRequest(
                            "individual conversations need exactly one other participant".into(),
                        ))
                    }
                };
                if target == requester_id {
                    return Err(AppError::BadRequest(
                        "cannot start a conversation with yourself".into(),
                    ));
                }

                if let Some(existing) = self.find_individual(requester_id, target).await? {
                    return self.summaries.compose(existing, requester_id).await;
                }

                let new = NewConversation {
                    id: Uuid::new_v4(),
                    conversation_type: ConversationType::Individual,
                    title: None,
                    avatar_url: None,
                    participants: vec![requester_id, target],
                    direct_pair_key: Some(pair_key(requester_id, target)),
                };
                match self.store.insert_conversation(new).await {
                    Ok(conversation) => conversation,
                    Err(StoreError::Conflict(_)) => {
                        // Lost a creation race, or the pair key belongs to a conversation
                        // someone has since left
                        warn!(
                            requester_id = %requester_id,
                            target_id = %target,
                            "individual conversation insert conflicted"
                        );
                        let existing = self
                            .find_individual(requester_id, target)
                            .await?
                            .ok_or_else(|| {
                                AppError::Conflict(
                                    "conversation for this pair already exists".into(),
                                )
                            })?;
                        return self.summaries.compose(existing, requester_id).await;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            ConversationType::Group => {
                let title = request
                    .title
                    .as_deref()
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| {
                        AppError::BadRequest("group conversations require a title".into())
                    })?
                    .to_string();

                let mut participants = Vec::with_capacity(request.participant_ids.len() + 1);
                participants.push(requester_id);
                participants.extend_from_slice(&request.participant_ids);

                self.store
                    .insert_conversation(NewConversation {
                        id: Uuid::new_v4(),
                        conversation_type: ConversationType::Group,
                        title: Some(title),
                        avatar_url: request.avatar_url,
                        participants,
                        direct_pair_key: None,
                    })
                    .await?
            }
        };

        self.membership
            .record_members(&conversation, requester_id)
            .await;

        info!(
            conversation_id = %conversation.id,
            conversation_type = conversation.conversation_type.to_db(),
            participants = conversation.participants.len(),
            "conversation created"
        );
        self.summaries.compose(conversation, requester_id).await
    }

    pub async fn find_one(
        &self,
        conversation_id: Uuid,
        requester_id: Uuid,
    ) -> AppResult<ConversationSummary> {
        let conversation = self
            .membership
            .check_participant(conversation_id, requester_id)
            .await?;
        self.summaries.compose(conversation, requester_id).await
    }

    /// Every conversation the caller is in, most recently active first
    pub async fn find_all(&self, requester_id: Uuid) -> AppResult<Vec<ConversationSummary>> {
        let conversations = self.store.list_conversations_for(requester_id).await?;
        try_join_all(
            conversations
                .into_iter()
                .map(|conversation| self.summaries.compose(conversation, requester_id)),
        )
        .await
    }

    /// The live one-on-one conversation between `a` and `b`, if any
    pub async fn find_individual(&self, a: Uuid, b: Uuid) -> AppResult<Option<Conversation>> {
        Ok(self
            .store
            .find_individual_conversations(a, b)
            .await?
            .into_iter()
            .find(|c| c.is_pair_of(a, b)))
    }
}
