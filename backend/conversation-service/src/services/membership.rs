//! Membership Tracker
//!
//! Membership lives in two places: the `participants` array on the
//! conversation (authoritative, used for every access check) and one
//! `conversation_participants` row per active member carrying role, join/leave
//! times and the read cursor. Array writes are primary; row writes after a
//! successful array write are best-effort and get repaired by [`MembershipTracker::reconcile`].

use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::metrics::record_membership_sync_failure;
use crate::models::{Conversation, MemberRole, NewParticipant};
use crate::store::ConversationStore;

/// Outcome of a reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub conversations: u64,
    pub rows_inserted: u64,
    pub rows_departed: u64,
    pub admins_promoted: u64,
    pub failed: u64,
}

impl ReconcileReport {
    fn absorb(&mut self, other: ReconcileReport) {
        self.conversations += other.conversations;
        self.rows_inserted += other.rows_inserted;
        self.rows_departed += other.rows_departed;
        self.admins_promoted += other.admins_promoted;
        self.failed += other.failed;
    }
}

#[derive(Clone)]
pub struct MembershipTracker {
    store: Arc<dyn ConversationStore>,
}

impl MembershipTracker {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    /// Load the conversation and require `user_id` in its participants array
    pub async fn check_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Conversation> {
        let conversation = self
            .store
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| AppError::NotFound("conversation not found".into()))?;

        if !conversation.has_participant(user_id) {
            return Err(AppError::Forbidden(
                "not a participant of this conversation".into(),
            ));
        }
        Ok(conversation)
    }

    /// Best-effort rows for a freshly created conversation: `creator` is admin
    pub async fn record_members(&self, conversation: &Conversation, creator: Uuid) {
        let rows: Vec<NewParticipant> = conversation
            .participants
            .iter()
            .map(|&user_id| NewParticipant {
                conversation_id: conversation.id,
                user_id,
                role: if user_id == creator {
                    MemberRole::Admin
                } else {
                    MemberRole::Member
                },
            })
            .collect();

        self.insert_rows_best_effort(conversation.id, &rows, "create")
            .await;
    }

    /// Append users to a group; only an active admin may do this
    pub async fn add_participants(
        &self,
        conversation_id: Uuid,
        requester_id: Uuid,
        user_ids: &[Uuid],
    ) -> AppResult<Conversation> {
        let conversation = self
            .check_participant(conversation_id, requester_id)
            .await?;

        if !conversation.is_group() {
            return Err(AppError::BadRequest(
                "participants can only be added to group conversations".into(),
            ));
        }
        if user_ids.is_empty() {
            return Err(AppError::BadRequest("user_ids must not be empty".into()));
        }

        let requester = self
            .store
            .get_active_participant(conversation_id, requester_id)
            .await?;
        if !requester.map_or(false, |row| row.role.is_privileged()) {
            return Err(AppError::Forbidden(
                "only admins can add participants".into(),
            ));
        }

        let updated = self
            .store
            .append_participants(conversation_id, user_ids)
            .await?
            .ok_or_else(|| AppError::NotFound("conversation not found".into()))?;

        let rows: Vec<NewParticipant> = user_ids
            .iter()
            .map(|&user_id| NewParticipant {
                conversation_id,
                user_id,
                role: MemberRole::Member,
            })
            .collect();
        self.insert_rows_best_effort(conversation_id, &rows, "add_participants")
            .await;

        info!(
            conversation_id = %conversation_id,
            requester_id = %requester_id,
            added = user_ids.len(),
            "participants added"
        );
        Ok(updated)
    }

    /// Drop the caller from the array, then stamp their row as departed
    pub async fn leave_conversation(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<()> {
        self.check_participant(conversation_id, user_id).await?;

        let updated = self
            .store
            .remove_participant(conversation_id, user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("conversation not found".into()))?;

        if let Err(e) = self
            .store
            .mark_participant_left(conversation_id, user_id)
            .await
        {
            record_membership_sync_failure("leave");
            error!(
                conversation_id = %conversation_id,
                user_id = %user_id,
                error = %e,
                "failed to mark membership row as left"
            );
        }

        if updated.participants.is_empty() {
            info!(conversation_id = %conversation_id, "last participant left conversation");
        }
        Ok(())
    }

    /// Insert a row for an array member that has none; returns whether one was written.
    ///
    /// The first array entry comes back as admin when no array member holds an
    /// active admin row.
    pub async fn restore_row(&self, conversation: &Conversation, user_id: Uuid) -> AppResult<bool> {
        if !conversation.has_participant(user_id) {
            return Ok(false);
        }

        let role = if conversation.participants.first() == Some(&user_id) {
            let rows = self.store.list_participants(conversation.id).await?;
            let has_admin = rows.iter().any(|row| {
                row.is_active()
                    && row.role.is_privileged()
                    && conversation.has_participant(row.user_id)
            });
            if has_admin {
                MemberRole::Member
            } else {
                MemberRole::Admin
            }
        } else {
            MemberRole::Member
        };

        let inserted = self
            .store
            .insert_participants(&[NewParticipant {
                conversation_id: conversation.id,
                user_id,
                role,
            }])
            .await?;
        Ok(inserted > 0)
    }

    /// Bring the rows of one conversation in line with its participants array
    pub async fn reconcile(&self, conversation_id: Uuid) -> AppResult<ReconcileReport> {
        let outcome = self
            .store
            .repair_membership(conversation_id)
            .await?
            .ok_or_else(|| AppError::NotFound("conversation not found".into()))?;

        let report = ReconcileReport {
            conversations: 1,
            rows_inserted: outcome.rows_inserted,
            rows_departed: outcome.rows_departed,
            admins_promoted: outcome.admins_promoted,
            failed: 0,
        };

        if report.rows_inserted + report.rows_departed + report.admins_promoted > 0 {
            info!(
                conversation_id = %conversation_id,
                inserted = report.rows_inserted,
                departed = report.rows_departed,
                promoted = report.admins_promoted,
                "membership rows reconciled"
            );
        }
        Ok(report)
    }

    /// Reconcile every conversation, walking ids in pages of `batch_size`
    pub async fn reconcile_all(&self, batch_size: i64) -> AppResult<ReconcileReport> {
        if batch_size < 1 {
            return Err(AppError::BadRequest("batch size must be positive".into()));
        }

        let mut report = ReconcileReport::default();
        let mut after = None;
        loop {
            let ids = self.store.list_conversation_ids(after, batch_size).await?;
            for &id in &ids {
                match self.reconcile(id).await {
                    Ok(one) => report.absorb(one),
                    Err(e) => {
                        warn!(conversation_id = %id, error = %e, "reconciliation failed");
                        report.failed += 1;
                    }
                }
            }

            if (ids.len() as i64) < batch_size {
                break;
            }
            after = ids.last().copied();
        }
        Ok(report)
    }

    async fn insert_rows_best_effort(
        &self,
        conversation_id: Uuid,
        rows: &[NewParticipant],
        operation: &'static str,
    ) {
        if let Err(e) = self.store.insert_participants(rows).await {
            record_membership_sync_failure(operation);
            error!(
                conversation_id = %conversation_id,
                operation,
                rows = rows.len(),
                error = %e,
                "failed to write membership rows"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::fixtures::{group_request, harness};

    #[tokio::test]
    async fn test_check_participant_gate() {
        let (_store, state) = harness();
        let (a, b, outsider) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let created = state
            .directory
            .create_conversation(a, group_request(Some("Squad"), vec![b]))
            .await
            .unwrap();
        let id = created.conversation.id;

        assert!(state.membership.check_participant(id, b).await.is_ok());
        assert!(matches!(
            state.membership.check_participant(id, outsider).await,
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            state.membership.check_participant(Uuid::new_v4(), a).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_add_participants_admin_only() {
        let (store, state) = harness();
        let (a, b, c, d) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let id = state
            .directory
            .create_conversation(a, group_request(Some("Squad"), vec![b, c]))
            .await
            .unwrap()
            .conversation
            .id;

        let updated = state.membership.add_participants(id, a, &[d]).await.unwrap();
        assert_eq!(updated.participants, vec![a, b, c, d]);
        let row = store.get_active_participant(id, d).await.unwrap().unwrap();
        assert_eq!(row.role, MemberRole::Member);

        let err = state
            .membership
            .add_participants(id, b, &[Uuid::new_v4()])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_add_participants_keeps_array_duplicates() {
        let (store, state) = harness();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let id = state
            .directory
            .create_conversation(a, group_request(Some("Squad"), vec![]))
            .await
            .unwrap()
            .conversation
            .id;

        state.membership.add_participants(id, a, &[b]).await.unwrap();
        let updated = state.membership.add_participants(id, a, &[b]).await.unwrap();
        assert_eq!(updated.participants, vec![a, b, b]);

        let active = store
            .list_participants(id)
            .await
            .unwrap()
            .into_iter()
            .filter(|row| row.user_id == b && row.is_active())
            .count();
        assert_eq!(active, 1);
    }

    #[tokio::test]
    async fn test_add_participants_rejects_individual() {
        let (_store, state) = harness();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let id = state
            .directory
            .create_conversation(a, crate::services::fixtures::direct_request(b))
            .await
            .unwrap()
            .conversation
            .id;

        let err = state
            .membership
            .add_participants(id, a, &[Uuid::new_v4()])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_row_failure_is_swallowed() {
        let (store, state) = harness();
        let (a, b, d) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let id = state
            .directory
            .create_conversation(a, group_request(Some("Squad"), vec![b]))
            .await
            .unwrap()
            .conversation
            .id;

        store.fail_participant_writes(true);
        let updated = state.membership.add_participants(id, a, &[d]).await.unwrap();
        store.fail_participant_writes(false);

        assert!(updated.has_participant(d));
        assert!(store.get_active_participant(id, d).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_leave_and_last_member() {
        let (store, state) = harness();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let id = state
            .directory
            .create_conversation(a, group_request(Some("Squad"), vec![b]))
            .await
            .unwrap()
            .conversation
            .id;

        state.membership.leave_conversation(id, a).await.unwrap();
        let rows = store.list_participants(id).await.unwrap();
        let a_row = rows.iter().find(|row| row.user_id == a).unwrap();
        assert!(a_row.left_at.is_some());
        assert!(matches!(
            state.membership.leave_conversation(id, a).await,
            Err(AppError::Forbidden(_))
        ));

        state.membership.leave_conversation(id, b).await.unwrap();
        let conversation = store.get_conversation(id).await.unwrap().unwrap();
        assert!(conversation.participants.is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_repairs_rows() {
        let (store, state) = harness();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        store.fail_participant_writes(true);
        let id = state
            .directory
            .create_conversation(a, group_request(Some("Squad"), vec![b, c]))
            .await
            .unwrap()
            .conversation
            .id;
        store.fail_participant_writes(false);
        assert!(store.list_participants(id).await.unwrap().is_empty());

        let report = state.membership.reconcile(id).await.unwrap();
        assert_eq!(report.rows_inserted, 3);
        let admin = store.get_active_participant(id, a).await.unwrap().unwrap();
        assert_eq!(admin.role, MemberRole::Admin);

        // Array shrinks without the row following
        store.remove_participant(id, c).await.unwrap();
        let report = state.membership.reconcile(id).await.unwrap();
        assert_eq!(report.rows_inserted, 0);
        assert_eq!(report.rows_departed, 1);
        assert!(store.get_active_participant(id, c).await.unwrap().is_none());

        let again = state.membership.reconcile(id).await.unwrap();
        assert_eq!((again.rows_inserted, again.rows_departed), (0, 0));
    }

    #[tokio::test]
    async fn test_reconcile_all_pages() {
        let (store, state) = harness();
        let a = Uuid::new_v4();

        store.fail_participant_writes(true);
        for _ in 0..5 {
            state
                .directory
                .create_conversation(a, group_request(Some("Squad"), vec![Uuid::new_v4()]))
                .await
                .unwrap();
        }
        store.fail_participant_writes(false);

        let report = state.membership.reconcile_all(2).await.unwrap();
        assert_eq!(report.conversations, 5);
        assert_eq!(report.rows_inserted, 10);
        assert_eq!(report.failed, 0);

        assert!(state.membership.reconcile_all(0).await.is_err());
    }

    #[tokio::test]
    async fn test_creator_keeps_admin_after_lost_row() {
        let (store, state) = harness();
        let (a, b, d) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        store.fail_participant_writes(true);
        let id = state
            .directory
            .create_conversation(a, group_request(Some("Squad"), vec![b]))
            .await
            .unwrap()
            .conversation
            .id;
        store.fail_participant_writes(false);

        // Healing through the read path hands the creator back admin
        state.ledger.mark_as_read(id, a).await.unwrap();
        let row = store.get_active_participant(id, a).await.unwrap().unwrap();
        assert_eq!(row.role, MemberRole::Admin);

        let report = state.membership.reconcile(id).await.unwrap();
        assert_eq!((report.rows_inserted, report.admins_promoted), (1, 0));
        let b_row = store.get_active_participant(id, b).await.unwrap().unwrap();
        assert_eq!(b_row.role, MemberRole::Member);

        assert!(state.membership.add_participants(id, a, &[d]).await.is_ok());
    }

    #[tokio::test]
    async fn test_restore_row_for_non_creator_is_member() {
        let (store, state) = harness();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        store.fail_participant_writes(true);
        let conversation = state
            .directory
            .create_conversation(a, group_request(Some("Squad"), vec![b]))
            .await
            .unwrap()
            .conversation;
        store.fail_participant_writes(false);

        assert!(state.membership.restore_row(&conversation, b).await.unwrap());
        let row = store.get_active_participant(conversation.id, b).await.unwrap().unwrap();
        assert_eq!(row.role, MemberRole::Member);
        assert!(!state.membership.restore_row(&conversation, b).await.unwrap());
    }

    #[tokio::test]
    async fn test_reconcile_promotes_first_member_without_admin() {
        let (store, state) = harness();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        store.fail_participant_writes(true);
        let id = state
            .directory
            .create_conversation(a, group_request(Some("Squad"), vec![b]))
            .await
            .unwrap()
            .conversation
            .id;
        store.fail_participant_writes(false);

        let rows: Vec<NewParticipant> = [a, b]
            .iter()
            .map(|&user_id| NewParticipant {
                conversation_id: id,
                user_id,
                role: MemberRole::Member,
            })
            .collect();
        store.insert_participants(&rows).await.unwrap();

        let report = state.membership.reconcile(id).await.unwrap();
        assert_eq!(report.admins_promoted, 1);
        assert_eq!(report.rows_inserted, 0);
        let row = store.get_active_participant(id, a).await.unwrap().unwrap();
        assert_eq!(row.role, MemberRole::Admin);
        assert!(state.membership.add_participants(id, a, &[Uuid::new_v4()]).await.is_ok());
    }

    #[tokio::test]
    async fn test_reconcile_after_leave_keeps_row_departed() {
        let (store, state) = harness();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let id = state
            .directory
            .create_conversation(a, group_request(Some("Squad"), vec![b]))
            .await
            .unwrap()
            .conversation
            .id;

        state.membership.leave_conversation(id, b).await.unwrap();
        let report = state.membership.reconcile(id).await.unwrap();
        assert_eq!((report.rows_inserted, report.rows_departed), (0, 0));
        assert!(store.get_active_participant(id, b).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_reconcile_concurrent_with_adds() {
        let (store, state) = harness();
        let a = Uuid::new_v4();
        let id = state
            .directory
            .create_conversation(a, group_request(Some("Squad"), vec![]))
            .await
            .unwrap()
            .conversation
            .id;

        let mut tasks = Vec::new();
        for _ in 0..25 {
            let membership = state.membership.clone();
            let user_id = Uuid::new_v4();
            tasks.push(tokio::spawn(async move {
                membership.add_participants(id, a, &[user_id]).await.map(|_| ())
            }));
            let membership = state.membership.clone();
            tasks.push(tokio::spawn(async move {
                membership.reconcile(id).await.map(|_| ())
            }));
        }
        for result in futures::future::join_all(tasks).await {
            result.unwrap().unwrap();
        }

        let conversation = store.get_conversation(id).await.unwrap().unwrap();
        let rows = store.list_participants(id).await.unwrap();
        assert_eq!(conversation.participants.len(), 26);
        assert!(rows.iter().all(|row| row.is_active()));
        for user_id in &conversation.participants {
            assert!(rows.iter().any(|row| row.user_id == *user_id));
        }
    }
}
