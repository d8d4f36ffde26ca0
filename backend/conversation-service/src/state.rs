use std::sync::Arc;

use crate::services::{ConversationDirectory, MembershipTracker, MessageLedger, SummaryBuilder};
use crate::store::ConversationStore;

#[derive(Clone)]
pub struct AppState {
    pub directory: ConversationDirectory,
    pub membership: MembershipTracker,
    pub ledger: MessageLedger,
    pub summaries: SummaryBuilder,
}

impl AppState {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        let membership = MembershipTracker::new(store.clone());
        let summaries = SummaryBuilder::new(store.clone());
        let directory =
            ConversationDirectory::new(store.clone(), membership.clone(), summaries.clone());
        let ledger = MessageLedger::new(store, membership.clone());

        Self {
            directory,
            membership,
            ledger,
            summaries,
        }
    }
}
