pub mod directory;
pub mod ledger;
pub mod membership;
pub mod summary;

pub use directory::ConversationDirectory;
pub use ledger::MessageLedger;
pub use membership::{MembershipTracker, ReconcileReport};
pub use summary::SummaryBuilder;
