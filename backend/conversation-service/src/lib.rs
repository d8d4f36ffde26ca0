//! Conversation service
//!
//! One-on-one and group conversations, membership and direct messages for
//! the Nova social backend. Storage sits behind [`store::ConversationStore`];
//! the HTTP surface lives in [`routes`].

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
