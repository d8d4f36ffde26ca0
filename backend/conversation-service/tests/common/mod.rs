#![allow(dead_code)]

use actix_web::web;
use conversation_service::models::UserSummary;
use conversation_service::routes;
use conversation_service::state::AppState;
use conversation_service::store::InMemoryConversationStore;
use crypto_core::SessionTokens;
use std::env;
use std::sync::Arc;
use uuid::Uuid;

pub const TEST_SECRET: &str = "conversation-service-test-secret";

pub fn test_database_url() -> Option<String> {
    env::var("TEST_DATABASE_URL").ok()
}

/// Service wiring backed by the in-memory store
pub struct TestContext {
    pub store: Arc<InMemoryConversationStore>,
    pub state: web::Data<AppState>,
    pub tokens: Arc<SessionTokens>,
}

impl TestContext {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryConversationStore::new());
        let state = web::Data::new(AppState::new(store.clone()));
        let tokens = Arc::new(SessionTokens::from_secret(TEST_SECRET).expect("test secret"));
        Self {
            store,
            state,
            tokens,
        }
    }

    pub fn routes(&self) -> impl FnOnce(&mut web::ServiceConfig) {
        let tokens = self.tokens.clone();
        move |cfg| routes::configure(cfg, tokens)
    }

    /// Register a profile and return its id
    pub async fn user(&self, username: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.store
            .upsert_user(UserSummary {
                id,
                username: username.to_string(),
                display_name: None,
                avatar_url: None,
            })
            .await;
        id
    }

    pub fn bearer(&self, user_id: Uuid) -> (&'static str, String) {
        let token = self.tokens.issue(user_id).expect("issue token");
        ("Authorization", format!("Bearer {token}"))
    }
}
