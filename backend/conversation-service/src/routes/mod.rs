use actix_middleware::JwtAuthMiddleware;
use actix_web::web;
use crypto_core::SessionTokens;
use std::sync::Arc;

use crate::metrics::metrics_handler;
use crate::middleware::error_handling::{
    json_error_handler, path_error_handler, query_error_handler,
};

pub mod conversations;
pub mod health;
pub mod messages;

/// Register every route; `/conversations` requires a session token
pub fn configure(cfg: &mut web::ServiceConfig, tokens: Arc<SessionTokens>) {
    cfg.app_data(web::JsonConfig::default().error_handler(json_error_handler))
        .app_data(web::QueryConfig::default().error_handler(query_error_handler))
        .app_data(web::PathConfig::default().error_handler(path_error_handler))
        .service(health::health)
        .route("/metrics", web::get().to(metrics_handler))
        .service(
            web::scope("/conversations")
                .wrap(JwtAuthMiddleware::new(tokens))
                .service(conversations::create_conversation)
                .service(conversations::list_conversations)
                .service(conversations::get_conversation)
                .service(conversations::add_participants)
                .service(conversations::leave_conversation)
                .service(messages::send_message)
                .service(messages::get_messages)
                .service(messages::mark_as_read)
                .service(messages::edit_message)
                .service(messages::delete_message)
                .service(messages::reply_to_message),
        );
}
