use actix_web::{delete, get, patch, post, web, HttpResponse};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::User;
use crate::models::{EditMessageRequest, MessagePageQuery, SendMessageRequest, SuccessResponse};
use crate::state::AppState;

/// POST /conversations/{id}/messages
#[post("/{id}/messages")]
pub async fn send_message(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
    body: web::Json<SendMessageRequest>,
) -> Result<HttpResponse, AppError> {
    let message = state
        .ledger
        .send_message(conversation_id.into_inner(), user.id, body.into_inner())
        .await?;
    Ok(HttpResponse::Created().json(message))
}

/// GET /conversations/{id}/messages?page=&limit=
#[get("/{id}/messages")]
pub async fn get_messages(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
    query: web::Query<MessagePageQuery>,
) -> Result<HttpResponse, AppError> {
    let messages = state
        .ledger
        .get_messages(conversation_id.into_inner(), user.id, query.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(messages))
}

/// POST /conversations/{id}/read
#[post("/{id}/read")]
pub async fn mark_as_read(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    state
        .ledger
        .mark_as_read(conversation_id.into_inner(), user.id)
        .await?;
    Ok(HttpResponse::Ok().json(SuccessResponse::ok()))
}

/// PATCH /conversations/{id}/messages/{message_id}
#[patch("/{id}/messages/{message_id}")]
pub async fn edit_message(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<(Uuid, Uuid)>,
    body: web::Json<EditMessageRequest>,
) -> Result<HttpResponse, AppError> {
    let (conversation_id, message_id) = path.into_inner();
    let message = state
        .ledger
        .edit_message(conversation_id, message_id, user.id, body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(message))
}

/// DELETE /conversations/{id}/messages/{message_id}
#[delete("/{id}/messages/{message_id}")]
pub async fn delete_message(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<(Uuid, Uuid)>,
) -> Result<HttpResponse, AppError> {
    let (conversation_id, message_id) = path.into_inner();
    state
        .ledger
        .delete_message(conversation_id, message_id, user.id)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

/// POST /conversations/{id}/messages/{message_id}/reply
#[post("/{id}/messages/{message_id}/reply")]
pub async fn reply_to_message(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<(Uuid, Uuid)>,
    body: web::Json<SendMessageRequest>,
) -> Result<HttpResponse, AppError> {
    let (conversation_id, message_id) = path.into_inner();
    let message = state
        .ledger
        .reply_to_message(conversation_id, message_id, user.id, body.into_inner())
        .await?;
    Ok(HttpResponse::Created().json(message))
}
