//! Conversation endpoints
//!
//! Mounted under `/conversations`; every handler takes the caller from the
//! [`User`] guard and leaves access control to the services.

use actix_web::{get, post, web, HttpResponse};
use uuid::Uuid;
use validator::Validate;

use crate::error::AppError;
use crate::middleware::User;
use crate::models::{AddParticipantsRequest, CreateConversationRequest, SuccessResponse};
use crate::state::AppState;

/// POST /conversations
#[post("")]
pub async fn create_conversation(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<CreateConversationRequest>,
) -> Result<HttpResponse, AppError> {
    let summary = state
        .directory
        .create_conversation(user.id, body.into_inner())
        .await?;
    Ok(HttpResponse::Created().json(summary))
}

/// GET /conversations
#[get("")]
pub async fn list_conversations(
    state: web::Data<AppState>,
    user: User,
) -> Result<HttpResponse, AppError> {
    let summaries = state.directory.find_all(user.id).await?;
    Ok(HttpResponse::Ok().json(summaries))
}

/// GET /conversations/{id}
#[get("/{id}")]
pub async fn get_conversation(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let summary = state
        .directory
        .find_one(conversation_id.into_inner(), user.id)
        .await?;
    Ok(HttpResponse::Ok().json(summary))
}

/// POST /conversations/{id}/participants
///
/// Group conversations only; the caller must be an admin.
#[post("/{id}/participants")]
pub async fn add_participants(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
    body: web::Json<AddParticipantsRequest>,
) -> Result<HttpResponse, AppError> {
    body.validate()?;
    let conversation = state
        .membership
        .add_participants(conversation_id.into_inner(), user.id, &body.user_ids)
        .await?;
    Ok(HttpResponse::Ok().json(conversation))
}

/// POST /conversations/{id}/leave
#[post("/{id}/leave")]
pub async fn leave_conversation(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    state
        .membership
        .leave_conversation(conversation_id.into_inner(), user.id)
        .await?;
    Ok(HttpResponse::Ok().json(SuccessResponse::ok()))
}
