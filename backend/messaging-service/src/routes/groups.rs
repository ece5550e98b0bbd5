//! Group conversation endpoints
//!
//! Any participant may add members. New members only see status tracking for
//! messages sent after they joined.

use crate::{
    error::AppError,
    middleware::guards::User,
    models::CordMode,
    routes::conversations::{ConversationCreated, SuccessResponse},
    services::ConversationService,
    state::AppState,
};
use actix_web::{post, web, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupRequest {
    #[validate(length(min = 1, max = 256, message = "at least one member is required"))]
    pub member_usernames: Vec<String>,
    #[serde(default)]
    pub encrypted: bool,
    #[validate(range(min = 1, message = "timer must be positive"))]
    pub timer: Option<i32>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddParticipantRequest {
    #[validate(length(min = 1, max = 64))]
    pub username: String,
}

/// POST /api/v1/conversations/groups
#[post("/conversations/groups")]
pub async fn create_group(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<CreateGroupRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    body.validate()?;

    let mut members = Vec::with_capacity(body.member_usernames.len());
    for username in &body.member_usernames {
        let member = state
            .users
            .find_by_username(username)
            .await?
            .ok_or(AppError::NotFound)?;
        members.push(member.id);
    }

    let id = ConversationService::create_group(
        &state,
        user.id,
        &members,
        CordMode::from_flag(body.encrypted),
        body.timer,
    )
    .await?;

    Ok(HttpResponse::Ok().json(ConversationCreated { id }))
}

/// POST /api/v1/conversations/{id}/participants
#[post("/conversations/{id}/participants")]
pub async fn add_participant(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
    body: web::Json<AddParticipantRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    body.validate()?;

    ConversationService::add_participant_by_username(
        &state,
        conversation_id.into_inner(),
        user.id,
        &body.username,
    )
    .await?;

    Ok(HttpResponse::Ok().json(SuccessResponse { success: true }))
}
