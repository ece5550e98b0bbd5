use crate::{
    error::AppError,
    middleware::guards::User,
    models::{ConversationSummary, CordMode},
    services::{ConversationService, UnreadCounter},
    state::AppState,
};
use actix_web::{get, post, web, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    #[validate(length(min = 1, max = 64, message = "peerUsername is required"))]
    pub peer_username: String,
    #[serde(default)]
    pub encrypted: bool,
    /// Self-destruct timer in seconds, encrypted mode only
    #[validate(range(min = 1, message = "timer must be positive"))]
    pub timer: Option<i32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationCreated {
    pub id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// POST /api/v1/conversations
///
/// Idempotent: an existing conversation with the same participants and mode
/// is returned instead of a new one.
#[post("/conversations")]
pub async fn create_conversation(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<CreateConversationRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    body.validate()?;

    let id = ConversationService::get_or_create_with_username(
        &state,
        user.id,
        &body.peer_username,
        CordMode::from_flag(body.encrypted),
        body.timer,
    )
    .await?;

    Ok(HttpResponse::Ok().json(ConversationCreated { id }))
}

/// GET /api/v1/conversations
#[get("/conversations")]
pub async fn list_conversations(
    state: web::Data<AppState>,
    user: User,
) -> Result<HttpResponse, AppError> {
    let conversations: Vec<ConversationSummary> =
        ConversationService::list_for(&state, user.id).await?;
    Ok(HttpResponse::Ok().json(conversations))
}

/// POST /api/v1/conversations/{id}/read
#[post("/conversations/{id}/read")]
pub async fn mark_read(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    UnreadCounter::reset(&state, conversation_id.into_inner(), user.id).await?;
    Ok(HttpResponse::Ok().json(SuccessResponse { success: true }))
}
