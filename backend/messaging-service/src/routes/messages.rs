use crate::{
    error::AppError,
    middleware::guards::User,
    models::{DeliveryStatus, MediaRef, MessageDraft},
    routes::conversations::SuccessResponse,
    services::{MessageService, StatusTracker},
    state::AppState,
};
use actix_web::{get, post, web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Default, Deserialize)]
pub struct SendMessageRequest {
    pub text: Option<String>,
    pub media: Option<MediaRef>,
    pub metadata: Option<serde_json::Value>,
}

impl From<SendMessageRequest> for MessageDraft {
    fn from(req: SendMessageRequest) -> Self {
        MessageDraft {
            text: req.text,
            media: req.media,
            metadata: req.metadata,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct ListMessagesQuery {
    pub before: Option<DateTime<Utc>>,
    #[validate(range(min = 1, message = "limit must be positive"))]
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: DeliveryStatus,
}

/// GET /api/v1/conversations/{id}/messages?before=&limit=
///
/// Oldest first. `limit` is capped at 100.
#[get("/conversations/{id}/messages")]
pub async fn list_messages(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
    query: web::Query<ListMessagesQuery>,
) -> Result<HttpResponse, AppError> {
    let query = query.into_inner();
    query.validate()?;

    let messages = MessageService::list(
        &state,
        conversation_id.into_inner(),
        user.id,
        query.before,
        query.limit,
    )
    .await?;
    Ok(HttpResponse::Ok().json(messages))
}

/// POST /api/v1/conversations/{id}/messages
#[post("/conversations/{id}/messages")]
pub async fn send_message(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
    body: web::Json<SendMessageRequest>,
) -> Result<HttpResponse, AppError> {
    let message = MessageService::send(
        &state,
        conversation_id.into_inner(),
        user.id,
        body.into_inner().into(),
    )
    .await?;
    Ok(HttpResponse::Created().json(message))
}

/// POST /api/v1/conversations/{id}/messages/{mid}/status
#[post("/conversations/{id}/messages/{mid}/status")]
pub async fn update_status(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<(Uuid, Uuid)>,
    body: web::Json<UpdateStatusRequest>,
) -> Result<HttpResponse, AppError> {
    let (conversation_id, message_id) = path.into_inner();
    StatusTracker::update_status(&state, conversation_id, message_id, user.id, body.status)
        .await?;
    Ok(HttpResponse::Ok().json(SuccessResponse { success: true }))
}

/// GET /api/v1/conversations/{id}/messages/{mid}/statuses
#[get("/conversations/{id}/messages/{mid}/statuses")]
pub async fn list_statuses(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<(Uuid, Uuid)>,
) -> Result<HttpResponse, AppError> {
    let (conversation_id, message_id) = path.into_inner();
    let rows = StatusTracker::list(&state, conversation_id, message_id, user.id).await?;
    Ok(HttpResponse::Ok().json(rows))
}
