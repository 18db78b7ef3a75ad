use crate::{
    error::AppError,
    middleware::guards::User,
    models::MessageType,
    services::SendMessageRequest,
    state::AppState,
};
use actix_web::{get, post, web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

#[derive(Deserialize)]
pub struct SendBody {
    pub to_user_id: i64,
    #[serde(default = "default_message_type")]
    pub message_type: i16,
    pub content: String,
    #[serde(default)]
    pub extra: Option<String>,
}

fn default_message_type() -> i16 {
    MessageType::Text.as_i16()
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub conversation_id: String,
    pub last_message_id: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct ReadBody {
    pub conversation_id: String,
    #[serde(default)]
    pub message_id: Option<i64>,
}

#[derive(Deserialize)]
pub struct MessageIdBody {
    pub message_id: i64,
}

#[derive(Deserialize)]
pub struct UnreadQuery {
    pub conversation_id: Option<String>,
}

/// POST /message/v1/send
#[post("/send")]
pub async fn send_message(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<SendBody>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let message = state
        .messages
        .send_message(SendMessageRequest {
            from_user_id: user.id,
            to_user_id: body.to_user_id,
            message_type: body.message_type,
            content: body.content,
            extra: body.extra,
        })
        .await?;

    Ok(HttpResponse::Created().json(message))
}

/// GET /message/v1/history
#[get("/history")]
pub async fn get_history(
    state: web::Data<AppState>,
    user: User,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse, AppError> {
    let page = state
        .messages
        .get_chat_history(
            user.id,
            &query.conversation_id,
            query.last_message_id,
            query.limit,
        )
        .await?;

    Ok(HttpResponse::Ok().json(page))
}

/// POST /message/v1/read
#[post("/read")]
pub async fn mark_as_read(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<ReadBody>,
) -> Result<HttpResponse, AppError> {
    let updated = state
        .messages
        .mark_as_read(user.id, &body.conversation_id, body.message_id)
        .await?;

    Ok(HttpResponse::Ok().json(json!({ "updated": updated })))
}

/// POST /message/v1/recall
#[post("/recall")]
pub async fn recall_message(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<MessageIdBody>,
) -> Result<HttpResponse, AppError> {
    let message = state
        .messages
        .recall_message(user.id, body.message_id)
        .await?;

    Ok(HttpResponse::Ok().json(message))
}

/// POST /message/v1/delete
#[post("/delete")]
pub async fn delete_message(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<MessageIdBody>,
) -> Result<HttpResponse, AppError> {
    state
        .messages
        .delete_message(user.id, body.message_id)
        .await?;

    Ok(HttpResponse::NoContent().finish())
}

/// GET /message/v1/unread
/// Without `conversation_id` the count is summed over every conversation.
#[get("/unread")]
pub async fn unread_count(
    state: web::Data<AppState>,
    user: User,
    query: web::Query<UnreadQuery>,
) -> Result<HttpResponse, AppError> {
    let count = state
        .messages
        .get_unread_count(user.id, query.conversation_id.as_deref())
        .await?;

    Ok(HttpResponse::Ok().json(json!({ "unread_count": count })))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(send_message)
        .service(get_history)
        .service(mark_as_read)
        .service(recall_message)
        .service(delete_message)
        .service(unread_count);
}
