use crate::{
    error::AppError, middleware::guards::User, services::PushRequest, state::AppState,
};
use actix_web::{get, post, web, HttpResponse};
use serde_json::json;

/// POST /message/v1/internal/push
/// Producer hook for other services, guarded by `X-Internal-API-Key`.
#[post("/push")]
pub async fn push(
    state: web::Data<AppState>,
    body: web::Json<PushRequest>,
) -> Result<HttpResponse, AppError> {
    let delivered = state.messages.push_message(body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(json!({ "delivered": delivered })))
}

/// GET /message/v1/internal/stats
#[get("/stats")]
pub async fn stats(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.registry.stats().await)
}

/// GET /message/v1/online/{user_id}
#[get("/online/{user_id}")]
pub async fn online_status(
    state: web::Data<AppState>,
    _user: User,
    user_id: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let user_id = user_id.into_inner();
    if user_id <= 0 {
        return Err(AppError::InvalidUserId(user_id));
    }
    let online = state.registry.is_online(user_id).await;
    Ok(HttpResponse::Ok().json(json!({ "user_id": user_id, "online": online })))
}

pub fn configure_internal(cfg: &mut web::ServiceConfig) {
    cfg.service(push).service(stats);
}
