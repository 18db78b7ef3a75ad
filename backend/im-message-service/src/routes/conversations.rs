use crate::{error::AppError, middleware::guards::User, state::AppState};
use actix_web::{get, web, HttpResponse};
use serde::Deserialize;

#[derive(Deserialize)]
pub struct ListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// GET /message/v1/conversations
/// Most recently active first, each row carrying the peer's profile.
#[get("/conversations")]
pub async fn list_conversations(
    state: web::Data<AppState>,
    user: User,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, AppError> {
    let page = state
        .conversations
        .get_conversations(user.id, query.page, query.limit)
        .await?;

    Ok(HttpResponse::Ok().json(page))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(list_conversations);
}
