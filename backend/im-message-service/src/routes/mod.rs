pub mod conversations;
pub mod internal;
pub mod messages;
pub mod wsroute;

use crate::{
    middleware::{InternalApiKey, JwtAuth},
    state::AppState,
};
use actix_web::{get, web, HttpResponse};
use serde_json::json;

/// GET /health
#[get("/health")]
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let stats = state.registry.stats().await;
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "service": "im-message-service",
        "online_users": stats.online_users,
        "sessions": stats.sessions,
    }))
}

/// Every route of the service. The internal scope is registered ahead of the
/// user-facing one so its prefix wins; it takes the shared API key, not a JWT.
pub fn configure(cfg: &mut web::ServiceConfig, state: &AppState) {
    cfg.service(health)
        .service(wsroute::ws_handler)
        .service(
            web::scope("/message/v1/internal")
                .wrap(InternalApiKey::new(state.config.internal_api_key.as_deref()))
                .configure(internal::configure_internal),
        )
        .service(
            web::scope("/message/v1")
                .wrap(JwtAuth::new(state.jwt.clone()))
                .configure(messages::configure)
                .configure(conversations::configure)
                .service(internal::online_status),
        );
}
