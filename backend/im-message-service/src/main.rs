use actix_web::{web, App, HttpServer};
use im_message_service::{
    config, db, error, logging,
    middleware::{JwtKeys, Logging},
    repository::{ChatRepository, MemoryChatRepository, PgChatRepository},
    routes,
    services::{
        profile_client::HttpProfileLookup, relationship_client::HttpFriendshipChecker,
        ConversationService, MessageService, PushService,
    },
    state::AppState,
    websocket::Hub,
};
use std::sync::Arc;
use std::time::Duration;

const COLLABORATOR_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = Arc::new(config::Config::from_env()?);

    let repo: Arc<dyn ChatRepository> = match cfg.database_url.as_deref() {
        Some(url) => {
            let pool = db::init_pool(url)
                .await
                .map_err(|e| error::AppError::StartServer(format!("db: {e}")))?;
            Arc::new(PgChatRepository::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory store, data is lost on exit");
            Arc::new(MemoryChatRepository::new())
        }
    };

    let (registry, hub_task) = Hub::spawn(cfg.hub.clone());

    let friends = Arc::new(HttpFriendshipChecker::new(
        cfg.friend_service_url.clone(),
        COLLABORATOR_TIMEOUT,
    )?);
    let profiles = Arc::new(HttpProfileLookup::new(
        cfg.user_service_url.clone(),
        COLLABORATOR_TIMEOUT,
    )?);

    let push = PushService::new(registry.clone(), cfg.message.push_timeout);
    let messages = Arc::new(MessageService::new(
        repo.clone(),
        friends,
        push,
        cfg.message.clone(),
    ));
    let conversations = Arc::new(ConversationService::new(repo, profiles));

    let state = AppState {
        config: cfg.clone(),
        registry: registry.clone(),
        messages,
        conversations,
        jwt: Arc::new(JwtKeys::from_secret(&cfg.jwt_secret)),
    };

    if cfg.internal_api_key.is_none() {
        tracing::warn!("INTERNAL_API_KEY not set; internal push and stats routes are disabled");
    }

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, "starting im-message-service");

    // actix-web server futures are not Send; run in the foreground
    let server = HttpServer::new(move || {
        let cors = actix_cors::Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);
        App::new()
            .wrap(cors)
            .wrap(Logging)
            .app_data(web::Data::new(state.clone()))
            .configure(|c| routes::configure(c, &state))
    })
    .bind(&bind_addr)
    .map_err(|e| error::AppError::StartServer(format!("bind: {e}")))?
    .run();

    let result = server
        .await
        .map_err(|e| error::AppError::StartServer(format!("server: {e}")));

    tracing::info!("http server stopped; closing live sessions");
    registry.shutdown().await;
    if let Err(e) = hub_task.await {
        tracing::warn!(error = %e, "hub task ended abnormally");
    }

    result
}
