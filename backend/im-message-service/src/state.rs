use crate::{
    config::Config,
    middleware::JwtKeys,
    services::{ConversationService, MessageService},
    websocket::ConnectionRegistry,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: ConnectionRegistry,
    pub messages: Arc<MessageService>,
    pub conversations: Arc<ConversationService>,
    pub jwt: Arc<JwtKeys>,
}
