pub mod conversation_service;
pub mod message_service;
pub mod profile_client;
pub mod push;
pub mod relationship_client;

pub use conversation_service::ConversationService;
pub use message_service::{MessageService, SendMessageRequest};
pub use push::{PushRequest, PushService};
