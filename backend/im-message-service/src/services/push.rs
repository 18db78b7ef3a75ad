use crate::error::{AppError, AppResult};
use crate::websocket::ConnectionRegistry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Event any producer (group chat, system notices) may push to a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRequest {
    pub user_id: i64,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub content: Value,
}

/// Best-effort delivery to live sessions, bounded by a timeout.
#[derive(Clone)]
pub struct PushService {
    registry: ConnectionRegistry,
    timeout: Duration,
}

impl PushService {
    pub fn new(registry: ConnectionRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    /// True iff at least one session accepted the frame in time.
    /// A timeout counts as offline.
    pub async fn push(&self, user_id: i64, event_type: &str, content: Value) -> bool {
        match tokio::time::timeout(
            self.timeout,
            self.registry.send_to_user(user_id, event_type, content),
        )
        .await
        {
            Ok(delivered) => delivered,
            Err(_) => {
                tracing::warn!(
                    user_id,
                    event_type,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "push timed out"
                );
                false
            }
        }
    }

    /// Validate and forward an externally produced event.
    pub async fn push_message(&self, req: PushRequest) -> AppResult<bool> {
        if req.user_id <= 0 {
            return Err(AppError::InvalidUserId(req.user_id));
        }
        if req.event_type.trim().is_empty() {
            return Err(AppError::BadRequest("type must not be empty".into()));
        }

        let delivered = self.push(req.user_id, &req.event_type, req.content).await;
        tracing::debug!(
            user_id = req.user_id,
            event_type = %req.event_type,
            delivered,
            "external push"
        );
        Ok(delivered)
    }
}
