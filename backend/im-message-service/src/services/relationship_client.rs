//! Friend Service HTTP Client
//!
//! Friendship (and the block list behind it) is owned by the friend service.
//! The send pipeline asks it before persisting anything.

use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

#[async_trait]
pub trait FriendshipChecker: Send + Sync {
    /// Whether `user_id` may message `target_user_id`.
    async fn is_friend(&self, user_id: i64, target_user_id: i64) -> AppResult<bool>;
}

#[derive(Debug, Deserialize)]
struct IsFriendResponse {
    is_friend: bool,
}

/// `GET {base}/friend/v1/internal/check?user_id=&target_user_id=`
#[derive(Clone)]
pub struct HttpFriendshipChecker {
    client: reqwest::Client,
    base_url: String,
}

impl HttpFriendshipChecker {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::StartServer(format!("friend client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl FriendshipChecker for HttpFriendshipChecker {
    async fn is_friend(&self, user_id: i64, target_user_id: i64) -> AppResult<bool> {
        let url = format!("{}/friend/v1/internal/check", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("user_id", user_id), ("target_user_id", target_user_id)])
            .send()
            .await
            .map_err(|e| {
                tracing::error!(user_id, target_user_id, error = %e, "friend-service check failed");
                AppError::Upstream(format!("friend-service: {e}"))
            })?;

        if !response.status().is_success() {
            tracing::error!(
                user_id,
                target_user_id,
                status = %response.status(),
                "friend-service check rejected"
            );
            return Err(AppError::Upstream(format!(
                "friend-service returned {}",
                response.status()
            )));
        }

        let body: IsFriendResponse = response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("friend-service body: {e}")))?;
        Ok(body.is_friend)
    }
}
