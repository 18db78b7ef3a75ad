//! User Service HTTP Client (profile lookups for conversation listing)

use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub avatar: String,
}

#[async_trait]
pub trait ProfileLookup: Send + Sync {
    async fn get_profile(&self, user_id: i64) -> AppResult<UserProfile>;
}

/// `GET {base}/usercenter/v1/internal/users/{id}`
#[derive(Clone)]
pub struct HttpProfileLookup {
    client: reqwest::Client,
    base_url: String,
}

impl HttpProfileLookup {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::StartServer(format!("user client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ProfileLookup for HttpProfileLookup {
    async fn get_profile(&self, user_id: i64) -> AppResult<UserProfile> {
        let url = format!("{}/usercenter/v1/internal/users/{}", self.base_url, user_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("user-service: {e}")))?;

        match response.status() {
            s if s.is_success() => response
                .json::<UserProfile>()
                .await
                .map_err(|e| AppError::Upstream(format!("user-service body: {e}"))),
            reqwest::StatusCode::NOT_FOUND => Err(AppError::NotFound),
            s => Err(AppError::Upstream(format!("user-service returned {s}"))),
        }
    }
}
