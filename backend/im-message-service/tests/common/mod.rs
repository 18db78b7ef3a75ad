//! Shared fixtures for integration tests.
//!
//! Stub collaborators stand in for the friend and user services so the
//! message pipeline runs against the in-memory store and a live hub.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use im_message_service::{
    config::{HubConfig, MessageConfig},
    error::{AppError, AppResult},
    repository::{ChatRepository, MemoryChatRepository},
    services::{
        message_service::Clock,
        profile_client::{ProfileLookup, UserProfile},
        relationship_client::FriendshipChecker,
        ConversationService, MessageService, PushService, SendMessageRequest,
    },
    websocket::{ConnectionRegistry, Hub},
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Friend graph backed by a set of unordered pairs.
#[derive(Default)]
pub struct MockFriends {
    pairs: Mutex<HashSet<(i64, i64)>>,
    unavailable: bool,
}

impl MockFriends {
    pub fn with_pairs(pairs: &[(i64, i64)]) -> Self {
        let set = pairs.iter().map(|&(a, b)| (a.min(b), a.max(b))).collect();
        Self {
            pairs: Mutex::new(set),
            unavailable: false,
        }
    }

    /// Every check fails as if the friend service were down.
    pub fn unavailable() -> Self {
        Self {
            pairs: Mutex::default(),
            unavailable: true,
        }
    }
}

#[async_trait]
impl FriendshipChecker for MockFriends {
    async fn is_friend(&self, user_id: i64, target_user_id: i64) -> AppResult<bool> {
        if self.unavailable {
            return Err(AppError::Upstream("friend-service: connection refused".into()));
        }
        if user_id == target_user_id {
            return Ok(true);
        }
        let key = (user_id.min(target_user_id), user_id.max(target_user_id));
        Ok(self.pairs.lock().unwrap().contains(&key))
    }
}

/// Profiles keyed by user id; unknown ids answer NotFound.
#[derive(Default)]
pub struct MockProfiles {
    profiles: HashMap<i64, UserProfile>,
}

impl MockProfiles {
    pub fn new(users: &[(i64, &str)]) -> Self {
        let profiles = users
            .iter()
            .map(|&(id, nickname)| {
                (
                    id,
                    UserProfile {
                        id,
                        nickname: nickname.to_string(),
                        avatar: format!("https://cdn.example.test/avatars/{id}.png"),
                    },
                )
            })
            .collect();
        Self { profiles }
    }
}

#[async_trait]
impl ProfileLookup for MockProfiles {
    async fn get_profile(&self, user_id: i64) -> AppResult<UserProfile> {
        self.profiles.get(&user_id).cloned().ok_or(AppError::NotFound)
    }
}

/// Manually advanced clock.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Utc::now()),
        }
    }

    pub fn advance(&self, by: ChronoDuration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

pub struct TestApp {
    pub repo: Arc<MemoryChatRepository>,
    pub registry: ConnectionRegistry,
    pub clock: Arc<ManualClock>,
    pub messages: Arc<MessageService>,
    pub conversations: Arc<ConversationService>,
}

impl TestApp {
    pub fn new(friends: MockFriends, profiles: MockProfiles) -> Self {
        let repo = Arc::new(MemoryChatRepository::new());
        let (registry, _hub) = Hub::spawn(HubConfig::default());
        let clock = Arc::new(ManualClock::new());

        let dyn_repo: Arc<dyn ChatRepository> = repo.clone();
        let messages = MessageService::new(
            dyn_repo.clone(),
            Arc::new(friends),
            PushService::new(registry.clone(), Duration::from_millis(500)),
            MessageConfig::default(),
        )
        .with_clock(clock.clone());
        let conversations = ConversationService::new(dyn_repo, Arc::new(profiles));

        Self {
            repo,
            registry,
            clock,
            messages: Arc::new(messages),
            conversations: Arc::new(conversations),
        }
    }

    /// Users 1, 2 and 3 are mutual friends; 4 knows nobody.
    pub fn with_friends() -> Self {
        Self::new(
            MockFriends::with_pairs(&[(1, 2), (1, 3), (2, 3)]),
            MockProfiles::new(&[(1, "alice"), (2, "bob"), (3, "carol")]),
        )
    }
}

pub fn text(from: i64, to: i64, content: &str) -> SendMessageRequest {
    SendMessageRequest {
        from_user_id: from,
        to_user_id: to,
        message_type: 1,
        content: content.to_string(),
        extra: None,
    }
}

/// Next frame from a session queue, failing the test after a second.
pub async fn next_frame(rx: &mut tokio::sync::mpsc::Receiver<String>) -> serde_json::Value {
    let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("frame within timeout")
        .expect("queue open");
    serde_json::from_str(&frame).expect("frame is json")
}
