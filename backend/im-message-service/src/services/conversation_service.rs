use crate::error::AppResult;
use crate::models::{ConversationPage, ConversationView};
use crate::repository::ChatRepository;
use crate::services::profile_client::ProfileLookup;
use futures::future::join_all;
use std::sync::Arc;

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 50;

pub struct ConversationService {
    repo: Arc<dyn ChatRepository>,
    profiles: Arc<dyn ProfileLookup>,
}

impl ConversationService {
    pub fn new(repo: Arc<dyn ChatRepository>, profiles: Arc<dyn ProfileLookup>) -> Self {
        Self { repo, profiles }
    }

    /// The user's conversations, most recently active first, with the
    /// counterpart's nickname and avatar. Rows whose profile lookup fails are
    /// left out of the page; `total` still counts them.
    pub async fn get_conversations(
        &self,
        user_id: i64,
        page: Option<i64>,
        limit: Option<i64>,
    ) -> AppResult<ConversationPage> {
        let page = page.filter(|p| *p > 0).unwrap_or(1);
        let limit = match limit {
            Some(l) if l > 0 => l.min(MAX_PAGE_SIZE),
            _ => DEFAULT_PAGE_SIZE,
        };
        let offset = (page - 1).saturating_mul(limit);

        let (rows, total) = self.repo.list_conversations(user_id, offset, limit).await?;

        let lookups = rows.iter().map(|row| self.profiles.get_profile(row.peer_id));
        let profiles = join_all(lookups).await;

        let conversations = rows
            .into_iter()
            .zip(profiles)
            .filter_map(|(conversation, profile)| match profile {
                Ok(profile) => Some(ConversationView {
                    conversation,
                    peer_nickname: profile.nickname,
                    peer_avatar: profile.avatar,
                }),
                Err(e) => {
                    tracing::warn!(
                        user_id,
                        peer_id = conversation.peer_id,
                        error = %e,
                        "profile lookup failed, skipping conversation"
                    );
                    None
                }
            })
            .collect();

        Ok(ConversationPage {
            conversations,
            total,
            page,
            limit,
        })
    }
}
