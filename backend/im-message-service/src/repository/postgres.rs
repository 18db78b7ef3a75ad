use super::{ChatRepository, Retire};
use crate::error::{AppError, AppResult};
use crate::models::conversation::CONVERSATION_COLUMNS;
use crate::models::message::{MESSAGE_COLUMNS, RECALLED_PLACEHOLDER};
use crate::models::{
    owner_key, pair_counterpart, Conversation, Message, MessageStatus, NewMessage,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::{Row, Transaction};

#[derive(Clone)]
pub struct PgChatRepository {
    pool: Pool,
}

impl PgChatRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

fn message_from_row(row: &Row) -> AppResult<Message> {
    Message::from_row(row).map_err(AppError::Database)
}

/// Recount `owner`'s unread messages in the pair and store it on their row.
async fn recompute_unread(
    tx: &Transaction<'_>,
    conversation_id: &str,
    owner: i64,
    counterpart: i64,
) -> AppResult<()> {
    tx.execute(
        r#"
        UPDATE conversations
           SET unread_count = (
                   SELECT COUNT(*)::INTEGER
                     FROM messages
                    WHERE conversation_id = $1
                      AND to_user_id = $2
                      AND status IN (1, 2)
               )
         WHERE owner_key = $3
        "#,
        &[&conversation_id, &owner, &owner_key(owner, counterpart)],
    )
    .await?;
    Ok(())
}

/// Re-point rows caching `retired_id` at the newest non-deleted message.
async fn recompute_last_message(
    tx: &Transaction<'_>,
    conversation_id: &str,
    retired_id: i64,
) -> AppResult<()> {
    let latest = tx
        .query_opt(
            r#"
            SELECT id, content, status, created_at
              FROM messages
             WHERE conversation_id = $1 AND status <> 5
             ORDER BY id DESC
             LIMIT 1
            "#,
            &[&conversation_id],
        )
        .await?;

    let (last_id, last_content, last_time) = match latest {
        Some(row) => {
            let status: i16 = row.get("status");
            let content: String = if status == MessageStatus::Recalled.as_i16() {
                RECALLED_PLACEHOLDER.to_string()
            } else {
                row.get("content")
            };
            let created_at: DateTime<Utc> = row.get("created_at");
            (Some(row.get::<_, i64>("id")), Some(content), Some(created_at))
        }
        None => (None, None, None),
    };

    tx.execute(
        r#"
        UPDATE conversations
           SET last_message_id = $2,
               last_message_content = $3,
               last_message_time = $4
         WHERE conversation_id = $1 AND last_message_id = $5
        "#,
        &[
            &conversation_id,
            &last_id,
            &last_content,
            &last_time,
            &retired_id,
        ],
    )
    .await?;
    Ok(())
}

#[async_trait]
impl ChatRepository for PgChatRepository {
    async fn store_message(&self, new: &NewMessage) -> AppResult<Message> {
        let conversation_id = new.conversation_id();
        let (from, to) = (new.from_user_id, new.to_user_id);
        let sender_key = owner_key(from, to);
        let recipient_key = owner_key(to, from);

        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        // Rows are inserted lowest owner first so that two first-contact
        // transactions for the same pair take row locks in the same order.
        let (lo, hi) = if from <= to { (from, to) } else { (to, from) };
        if lo == hi {
            tx.execute(
                "INSERT INTO conversations (owner_key, user_id, peer_id, conversation_id) \
                 VALUES ($1, $2, $2, $3) \
                 ON CONFLICT (owner_key) DO NOTHING",
                &[&sender_key, &lo, &conversation_id],
            )
            .await?;
        } else {
            tx.execute(
                "INSERT INTO conversations (owner_key, user_id, peer_id, conversation_id) \
                 VALUES ($1, $3, $4, $5), ($2, $4, $3, $5) \
                 ON CONFLICT (owner_key) DO NOTHING",
                &[
                    &owner_key(lo, hi),
                    &owner_key(hi, lo),
                    &lo,
                    &hi,
                    &conversation_id,
                ],
            )
            .await?;
        }

        let row = tx
            .query_one(
                format!(
                    r#"
                    WITH next AS (
                        INSERT INTO conversation_counters (conversation_id, last_seq)
                        VALUES ($1, 1)
                        ON CONFLICT (conversation_id)
                        DO UPDATE SET last_seq = conversation_counters.last_seq + 1
                        RETURNING last_seq
                    )
                    INSERT INTO messages (
                        from_user_id,
                        to_user_id,
                        conversation_id,
                        message_type,
                        content,
                        extra,
                        status,
                        seq
                    )
                    SELECT $2, $3, $1, $4, $5, $6, 1, next.last_seq
                    FROM next
                    RETURNING {MESSAGE_COLUMNS}
                    "#
                ).as_str(),
                &[
                    &conversation_id,
                    &from,
                    &to,
                    &new.message_type.as_i16(),
                    &new.content,
                    &new.extra,
                ],
            )
            .await?;
        let message = message_from_row(&row)?;

        tx.execute(
            r#"
            UPDATE conversations
               SET last_message_id = $1,
                   last_message_content = $2,
                   last_message_time = $3,
                   updated_at = NOW(),
                   unread_count = unread_count + CASE WHEN owner_key = $5 THEN 1 ELSE 0 END
             WHERE owner_key IN ($4, $5)
            "#,
            &[
                &message.id,
                &message.content,
                &message.created_at,
                &sender_key,
                &recipient_key,
            ],
        )
        .await?;

        tx.commit().await?;

        tracing::debug!(
            message_id = message.id,
            conversation_id = %message.conversation_id,
            seq = message.seq,
            "stored message"
        );
        Ok(message)
    }

    async fn get_message(&self, id: i64) -> AppResult<Option<Message>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1").as_str(),
                &[&id],
            )
            .await?;
        row.as_ref().map(message_from_row).transpose()
    }

    async fn transition_status(
        &self,
        id: i64,
        from: MessageStatus,
        to: MessageStatus,
    ) -> AppResult<bool> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                "UPDATE messages SET status = $3, updated_at = NOW() \
                 WHERE id = $1 AND status = $2",
                &[&id, &from.as_i16(), &to.as_i16()],
            )
            .await?;
        Ok(updated == 1)
    }

    async fn retire_message(
        &self,
        id: i64,
        expected: MessageStatus,
        target: MessageStatus,
    ) -> AppResult<Retire> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let updated = tx
            .query_opt(
                format!(
                    "UPDATE messages SET status = $3, updated_at = NOW() \
                     WHERE id = $1 AND status = $2 \
                     RETURNING {MESSAGE_COLUMNS}"
                ).as_str(),
                &[&id, &expected.as_i16(), &target.as_i16()],
            )
            .await?;

        let Some(row) = updated else {
            let current = tx
                .query_opt(
                    format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1").as_str(),
                    &[&id],
                )
                .await?;
            return match current {
                Some(row) => Ok(Retire::Stale(message_from_row(&row)?)),
                None => Ok(Retire::NotFound),
            };
        };
        let message = message_from_row(&row)?;

        recompute_last_message(&tx, &message.conversation_id, message.id).await?;
        if expected.is_unread() {
            recompute_unread(
                &tx,
                &message.conversation_id,
                message.to_user_id,
                message.from_user_id,
            )
            .await?;
        }

        tx.commit().await?;
        Ok(Retire::Applied(message))
    }

    async fn mark_read(
        &self,
        reader: i64,
        conversation_id: &str,
        up_to: Option<i64>,
    ) -> AppResult<u64> {
        let peer = pair_counterpart(conversation_id, reader).ok_or(AppError::NotParticipant)?;

        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let updated = tx
            .execute(
                r#"
                UPDATE messages
                   SET status = 3, updated_at = NOW()
                 WHERE conversation_id = $1
                   AND to_user_id = $2
                   AND status IN (1, 2)
                   AND ($3::BIGINT IS NULL OR id <= $3)
                "#,
                &[&conversation_id, &reader, &up_to],
            )
            .await?;

        recompute_unread(&tx, conversation_id, reader, peer).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn history(
        &self,
        conversation_id: &str,
        before: Option<i64>,
        limit: i64,
    ) -> AppResult<Vec<Message>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages \
                     WHERE conversation_id = $1 \
                       AND status <> 5 \
                       AND ($2::BIGINT IS NULL OR id < $2) \
                     ORDER BY id DESC \
                     LIMIT $3"
                ).as_str(),
                &[&conversation_id, &before, &limit],
            )
            .await?;
        rows.iter().map(message_from_row).collect()
    }

    async fn list_conversations(
        &self,
        user_id: i64,
        offset: i64,
        limit: i64,
    ) -> AppResult<(Vec<Conversation>, i64)> {
        let client = self.pool.get().await?;
        let total: i64 = client
            .query_one(
                "SELECT COUNT(*) FROM conversations WHERE user_id = $1",
                &[&user_id],
            )
            .await?
            .get(0);

        let rows = client
            .query(
                format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM conversations \
                     WHERE user_id = $1 \
                     ORDER BY updated_at DESC, id DESC \
                     LIMIT $2 OFFSET $3"
                ).as_str(),
                &[&user_id, &limit, &offset],
            )
            .await?;

        Ok((rows.iter().map(Conversation::from_row).collect(), total))
    }

    async fn get_conversation(&self, owner: i64, peer: i64) -> AppResult<Option<Conversation>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE owner_key = $1").as_str(),
                &[&owner_key(owner, peer)],
            )
            .await?;
        Ok(row.as_ref().map(Conversation::from_row))
    }

    async fn unread_count(&self, user_id: i64, conversation_id: Option<&str>) -> AppResult<i64> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT COALESCE(SUM(unread_count), 0)::BIGINT FROM conversations \
                 WHERE user_id = $1 AND ($2::TEXT IS NULL OR conversation_id = $2)",
                &[&user_id, &conversation_id],
            )
            .await?;
        Ok(row.get(0))
    }
}
