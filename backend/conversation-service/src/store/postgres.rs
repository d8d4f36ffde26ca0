use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{ConversationStore, MembershipRepair, RepairOutcome, StoreError, StoreResult};
use crate::models::{
    Conversation, ConversationParticipant, ConversationType, MemberRole, Message, MessageType,
    NewConversation, NewMessage, NewParticipant, UserSummary,
};

const CONVERSATION_COLUMNS: &str = "id, conversation_type, title, avatar_url, participants, \
     direct_pair_key, last_message_id, last_message_at, created_at, updated_at";

const PARTICIPANT_SELECT: &str = "SELECT cp.id, cp.conversation_id, cp.user_id, cp.role, \
     cp.joined_at, cp.left_at, cp.last_read_at, \
     u.username, u.display_name, u.avatar_url \
     FROM conversation_participants cp \
     LEFT JOIN users u ON u.id = cp.user_id";

const MESSAGE_COLUMNS: &str = "m.id, m.conversation_id, m.sender_id, m.receiver_id, m.text, \
     m.media_url, m.message_type, m.reply_to_id, m.is_read, m.read_at, m.created_at, \
     m.updated_at, u.username AS sender_username, u.display_name AS sender_display_name, \
     u.avatar_url AS sender_avatar_url";

#[derive(Debug, FromRow)]
struct ConversationRow {
    id: Uuid,
    conversation_type: String,
    title: Option<String>,
    avatar_url: Option<String>,
    participants: Vec<Uuid>,
    direct_pair_key: Option<String>,
    last_message_id: Option<Uuid>,
    last_message_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ConversationRow> for Conversation {
    type Error = StoreError;

    fn try_from(row: ConversationRow) -> Result<Self, Self::Error> {
        let conversation_type = ConversationType::from_db(&row.conversation_type).ok_or_else(|| {
            StoreError::Database(format!(
                "unknown conversation_type '{}' on {}",
                row.conversation_type, row.id
            ))
        })?;
        Ok(Conversation {
            id: row.id,
            conversation_type,
            title: row.title,
            avatar_url: row.avatar_url,
            participants: row.participants,
            direct_pair_key: row.direct_pair_key,
            last_message_id: row.last_message_id,
            last_message_at: row.last_message_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ParticipantRow {
    id: Uuid,
    conversation_id: Uuid,
    user_id: Uuid,
    role: String,
    joined_at: DateTime<Utc>,
    left_at: Option<DateTime<Utc>>,
    last_read_at: Option<DateTime<Utc>>,
    username: Option<String>,
    display_name: Option<String>,
    avatar_url: Option<String>,
}

impl TryFrom<ParticipantRow> for ConversationParticipant {
    type Error = StoreError;

    fn try_from(row: ParticipantRow) -> Result<Self, Self::Error> {
        let role = MemberRole::from_db(&row.role).ok_or_else(|| {
            StoreError::Database(format!("unknown role '{}' on participant {}", row.role, row.id))
        })?;
        let user = row.username.map(|username| UserSummary {
            id: row.user_id,
            username,
            display_name: row.display_name,
            avatar_url: row.avatar_url,
        });
        Ok(ConversationParticipant {
            id: row.id,
            conversation_id: row.conversation_id,
            user_id: row.user_id,
            role,
            joined_at: row.joined_at,
            left_at: row.left_at,
            last_read_at: row.last_read_at,
            user,
        })
    }
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: Uuid,
    conversation_id: Uuid,
    sender_id: Uuid,
    receiver_id: Option<Uuid>,
    text: String,
    media_url: Option<String>,
    message_type: String,
    reply_to_id: Option<Uuid>,
    is_read: bool,
    read_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
    sender_username: Option<String>,
    sender_display_name: Option<String>,
    sender_avatar_url: Option<String>,
}

impl TryFrom<MessageRow> for Message {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let message_type = MessageType::from_db(&row.message_type).ok_or_else(|| {
            StoreError::Database(format!(
                "unknown message_type '{}' on message {}",
                row.message_type, row.id
            ))
        })?;
        let sender = row.sender_username.map(|username| UserSummary {
            id: row.sender_id,
            username,
            display_name: row.sender_display_name,
            avatar_url: row.sender_avatar_url,
        });
        Ok(Message {
            id: row.id,
            conversation_id: row.conversation_id,
            sender_id: row.sender_id,
            receiver_id: row.receiver_id,
            content: row.text,
            media_url: row.media_url,
            message_type,
            reply_to_id: row.reply_to_id,
            is_read: row.is_read,
            read_at: row.read_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            sender,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> StoreResult<Vec<T>>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// Postgres-backed store over `conversations`, `conversation_participants`,
/// `messages` and (read-only) `users`
#[derive(Clone)]
pub struct PgConversationStore {
    pool: PgPool,
}

impl PgConversationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_message(&self, sql: &str, id: Uuid) -> StoreResult<Option<Message>> {
        let row: Option<MessageRow> = sqlx::query_as(sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Message::try_from).transpose()
    }
}

fn participant_insert(rows: &[NewParticipant]) -> QueryBuilder<'static, Postgres> {
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
        "INSERT INTO conversation_participants (id, conversation_id, user_id, role) ",
    );
    builder.push_values(rows, |mut b, row| {
        b.push_bind(Uuid::new_v4())
            .push_bind(row.conversation_id)
            .push_bind(row.user_id)
            .push_bind(row.role.to_db());
    });
    builder.push(" ON CONFLICT (conversation_id, user_id) WHERE left_at IS NULL DO NOTHING");
    builder
}

#[async_trait]
impl ConversationStore for PgConversationStore {
    async fn get_conversation(&self, id: Uuid) -> StoreResult<Option<Conversation>> {
        let row: Option<ConversationRow> = sqlx::query_as(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Conversation::try_from).transpose()
    }

    async fn find_individual_conversations(
        &self,
        a: Uuid,
        b: Uuid,
    ) -> StoreResult<Vec<Conversation>> {
        let rows: Vec<ConversationRow> = sqlx::query_as(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE conversation_type = 'individual' \
               AND participants @> ARRAY[$1, $2]::uuid[] \
             ORDER BY created_at ASC"
        ))
        .bind(a)
        .bind(b)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn insert_conversation(&self, new: NewConversation) -> StoreResult<Conversation> {
        let row: ConversationRow = sqlx::query_as(&format!(
            "INSERT INTO conversations \
               (id, conversation_type, title, avatar_url, participants, direct_pair_key, last_message_at) \
             VALUES ($1, $2, $3, $4, $5, $6, NOW()) \
             RETURNING {CONVERSATION_COLUMNS}"
        ))
        .bind(new.id)
        .bind(new.conversation_type.to_db())
        .bind(&new.title)
        .bind(&new.avatar_url)
        .bind(&new.participants)
        .bind(&new.direct_pair_key)
        .fetch_one(&self.pool)
        .await?;
        Conversation::try_from(row)
    }

    async fn list_conversations_for(&self, user_id: Uuid) -> StoreResult<Vec<Conversation>> {
        let rows: Vec<ConversationRow> = sqlx::query_as(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE participants @> ARRAY[$1]::uuid[] \
             ORDER BY last_message_at DESC NULLS LAST, created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn list_conversation_ids(
        &self,
        after: Option<Uuid>,
        limit: i64,
    ) -> StoreResult<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM conversations \
             WHERE ($1::uuid IS NULL OR id > $1) \
             ORDER BY id ASC LIMIT $2",
        )
        .bind(after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn append_participants(
        &self,
        id: Uuid,
        user_ids: &[Uuid],
    ) -> StoreResult<Option<Conversation>> {
        let row: Option<ConversationRow> = sqlx::query_as(&format!(
            "UPDATE conversations \
             SET participants = participants || $2::uuid[], updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {CONVERSATION_COLUMNS}"
        ))
        .bind(id)
        .bind(user_ids)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Conversation::try_from).transpose()
    }

    async fn remove_participant(
        &self,
        id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Option<Conversation>> {
        let row: Option<ConversationRow> = sqlx::query_as(&format!(
            "UPDATE conversations \
             SET participants = array_remove(participants, $2), \
                 direct_pair_key = NULL, \
                 updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {CONVERSATION_COLUMNS}"
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Conversation::try_from).transpose()
    }

    async fn insert_participants(&self, rows: &[NewParticipant]) -> StoreResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let result = participant_insert(rows).build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn get_active_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Option<ConversationParticipant>> {
        let row: Option<ParticipantRow> = sqlx::query_as(&format!(
            "{PARTICIPANT_SELECT} \
             WHERE cp.conversation_id = $1 AND cp.user_id = $2 AND cp.left_at IS NULL"
        ))
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(ConversationParticipant::try_from).transpose()
    }

    async fn list_participants(
        &self,
        conversation_id: Uuid,
    ) -> StoreResult<Vec<ConversationParticipant>> {
        let rows: Vec<ParticipantRow> = sqlx::query_as(&format!(
            "{PARTICIPANT_SELECT} \
             WHERE cp.conversation_id = $1 \
             ORDER BY cp.joined_at ASC, cp.id ASC"
        ))
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn mark_participant_left(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE conversation_participants SET left_at = clock_timestamp() \
             WHERE conversation_id = $1 AND user_id = $2 AND left_at IS NULL",
        )
        .bind(conversation_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn repair_membership(&self, conversation_id: Uuid) -> StoreResult<Option<RepairOutcome>> {
        let mut tx = self.pool.begin().await?;

        // Holds off array rewrites until the repair commits
        let row: Option<ConversationRow> = sqlx::query_as(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1 FOR UPDATE"
        ))
        .bind(conversation_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(conversation) = row.map(Conversation::try_from).transpose()? else {
            return Ok(None);
        };

        let rows: Vec<ParticipantRow> = sqlx::query_as(&format!(
            "{PARTICIPANT_SELECT} \
             WHERE cp.conversation_id = $1 \
             ORDER BY cp.joined_at ASC, cp.id ASC"
        ))
        .bind(conversation_id)
        .fetch_all(&mut *tx)
        .await?;
        let rows: Vec<ConversationParticipant> = convert_all(rows)?;

        let repair = MembershipRepair::plan(&conversation, &rows);
        let mut outcome = RepairOutcome::default();

        if !repair.insert.is_empty() {
            outcome.rows_inserted = participant_insert(&repair.insert)
                .build()
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }

        if !repair.depart.is_empty() {
            outcome.rows_departed = sqlx::query(
                "UPDATE conversation_participants SET left_at = clock_timestamp() \
                 WHERE conversation_id = $1 AND user_id = ANY($2) AND left_at IS NULL",
            )
            .bind(conversation_id)
            .bind(&repair.depart)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        if let Some(user_id) = repair.promote {
            outcome.admins_promoted = sqlx::query(
                "UPDATE conversation_participants SET role = $3 \
                 WHERE conversation_id = $1 AND user_id = $2 AND left_at IS NULL",
            )
            .bind(conversation_id)
            .bind(user_id)
            .bind(MemberRole::Admin.to_db())
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        tx.commit().await?;
        Ok(Some(outcome))
    }

    async fn update_read_cursor(&self, conversation_id: Uuid, user_id: Uuid) -> StoreResult<u64> {
        // Only committed messages are visible here, and sends commit in created_at order
        let result = sqlx::query(
            "UPDATE conversation_participants \
             SET last_read_at = GREATEST( \
                 last_read_at, \
                 (SELECT MAX(created_at) FROM messages WHERE conversation_id = $1)) \
             WHERE conversation_id = $1 AND user_id = $2 AND left_at IS NULL",
        )
        .bind(conversation_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn append_message(&self, new: NewMessage) -> StoreResult<Message> {
        let mut tx = self.pool.begin().await?;

        // Serializes sends per conversation so created_at follows commit order
        sqlx::query("SELECT 1 FROM conversations WHERE id = $1 FOR UPDATE")
            .bind(new.conversation_id)
            .execute(&mut *tx)
            .await?;

        let row: MessageRow = sqlx::query_as(&format!(
            "WITH m AS ( \
               INSERT INTO messages \
                 (id, conversation_id, sender_id, receiver_id, text, media_url, message_type, reply_to_id) \
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
               RETURNING * \
             ) \
             SELECT {MESSAGE_COLUMNS} FROM m LEFT JOIN users u ON u.id = m.sender_id"
        ))
        .bind(new.id)
        .bind(new.conversation_id)
        .bind(new.sender_id)
        .bind(new.receiver_id)
        .bind(&new.content)
        .bind(&new.media_url)
        .bind(new.message_type.to_db())
        .bind(new.reply_to_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE conversations \
             SET last_message_id = $2, last_message_at = $3, updated_at = $3 \
             WHERE id = $1",
        )
        .bind(row.conversation_id)
        .bind(row.id)
        .bind(row.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Message::try_from(row)
    }

    async fn get_message(&self, id: Uuid) -> StoreResult<Option<Message>> {
        self.fetch_message(
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages m \
                 LEFT JOIN users u ON u.id = m.sender_id \
                 WHERE m.id = $1"
            ),
            id,
        )
        .await
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Message>> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m \
             LEFT JOIN users u ON u.id = m.sender_id \
             WHERE m.conversation_id = $1 \
             ORDER BY m.created_at DESC, m.id DESC \
             LIMIT $2 OFFSET $3"
        ))
        .bind(conversation_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn last_message(&self, conversation_id: Uuid) -> StoreResult<Option<Message>> {
        self.fetch_message(
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages m \
                 LEFT JOIN users u ON u.id = m.sender_id \
                 WHERE m.conversation_id = $1 \
                 ORDER BY m.created_at DESC, m.id DESC \
                 LIMIT 1"
            ),
            conversation_id,
        )
        .await
    }

    async fn count_unread(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> StoreResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM messages \
             WHERE conversation_id = $1 \
               AND sender_id <> $2 \
               AND ($3::timestamptz IS NULL OR created_at > $3)",
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn mark_messages_read(&self, conversation_id: Uuid, reader_id: Uuid) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE messages SET is_read = TRUE, read_at = clock_timestamp() \
             WHERE conversation_id = $1 AND sender_id <> $2 AND is_read = FALSE",
        )
        .bind(conversation_id)
        .bind(reader_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn update_message(
        &self,
        id: Uuid,
        content: Option<String>,
        media_url: Option<String>,
    ) -> StoreResult<Option<Message>> {
        let row: Option<MessageRow> = sqlx::query_as(&format!(
            "WITH m AS ( \
               UPDATE messages \
               SET text = COALESCE($2, text), \
                   media_url = COALESCE($3, media_url), \
                   updated_at = clock_timestamp() \
               WHERE id = $1 \
               RETURNING * \
             ) \
             SELECT {MESSAGE_COLUMNS} FROM m LEFT JOIN users u ON u.id = m.sender_id"
        ))
        .bind(id)
        .bind(content)
        .bind(media_url)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Message::try_from).transpose()
    }

    async fn delete_message(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM messages WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
