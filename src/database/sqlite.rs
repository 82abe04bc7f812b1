// ABOUTME: SQLite-backed conversation, turn and quota persistence
// ABOUTME: Runs schema setup and implements ChatStore and QuotaStore with sqlx
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::str::FromStr;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Error as SqlxError, Row, SqliteConnection, SqlitePool};
use tracing::{debug, info};

use super::{ChatStore, QuotaStore, Regeneration, RegenerationOutcome};
use crate::constants::timeouts;
use crate::errors::{AppError, AppResult};
use crate::models::time::{format_timestamp, parse_timestamp};
use crate::models::{
    ConversationRecord, ConversationSummary, QuotaCounter, QuotaResource, TurnMetadata, TurnPart,
    TurnRecord, TurnRole, Visibility, Vote,
};

/// SQLite database holding conversations, turns and quota counters
#[derive(Clone)]
pub struct SqliteDatabase {
    pool: SqlitePool,
}

impl SqliteDatabase {
    /// Open (creating if needed) the database at `database_url` and run migrations
    ///
    /// In-memory databases get a single long-lived connection so every
    /// query sees the same schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid, the connection fails or the
    /// schema cannot be created
    pub async fn new(database_url: &str) -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| AppError::config(format!("Invalid database URL {database_url}: {e}")))?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(StdDuration::from_secs(timeouts::DATABASE_TIMEOUT_SECS));

        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| AppError::database(format!("Failed to connect to database: {e}")))?;

        let db = Self { pool };
        db.migrate().await?;
        info!(in_memory = in_memory, "SQLite database ready");
        Ok(db)
    }

    /// Wrap an existing pool without running migrations
    #[must_use]
    pub const fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Underlying connection pool
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create tables and indexes if they do not exist
    ///
    /// # Errors
    ///
    /// Returns an error if any DDL statement fails
    pub async fn migrate(&self) -> AppResult<()> {
        self.migrate_conversations().await?;
        self.migrate_turns().await?;
        self.migrate_quota().await?;
        Ok(())
    }

    async fn migrate_conversations(&self) -> AppResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                title TEXT NOT NULL,
                visibility TEXT NOT NULL CHECK (visibility IN ('private', 'public')),
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                visible_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create conversations table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_conversations_owner ON conversations(owner_id, updated_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create conversations index: {e}")))?;

        Ok(())
    }

    async fn migrate_turns(&self) -> AppResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS turns (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                author_id TEXT NOT NULL,
                role TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
                parts TEXT NOT NULL,
                metadata TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create turns table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_turns_order ON turns(conversation_id, created_at, id)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create turns index: {e}")))?;

        Ok(())
    }

    async fn migrate_quota(&self) -> AppResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS quota_counters (
                user_id TEXT NOT NULL,
                resource TEXT NOT NULL CHECK (resource IN ('messages', 'tokens', 'files')),
                counter INTEGER NOT NULL DEFAULT 0,
                period_start TEXT NOT NULL,
                period_end TEXT NOT NULL,
                PRIMARY KEY (user_id, resource)
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create quota_counters table: {e}")))?;

        Ok(())
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn conversation_from_row(row: &SqliteRow) -> AppResult<ConversationRecord> {
    let visibility: String = row.get("visibility");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");
    let visible_at: String = row.get("visible_at");

    Ok(ConversationRecord {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        title: row.get("title"),
        visibility: Visibility::from_str(&visibility)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
        visible_at: parse_timestamp(&visible_at)?,
    })
}

fn turn_from_row(row: &SqliteRow) -> AppResult<TurnRecord> {
    let role: String = row.get("role");
    let parts: String = row.get("parts");
    let metadata: String = row.get("metadata");
    let created_at: String = row.get("created_at");

    Ok(TurnRecord {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        author_id: row.get("author_id"),
        role: TurnRole::from_str(&role)?,
        parts: serde_json::from_str(&parts)
            .map_err(|e| AppError::serialization(format!("Corrupt turn parts: {e}")))?,
        metadata: serde_json::from_str(&metadata)
            .map_err(|e| AppError::serialization(format!("Corrupt turn metadata: {e}")))?,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn counter_from_row(row: &SqliteRow, user_id: &str, resource: QuotaResource) -> AppResult<QuotaCounter> {
    let counter: i64 = row.get("counter");
    let period_start: String = row.get("period_start");
    let period_end: String = row.get("period_end");

    Ok(QuotaCounter {
        user_id: user_id.to_owned(),
        resource,
        counter: counter.max(0) as u64,
        period_start: parse_timestamp(&period_start)?,
        period_end: parse_timestamp(&period_end)?,
    })
}

fn encode_parts(parts: &[TurnPart]) -> AppResult<String> {
    serde_json::to_string(parts)
        .map_err(|e| AppError::serialization(format!("Failed to encode turn parts: {e}")))
}

fn encode_metadata(metadata: &TurnMetadata) -> AppResult<String> {
    serde_json::to_string(metadata)
        .map_err(|e| AppError::serialization(format!("Failed to encode turn metadata: {e}")))
}

fn is_unique_violation(error: &SqlxError) -> bool {
    matches!(error, SqlxError::Database(db) if db.is_unique_violation())
}

const TURN_COLUMNS: &str = "id, conversation_id, author_id, role, parts, metadata, created_at";

async fn insert_turn(conn: &mut SqliteConnection, turn: &TurnRecord) -> AppResult<()> {
    sqlx::query(
        r"
        INSERT INTO turns (id, conversation_id, author_id, role, parts, metadata, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ",
    )
    .bind(&turn.id)
    .bind(&turn.conversation_id)
    .bind(&turn.author_id)
    .bind(turn.role.as_str())
    .bind(encode_parts(&turn.parts)?)
    .bind(encode_metadata(&turn.metadata)?)
    .bind(format_timestamp(turn.created_at))
    .execute(&mut *conn)
    .await
    .map_err(|e| AppError::database(format!("Failed to insert turn {}: {e}", turn.id)))?;

    Ok(())
}

/// Advance `updated_at` under the owner predicate; `false` when no row matched
async fn touch_conversation(
    conn: &mut SqliteConnection,
    conversation_id: &str,
    owner_id: &str,
    updated_at: DateTime<Utc>,
) -> AppResult<bool> {
    let result = sqlx::query(
        r"
        UPDATE conversations
        SET updated_at = CASE WHEN updated_at < $1 THEN $1 ELSE updated_at END
        WHERE id = $2 AND owner_id = $3
        ",
    )
    .bind(format_timestamp(updated_at))
    .bind(conversation_id)
    .bind(owner_id)
    .execute(&mut *conn)
    .await
    .map_err(|e| AppError::database(format!("Failed to update conversation timestamp: {e}")))?;

    Ok(result.rows_affected() > 0)
}

#[async_trait]
impl ChatStore for SqliteDatabase {
    async fn get_conversation(&self, conversation_id: &str) -> AppResult<Option<ConversationRecord>> {
        let row = sqlx::query(
            r"
            SELECT id, owner_id, title, visibility, created_at, updated_at, visible_at
            FROM conversations
            WHERE id = $1
            ",
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get conversation: {e}")))?;

        row.as_ref().map(conversation_from_row).transpose()
    }

    async fn create_conversation(&self, conversation: &ConversationRecord) -> AppResult<bool> {
        let result = sqlx::query(
            r"
            INSERT INTO conversations (id, owner_id, title, visibility, created_at, updated_at, visible_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT(id) DO NOTHING
            ",
        )
        .bind(&conversation.id)
        .bind(&conversation.owner_id)
        .bind(&conversation.title)
        .bind(conversation.visibility.as_str())
        .bind(format_timestamp(conversation.created_at))
        .bind(format_timestamp(conversation.updated_at))
        .bind(format_timestamp(conversation.visible_at))
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create conversation: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    async fn fork_conversation(
        &self,
        conversation: &ConversationRecord,
        turns: &[TurnRecord],
    ) -> AppResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::database(format!("Failed to begin transaction: {e}")))?;

        sqlx::query(
            r"
            INSERT INTO conversations (id, owner_id, title, visibility, created_at, updated_at, visible_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(&conversation.id)
        .bind(&conversation.owner_id)
        .bind(&conversation.title)
        .bind(conversation.visibility.as_str())
        .bind(format_timestamp(conversation.created_at))
        .bind(format_timestamp(conversation.updated_at))
        .bind(format_timestamp(conversation.visible_at))
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::already_exists(format!("Conversation {}", conversation.id))
            } else {
                AppError::database(format!("Failed to create forked conversation: {e}"))
            }
        })?;

        for turn in turns {
            insert_turn(&mut tx, turn).await?;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::database(format!("Failed to commit fork: {e}")))?;

        debug!(
            conversation_id = %conversation.id,
            turns = turns.len(),
            "Forked conversation written"
        );
        Ok(())
    }

    async fn list_conversations(
        &self,
        owner_id: &str,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<ConversationSummary>> {
        let rows = sqlx::query(
            r"
            SELECT c.id, c.title, c.visibility, c.created_at, c.updated_at,
                   COUNT(t.id) AS turn_count
            FROM conversations c
            LEFT JOIN turns t ON t.conversation_id = c.id
            WHERE c.owner_id = $1
            GROUP BY c.id
            ORDER BY c.updated_at DESC, c.id DESC
            LIMIT $2 OFFSET $3
            ",
        )
        .bind(owner_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to list conversations: {e}")))?;

        rows.iter()
            .map(|r| {
                let visibility: String = r.get("visibility");
                let created_at: String = r.get("created_at");
                let updated_at: String = r.get("updated_at");
                Ok(ConversationSummary {
                    id: r.get("id"),
                    title: r.get("title"),
                    visibility: Visibility::from_str(&visibility)?,
                    turn_count: r.get("turn_count"),
                    created_at: parse_timestamp(&created_at)?,
                    updated_at: parse_timestamp(&updated_at)?,
                })
            })
            .collect()
    }

    async fn update_title(
        &self,
        conversation_id: &str,
        owner_id: &str,
        title: &str,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE conversations
            SET title = $1, updated_at = $2
            WHERE id = $3 AND owner_id = $4
            ",
        )
        .bind(title)
        .bind(format_timestamp(now))
        .bind(conversation_id)
        .bind(owner_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to update conversation title: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_visibility(
        &self,
        conversation_id: &str,
        owner_id: &str,
        visibility: Visibility,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE conversations
            SET visible_at = CASE WHEN visibility = $1 THEN visible_at ELSE $2 END,
                visibility = $1,
                updated_at = $2
            WHERE id = $3 AND owner_id = $4
            ",
        )
        .bind(visibility.as_str())
        .bind(format_timestamp(now))
        .bind(conversation_id)
        .bind(owner_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::database(format!("Failed to update conversation visibility: {e}"))
        })?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_conversation(&self, conversation_id: &str, owner_id: &str) -> AppResult<bool> {
        let result = sqlx::query(
            r"
            DELETE FROM conversations
            WHERE id = $1 AND owner_id = $2
            ",
        )
        .bind(conversation_id)
        .bind(owner_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to delete conversation: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_turns(&self, conversation_id: &str) -> AppResult<Vec<TurnRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {TURN_COLUMNS} FROM turns WHERE conversation_id = $1 ORDER BY created_at ASC, id ASC"
        ))
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get turns: {e}")))?;

        rows.iter().map(turn_from_row).collect()
    }

    async fn get_turn(&self, conversation_id: &str, turn_id: &str) -> AppResult<Option<TurnRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {TURN_COLUMNS} FROM turns WHERE conversation_id = $1 AND id = $2"
        ))
        .bind(conversation_id)
        .bind(turn_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get turn: {e}")))?;

        row.as_ref().map(turn_from_row).transpose()
    }

    async fn last_turn_at(&self, conversation_id: &str) -> AppResult<Option<DateTime<Utc>>> {
        let latest: Option<String> =
            sqlx::query_scalar("SELECT MAX(created_at) FROM turns WHERE conversation_id = $1")
                .bind(conversation_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| AppError::database(format!("Failed to read last turn time: {e}")))?;

        latest.as_deref().map(parse_timestamp).transpose()
    }

    async fn append_turns(
        &self,
        conversation_id: &str,
        owner_id: &str,
        turns: &[TurnRecord],
    ) -> AppResult<()> {
        let Some(updated_at) = turns.iter().map(|t| t.created_at).max() else {
            return Ok(());
        };

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::database(format!("Failed to begin transaction: {e}")))?;

        if !touch_conversation(&mut tx, conversation_id, owner_id, updated_at).await? {
            return Err(AppError::permission_denied(format!(
                "Conversation {conversation_id} is not writable by {owner_id}"
            )));
        }

        for turn in turns {
            insert_turn(&mut tx, turn).await?;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::database(format!("Failed to commit turns: {e}")))?;

        Ok(())
    }

    async fn regenerate(&self, regeneration: &Regeneration) -> AppResult<RegenerationOutcome> {
        let conversation_id = regeneration.conversation_id.as_str();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::database(format!("Failed to begin transaction: {e}")))?;

        if !touch_conversation(
            &mut tx,
            conversation_id,
            &regeneration.owner_id,
            regeneration.assistant_turn.created_at,
        )
        .await?
        {
            return Err(AppError::permission_denied(format!(
                "Conversation {conversation_id} is not writable by {}",
                regeneration.owner_id
            )));
        }

        let target_row = sqlx::query(&format!(
            "SELECT {TURN_COLUMNS} FROM turns WHERE conversation_id = $1 AND id = $2"
        ))
        .bind(conversation_id)
        .bind(&regeneration.target_turn_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::database(format!("Failed to read regeneration target: {e}")))?
        .ok_or_else(|| AppError::not_found(format!("Turn {}", regeneration.target_turn_id)))?;
        let mut target = turn_from_row(&target_row)?;

        if target.role != regeneration.target_role {
            return Err(AppError::invalid_input(format!(
                "Turn {} changed role during regeneration",
                target.id
            )));
        }

        let target_at = format_timestamp(target.created_at);
        let target_role = target.role;
        let (delete_sql, updated_user_turn) = match target_role {
            TurnRole::Assistant => (
                r"
                DELETE FROM turns
                WHERE conversation_id = $1
                  AND (created_at > $2 OR (created_at = $2 AND id >= $3))
                ",
                None,
            ),
            TurnRole::User => {
                if let Some(parts) = &regeneration.user_parts {
                    sqlx::query("UPDATE turns SET parts = $1 WHERE id = $2 AND conversation_id = $3")
                        .bind(encode_parts(parts)?)
                        .bind(&target.id)
                        .bind(conversation_id)
                        .execute(&mut *tx)
                        .await
                        .map_err(|e| {
                            AppError::database(format!("Failed to replace user turn parts: {e}"))
                        })?;
                    target.parts.clone_from(parts);
                }
                (
                    r"
                    DELETE FROM turns
                    WHERE conversation_id = $1
                      AND (created_at > $2 OR (created_at = $2 AND id > $3))
                    ",
                    Some(target),
                )
            }
        };

        let removed = sqlx::query(delete_sql)
            .bind(conversation_id)
            .bind(&target_at)
            .bind(&regeneration.target_turn_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::database(format!("Failed to remove superseded turns: {e}")))?
            .rows_affected();

        insert_turn(&mut tx, &regeneration.assistant_turn).await?;

        tx.commit()
            .await
            .map_err(|e| AppError::database(format!("Failed to commit regeneration: {e}")))?;

        Ok(RegenerationOutcome {
            removed_turns: removed,
            updated_user_turn,
        })
    }

    async fn set_vote(
        &self,
        conversation_id: &str,
        owner_id: &str,
        turn_id: &str,
        vote: Option<Vote>,
    ) -> AppResult<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::database(format!("Failed to begin transaction: {e}")))?;

        let row = sqlx::query(
            r"
            SELECT t.metadata
            FROM turns t
            JOIN conversations c ON c.id = t.conversation_id
            WHERE t.id = $1 AND t.conversation_id = $2 AND c.owner_id = $3 AND t.role = 'assistant'
            ",
        )
        .bind(turn_id)
        .bind(conversation_id)
        .bind(owner_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::database(format!("Failed to read turn metadata: {e}")))?;

        let Some(row) = row else {
            return Ok(false);
        };

        let raw: String = row.get("metadata");
        let mut metadata: TurnMetadata = serde_json::from_str(&raw)
            .map_err(|e| AppError::serialization(format!("Corrupt turn metadata: {e}")))?;
        metadata.vote = vote;

        sqlx::query("UPDATE turns SET metadata = $1 WHERE id = $2")
            .bind(encode_metadata(&metadata)?)
            .bind(turn_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::database(format!("Failed to record vote: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| AppError::database(format!("Failed to commit vote: {e}")))?;

        Ok(true)
    }
}

#[async_trait]
impl QuotaStore for SqliteDatabase {
    async fn get_counter(
        &self,
        user_id: &str,
        resource: QuotaResource,
    ) -> AppResult<Option<QuotaCounter>> {
        let row = sqlx::query(
            r"
            SELECT counter, period_start, period_end
            FROM quota_counters
            WHERE user_id = $1 AND resource = $2
            ",
        )
        .bind(user_id)
        .bind(resource.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to read quota counter: {e}")))?;

        row.as_ref()
            .map(|r| counter_from_row(r, user_id, resource))
            .transpose()
    }

    async fn increment(
        &self,
        user_id: &str,
        resource: QuotaResource,
        amount: u64,
        now: DateTime<Utc>,
        window: Duration,
    ) -> AppResult<QuotaCounter> {
        // SET expressions all see the pre-update row, so the CASEs agree on expiry
        let row = sqlx::query(
            r"
            INSERT INTO quota_counters (user_id, resource, counter, period_start, period_end)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT(user_id, resource) DO UPDATE SET
                counter = CASE WHEN quota_counters.period_end < $4
                               THEN excluded.counter
                               ELSE quota_counters.counter + excluded.counter END,
                period_start = CASE WHEN quota_counters.period_end < $4
                                    THEN excluded.period_start
                                    ELSE quota_counters.period_start END,
                period_end = CASE WHEN quota_counters.period_end < $4
                                  THEN excluded.period_end
                                  ELSE quota_counters.period_end END
            RETURNING counter, period_start, period_end
            ",
        )
        .bind(user_id)
        .bind(resource.as_str())
        .bind(amount as i64)
        .bind(format_timestamp(now))
        .bind(format_timestamp(now + window))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to increment quota counter: {e}")))?;

        counter_from_row(&row, user_id, resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;
    use crate::models::time::now;
    use crate::models::TokenUsage;

    async fn database() -> SqliteDatabase {
        SqliteDatabase::new("sqlite::memory:").await.unwrap()
    }

    fn turn(conversation_id: &str, id: &str, role: TurnRole, text: &str, at: DateTime<Utc>) -> TurnRecord {
        TurnRecord {
            id: id.to_owned(),
            conversation_id: conversation_id.to_owned(),
            author_id: "alice".to_owned(),
            role,
            parts: vec![TurnPart::text(text)],
            metadata: TurnMetadata::default(),
            created_at: at,
        }
    }

    async fn seeded(db: &SqliteDatabase, count: usize) -> (String, Vec<TurnRecord>) {
        let start = now();
        let conversation = ConversationRecord::new("c1", "alice", "Seed", start);
        assert!(db.create_conversation(&conversation).await.unwrap());
        let turns: Vec<_> = (0..count)
            .map(|i| {
                let role = if i % 2 == 0 { TurnRole::User } else { TurnRole::Assistant };
                turn("c1", &format!("t{i}"), role, &format!("turn {i}"), start + Duration::milliseconds(i as i64 + 1))
            })
            .collect();
        db.append_turns("c1", "alice", &turns).await.unwrap();
        ("c1".to_owned(), turns)
    }

    #[tokio::test]
    async fn test_create_is_idempotent_on_conflict() {
        let db = database().await;
        let conversation = ConversationRecord::new("c1", "alice", "First", now());
        assert!(db.create_conversation(&conversation).await.unwrap());

        let other = ConversationRecord::new("c1", "bob", "Second", now());
        assert!(!db.create_conversation(&other).await.unwrap());

        let stored = db.get_conversation("c1").await.unwrap().unwrap();
        assert_eq!(stored.owner_id, "alice");
        assert_eq!(stored.title, "First");
    }

    #[tokio::test]
    async fn test_append_turns_orders_and_bumps_updated_at() {
        let db = database().await;
        let (id, turns) = seeded(&db, 4).await;

        let stored = db.get_turns(&id).await.unwrap();
        let ids: Vec<_> = stored.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["t0", "t1", "t2", "t3"]);

        let conversation = db.get_conversation(&id).await.unwrap().unwrap();
        assert_eq!(conversation.updated_at, turns[3].created_at);
        assert_eq!(db.last_turn_at(&id).await.unwrap(), Some(turns[3].created_at));
    }

    #[tokio::test]
    async fn test_append_turns_enforces_owner_predicate() {
        let db = database().await;
        let (id, _) = seeded(&db, 2).await;

        let intruder = turn(&id, "x1", TurnRole::User, "hijack", now() + Duration::seconds(5));
        let error = db.append_turns(&id, "mallory", &[intruder]).await.unwrap_err();
        assert_eq!(error.code, ErrorCode::PermissionDenied);
        assert_eq!(db.get_turns(&id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_regenerate_assistant_target_removes_suffix_inclusive() {
        let db = database().await;
        let (id, turns) = seeded(&db, 6).await;
        let replacement = turn(&id, "new", TurnRole::Assistant, "again", turns[5].created_at + Duration::seconds(1));

        let outcome = db
            .regenerate(&Regeneration {
                conversation_id: id.clone(),
                owner_id: "alice".to_owned(),
                target_turn_id: "t3".to_owned(),
                target_role: TurnRole::Assistant,
                user_parts: None,
                assistant_turn: replacement,
            })
            .await
            .unwrap();

        assert_eq!(outcome.removed_turns, 3);
        assert!(outcome.updated_user_turn.is_none());
        let ids: Vec<_> = db.get_turns(&id).await.unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, ["t0", "t1", "t2", "new"]);
    }

    #[tokio::test]
    async fn test_regenerate_user_target_updates_in_place() {
        let db = database().await;
        let (id, turns) = seeded(&db, 4).await;
        let replacement = turn(&id, "new", TurnRole::Assistant, "answer", turns[3].created_at + Duration::seconds(1));

        let outcome = db
            .regenerate(&Regeneration {
                conversation_id: id.clone(),
                owner_id: "alice".to_owned(),
                target_turn_id: "t2".to_owned(),
                target_role: TurnRole::User,
                user_parts: Some(vec![TurnPart::text("edited")]),
                assistant_turn: replacement,
            })
            .await
            .unwrap();

        assert_eq!(outcome.removed_turns, 1);
        let stored = db.get_turns(&id).await.unwrap();
        let ids: Vec<_> = stored.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["t0", "t1", "t2", "new"]);
        assert_eq!(stored[2].text_content(), "edited");
        assert_eq!(stored[2].created_at, turns[2].created_at);
    }

    #[tokio::test]
    async fn test_regenerate_role_mismatch_rolls_back() {
        let db = database().await;
        let (id, turns) = seeded(&db, 4).await;
        let replacement = turn(&id, "new", TurnRole::Assistant, "x", turns[3].created_at + Duration::seconds(1));

        let error = db
            .regenerate(&Regeneration {
                conversation_id: id.clone(),
                owner_id: "alice".to_owned(),
                target_turn_id: "t2".to_owned(),
                target_role: TurnRole::Assistant,
                user_parts: None,
                assistant_turn: replacement,
            })
            .await
            .unwrap_err();

        assert_eq!(error.code, ErrorCode::InvalidInput);
        let conversation = db.get_conversation(&id).await.unwrap().unwrap();
        assert_eq!(conversation.updated_at, turns[3].created_at);
        assert_eq!(db.get_turns(&id).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_fork_conflict_writes_nothing() {
        let db = database().await;
        let (id, turns) = seeded(&db, 2).await;

        let clash = ConversationRecord::new(id.clone(), "bob", "Copy", now());
        let copies: Vec<_> = turns
            .iter()
            .map(|t| TurnRecord { id: format!("copy-{}", t.id), ..t.clone() })
            .collect();
        let error = db.fork_conversation(&clash, &copies).await.unwrap_err();
        assert_eq!(error.code, ErrorCode::ResourceAlreadyExists);
        assert_eq!(db.get_turns(&id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_visibility_change_resets_visible_at() {
        let db = database().await;
        let (id, _) = seeded(&db, 0).await;
        let before = db.get_conversation(&id).await.unwrap().unwrap();

        let later = before.visible_at + Duration::seconds(30);
        assert!(db.update_visibility(&id, "alice", Visibility::Public, later).await.unwrap());
        let public = db.get_conversation(&id).await.unwrap().unwrap();
        assert_eq!(public.visibility, Visibility::Public);
        assert_eq!(public.visible_at, later);

        let again = later + Duration::seconds(30);
        assert!(db.update_visibility(&id, "alice", Visibility::Public, again).await.unwrap());
        let unchanged = db.get_conversation(&id).await.unwrap().unwrap();
        assert_eq!(unchanged.visible_at, later);

        assert!(!db.update_visibility(&id, "bob", Visibility::Private, again).await.unwrap());
    }

    #[tokio::test]
    async fn test_vote_only_on_owned_assistant_turns() {
        let db = database().await;
        let (id, _) = seeded(&db, 2).await;

        assert!(db.set_vote(&id, "alice", "t1", Some(Vote::Up)).await.unwrap());
        assert!(!db.set_vote(&id, "alice", "t0", Some(Vote::Up)).await.unwrap());
        assert!(!db.set_vote(&id, "bob", "t1", Some(Vote::Down)).await.unwrap());

        let voted = db.get_turn(&id, "t1").await.unwrap().unwrap();
        assert_eq!(voted.metadata.vote, Some(Vote::Up));

        assert!(db.set_vote(&id, "alice", "t1", None).await.unwrap());
        let cleared = db.get_turn(&id, "t1").await.unwrap().unwrap();
        assert_eq!(cleared.metadata.vote, None);
    }

    #[tokio::test]
    async fn test_delete_cascades_turns() {
        let db = database().await;
        let (id, _) = seeded(&db, 2).await;

        assert!(!db.delete_conversation(&id, "bob").await.unwrap());
        assert!(db.delete_conversation(&id, "alice").await.unwrap());
        assert!(db.get_conversation(&id).await.unwrap().is_none());
        assert!(db.get_turns(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_metadata_round_trips_usage() {
        let db = database().await;
        let (id, turns) = seeded(&db, 0).await;
        assert!(turns.is_empty());

        let mut reply = turn(&id, "a1", TurnRole::Assistant, "hi", now() + Duration::seconds(1));
        reply.metadata.usage = Some(TokenUsage { input_tokens: 5, output_tokens: 3 });
        reply.metadata.finish_reason = Some("stop".to_owned());
        db.append_turns(&id, "alice", &[reply]).await.unwrap();

        let stored = db.get_turn(&id, "a1").await.unwrap().unwrap();
        assert_eq!(stored.metadata.usage.map(|u| u.output_tokens), Some(3));
        assert_eq!(stored.metadata.finish_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn test_quota_increment_accumulates_and_resets_lazily() {
        let db = database().await;
        let window = Duration::hours(24);
        let start = now();

        let first = db.increment("alice", QuotaResource::Messages, 1, start, window).await.unwrap();
        assert_eq!(first.counter, 1);
        assert_eq!(first.period_end, start + window);

        let second = db
            .increment("alice", QuotaResource::Messages, 2, start + Duration::hours(1), window)
            .await
            .unwrap();
        assert_eq!(second.counter, 3);
        assert_eq!(second.period_start, start);

        let after_window = start + window + Duration::seconds(1);
        let reset = db
            .increment("alice", QuotaResource::Messages, 1, after_window, window)
            .await
            .unwrap();
        assert_eq!(reset.counter, 1);
        assert_eq!(reset.period_start, after_window);

        let stored = db.get_counter("alice", QuotaResource::Messages).await.unwrap().unwrap();
        assert_eq!(stored.counter, 1);
        assert!(db.get_counter("alice", QuotaResource::Files).await.unwrap().is_none());
    }
}
