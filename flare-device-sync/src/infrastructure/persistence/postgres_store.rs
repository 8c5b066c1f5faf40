//! PostgreSQL 存储实现
//!
//! 每个 [`StoreTransaction`] 对应一个数据库事务，会话行在事务内以
//! `FOR UPDATE` 读取；未提交就被丢弃的事务由 sqlx 自动回滚。
//! 查询接口 [`TranscriptStore::get_thread`] 直接走连接池，不加行锁。

use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::info;

use crate::domain::model::{
    AttachmentPointer, StoredMessage, Thread, ThreadId, ThreadIdentity, Transcript, TranscriptKey,
};
use crate::domain::repository::{StoreTransaction, TranscriptStore};

const SCHEMA_SQL: &str = include_str!("../../../migrations/0001_device_sync.sql");

/// PostgreSQL 存储
#[derive(Clone)]
pub struct PostgresTranscriptStore {
    pool: PgPool,
}

impl PostgresTranscriptStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 创建连接池并测试连接
    pub async fn connect(url: &str, max_connections: u32, min_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .context("PostgreSQL connection test failed")?;

        info!(max_connections, "PostgreSQL connection pool created");
        Ok(Self::new(pool))
    }

    /// 创建表结构（幂等）
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&self.pool)
            .await
            .context("Failed to create device sync schema")?;
        info!("Device sync schema ready");
        Ok(())
    }
}

#[async_trait]
impl TranscriptStore for PostgresTranscriptStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin PostgreSQL transaction")?;
        Ok(Box::new(PostgresTransaction { tx: Some(tx) }))
    }

    async fn get_thread(&self, identity: &ThreadIdentity) -> Result<Option<Thread>> {
        let thread_id = identity.thread_id();
        let row = sqlx::query("SELECT payload FROM device_sync_threads WHERE thread_id = $1")
            .bind(thread_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to query thread")?;
        row.map(decode_thread).transpose()
    }
}

struct PostgresTransaction {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PostgresTransaction {
    fn tx(&mut self) -> Result<&mut Transaction<'static, Postgres>> {
        match self.tx.as_mut() {
            Some(tx) => Ok(tx),
            None => bail!("transaction already committed"),
        }
    }
}

#[async_trait]
impl StoreTransaction for PostgresTransaction {
    async fn find_thread(&mut self, identity: &ThreadIdentity) -> Result<Option<Thread>> {
        let thread_id = identity.thread_id();
        let row = sqlx::query(
            r#"
            SELECT payload
            FROM device_sync_threads
            WHERE thread_id = $1
            FOR UPDATE
            "#,
        )
        .bind(thread_id.as_str())
        .fetch_optional(&mut **self.tx()?)
        .await
        .context("Failed to load thread")?;

        row.map(decode_thread).transpose()
    }

    async fn insert_thread(&mut self, thread: &Thread) -> Result<()> {
        let payload = serde_json::to_string(thread)?;
        sqlx::query(
            r#"
            INSERT INTO device_sync_threads (
                thread_id, kind, title, timer_seconds, payload, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(thread.id.as_str())
        .bind(thread.identity.as_str())
        .bind(thread.title.as_deref())
        .bind(timer_seconds(thread))
        .bind(payload)
        .bind(thread.created_at)
        .bind(thread.updated_at)
        .execute(&mut **self.tx()?)
        .await
        .context("Failed to insert thread")?;
        Ok(())
    }

    async fn update_thread(&mut self, thread: &Thread) -> Result<()> {
        let payload = serde_json::to_string(thread)?;
        let result = sqlx::query(
            r#"
            UPDATE device_sync_threads
            SET title = $2, timer_seconds = $3, payload = $4, updated_at = $5
            WHERE thread_id = $1
            "#,
        )
        .bind(thread.id.as_str())
        .bind(thread.title.as_deref())
        .bind(timer_seconds(thread))
        .bind(payload)
        .bind(thread.updated_at)
        .execute(&mut **self.tx()?)
        .await
        .context("Failed to update thread")?;

        if result.rows_affected() == 0 {
            bail!("thread {} not found", thread.id);
        }
        Ok(())
    }

    async fn find_message(
        &mut self,
        thread_id: &ThreadId,
        author_id: &str,
        timestamp: u64,
    ) -> Result<Option<StoredMessage>> {
        // 超出存储范围的时间戳不可能有对应行
        let Ok(sent_at) = i64::try_from(timestamp) else {
            return Ok(None);
        };
        let row = sqlx::query(
            r#"
            SELECT message_id, body, attachments
            FROM device_sync_messages
            WHERE thread_id = $1 AND author_id = $2 AND sent_at = $3
            "#,
        )
        .bind(thread_id.as_str())
        .bind(author_id)
        .bind(sent_at)
        .fetch_optional(&mut **self.tx()?)
        .await
        .context("Failed to load message")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let attachments: String = row.get("attachments");
        let attachments: Vec<AttachmentPointer> =
            serde_json::from_str(&attachments).context("Failed to decode attachments")?;

        Ok(Some(StoredMessage {
            message_id: row.get("message_id"),
            thread_id: thread_id.clone(),
            author_id: author_id.to_string(),
            timestamp,
            body: row.get("body"),
            attachments,
        }))
    }

    async fn insert_message(&mut self, message: &StoredMessage) -> Result<()> {
        let attachments = serde_json::to_string(&message.attachments)?;
        // 同一作者同一时间戳的消息只保留第一条
        sqlx::query(
            r#"
            INSERT INTO device_sync_messages (
                thread_id, author_id, sent_at, message_id, body, attachments
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (thread_id, author_id, sent_at) DO NOTHING
            "#,
        )
        .bind(message.thread_id.as_str())
        .bind(&message.author_id)
        .bind(to_db_millis(message.timestamp)?)
        .bind(&message.message_id)
        .bind(&message.body)
        .bind(attachments)
        .execute(&mut **self.tx()?)
        .await
        .context("Failed to insert message")?;
        Ok(())
    }

    async fn transcript_exists(&mut self, key: &TranscriptKey) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM device_sync_transcripts
                WHERE thread_id = $1 AND sent_at = $2 AND recipient_id = $3
            )
            "#,
        )
        .bind(key.thread_id.as_str())
        .bind(to_db_millis(key.timestamp)?)
        .bind(&key.recipient_id)
        .fetch_one(&mut **self.tx()?)
        .await
        .context("Failed to check transcript")?;
        Ok(exists)
    }

    async fn insert_transcript(&mut self, transcript: &Transcript) -> Result<bool> {
        let payload = serde_json::to_string(transcript)?;
        let received_at: DateTime<Utc> = transcript.received_at();
        let result = sqlx::query(
            r#"
            INSERT INTO device_sync_transcripts (
                thread_id, sent_at, recipient_id, message_id, payload, received_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (thread_id, sent_at, recipient_id) DO NOTHING
            "#,
        )
        .bind(transcript.thread().id.as_str())
        .bind(to_db_millis(transcript.timestamp())?)
        .bind(transcript.recipient_id())
        .bind(transcript.message_id())
        .bind(payload)
        .bind(received_at)
        .execute(&mut **self.tx()?)
        .await
        .context("Failed to insert transcript")?;

        Ok(result.rows_affected() > 0)
    }

    async fn commit(&mut self) -> Result<()> {
        let Some(tx) = self.tx.take() else {
            bail!("transaction already committed");
        };
        tx.commit()
            .await
            .context("Failed to commit PostgreSQL transaction")
    }
}

fn decode_thread(row: PgRow) -> Result<Thread> {
    let payload: String = row.get("payload");
    serde_json::from_str(&payload).context("Failed to decode thread payload")
}

/// 计时器秒数是 u32，列类型为 BIGINT
fn timer_seconds(thread: &Thread) -> i64 {
    i64::from(thread.timer.duration_seconds())
}

fn to_db_millis(timestamp: u64) -> Result<i64> {
    i64::try_from(timestamp).context("timestamp out of range")
}
