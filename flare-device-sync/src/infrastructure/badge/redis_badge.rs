//! Redis 未读数 / 角标实现
//!
//! - `{prefix}:unread`：Hash，field 为会话 ID，value 为未读数
//! - `{prefix}:badge`：最近一次计算出的角标值

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};
use tracing::debug;

use crate::domain::model::ThreadId;
use crate::domain::repository::UnreadBadgeTracker;

pub struct RedisBadgeTracker {
    conn: ConnectionManager,
    key_prefix: String,
}

impl RedisBadgeTracker {
    pub fn new(conn: ConnectionManager, key_prefix: impl Into<String>) -> Self {
        Self {
            conn,
            key_prefix: key_prefix.into(),
        }
    }

    pub async fn connect(url: &str, key_prefix: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url).context("Failed to create Redis client")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;
        Ok(Self::new(conn, key_prefix))
    }

    fn unread_key(&self) -> String {
        format!("{}:unread", self.key_prefix)
    }

    fn badge_key(&self) -> String {
        format!("{}:badge", self.key_prefix)
    }
}

#[async_trait]
impl UnreadBadgeTracker for RedisBadgeTracker {
    async fn unread_count(&self) -> Result<u64> {
        let mut conn = self.conn.clone();
        let counts: Vec<u64> = conn.hvals(self.unread_key()).await?;
        Ok(counts.into_iter().sum())
    }

    async fn unread_count_excluding(&self, thread_id: &ThreadId) -> Result<u64> {
        let mut conn = self.conn.clone();
        let counts: HashMap<String, u64> = conn.hgetall(self.unread_key()).await?;
        Ok(counts
            .into_iter()
            .filter(|(field, _)| field != thread_id.as_str())
            .map(|(_, count)| count)
            .sum())
    }

    async fn unread_count_in(&self, thread_id: &ThreadId) -> Result<u64> {
        let mut conn = self.conn.clone();
        let count: Option<u64> = conn.hget(self.unread_key(), thread_id.as_str()).await?;
        Ok(count.unwrap_or(0))
    }

    async fn record_unread(&self, thread_id: &ThreadId, count: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .hincr(self.unread_key(), thread_id.as_str(), count)
            .await?;
        Ok(())
    }

    async fn mark_thread_read(&self, thread_id: &ThreadId) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.hdel(self.unread_key(), thread_id.as_str()).await?;
        Ok(())
    }

    async fn recompute_badge(&self) -> Result<u64> {
        let badge = self.unread_count().await?;
        let mut conn = self.conn.clone();
        let _: () = conn.set(self.badge_key(), badge).await?;
        debug!(badge, "Badge recomputed");
        Ok(badge)
    }
}
