//! 内存未读数 / 角标实现

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;

use crate::domain::model::ThreadId;
use crate::domain::repository::UnreadBadgeTracker;

#[derive(Clone, Default)]
pub struct MemoryBadgeTracker {
    unread: Arc<DashMap<ThreadId, u64>>,
    badge: Arc<AtomicU64>,
    recompute_calls: Arc<AtomicU64>,
}

impl MemoryBadgeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 最近一次计算出的角标值
    pub fn badge(&self) -> u64 {
        self.badge.load(Ordering::SeqCst)
    }

    /// 角标重新计算次数
    pub fn recompute_calls(&self) -> u64 {
        self.recompute_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UnreadBadgeTracker for MemoryBadgeTracker {
    async fn unread_count(&self) -> Result<u64> {
        Ok(self.unread.iter().map(|entry| *entry.value()).sum())
    }

    async fn unread_count_excluding(&self, thread_id: &ThreadId) -> Result<u64> {
        Ok(self
            .unread
            .iter()
            .filter(|entry| entry.key() != thread_id)
            .map(|entry| *entry.value())
            .sum())
    }

    async fn unread_count_in(&self, thread_id: &ThreadId) -> Result<u64> {
        Ok(self.unread.get(thread_id).map(|count| *count).unwrap_or(0))
    }

    async fn record_unread(&self, thread_id: &ThreadId, count: u64) -> Result<()> {
        *self.unread.entry(thread_id.clone()).or_insert(0) += count;
        Ok(())
    }

    async fn mark_thread_read(&self, thread_id: &ThreadId) -> Result<()> {
        self.unread.remove(thread_id);
        Ok(())
    }

    async fn recompute_badge(&self) -> Result<u64> {
        let badge = self.unread_count().await?;
        self.badge.store(badge, Ordering::SeqCst);
        self.recompute_calls.fetch_add(1, Ordering::SeqCst);
        Ok(badge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::ThreadIdentity;

    fn thread_id(recipient: &str) -> ThreadId {
        ThreadIdentity::Contact(recipient.to_string()).thread_id()
    }

    #[tokio::test]
    async fn test_unread_counts() {
        let tracker = MemoryBadgeTracker::new();
        tracker.record_unread(&thread_id("+1"), 2).await.unwrap();
        tracker.record_unread(&thread_id("+2"), 3).await.unwrap();
        tracker.record_unread(&thread_id("+2"), 1).await.unwrap();

        assert_eq!(tracker.unread_count().await.unwrap(), 6);
        assert_eq!(
            tracker
                .unread_count_excluding(&thread_id("+2"))
                .await
                .unwrap(),
            2
        );
        assert_eq!(tracker.unread_count_in(&thread_id("+2")).await.unwrap(), 4);
        assert_eq!(tracker.unread_count_in(&thread_id("+3")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mark_read_and_recompute() {
        let tracker = MemoryBadgeTracker::new();
        tracker.record_unread(&thread_id("+1"), 2).await.unwrap();
        assert_eq!(tracker.recompute_badge().await.unwrap(), 2);

        tracker.mark_thread_read(&thread_id("+1")).await.unwrap();
        assert_eq!(tracker.recompute_badge().await.unwrap(), 0);
        assert_eq!(tracker.badge(), 0);
        assert_eq!(tracker.recompute_calls(), 2);
    }
}
