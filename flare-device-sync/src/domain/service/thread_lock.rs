//! 按会话加锁，保证同一会话的对账串行执行，不同会话互不阻塞

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::model::ThreadId;

/// 会话锁注册表
#[derive(Clone, Default)]
pub struct ThreadLockRegistry {
    locks: Arc<DashMap<ThreadId, Arc<Mutex<()>>>>,
}

impl ThreadLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取会话锁，释放 guard 时解锁
    pub async fn acquire(&self, thread_id: &ThreadId) -> ThreadLockGuard {
        let lock = self
            .locks
            .entry(thread_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = lock.lock_owned().await;

        ThreadLockGuard {
            thread_id: thread_id.clone(),
            guard: Some(guard),
            locks: self.locks.clone(),
        }
    }

    /// 当前登记的锁数量
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// 会话锁 guard
pub struct ThreadLockGuard {
    thread_id: ThreadId,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<DashMap<ThreadId, Arc<Mutex<()>>>>,
}

impl Drop for ThreadLockGuard {
    fn drop(&mut self) {
        self.guard.take();
        // 没有其他持有者或等待者时清理条目
        self.locks
            .remove_if(&self.thread_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
