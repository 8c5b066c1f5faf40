//! 内存存储实现
//!
//! 事务内的写入先缓存在事务对象中，提交时一次性落到共享状态；
//! 未提交即丢弃的事务不会改变共享状态。

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;

use crate::domain::model::{
    StoredMessage, Thread, ThreadId, ThreadIdentity, Transcript, TranscriptKey,
};
use crate::domain::repository::{StoreTransaction, TranscriptStore};

/// 故障注入点
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StoreFailure {
    #[default]
    None,
    /// 开启事务失败
    Begin,
    /// 事务内写入失败
    Write,
    /// 提交失败
    Commit,
}

type MessageKey = (ThreadId, String, u64);

#[derive(Default)]
struct MemoryState {
    threads: HashMap<ThreadId, Thread>,
    messages: HashMap<MessageKey, StoredMessage>,
    transcripts: HashMap<TranscriptKey, Transcript>,
}

/// 内存存储
#[derive(Clone, Default)]
pub struct MemoryTranscriptStore {
    state: Arc<RwLock<MemoryState>>,
    failure: Arc<RwLock<StoreFailure>>,
}

impl MemoryTranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置故障注入点，后续事务生效
    pub fn set_failure(&self, failure: StoreFailure) -> Result<()> {
        *self
            .failure
            .write()
            .map_err(|_| anyhow!("memory store failure flag poisoned"))? = failure;
        Ok(())
    }

    pub fn thread(&self, thread_id: &ThreadId) -> Result<Option<Thread>> {
        Ok(self.read()?.threads.get(thread_id).cloned())
    }

    pub fn threads(&self) -> Result<Vec<Thread>> {
        let mut threads: Vec<Thread> = self.read()?.threads.values().cloned().collect();
        threads.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(threads)
    }

    pub fn thread_count(&self) -> Result<usize> {
        Ok(self.read()?.threads.len())
    }

    /// 指定会话的发送记录，按时间戳排序
    pub fn transcripts_in(&self, thread_id: &ThreadId) -> Result<Vec<Transcript>> {
        let mut transcripts: Vec<Transcript> = self
            .read()?
            .transcripts
            .values()
            .filter(|t| &t.thread().id == thread_id)
            .cloned()
            .collect();
        transcripts.sort_by_key(|t| t.timestamp());
        Ok(transcripts)
    }

    pub fn transcript_count(&self) -> Result<usize> {
        Ok(self.read()?.transcripts.len())
    }

    pub fn message_count(&self) -> Result<usize> {
        Ok(self.read()?.messages.len())
    }

    /// 按 ID 查找会话历史消息
    pub fn message_by_id(&self, message_id: &str) -> Result<Option<StoredMessage>> {
        Ok(self
            .read()?
            .messages
            .values()
            .find(|m| m.message_id == message_id)
            .cloned())
    }

    /// 直接写入一条会话历史消息（接收链路或测试预置数据）
    pub fn seed_message(&self, message: StoredMessage) -> Result<()> {
        let key = message_key(&message);
        self.write()?.messages.insert(key, message);
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryState>> {
        self.state
            .read()
            .map_err(|_| anyhow!("memory store state poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryState>> {
        self.state
            .write()
            .map_err(|_| anyhow!("memory store state poisoned"))
    }

    fn failure(&self) -> Result<StoreFailure> {
        Ok(*self
            .failure
            .read()
            .map_err(|_| anyhow!("memory store failure flag poisoned"))?)
    }
}

#[async_trait]
impl TranscriptStore for MemoryTranscriptStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let failure = self.failure()?;
        if failure == StoreFailure::Begin {
            bail!("injected failure: begin");
        }

        Ok(Box::new(MemoryTransaction {
            store: self.clone(),
            failure,
            pending: MemoryState::default(),
            updated_threads: HashMap::new(),
            committed: false,
        }))
    }

    async fn get_thread(&self, identity: &ThreadIdentity) -> Result<Option<Thread>> {
        self.thread(&identity.thread_id())
    }
}

/// 内存事务：读取优先看本事务的缓冲写入
struct MemoryTransaction {
    store: MemoryTranscriptStore,
    failure: StoreFailure,
    pending: MemoryState,
    updated_threads: HashMap<ThreadId, Thread>,
    committed: bool,
}

impl MemoryTransaction {
    fn ensure_open(&self) -> Result<()> {
        if self.committed {
            bail!("transaction already committed");
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        self.ensure_open()?;
        if self.failure == StoreFailure::Write {
            bail!("injected failure: write");
        }
        Ok(())
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn find_thread(&mut self, identity: &ThreadIdentity) -> Result<Option<Thread>> {
        self.ensure_open()?;
        let thread_id = identity.thread_id();
        if let Some(thread) = self
            .updated_threads
            .get(&thread_id)
            .or_else(|| self.pending.threads.get(&thread_id))
        {
            return Ok(Some(thread.clone()));
        }
        self.store.thread(&thread_id)
    }

    async fn insert_thread(&mut self, thread: &Thread) -> Result<()> {
        self.ensure_writable()?;
        if self.pending.threads.contains_key(&thread.id)
            || self.store.read()?.threads.contains_key(&thread.id)
        {
            bail!("thread {} already exists", thread.id);
        }
        self.pending.threads.insert(thread.id.clone(), thread.clone());
        Ok(())
    }

    async fn update_thread(&mut self, thread: &Thread) -> Result<()> {
        self.ensure_writable()?;
        if let Some(pending) = self.pending.threads.get_mut(&thread.id) {
            *pending = thread.clone();
            return Ok(());
        }
        if !self.store.read()?.threads.contains_key(&thread.id) {
            bail!("thread {} not found", thread.id);
        }
        self.updated_threads.insert(thread.id.clone(), thread.clone());
        Ok(())
    }

    async fn find_message(
        &mut self,
        thread_id: &ThreadId,
        author_id: &str,
        timestamp: u64,
    ) -> Result<Option<StoredMessage>> {
        self.ensure_open()?;
        let key = (thread_id.clone(), author_id.to_string(), timestamp);
        if let Some(message) = self.pending.messages.get(&key) {
            return Ok(Some(message.clone()));
        }
        Ok(self.store.read()?.messages.get(&key).cloned())
    }

    async fn insert_message(&mut self, message: &StoredMessage) -> Result<()> {
        self.ensure_writable()?;
        // 同一作者同一时间戳的消息只保留第一条
        self.pending
            .messages
            .entry(message_key(message))
            .or_insert_with(|| message.clone());
        Ok(())
    }

    async fn transcript_exists(&mut self, key: &TranscriptKey) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.pending.transcripts.contains_key(key)
            || self.store.read()?.transcripts.contains_key(key))
    }

    async fn insert_transcript(&mut self, transcript: &Transcript) -> Result<bool> {
        self.ensure_writable()?;
        let key = transcript.key();
        if self.pending.transcripts.contains_key(&key)
            || self.store.read()?.transcripts.contains_key(&key)
        {
            return Ok(false);
        }
        self.pending.transcripts.insert(key, transcript.clone());
        Ok(true)
    }

    async fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.failure == StoreFailure::Commit {
            bail!("injected failure: commit");
        }

        let mut state = self.store.write()?;

        // 先整体校验再写入，保证要么全部生效要么都不生效
        if let Some(key) = self
            .pending
            .transcripts
            .keys()
            .find(|key| state.transcripts.contains_key(*key))
        {
            bail!("transcript {} already committed", key);
        }

        let pending = std::mem::take(&mut self.pending);
        state.threads.extend(pending.threads);
        state.threads.extend(self.updated_threads.drain());
        for (key, message) in pending.messages {
            state.messages.entry(key).or_insert(message);
        }
        state.transcripts.extend(pending.transcripts);
        self.committed = true;
        Ok(())
    }
}

fn message_key(message: &StoredMessage) -> MessageKey {
    (
        message.thread_id.clone(),
        message.author_id.clone(),
        message.timestamp,
    )
}
