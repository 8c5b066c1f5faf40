use anyhow::Result;
use async_trait::async_trait;

use crate::domain::model::{
    StoredMessage, Thread, ThreadId, ThreadIdentity, Transcript, TranscriptKey,
};

/// 发送记录存储（需要作为 trait 对象使用，保留 async-trait）
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    /// 开启一个读写事务
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;

    /// 只读查询会话，不加锁，只看到已提交的状态
    async fn get_thread(&self, identity: &ThreadIdentity) -> Result<Option<Thread>>;
}

/// 读写事务
///
/// 事务内的读取能看到本事务尚未提交的写入；未调用 `commit` 就被丢弃的事务
/// 等同于回滚，不留下任何状态。
#[async_trait]
pub trait StoreTransaction: Send {
    /// 按身份查找会话，并锁定到事务结束
    async fn find_thread(&mut self, identity: &ThreadIdentity) -> Result<Option<Thread>>;

    /// 创建会话
    async fn insert_thread(&mut self, thread: &Thread) -> Result<()>;

    /// 更新会话（计时器、群组元数据）
    async fn update_thread(&mut self, thread: &Thread) -> Result<()>;

    /// 在会话历史中按（作者, 时间戳）查找消息
    async fn find_message(
        &mut self,
        thread_id: &ThreadId,
        author_id: &str,
        timestamp: u64,
    ) -> Result<Option<StoredMessage>>;

    /// 写入会话历史消息
    async fn insert_message(&mut self, message: &StoredMessage) -> Result<()>;

    /// 去重检查
    async fn transcript_exists(&mut self, key: &TranscriptKey) -> Result<bool>;

    /// 写入发送记录，同一键已存在时不写入并返回 `false`
    async fn insert_transcript(&mut self, transcript: &Transcript) -> Result<bool>;

    /// 提交事务，之后该事务不可再使用
    async fn commit(&mut self) -> Result<()>;
}

/// 未读数 / 角标服务（显式注入，内部自行同步）
#[async_trait]
pub trait UnreadBadgeTracker: Send + Sync {
    /// 全部会话未读数
    async fn unread_count(&self) -> Result<u64>;

    /// 除指定会话外的未读数
    async fn unread_count_excluding(&self, thread_id: &ThreadId) -> Result<u64>;

    /// 指定会话的未读数
    async fn unread_count_in(&self, thread_id: &ThreadId) -> Result<u64>;

    /// 增加未读数（接收消息链路使用）
    async fn record_unread(&self, thread_id: &ThreadId, count: u64) -> Result<()>;

    /// 会话标记已读
    async fn mark_thread_read(&self, thread_id: &ThreadId) -> Result<()>;

    /// 重新计算应用角标，返回新的角标值
    async fn recompute_badge(&self) -> Result<u64>;
}
