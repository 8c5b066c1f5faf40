//! 会话解析 - 把寻址信息映射到会话，不存在时创建

use chrono::Utc;
use flare_sync_core::try_infra;
use tracing::{debug, info};

use crate::domain::model::{GroupId, Thread, ThreadIdentity};
use crate::domain::repository::StoreTransaction;
use crate::error::{TranscriptError, TranscriptResult};

/// 会话解析结果
#[derive(Clone, Debug)]
pub struct ResolvedThread {
    pub thread: Thread,
    /// 本次事务中新建
    pub created: bool,
}

/// 会话解析器（无状态，事务由调用方传入）
#[derive(Clone, Debug, Default)]
pub struct ThreadResolver;

impl ThreadResolver {
    pub fn new() -> Self {
        Self
    }

    /// 按群组 ID / 接收方解析会话
    ///
    /// 有群组 ID 时忽略 recipient_id
    pub async fn resolve(
        &self,
        tx: &mut dyn StoreTransaction,
        group_id: Option<&GroupId>,
        recipient_id: &str,
    ) -> TranscriptResult<ResolvedThread> {
        let identity = match group_id {
            Some(group_id) if !group_id.is_empty() => ThreadIdentity::Group(group_id.clone()),
            Some(_) => {
                return Err(TranscriptError::MalformedRecord(
                    "group id is present but empty".to_string(),
                ));
            }
            None if !recipient_id.is_empty() => ThreadIdentity::Contact(recipient_id.to_string()),
            None => {
                return Err(TranscriptError::MalformedRecord(
                    "record has neither group id nor recipient id".to_string(),
                ));
            }
        };

        self.resolve_identity(tx, &identity, &[]).await
    }

    /// 按会话身份解析，不存在时创建
    ///
    /// `initial_members` 只在新建群聊时使用
    pub async fn resolve_identity(
        &self,
        tx: &mut dyn StoreTransaction,
        identity: &ThreadIdentity,
        initial_members: &[String],
    ) -> TranscriptResult<ResolvedThread> {
        if let Some(thread) = try_infra!(
            tx.find_thread(identity).await,
            TranscriptError::Persistence,
            "failed to look up thread"
        ) {
            debug!(thread_id = %thread.id, "Thread resolved");
            return Ok(ResolvedThread {
                thread,
                created: false,
            });
        }

        let thread = Thread::new(identity.clone(), initial_members, Utc::now());
        try_infra!(
            tx.insert_thread(&thread).await,
            TranscriptError::Persistence,
            "failed to create thread"
        );

        info!(
            thread_id = %thread.id,
            kind = identity.as_str(),
            members = thread.members.len(),
            "Thread created"
        );

        Ok(ResolvedThread {
            thread,
            created: true,
        })
    }
}
