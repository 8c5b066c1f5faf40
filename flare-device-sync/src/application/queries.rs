use crate::domain::model::{ThreadId, ThreadIdentity};

/// 未读数范围
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnreadScope {
    All,
    Excluding(ThreadId),
    Only(ThreadId),
}

/// 未读数查询
#[derive(Debug, Clone)]
pub struct UnreadCountQuery {
    pub scope: UnreadScope,
}

/// 引用回复草稿查询：按（作者, 时间戳）定位会话中的消息
#[derive(Debug, Clone)]
pub struct QuotedReplyDraftQuery {
    pub thread_id: ThreadId,
    pub author_id: String,
    pub timestamp: u64,
}

/// 会话查询
#[derive(Debug, Clone)]
pub struct ThreadQuery {
    pub identity: ThreadIdentity,
}
