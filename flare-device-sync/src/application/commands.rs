use crate::domain::model::{SyncSentMessage, ThreadId};

/// 对账一条同步发送消息
#[derive(Debug, Clone)]
pub struct ReconcileTranscriptCommand {
    pub sync_message: SyncSentMessage,
    pub relay: Option<String>,
}

/// 记录未读数（接收消息链路）
#[derive(Debug, Clone)]
pub struct RecordUnreadCommand {
    pub thread_id: ThreadId,
    pub count: u64,
}

/// 会话标记已读
#[derive(Debug, Clone)]
pub struct MarkThreadReadCommand {
    pub thread_id: ThreadId,
}
