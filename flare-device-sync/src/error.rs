//! 多端同步服务错误类型定义

use flare_sync_core::error::{CategorizedError, ErrorCategory};
use thiserror::Error;

/// 发送记录对账错误类型
///
/// 重复投递不属于错误，见 [`crate::domain::model::ReconcileOutcome::Duplicate`]
#[derive(Debug, Error)]
pub enum TranscriptError {
    /// 记录缺少必要的寻址信息，永久错误，丢弃不重试
    #[error("Malformed sync transcript: {0}")]
    MalformedRecord(String),

    /// 存储或事务失败，未提交任何状态，可整体重试
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// 其他错误
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// 对账结果类型
pub type TranscriptResult<T> = Result<T, TranscriptError>;

impl CategorizedError for TranscriptError {
    fn category(&self) -> ErrorCategory {
        match self {
            TranscriptError::MalformedRecord(_) => ErrorCategory::InvalidInput,
            TranscriptError::Persistence(_) => ErrorCategory::Transient,
            TranscriptError::Other(_) => ErrorCategory::Internal,
        }
    }
}
