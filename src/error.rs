//! Flare Sync Core 错误工具模块
//!
//! - 定义跨服务共享的错误分类
//! - 为基础设施层提供便捷的错误转换工具

use std::fmt::Display;

/// 错误分类，决定调用方的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// 输入无效，永久错误，不重试
    InvalidInput,
    /// 基础设施暂时不可用，可整体重试
    Transient,
    /// 内部错误
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::InvalidInput => "invalid_input",
            ErrorCategory::Transient => "transient",
            ErrorCategory::Internal => "internal",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::Transient)
    }
}

/// 带分类信息的业务错误
pub trait CategorizedError: std::error::Error {
    fn category(&self) -> ErrorCategory;

    fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }
}

/// 将基础设施错误映射为业务错误
///
/// `ctor` 一般是业务错误枚举的某个变体构造函数，例如 `TranscriptError::Persistence`
pub fn map_infra_error<E, F>(err: impl Display, ctor: F, msg: &str) -> E
where
    F: FnOnce(String) -> E,
{
    ctor(format!("{}: {:#}", msg, err))
}

/// 基础设施结果扩展
pub trait InfraResultExt<T> {
    fn into_flare<E, F>(self, ctor: F, msg: &str) -> Result<T, E>
    where
        F: FnOnce(String) -> E;
}

impl<T, D: Display> InfraResultExt<T> for Result<T, D> {
    fn into_flare<E, F>(self, ctor: F, msg: &str) -> Result<T, E>
    where
        F: FnOnce(String) -> E,
    {
        self.map_err(|err| map_infra_error(err, ctor, msg))
    }
}

/// 便捷宏：从基础设施结果直接转换为业务层 `Result`
#[macro_export]
macro_rules! try_infra {
    ($expr:expr, $ctor:expr, $msg:expr) => {
        $crate::error::InfraResultExt::into_flare($expr, $ctor, $msg)?
    };
}
