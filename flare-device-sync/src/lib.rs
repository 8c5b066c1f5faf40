//! 多端同步服务
//!
//! 对账本账号在其他已关联设备上发送的消息（发送记录），写入对应会话的历史。

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod interface;
pub mod service;

pub use error::{TranscriptError, TranscriptResult};
