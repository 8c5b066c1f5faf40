//! 工具函数模块
//!
//! 提供时间戳转换等通用工具函数

use chrono::{DateTime, TimeZone, Utc};

/// 获取当前时间戳（毫秒）
pub fn current_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// 毫秒数转换为 DateTime
pub fn millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// 协议中的无符号毫秒时间戳转换为 DateTime（超出范围返回 None）
pub fn protocol_millis_to_datetime(ms: u64) -> Option<DateTime<Utc>> {
    i64::try_from(ms).ok().and_then(millis_to_datetime)
}
