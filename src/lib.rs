//! Flare Sync Core 公共库
//!
//! 提供统一的配置加载、错误工具、日志初始化和时间工具

pub mod config;
pub mod error;
pub mod tracing;
pub mod utils;

pub use config::{
    ConfigManager, DeviceSyncServiceConfig, FlareAppConfig, LoggingConfig,
    PostgresInstanceConfig, RedisPoolConfig, app_config, load_config,
};
pub use error::*;
pub use utils::*;
