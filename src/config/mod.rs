//! Flare Sync Core 配置模块
//!
//! 该模块提供了完整的应用程序配置管理功能，包括：
//! - 配置文件加载和解析（单文件或目录合并）
//! - 环境特定配置覆盖
//! - 日志、数据库、缓存与多端同步服务配置定义

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use toml::Value;
use tracing::warn;

mod manager;
pub use manager::ConfigManager;

/// 全局应用配置实例，使用 OnceLock 确保只初始化一次
static APP_CONFIG: OnceLock<FlareAppConfig> = OnceLock::new();

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别（RUST_LOG 未设置时生效）
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub with_target: bool,
    #[serde(default = "default_true")]
    pub with_thread_ids: bool,
    #[serde(default = "default_true")]
    pub with_file: bool,
    #[serde(default = "default_true")]
    pub with_line_number: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            with_target: false,
            with_thread_ids: true,
            with_file: true,
            with_line_number: true,
        }
    }
}

fn default_log_level() -> String {
    "debug".to_string()
}

fn default_true() -> bool {
    true
}

/// Redis 连接池配置
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RedisPoolConfig {
    /// Redis 服务器地址（数据库编号写在 URL 中）
    pub url: String,
}

/// PostgreSQL 数据库实例配置
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PostgresInstanceConfig {
    /// 数据库连接 URL
    pub url: String,
    /// 最大连接数
    #[serde(default)]
    pub max_connections: Option<u32>,
    /// 最小连接数
    #[serde(default)]
    pub min_connections: Option<u32>,
}

/// 多端同步服务配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DeviceSyncServiceConfig {
    /// 服务名称
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    /// 本账号标识（发送记录在会话历史中的作者）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_account_id: Option<String>,
    /// PostgreSQL 配置引用（为空时使用内存存储）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postgres: Option<String>,
    /// Redis 配置引用（为空时使用内存未读计数）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis: Option<String>,
    /// 未读计数 key 前缀
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge_key_prefix: Option<String>,
    /// 引用消息展示文本的最大字符数
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote_display_limit: Option<usize>,
    /// 启动时是否自动建表
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_schema: Option<bool>,
}

/// 服务配置集合
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServicesConfig {
    /// 多端同步服务配置
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_sync: Option<DeviceSyncServiceConfig>,
}

/// Flare 应用配置主结构体
#[derive(Debug, Clone, Deserialize, Default)]
pub struct FlareAppConfig {
    /// 日志配置
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
    /// Redis 配置映射
    #[serde(default)]
    pub redis: HashMap<String, RedisPoolConfig>,
    /// PostgreSQL 配置映射
    #[serde(default)]
    pub postgres: HashMap<String, PostgresInstanceConfig>,
    /// 服务配置
    #[serde(default)]
    pub services: ServicesConfig,
}

impl FlareAppConfig {
    /// 获取日志配置
    pub fn logging(&self) -> Option<&LoggingConfig> {
        self.logging.as_ref()
    }

    /// 获取 Redis 配置
    pub fn redis_profile(&self, name: &str) -> Option<&RedisPoolConfig> {
        self.redis.get(name)
    }

    /// 获取 PostgreSQL 配置
    pub fn postgres_profile(&self, name: &str) -> Option<&PostgresInstanceConfig> {
        self.postgres.get(name)
    }

    /// 获取多端同步服务配置
    pub fn device_sync_service(&self) -> DeviceSyncServiceConfig {
        self.services.device_sync.clone().unwrap_or_default()
    }
}

/// 加载配置
pub fn load_config(path: Option<&str>) -> &'static FlareAppConfig {
    let candidates: Vec<PathBuf> = match path {
        Some(p) => vec![PathBuf::from(p)],
        None => vec![PathBuf::from("config"), PathBuf::from("config.toml")],
    };

    APP_CONFIG.get_or_init(|| {
        let mut cfg = load_with_fallback(&candidates);
        // 加载环境特定配置
        if let Err(e) = ConfigManager::load_environment_config(&mut cfg) {
            warn!("failed to load environment config: {}", e);
        }
        cfg
    })
}

/// 获取已加载的应用配置
pub fn app_config() -> Option<&'static FlareAppConfig> {
    APP_CONFIG.get()
}

/// 使用备选方案加载配置
fn load_with_fallback(candidates: &[PathBuf]) -> FlareAppConfig {
    for path in candidates {
        match load_config_from_source(path) {
            Ok(cfg) => return cfg,
            Err(err) => {
                warn!("failed to load config from {}: {err}", path.display());
            }
        }
    }

    warn!("no configuration source succeeded, falling back to defaults");
    FlareAppConfig::default()
}

/// 从源加载配置
pub(crate) fn load_config_from_source(path: &Path) -> Result<FlareAppConfig> {
    if !path.exists() {
        return Err(anyhow!(
            "configuration path {} does not exist",
            path.display()
        ));
    }

    let metadata = path
        .metadata()
        .with_context(|| format!("unable to read metadata for {}", path.display()))?;

    if metadata.is_dir() {
        load_config_from_directory(path)
    } else {
        load_config_from_file(path)
    }
}

/// 从文件加载配置
fn load_config_from_file(path: &Path) -> Result<FlareAppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read config file: {}", path.display()))?;
    let cfg: FlareAppConfig = toml::from_str(&content)
        .with_context(|| format!("invalid config format: {}", path.display()))?;
    Ok(cfg)
}

/// 从目录加载配置
fn load_config_from_directory(path: &Path) -> Result<FlareAppConfig> {
    let base_file = path.join("base.toml");
    if !base_file.exists() {
        return Err(anyhow!(
            "missing base configuration: {}",
            base_file.display()
        ));
    }

    let mut merged = load_toml_value(&base_file)?;

    if !merged.is_table() {
        return Err(anyhow!(
            "base configuration must be a table: {}",
            base_file.display()
        ));
    }

    merge_directory(&mut merged, &path.join("shared"))?;
    merge_directory(&mut merged, &path.join("services"))?;
    merge_directory(&mut merged, &path.join("overrides"))?;

    let cfg: FlareAppConfig = merged
        .try_into()
        .with_context(|| format!("invalid configuration after merging {}", path.display()))?;

    Ok(cfg)
}

/// 合并目录中的配置
fn merge_directory(root: &mut Value, dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }

    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("unable to read config directory {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(OsStr::to_str)
                .map(|ext| ext.eq_ignore_ascii_case("toml"))
                .unwrap_or(false)
        })
        .collect::<Vec<_>>();

    entries.sort_by_key(|entry| entry.path());

    for entry in entries {
        let value = load_toml_value(&entry.path())?;
        merge_value(root, value);
    }

    Ok(())
}

/// 加载 TOML 值
fn load_toml_value(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read config fragment {}", path.display()))?;
    let value: Value = toml::from_str(&content)
        .with_context(|| format!("invalid TOML content in fragment {}", path.display()))?;
    Ok(value)
}

/// 合并值（表按 key 递归合并，其余类型直接覆盖）
pub(crate) fn merge_value(base: &mut Value, overlay: Value) {
    match overlay {
        Value::Table(overlay_table) => {
            if let Value::Table(base_table) = base {
                for (key, overlay_value) in overlay_table.into_iter() {
                    match base_table.get_mut(&key) {
                        Some(base_value) => merge_value(base_value, overlay_value),
                        None => {
                            base_table.insert(key, overlay_value);
                        }
                    }
                }
            } else {
                *base = Value::Table(overlay_table);
            }
        }
        other => {
            *base = other;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_config_from_directory_merges_fragments() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("base.toml"),
            r#"
[logging]
level = "info"

[postgres.primary]
url = "postgres://localhost/flare"

[services.device_sync]
local_account_id = "+15550000000"
postgres = "primary"
"#,
        )
        .unwrap();

        fs::create_dir(dir.path().join("overrides")).unwrap();
        fs::write(
            dir.path().join("overrides").join("10-device-sync.toml"),
            r#"
[services.device_sync]
quote_display_limit = 64
"#,
        )
        .unwrap();

        let cfg = load_config_from_source(dir.path()).unwrap();
        let service = cfg.device_sync_service();

        assert_eq!(cfg.logging().map(|l| l.level.as_str()), Some("info"));
        assert_eq!(service.local_account_id.as_deref(), Some("+15550000000"));
        assert_eq!(service.postgres.as_deref(), Some("primary"));
        assert_eq!(service.quote_display_limit, Some(64));
        assert_eq!(
            cfg.postgres_profile("primary").map(|p| p.url.as_str()),
            Some("postgres://localhost/flare")
        );
    }

    #[test]
    fn test_load_config_missing_base_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config_from_source(dir.path()).is_err());
    }

    #[test]
    fn test_merge_value_overrides_scalars() {
        let mut base: Value = toml::from_str("a = 1\n[t]\nx = 1\ny = 2").unwrap();
        let overlay: Value = toml::from_str("a = 2\n[t]\ny = 3").unwrap();
        merge_value(&mut base, overlay);

        assert_eq!(base.get("a").and_then(Value::as_integer), Some(2));
        assert_eq!(
            base.get("t").and_then(|t| t.get("x")).and_then(Value::as_integer),
            Some(1)
        );
        assert_eq!(
            base.get("t").and_then(|t| t.get("y")).and_then(Value::as_integer),
            Some(3)
        );
    }
}
