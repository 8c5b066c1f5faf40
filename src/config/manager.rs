//! 配置管理器 - 负责处理不同环境下的配置覆盖
//!
//! 该模块提供了配置管理功能，包括：
//! - 获取当前运行环境
//! - 加载环境特定配置并合并到基础配置

use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use toml::Value;

use super::{FlareAppConfig, merge_value};

/// 配置管理器
pub struct ConfigManager;

impl ConfigManager {
    /// 获取当前环境名称
    ///
    /// 从环境变量 FLARE_ENV 获取当前环境名称，
    /// 如果未设置则默认为 "development"
    pub fn get_environment() -> String {
        env::var("FLARE_ENV").unwrap_or_else(|_| "development".to_string())
    }

    /// 根据环境加载特定配置
    ///
    /// 加载 config/environments/{environment}.toml 文件中的配置，
    /// 并将其合并到基础配置中
    pub fn load_environment_config(base_config: &mut FlareAppConfig) -> Result<()> {
        let env = Self::get_environment();
        let env_config_path = format!("config/environments/{}.toml", env);
        Self::apply_overlay_file(base_config, Path::new(&env_config_path))
    }

    /// 将单个 TOML 覆盖文件合并到已加载的配置上
    ///
    /// 文件不存在时直接返回
    pub fn apply_overlay_file(base_config: &mut FlareAppConfig, path: &Path) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("无法读取环境配置文件: {}", path.display()))?;
        let overlay: Value = toml::from_str(&content)
            .with_context(|| format!("无效的环境配置格式: {}", path.display()))?;

        Self::merge_config_values(base_config, overlay)
            .with_context(|| format!("无法合并环境配置: {}", path.display()))
    }

    /// 合并配置值
    ///
    /// 只覆盖环境配置中出现的字段，其余保持基础配置
    fn merge_config_values(base_config: &mut FlareAppConfig, overlay: Value) -> Result<()> {
        if let Some(services) = overlay.get("services").cloned() {
            let mut merged = Value::try_from(&base_config.services)
                .context("无法序列化当前 services 配置")?;
            merge_value(&mut merged, services);
            base_config.services = merged.try_into()?;
        }

        if let Some(logging) = overlay.get("logging").cloned() {
            base_config.logging = Some(logging.try_into()?);
        }

        if let Some(Value::Table(profiles)) = overlay.get("redis") {
            for (name, value) in profiles {
                base_config
                    .redis
                    .insert(name.clone(), value.clone().try_into()?);
            }
        }

        if let Some(Value::Table(profiles)) = overlay.get("postgres") {
            for (name, value) in profiles {
                base_config
                    .postgres
                    .insert(name.clone(), value.clone().try_into()?);
            }
        }

        Ok(())
    }
}
