use anyhow::{Result, anyhow};
use flare_sync_core::config::FlareAppConfig;
use std::env;

const DEFAULT_BADGE_PREFIX: &str = "device_sync:badge";
const DEFAULT_QUOTE_DISPLAY_LIMIT: usize = 120;
const DEFAULT_POSTGRES_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_POSTGRES_MIN_CONNECTIONS: u32 = 1;

#[derive(Clone, Debug)]
pub struct DeviceSyncConfig {
    pub service_name: String,
    pub local_account_id: String,
    /// 为空时使用内存存储
    pub postgres_url: Option<String>,
    pub postgres_max_connections: u32,
    pub postgres_min_connections: u32,
    /// 为空时使用内存未读计数
    pub redis_url: Option<String>,
    pub badge_key_prefix: String,
    pub quote_display_limit: usize,
    pub bootstrap_schema: bool,
}

impl DeviceSyncConfig {
    /// 从应用配置加载，环境变量优先
    pub fn from_app_config(app: &FlareAppConfig) -> Result<Self> {
        Self::from_app_config_with(app, |key| env::var(key).ok())
    }

    /// 使用自定义变量来源加载（测试中替代进程环境变量）
    pub fn from_app_config_with<F>(app: &FlareAppConfig, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let service_config = app.device_sync_service();

        let local_account_id = lookup("DEVICE_SYNC_LOCAL_ACCOUNT")
            .or_else(|| service_config.local_account_id.clone())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                anyhow!(
                    "local account id is required (DEVICE_SYNC_LOCAL_ACCOUNT or services.device_sync.local_account_id)"
                )
            })?;

        let postgres_profile = service_config
            .postgres
            .as_ref()
            .and_then(|name| app.postgres_profile(name));
        let postgres_url = lookup("DEVICE_SYNC_POSTGRES_URL")
            .or_else(|| postgres_profile.map(|profile| profile.url.clone()));

        let redis_url = lookup("DEVICE_SYNC_REDIS_URL").or_else(|| {
            service_config
                .redis
                .as_ref()
                .and_then(|name| app.redis_profile(name))
                .map(|profile| profile.url.clone())
        });

        let badge_key_prefix = lookup("DEVICE_SYNC_BADGE_PREFIX")
            .or_else(|| service_config.badge_key_prefix.clone())
            .unwrap_or_else(|| DEFAULT_BADGE_PREFIX.to_string());

        let quote_display_limit = match lookup("DEVICE_SYNC_QUOTE_DISPLAY_LIMIT") {
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|e| anyhow!("invalid DEVICE_SYNC_QUOTE_DISPLAY_LIMIT '{}': {}", raw, e))?,
            None => service_config
                .quote_display_limit
                .unwrap_or(DEFAULT_QUOTE_DISPLAY_LIMIT),
        };

        Ok(Self {
            service_name: service_config
                .service_name
                .clone()
                .unwrap_or_else(|| "flare-device-sync".to_string()),
            local_account_id,
            postgres_url,
            postgres_max_connections: postgres_profile
                .and_then(|profile| profile.max_connections)
                .unwrap_or(DEFAULT_POSTGRES_MAX_CONNECTIONS),
            postgres_min_connections: postgres_profile
                .and_then(|profile| profile.min_connections)
                .unwrap_or(DEFAULT_POSTGRES_MIN_CONNECTIONS),
            redis_url,
            badge_key_prefix,
            quote_display_limit,
            bootstrap_schema: service_config.bootstrap_schema.unwrap_or(true),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flare_sync_core::config::{DeviceSyncServiceConfig, PostgresInstanceConfig};
    use std::collections::HashMap;

    fn app_with(service: DeviceSyncServiceConfig) -> FlareAppConfig {
        let mut app = FlareAppConfig::default();
        app.services.device_sync = Some(service);
        app
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults() {
        let app = app_with(DeviceSyncServiceConfig {
            local_account_id: Some("+15550000000".to_string()),
            ..Default::default()
        });

        let config = DeviceSyncConfig::from_app_config_with(&app, no_env).unwrap();
        assert_eq!(config.local_account_id, "+15550000000");
        assert_eq!(config.badge_key_prefix, DEFAULT_BADGE_PREFIX);
        assert_eq!(config.quote_display_limit, DEFAULT_QUOTE_DISPLAY_LIMIT);
        assert!(config.postgres_url.is_none());
        assert!(config.redis_url.is_none());
        assert!(config.bootstrap_schema);
    }

    #[test]
    fn test_profile_reference_and_env_override() {
        let mut app = app_with(DeviceSyncServiceConfig {
            local_account_id: Some("+15550000000".to_string()),
            postgres: Some("primary".to_string()),
            ..Default::default()
        });
        app.postgres = HashMap::from([(
            "primary".to_string(),
            PostgresInstanceConfig {
                url: "postgres://localhost/sync".to_string(),
                max_connections: Some(4),
                min_connections: None,
            },
        )]);

        let config = DeviceSyncConfig::from_app_config_with(&app, no_env).unwrap();
        assert_eq!(
            config.postgres_url.as_deref(),
            Some("postgres://localhost/sync")
        );
        assert_eq!(config.postgres_max_connections, 4);

        let overridden = DeviceSyncConfig::from_app_config_with(&app, |key| match key {
            "DEVICE_SYNC_LOCAL_ACCOUNT" => Some("+15551111111".to_string()),
            "DEVICE_SYNC_QUOTE_DISPLAY_LIMIT" => Some("40".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(overridden.local_account_id, "+15551111111");
        assert_eq!(overridden.quote_display_limit, 40);
    }

    #[test]
    fn test_missing_local_account_is_rejected() {
        let app = FlareAppConfig::default();
        assert!(DeviceSyncConfig::from_app_config_with(&app, no_env).is_err());
    }
}
