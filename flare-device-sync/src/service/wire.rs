//! Wire 风格的依赖注入模块
//!
//! 按依赖顺序构建存储、未读计数、领域服务和处理器

use std::sync::Arc;

use anyhow::{Context, Result};
use flare_sync_core::config::FlareAppConfig;
use tracing::info;

use crate::application::handlers::{TranscriptCommandHandler, TranscriptQueryHandler};
use crate::config::DeviceSyncConfig;
use crate::domain::repository::{TranscriptStore, UnreadBadgeTracker};
use crate::domain::service::{ReconcilerConfig, TranscriptReconciler};
use crate::infrastructure::badge::{MemoryBadgeTracker, RedisBadgeTracker};
use crate::infrastructure::persistence::{MemoryTranscriptStore, PostgresTranscriptStore};

/// 应用上下文 - 包含所有已初始化的服务
pub struct ApplicationContext {
    pub config: Arc<DeviceSyncConfig>,
    pub command_handler: Arc<TranscriptCommandHandler>,
    pub query_handler: Arc<TranscriptQueryHandler>,
}

/// 构建应用上下文
pub async fn initialize(app_config: &FlareAppConfig) -> Result<ApplicationContext> {
    // 1. 加载服务配置
    let config = Arc::new(
        DeviceSyncConfig::from_app_config(app_config)
            .context("Failed to load device sync service configuration")?,
    );

    // 2. 创建存储（未配置 PostgreSQL 时使用内存存储）
    let store: Arc<dyn TranscriptStore> = match &config.postgres_url {
        Some(url) => {
            let store = PostgresTranscriptStore::connect(
                url,
                config.postgres_max_connections,
                config.postgres_min_connections,
            )
            .await?;
            if config.bootstrap_schema {
                store.ensure_schema().await?;
            }
            info!("Using PostgreSQL transcript store");
            Arc::new(store)
        }
        None => {
            info!("PostgreSQL URL not configured, using in-memory transcript store");
            Arc::new(MemoryTranscriptStore::new())
        }
    };

    // 3. 创建未读计数服务
    let badge_tracker: Arc<dyn UnreadBadgeTracker> = match &config.redis_url {
        Some(url) => {
            info!(prefix = %config.badge_key_prefix, "Using Redis badge tracker");
            Arc::new(RedisBadgeTracker::connect(url, config.badge_key_prefix.clone()).await?)
        }
        None => {
            info!("Redis URL not configured, using in-memory badge tracker");
            Arc::new(MemoryBadgeTracker::new())
        }
    };

    Ok(build_context(config, store, badge_tracker))
}

/// 用给定的存储和未读计数服务组装上下文
pub fn build_context(
    config: Arc<DeviceSyncConfig>,
    store: Arc<dyn TranscriptStore>,
    badge_tracker: Arc<dyn UnreadBadgeTracker>,
) -> ApplicationContext {
    let reconciler = Arc::new(TranscriptReconciler::new(
        store.clone(),
        badge_tracker.clone(),
        ReconcilerConfig {
            local_account_id: config.local_account_id.clone(),
        },
    ));

    let command_handler = Arc::new(TranscriptCommandHandler::new(
        reconciler,
        badge_tracker.clone(),
    ));
    let query_handler = Arc::new(TranscriptQueryHandler::new(store, badge_tracker));

    ApplicationContext {
        config,
        command_handler,
        query_handler,
    }
}
