//! 多端同步服务入口
//!
//! 从输入流逐行读取 JSON 格式的同步发送消息并对账

pub mod wire;

use std::time::Duration;

use anyhow::{Context, Result};
use flare_sync_core::CategorizedError;
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::application::commands::ReconcileTranscriptCommand;
use crate::domain::model::{ReconcileOutcome, SyncSentMessage};
use crate::interface::quoted_view::{QuotedViewMode, render_quoted_message};
use crate::service::wire::ApplicationContext;

const MAX_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// 一行输入：同步发送消息，可附带 relay
#[derive(Debug, Clone, Deserialize)]
pub struct ReplayLine {
    #[serde(default)]
    pub relay: Option<String>,
    #[serde(flatten)]
    pub sent: SyncSentMessage,
}

/// 回放统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub committed: u64,
    pub duplicates: u64,
    /// 无法解析或缺少寻址信息
    pub rejected: u64,
    /// 重试后仍然失败
    pub failed: u64,
}

pub struct DeviceSyncApplication {
    context: ApplicationContext,
}

impl DeviceSyncApplication {
    pub async fn new(config_path: Option<&str>) -> Result<Self> {
        let app_config = flare_sync_core::load_config(config_path);
        flare_sync_core::tracing::init_tracing_from_config(app_config.logging());

        let context = wire::initialize(app_config)
            .await
            .context("Failed to initialize device sync service")?;
        info!(
            service = %context.config.service_name,
            local_account = %context.config.local_account_id,
            "Device sync service initialized"
        );
        Ok(Self { context })
    }

    pub fn from_context(context: ApplicationContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &ApplicationContext {
        &self.context
    }

    /// 从标准输入回放
    pub async fn run(&self) -> Result<ReplaySummary> {
        let summary = self.replay(BufReader::new(tokio::io::stdin())).await?;
        info!(
            committed = summary.committed,
            duplicates = summary.duplicates,
            rejected = summary.rejected,
            failed = summary.failed,
            "Replay finished"
        );
        Ok(summary)
    }

    /// 逐行回放，单条失败不影响后续记录
    pub async fn replay<R>(&self, reader: R) -> Result<ReplaySummary>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut summary = ReplaySummary::default();
        let mut lines = reader.lines();
        let mut line_no = 0u64;

        while let Some(line) = lines.next_line().await.context("Failed to read input")? {
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }

            let parsed: ReplayLine = match serde_json::from_str(&line) {
                Ok(parsed) => parsed,
                Err(err) => {
                    warn!(line = line_no, error = %err, "Skipping unparseable input line");
                    summary.rejected += 1;
                    continue;
                }
            };

            self.reconcile_with_retry(parsed, line_no, &mut summary)
                .await;
        }

        Ok(summary)
    }

    async fn reconcile_with_retry(
        &self,
        parsed: ReplayLine,
        line_no: u64,
        summary: &mut ReplaySummary,
    ) {
        for attempt in 1..=MAX_ATTEMPTS {
            let command = ReconcileTranscriptCommand {
                sync_message: parsed.sent.clone(),
                relay: parsed.relay.clone(),
            };

            match self.context.command_handler.handle_reconcile(command).await {
                Ok(ReconcileOutcome::Committed(transcript)) => {
                    if let Some(quote) = transcript.quoted() {
                        let view = render_quoted_message(
                            quote,
                            &QuotedViewMode::ConversationBubble {
                                displayable_text: None,
                            },
                            &self.context.config.local_account_id,
                            self.context.config.quote_display_limit,
                        );
                        debug!(line = line_no, view = ?view, "Quoted message view");
                    }
                    summary.committed += 1;
                    return;
                }
                Ok(ReconcileOutcome::Duplicate(_)) => {
                    summary.duplicates += 1;
                    return;
                }
                Err(err) if err.is_retryable() && attempt < MAX_ATTEMPTS => {
                    warn!(line = line_no, attempt, error = %err, "Retrying sync transcript");
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                }
                Err(err) if err.is_retryable() => {
                    warn!(line = line_no, error = %err, "Giving up on sync transcript");
                    summary.failed += 1;
                    return;
                }
                Err(_) => {
                    summary.rejected += 1;
                    return;
                }
            }
        }
    }
}
