use std::sync::Arc;

use anyhow::{Context, Result};
use flare_sync_core::{CategorizedError, ErrorCategory};
use tracing::{debug, error, info, warn};

use crate::application::commands::{
    MarkThreadReadCommand, ReconcileTranscriptCommand, RecordUnreadCommand,
};
use crate::application::queries::{
    QuotedReplyDraftQuery, ThreadQuery, UnreadCountQuery, UnreadScope,
};
use crate::domain::model::{QuotedReplyDraft, ReconcileOutcome, SentTranscriptRecord, Thread};
use crate::domain::repository::{TranscriptStore, UnreadBadgeTracker};
use crate::domain::service::{QuoteResolver, TranscriptReconciler};
use crate::error::TranscriptResult;

/// 发送记录命令处理器
pub struct TranscriptCommandHandler {
    reconciler: Arc<TranscriptReconciler>,
    badge_tracker: Arc<dyn UnreadBadgeTracker>,
}

impl TranscriptCommandHandler {
    pub fn new(
        reconciler: Arc<TranscriptReconciler>,
        badge_tracker: Arc<dyn UnreadBadgeTracker>,
    ) -> Self {
        Self {
            reconciler,
            badge_tracker,
        }
    }

    /// 处理对账命令
    pub async fn handle_reconcile(
        &self,
        command: ReconcileTranscriptCommand,
    ) -> TranscriptResult<ReconcileOutcome> {
        debug!(
            timestamp = command.sync_message.timestamp,
            has_relay = command.relay.is_some(),
            "Handling reconcile transcript command"
        );

        let result = match SentTranscriptRecord::from_sync_message(
            command.sync_message,
            command.relay,
        ) {
            Ok(record) => self.reconciler.reconcile(&record).await,
            Err(err) => Err(err),
        };

        match &result {
            Ok(ReconcileOutcome::Committed(transcript)) => {
                debug!(message_id = %transcript.message_id(), "Reconcile command completed");
            }
            Ok(ReconcileOutcome::Duplicate(key)) => {
                info!(key = %key, "Duplicate sync transcript acknowledged");
            }
            Err(err) => match err.category() {
                ErrorCategory::InvalidInput => {
                    warn!(error = %err, "Discarding malformed sync transcript");
                }
                category => {
                    error!(
                        error = %err,
                        category = category.as_str(),
                        retryable = err.is_retryable(),
                        "Reconcile command failed"
                    );
                }
            },
        }

        result
    }

    /// 处理未读数增加命令
    pub async fn handle_record_unread(&self, command: RecordUnreadCommand) -> Result<u64> {
        debug!(
            thread_id = %command.thread_id,
            count = command.count,
            "Handling record unread command"
        );
        self.badge_tracker
            .record_unread(&command.thread_id, command.count)
            .await?;
        self.badge_tracker.recompute_badge().await
    }

    /// 处理标记已读命令
    pub async fn handle_mark_thread_read(&self, command: MarkThreadReadCommand) -> Result<u64> {
        debug!(thread_id = %command.thread_id, "Handling mark thread read command");
        self.badge_tracker
            .mark_thread_read(&command.thread_id)
            .await?;
        let badge = self.badge_tracker.recompute_badge().await?;
        info!(thread_id = %command.thread_id, badge, "Thread marked as read");
        Ok(badge)
    }
}

/// 发送记录查询处理器
pub struct TranscriptQueryHandler {
    store: Arc<dyn TranscriptStore>,
    badge_tracker: Arc<dyn UnreadBadgeTracker>,
    quote_resolver: QuoteResolver,
}

impl TranscriptQueryHandler {
    pub fn new(
        store: Arc<dyn TranscriptStore>,
        badge_tracker: Arc<dyn UnreadBadgeTracker>,
    ) -> Self {
        Self {
            store,
            badge_tracker,
            quote_resolver: QuoteResolver::new(),
        }
    }

    /// 处理未读数查询
    pub async fn handle_unread_count(&self, query: UnreadCountQuery) -> Result<u64> {
        match &query.scope {
            UnreadScope::All => self.badge_tracker.unread_count().await,
            UnreadScope::Excluding(thread_id) => {
                self.badge_tracker.unread_count_excluding(thread_id).await
            }
            UnreadScope::Only(thread_id) => self.badge_tracker.unread_count_in(thread_id).await,
        }
    }

    /// 处理引用回复草稿查询，消息不存在时返回 None
    pub async fn handle_quoted_reply_draft(
        &self,
        query: QuotedReplyDraftQuery,
    ) -> Result<Option<QuotedReplyDraft>> {
        // 只读，事务不提交
        let mut tx = self.store.begin().await?;
        let message = tx
            .find_message(&query.thread_id, &query.author_id, query.timestamp)
            .await
            .context("Failed to load message for quoted reply draft")?;

        Ok(message.map(|message| self.quote_resolver.draft_for_message(&message)))
    }

    /// 处理会话查询（不加锁，不阻塞同会话的对账）
    pub async fn handle_thread(&self, query: ThreadQuery) -> Result<Option<Thread>> {
        self.store
            .get_thread(&query.identity)
            .await
            .context("Failed to load thread")
    }
}
