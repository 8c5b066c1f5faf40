//! 发送记录对账领域服务
//!
//! 每条同步通知在一个读写事务内完成：会话解析、去重、引用解析、控制标志处理、
//! 写入并提交。提交之前的任何失败都不会留下状态。

use std::sync::Arc;

use chrono::Utc;
use flare_sync_core::try_infra;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::model::{
    DisappearingTimer, ReconcileOutcome, SentTranscriptRecord, ThreadIdentity, Transcript,
    TranscriptKey,
};
use crate::domain::repository::{StoreTransaction, TranscriptStore, UnreadBadgeTracker};
use crate::domain::service::quote_resolver::QuoteResolver;
use crate::domain::service::thread_lock::ThreadLockRegistry;
use crate::domain::service::thread_resolver::ThreadResolver;
use crate::error::{TranscriptError, TranscriptResult};

/// 对账器配置
#[derive(Clone, Debug)]
pub struct ReconcilerConfig {
    /// 本账号标识，作为发送记录在会话历史中的作者
    pub local_account_id: String,
}

/// 发送记录对账器
pub struct TranscriptReconciler {
    store: Arc<dyn TranscriptStore>,
    badge_tracker: Arc<dyn UnreadBadgeTracker>,
    thread_resolver: ThreadResolver,
    quote_resolver: QuoteResolver,
    thread_locks: ThreadLockRegistry,
    config: ReconcilerConfig,
}

impl TranscriptReconciler {
    pub fn new(
        store: Arc<dyn TranscriptStore>,
        badge_tracker: Arc<dyn UnreadBadgeTracker>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            badge_tracker,
            thread_resolver: ThreadResolver::new(),
            quote_resolver: QuoteResolver::new(),
            thread_locks: ThreadLockRegistry::new(),
            config,
        }
    }

    /// 对账一条发送记录
    ///
    /// - 寻址信息缺失：`MalformedRecord`，无任何副作用
    /// - 重复投递（包括与其他实例并发提交）：`ReconcileOutcome::Duplicate`
    /// - 存储失败：`Persistence`，未提交任何状态，可整体重试
    #[instrument(
        skip(self, record),
        fields(timestamp = record.timestamp(), recipient_id = %record.recipient_id())
    )]
    pub async fn reconcile(
        &self,
        record: &SentTranscriptRecord,
    ) -> TranscriptResult<ReconcileOutcome> {
        let identity = record
            .validate()
            .and_then(|_| record.thread_identity())
            .inspect_err(|err| {
                warn!(error = %err, "Rejecting malformed sync transcript");
            })?;
        let thread_id = identity.thread_id();

        // 同一会话串行，覆盖整个事务
        let _thread_guard = self.thread_locks.acquire(&thread_id).await;

        let mut tx = try_infra!(
            self.store.begin().await,
            TranscriptError::Persistence,
            "failed to begin transaction"
        );

        let outcome = match self.reconcile_in(tx.as_mut(), record, &identity).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(
                    thread_id = %thread_id,
                    error = %err,
                    "Sync transcript reconciliation failed"
                );
                return Err(err);
            }
        };

        if let ReconcileOutcome::Committed(transcript) = &outcome {
            info!(
                thread_id = %transcript.thread().id,
                message_id = %transcript.message_id(),
                sent_at = ?transcript.sent_at(),
                quoted = transcript.quoted().is_some(),
                expired = transcript.is_expired(),
                end_session = transcript.flags().end_session,
                "Sync transcript committed"
            );

            if transcript.flags().is_user_visible() {
                // 已提交，角标失败不影响对账结果
                if let Err(err) = self.badge_tracker.recompute_badge().await {
                    warn!(error = ?err, "Failed to recompute badge after sync transcript");
                }
            }
        }

        Ok(outcome)
    }

    async fn reconcile_in(
        &self,
        tx: &mut dyn StoreTransaction,
        record: &SentTranscriptRecord,
        identity: &ThreadIdentity,
    ) -> TranscriptResult<ReconcileOutcome> {
        let initial_members = record
            .group_context()
            .map(|group| group.members.as_slice())
            .unwrap_or_default();
        let resolved = self
            .thread_resolver
            .resolve_identity(tx, identity, initial_members)
            .await?;
        let mut thread = resolved.thread;

        let key = TranscriptKey {
            thread_id: thread.id.clone(),
            timestamp: record.timestamp(),
            recipient_id: record.recipient_id().to_string(),
        };
        let exists = try_infra!(
            tx.transcript_exists(&key).await,
            TranscriptError::Persistence,
            "failed to check transcript duplicate"
        );
        if exists {
            // 事务未提交即丢弃，等同回滚
            debug!(key = %key, "Duplicate sync transcript, acknowledging without changes");
            return Ok(ReconcileOutcome::Duplicate(key));
        }

        let quoted = self
            .quote_resolver
            .resolve(tx, record.quote(), &thread)
            .await?;

        let now = Utc::now();
        let mut thread_changed = false;

        if record.is_expiration_timer_update() {
            let timer = DisappearingTimer::from_update(
                record.expiration_duration(),
                record.expiration_started_at(),
            );
            debug!(
                thread_id = %thread.id,
                duration_seconds = timer.duration_seconds(),
                "Applying disappearing message timer"
            );
            thread_changed |= thread.apply_timer(timer, now);
        }

        if record.is_group_update() {
            if let Some(group) = record.group_context() {
                thread_changed |=
                    thread.apply_group_metadata(group.name.as_deref(), &group.members, now);
            }
        }

        if thread_changed {
            try_infra!(
                tx.update_thread(&thread).await,
                TranscriptError::Persistence,
                "failed to update thread"
            );
        }

        let transcript = Transcript::assemble(
            record,
            thread,
            quoted,
            &self.config.local_account_id,
            now,
        );

        try_infra!(
            tx.insert_message(&transcript.to_stored_message()).await,
            TranscriptError::Persistence,
            "failed to write transcript message"
        );
        let inserted = try_infra!(
            tx.insert_transcript(&transcript).await,
            TranscriptError::Persistence,
            "failed to write transcript"
        );
        if !inserted {
            // 其他实例抢先提交了同一条记录，本事务丢弃
            debug!(key = %key, "Sync transcript committed concurrently, acknowledging");
            return Ok(ReconcileOutcome::Duplicate(key));
        }
        try_infra!(
            tx.commit().await,
            TranscriptError::Persistence,
            "failed to commit transcript"
        );

        Ok(ReconcileOutcome::Committed(Box::new(transcript)))
    }
}
