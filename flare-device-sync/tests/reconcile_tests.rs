use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;
use flare_device_sync::TranscriptError;
use flare_device_sync::application::commands::{
    MarkThreadReadCommand, ReconcileTranscriptCommand, RecordUnreadCommand,
};
use flare_device_sync::application::queries::{
    QuotedReplyDraftQuery, ThreadQuery, UnreadCountQuery, UnreadScope,
};
use flare_device_sync::config::DeviceSyncConfig;
use flare_device_sync::domain::model::{
    DataMessage, DisappearingTimer, END_SESSION_FLAG, EXPIRATION_TIMER_UPDATE_FLAG, GroupContext,
    GroupContextType, GroupId, MAX_TIMESTAMP_MILLIS, QuoteProto, QuoteSource,
    SentTranscriptRecord, SyncSentMessage, ThreadId, ThreadIdentity,
};
use flare_device_sync::domain::repository::{TranscriptStore, UnreadBadgeTracker};
use flare_device_sync::domain::service::{ReconcilerConfig, TranscriptReconciler};
use flare_device_sync::infrastructure::badge::MemoryBadgeTracker;
use flare_device_sync::infrastructure::persistence::{MemoryTranscriptStore, StoreFailure};
use flare_device_sync::service::DeviceSyncApplication;
use flare_device_sync::service::wire::build_context;
use flare_sync_core::CategorizedError;

const LOCAL_ACCOUNT: &str = "+15550000000";
const RECIPIENT: &str = "+15551234567";

struct Harness {
    store: MemoryTranscriptStore,
    badge: MemoryBadgeTracker,
    reconciler: TranscriptReconciler,
}

fn harness() -> Harness {
    let store = MemoryTranscriptStore::new();
    let badge = MemoryBadgeTracker::new();
    let reconciler = TranscriptReconciler::new(
        Arc::new(store.clone()),
        Arc::new(badge.clone()),
        ReconcilerConfig {
            local_account_id: LOCAL_ACCOUNT.to_string(),
        },
    );
    Harness {
        store,
        badge,
        reconciler,
    }
}

fn sync_message(
    destination: Option<&str>,
    timestamp: u64,
    message: DataMessage,
) -> SyncSentMessage {
    SyncSentMessage {
        destination: destination.map(str::to_string),
        timestamp,
        message: Some(message),
        expiration_start_timestamp: 0,
    }
}

fn record(destination: Option<&str>, timestamp: u64, message: DataMessage) -> SentTranscriptRecord {
    SentTranscriptRecord::from_sync_message(sync_message(destination, timestamp, message), None)
        .unwrap()
}

fn text(body: &str) -> DataMessage {
    DataMessage {
        body: Some(body.to_string()),
        ..Default::default()
    }
}

fn contact_id(recipient: &str) -> ThreadId {
    ThreadIdentity::Contact(recipient.to_string()).thread_id()
}

#[tokio::test]
async fn test_direct_message_creates_contact_thread() {
    let h = harness();

    let outcome = h
        .reconciler
        .reconcile(&record(Some(RECIPIENT), 1000, text("hi")))
        .await
        .unwrap();

    let transcript = outcome.transcript().unwrap();
    assert_eq!(
        transcript.thread().identity,
        ThreadIdentity::Contact(RECIPIENT.to_string())
    );
    assert_eq!(transcript.body(), "hi");
    assert_eq!(transcript.author_id(), LOCAL_ACCOUNT);
    assert!(transcript.quoted().is_none());

    let stored = h.store.transcripts_in(&contact_id(RECIPIENT)).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].body(), "hi");
    assert_eq!(h.store.thread_count().unwrap(), 1);
}

#[tokio::test]
async fn test_group_id_selects_group_thread() {
    let h = harness();
    let group_id = GroupId::new(b"ABC".to_vec());
    let message = DataMessage {
        body: Some("hello group".to_string()),
        group: Some(GroupContext {
            id: group_id.clone(),
            kind: GroupContextType::Deliver,
            ..Default::default()
        }),
        ..Default::default()
    };

    let outcome = h
        .reconciler
        .reconcile(&record(Some(RECIPIENT), 2000, message))
        .await
        .unwrap();
    assert_eq!(
        outcome.transcript().unwrap().thread().identity,
        ThreadIdentity::Group(group_id.clone())
    );

    // 仅大小写不同的群组 ID 是另一个会话
    let other = DataMessage {
        group: Some(GroupContext {
            id: GroupId::new(b"abc".to_vec()),
            kind: GroupContextType::Deliver,
            ..Default::default()
        }),
        ..Default::default()
    };
    h.reconciler
        .reconcile(&record(None, 2001, other))
        .await
        .unwrap();

    assert_eq!(h.store.thread_count().unwrap(), 2);
    assert!(
        h.store
            .thread(&ThreadIdentity::Contact(RECIPIENT.to_string()).thread_id())
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_duplicate_delivery_is_noop() {
    let h = harness();
    let record = record(Some(RECIPIENT), 1000, text("hi"));

    let first = h.reconciler.reconcile(&record).await.unwrap();
    let second = h.reconciler.reconcile(&record).await.unwrap();

    assert!(!first.is_duplicate());
    assert!(second.is_duplicate());
    assert_eq!(h.store.transcript_count().unwrap(), 1);
    assert_eq!(h.store.message_count().unwrap(), 1);
    assert_eq!(h.badge.recompute_calls(), 1);
}

#[tokio::test]
async fn test_quote_falls_back_to_snapshot() {
    let h = harness();
    let message = DataMessage {
        body: Some("reply".to_string()),
        quote: Some(QuoteProto {
            id: 123,
            author: RECIPIENT.to_string(),
            text: Some("snapshot text".to_string()),
            attachments: Vec::new(),
        }),
        ..Default::default()
    };

    let outcome = h
        .reconciler
        .reconcile(&record(Some(RECIPIENT), 1000, message))
        .await
        .unwrap();

    let quoted = outcome.transcript().unwrap().quoted().unwrap();
    assert_eq!(quoted.text.as_deref(), Some("snapshot text"));
    assert_eq!(quoted.author_id, RECIPIENT);
    assert_eq!(quoted.timestamp, 123);
    assert_eq!(quoted.source, QuoteSource::Snapshot);
}

#[tokio::test]
async fn test_quote_resolves_to_stored_body() {
    let h = harness();
    h.reconciler
        .reconcile(&record(Some(RECIPIENT), 1000, text("original body")))
        .await
        .unwrap();

    let reply = DataMessage {
        body: Some("reply".to_string()),
        quote: Some(QuoteProto {
            id: 1000,
            author: LOCAL_ACCOUNT.to_string(),
            text: Some("edited snapshot".to_string()),
            attachments: Vec::new(),
        }),
        ..Default::default()
    };
    let outcome = h
        .reconciler
        .reconcile(&record(Some(RECIPIENT), 2000, reply))
        .await
        .unwrap();

    let quoted = outcome.transcript().unwrap().quoted().unwrap();
    assert_eq!(quoted.text.as_deref(), Some("original body"));
    assert!(quoted.is_backed_by_local_message());
}

#[tokio::test]
async fn test_timer_update_sets_and_disables_timer() {
    let h = harness();
    let mut enable = sync_message(
        Some(RECIPIENT),
        1000,
        DataMessage {
            flags: EXPIRATION_TIMER_UPDATE_FLAG,
            expire_timer: 30,
            ..Default::default()
        },
    );
    enable.expiration_start_timestamp = 900;
    let enable = SentTranscriptRecord::from_sync_message(enable, None).unwrap();

    let outcome = h.reconciler.reconcile(&enable).await.unwrap();
    assert_eq!(
        outcome.transcript().unwrap().thread().timer,
        DisappearingTimer::Enabled {
            duration_seconds: 30,
            started_at: 900
        }
    );

    let disable = record(
        Some(RECIPIENT),
        2000,
        DataMessage {
            flags: EXPIRATION_TIMER_UPDATE_FLAG,
            expire_timer: 0,
            ..Default::default()
        },
    );
    h.reconciler.reconcile(&disable).await.unwrap();

    let thread = h.store.thread(&contact_id(RECIPIENT)).unwrap().unwrap();
    assert_eq!(thread.timer, DisappearingTimer::Disabled);
    // 控制消息不触发角标重算
    assert_eq!(h.badge.recompute_calls(), 0);
}

#[tokio::test]
async fn test_timer_unchanged_without_flag() {
    let h = harness();
    let message = DataMessage {
        body: Some("hi".to_string()),
        expire_timer: 60,
        ..Default::default()
    };
    let outcome = h
        .reconciler
        .reconcile(&record(Some(RECIPIENT), 1000, message))
        .await
        .unwrap();

    let transcript = outcome.transcript().unwrap();
    assert_eq!(transcript.thread().timer, DisappearingTimer::Disabled);
    assert_eq!(transcript.expiration().duration_seconds, 60);
}

#[tokio::test]
async fn test_end_session_is_recorded_only() {
    let h = harness();
    let message = DataMessage {
        flags: END_SESSION_FLAG,
        ..Default::default()
    };
    let outcome = h
        .reconciler
        .reconcile(&record(Some(RECIPIENT), 1000, message))
        .await
        .unwrap();

    let transcript = outcome.transcript().unwrap();
    assert!(transcript.flags().end_session);
    assert_eq!(transcript.thread().timer, DisappearingTimer::Disabled);
    assert_eq!(h.badge.recompute_calls(), 0);
}

#[tokio::test]
async fn test_group_update_applies_metadata() {
    let h = harness();
    let group_id = GroupId::new(vec![1, 2, 3]);
    let create = DataMessage {
        group: Some(GroupContext {
            id: group_id.clone(),
            kind: GroupContextType::Deliver,
            members: vec!["+1".to_string()],
            ..Default::default()
        }),
        body: Some("first".to_string()),
        ..Default::default()
    };
    h.reconciler
        .reconcile(&record(None, 1000, create))
        .await
        .unwrap();

    let update = DataMessage {
        group: Some(GroupContext {
            id: group_id.clone(),
            kind: GroupContextType::Update,
            name: Some("Book club".to_string()),
            members: vec!["+1".to_string(), "+2".to_string()],
        }),
        ..Default::default()
    };
    let outcome = h
        .reconciler
        .reconcile(&record(None, 2000, update))
        .await
        .unwrap();
    assert!(outcome.transcript().unwrap().flags().group_update);

    let thread = h
        .store
        .thread(&ThreadIdentity::Group(group_id).thread_id())
        .unwrap()
        .unwrap();
    assert_eq!(thread.title.as_deref(), Some("Book club"));
    assert_eq!(
        thread.members,
        BTreeSet::from(["+1".to_string(), "+2".to_string()])
    );
    assert_eq!(h.badge.recompute_calls(), 1);
}

#[tokio::test]
async fn test_malformed_record_has_no_side_effects() {
    let h = harness();

    let result = h
        .reconciler
        .reconcile(&record(None, 1000, text("hi")))
        .await;

    assert!(matches!(result, Err(TranscriptError::MalformedRecord(_))));
    assert_eq!(h.store.thread_count().unwrap(), 0);
    assert_eq!(h.store.transcript_count().unwrap(), 0);
    assert_eq!(h.badge.recompute_calls(), 0);
}

#[tokio::test]
async fn test_max_timer_duration_is_stored() {
    let h = harness();
    let mut update = sync_message(
        Some(RECIPIENT),
        1000,
        DataMessage {
            flags: EXPIRATION_TIMER_UPDATE_FLAG,
            expire_timer: u32::MAX,
            ..Default::default()
        },
    );
    update.expiration_start_timestamp = 900;
    let update = SentTranscriptRecord::from_sync_message(update, None).unwrap();

    let outcome = h.reconciler.reconcile(&update).await.unwrap();
    assert!(!outcome.is_duplicate());

    let thread = h.store.thread(&contact_id(RECIPIENT)).unwrap().unwrap();
    assert_eq!(
        thread.timer,
        DisappearingTimer::Enabled {
            duration_seconds: u32::MAX,
            started_at: 900
        }
    );
}

#[tokio::test]
async fn test_out_of_range_timestamp_is_rejected_without_retry() {
    let h = harness();
    let record = record(Some(RECIPIENT), MAX_TIMESTAMP_MILLIS + 1, text("far future"));

    let err = h.reconciler.reconcile(&record).await.unwrap_err();

    assert!(matches!(err, TranscriptError::MalformedRecord(_)));
    assert!(!err.is_retryable());
    assert_eq!(h.store.thread_count().unwrap(), 0);
    assert_eq!(h.store.transcript_count().unwrap(), 0);
}

#[tokio::test]
async fn test_insert_of_committed_transcript_reports_existing_row() {
    let h = harness();
    let outcome = h
        .reconciler
        .reconcile(&record(Some(RECIPIENT), 1000, text("hi")))
        .await
        .unwrap();
    let transcript = outcome.transcript().unwrap();

    // 另一个进程已提交同一条记录
    let mut tx = h.store.begin().await.unwrap();
    assert!(!tx.insert_transcript(transcript).await.unwrap());
    tx.commit().await.unwrap();

    assert_eq!(h.store.transcript_count().unwrap(), 1);
}

#[tokio::test]
async fn test_persistence_failure_leaves_no_partial_state() {
    let h = harness();
    let record = record(Some(RECIPIENT), 1000, text("hi"));

    for failure in [StoreFailure::Begin, StoreFailure::Write, StoreFailure::Commit] {
        h.store.set_failure(failure).unwrap();
        let result = h.reconciler.reconcile(&record).await;

        assert!(matches!(result, Err(TranscriptError::Persistence(_))));
        assert!(result.unwrap_err().is_retryable());
        assert_eq!(h.store.thread_count().unwrap(), 0);
        assert_eq!(h.store.message_count().unwrap(), 0);
        assert_eq!(h.store.transcript_count().unwrap(), 0);
    }

    // 恢复后整体重试成功
    h.store.set_failure(StoreFailure::None).unwrap();
    let outcome = h.reconciler.reconcile(&record).await.unwrap();
    assert!(!outcome.is_duplicate());
    assert_eq!(h.store.transcript_count().unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_records_for_same_thread() {
    let h = Arc::new(harness());

    let mut tasks = Vec::new();
    for i in 0..20u64 {
        let h = h.clone();
        tasks.push(tokio::spawn(async move {
            // 每条记录投递两次
            let record = record(Some(RECIPIENT), 1000 + i, text(&format!("message {i}")));
            let first = h.reconciler.reconcile(&record).await.unwrap();
            let second = h.reconciler.reconcile(&record).await.unwrap();
            (first.is_duplicate(), second.is_duplicate())
        }));
    }

    for task in tasks {
        assert_eq!(task.await.unwrap(), (false, true));
    }

    assert_eq!(h.store.thread_count().unwrap(), 1);
    assert_eq!(
        h.store.transcripts_in(&contact_id(RECIPIENT)).unwrap().len(),
        20
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_records_across_threads() {
    let h = Arc::new(harness());

    let mut tasks = Vec::new();
    for i in 0..10u64 {
        let h = h.clone();
        tasks.push(tokio::spawn(async move {
            let recipient = format!("+1555000{i:04}");
            h.reconciler
                .reconcile(&record(Some(&recipient), 1000, text("hi")))
                .await
        }));
    }

    for task in tasks {
        assert!(task.await.unwrap().is_ok());
    }
    assert_eq!(h.store.thread_count().unwrap(), 10);
    assert_eq!(h.store.transcript_count().unwrap(), 10);
}

struct FailingBadgeTracker;

#[async_trait]
impl UnreadBadgeTracker for FailingBadgeTracker {
    async fn unread_count(&self) -> Result<u64> {
        bail!("badge store unavailable")
    }

    async fn unread_count_excluding(&self, _thread_id: &ThreadId) -> Result<u64> {
        bail!("badge store unavailable")
    }

    async fn unread_count_in(&self, _thread_id: &ThreadId) -> Result<u64> {
        bail!("badge store unavailable")
    }

    async fn record_unread(&self, _thread_id: &ThreadId, _count: u64) -> Result<()> {
        bail!("badge store unavailable")
    }

    async fn mark_thread_read(&self, _thread_id: &ThreadId) -> Result<()> {
        bail!("badge store unavailable")
    }

    async fn recompute_badge(&self) -> Result<u64> {
        bail!("badge store unavailable")
    }
}

#[tokio::test]
async fn test_badge_failure_does_not_undo_commit() {
    let store = MemoryTranscriptStore::new();
    let reconciler = TranscriptReconciler::new(
        Arc::new(store.clone()),
        Arc::new(FailingBadgeTracker),
        ReconcilerConfig {
            local_account_id: LOCAL_ACCOUNT.to_string(),
        },
    );

    let outcome = reconciler
        .reconcile(&record(Some(RECIPIENT), 1000, text("hi")))
        .await
        .unwrap();

    assert!(!outcome.is_duplicate());
    assert_eq!(store.transcript_count().unwrap(), 1);
}

fn app_context(
    store: &MemoryTranscriptStore,
    badge: &MemoryBadgeTracker,
) -> flare_device_sync::service::wire::ApplicationContext {
    let config = DeviceSyncConfig {
        service_name: "flare-device-sync".to_string(),
        local_account_id: LOCAL_ACCOUNT.to_string(),
        postgres_url: None,
        postgres_max_connections: 1,
        postgres_min_connections: 1,
        redis_url: None,
        badge_key_prefix: "test:badge".to_string(),
        quote_display_limit: 120,
        bootstrap_schema: false,
    };
    build_context(
        Arc::new(config),
        Arc::new(store.clone()),
        Arc::new(badge.clone()),
    )
}

#[tokio::test]
async fn test_transcripts_never_increment_unread() {
    let store = MemoryTranscriptStore::new();
    let badge = MemoryBadgeTracker::new();
    let context = app_context(&store, &badge);

    context
        .command_handler
        .handle_record_unread(RecordUnreadCommand {
            thread_id: contact_id("+15559999999"),
            count: 3,
        })
        .await
        .unwrap();

    context
        .command_handler
        .handle_reconcile(ReconcileTranscriptCommand {
            sync_message: sync_message(Some(RECIPIENT), 1000, text("hi")),
            relay: None,
        })
        .await
        .unwrap();

    let all = context
        .query_handler
        .handle_unread_count(UnreadCountQuery {
            scope: UnreadScope::All,
        })
        .await
        .unwrap();
    let in_thread = context
        .query_handler
        .handle_unread_count(UnreadCountQuery {
            scope: UnreadScope::Only(contact_id(RECIPIENT)),
        })
        .await
        .unwrap();
    let excluding = context
        .query_handler
        .handle_unread_count(UnreadCountQuery {
            scope: UnreadScope::Excluding(contact_id("+15559999999")),
        })
        .await
        .unwrap();

    assert_eq!(all, 3);
    assert_eq!(in_thread, 0);
    assert_eq!(excluding, 0);
    assert_eq!(badge.badge(), 3);

    let badge_after_read = context
        .command_handler
        .handle_mark_thread_read(MarkThreadReadCommand {
            thread_id: contact_id("+15559999999"),
        })
        .await
        .unwrap();
    assert_eq!(badge_after_read, 0);
}

#[tokio::test]
async fn test_queries_for_thread_and_quoted_reply_draft() {
    let store = MemoryTranscriptStore::new();
    let badge = MemoryBadgeTracker::new();
    let context = app_context(&store, &badge);

    context
        .command_handler
        .handle_reconcile(ReconcileTranscriptCommand {
            sync_message: sync_message(Some(RECIPIENT), 1000, text("draft me")),
            relay: Some("relay.example".to_string()),
        })
        .await
        .unwrap();

    let thread = context
        .query_handler
        .handle_thread(ThreadQuery {
            identity: ThreadIdentity::Contact(RECIPIENT.to_string()),
        })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(thread.id, contact_id(RECIPIENT));

    let draft = context
        .query_handler
        .handle_quoted_reply_draft(QuotedReplyDraftQuery {
            thread_id: thread.id.clone(),
            author_id: LOCAL_ACCOUNT.to_string(),
            timestamp: 1000,
        })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(draft.body.as_deref(), Some("draft me"));

    let missing = context
        .query_handler
        .handle_quoted_reply_draft(QuotedReplyDraftQuery {
            thread_id: thread.id,
            author_id: LOCAL_ACCOUNT.to_string(),
            timestamp: 9999,
        })
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn test_replay_counts_outcomes() {
    let store = MemoryTranscriptStore::new();
    let badge = MemoryBadgeTracker::new();
    let app = DeviceSyncApplication::from_context(app_context(&store, &badge));

    let input = [
        r#"{"destination":"+15551234567","timestamp":1000,"message":{"body":"hi"}}"#,
        r#"{"destination":"+15551234567","timestamp":1000,"message":{"body":"hi"}}"#,
        r#"{"timestamp":1001,"message":{"body":"nowhere"}}"#,
        "not json",
        "",
        r#"{"destination":"+15551234567","timestamp":9223372036854775808,"message":{"body":"x"}}"#,
        r#"{"relay":"relay.example","timestamp":1002,"message":{"group":{"id":"AQID","type":"deliver"},"body":"group hi"}}"#,
    ]
    .join("\n");

    let summary = app.replay(input.as_bytes()).await.unwrap();

    assert_eq!(summary.committed, 2);
    assert_eq!(summary.duplicates, 1);
    assert_eq!(summary.rejected, 3);
    assert_eq!(summary.failed, 0);
    assert_eq!(store.thread_count().unwrap(), 2);

    let group_thread = ThreadIdentity::Group(GroupId::new(vec![1, 2, 3])).thread_id();
    let transcripts = store.transcripts_in(&group_thread).unwrap();
    assert_eq!(transcripts[0].relay(), Some("relay.example"));
}
