//! 领域模型定义

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use flare_sync_core::{current_millis, protocol_millis_to_datetime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod record;

pub use record::{
    AttachmentPointer, DataMessage, END_SESSION_FLAG, EXPIRATION_TIMER_UPDATE_FLAG, GroupContext,
    GroupContextType, GroupId, MAX_TIMESTAMP_MILLIS, QuoteProto, QuotedAttachmentProto,
    SentTranscriptRecord, SyncSentMessage,
};

/// 会话身份：群组标识或对端账号标识
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ThreadIdentity {
    Group(GroupId),
    Contact(String),
}

impl ThreadIdentity {
    /// 派生会话 ID（同一身份永远得到同一 ID）
    pub fn thread_id(&self) -> ThreadId {
        match self {
            ThreadIdentity::Group(group_id) => ThreadId(format!("group:{}", group_id.to_hex())),
            ThreadIdentity::Contact(recipient_id) => ThreadId(format!("contact:{}", recipient_id)),
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, ThreadIdentity::Group(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadIdentity::Group(_) => "group",
            ThreadIdentity::Contact(_) => "contact",
        }
    }
}

/// 会话 ID
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadId(String);

impl ThreadId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&ThreadIdentity> for ThreadId {
    fn from(identity: &ThreadIdentity) -> Self {
        identity.thread_id()
    }
}

/// 会话级阅后即焚计时器
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DisappearingTimer {
    #[default]
    Disabled,
    Enabled {
        duration_seconds: u32,
        /// 计时锚点（毫秒）
        started_at: u64,
    },
}

impl DisappearingTimer {
    /// 时长为 0 表示关闭
    pub fn from_update(duration_seconds: u32, started_at: u64) -> Self {
        if duration_seconds == 0 {
            DisappearingTimer::Disabled
        } else {
            DisappearingTimer::Enabled {
                duration_seconds,
                started_at,
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, DisappearingTimer::Enabled { .. })
    }

    pub fn duration_seconds(&self) -> u32 {
        match self {
            DisappearingTimer::Disabled => 0,
            DisappearingTimer::Enabled {
                duration_seconds, ..
            } => *duration_seconds,
        }
    }

    pub fn started_at(&self) -> Option<u64> {
        match self {
            DisappearingTimer::Disabled => None,
            DisappearingTimer::Enabled { started_at, .. } => Some(*started_at),
        }
    }
}

/// 会话（单聊或群聊）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    pub id: ThreadId,
    pub identity: ThreadIdentity,
    pub title: Option<String>,
    pub members: BTreeSet<String>,
    pub timer: DisappearingTimer,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Thread {
    /// 创建新会话
    ///
    /// 单聊的成员就是对端账号；群聊成员取自群组上下文
    pub fn new(identity: ThreadIdentity, initial_members: &[String], now: DateTime<Utc>) -> Self {
        let members = match &identity {
            ThreadIdentity::Contact(recipient_id) => BTreeSet::from([recipient_id.clone()]),
            ThreadIdentity::Group(_) => initial_members
                .iter()
                .filter(|m| !m.is_empty())
                .cloned()
                .collect(),
        };

        Self {
            id: identity.thread_id(),
            identity,
            title: None,
            members,
            timer: DisappearingTimer::Disabled,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_group(&self) -> bool {
        self.identity.is_group()
    }

    /// 应用计时器变更
    pub fn apply_timer(&mut self, timer: DisappearingTimer, now: DateTime<Utc>) -> bool {
        if self.timer == timer {
            return false;
        }
        self.timer = timer;
        self.updated_at = now;
        true
    }

    /// 应用群组元数据（名称与成员），返回是否有变化
    ///
    /// 空成员列表表示更新中不携带成员信息，保持原成员
    pub fn apply_group_metadata(
        &mut self,
        name: Option<&str>,
        members: &[String],
        now: DateTime<Utc>,
    ) -> bool {
        if !self.is_group() {
            return false;
        }

        let mut changed = false;
        if let Some(name) = name.filter(|n| !n.is_empty()) {
            if self.title.as_deref() != Some(name) {
                self.title = Some(name.to_string());
                changed = true;
            }
        }

        let incoming: BTreeSet<String> = members
            .iter()
            .filter(|m| !m.is_empty())
            .cloned()
            .collect();
        if !incoming.is_empty() && incoming != self.members {
            self.members = incoming;
            changed = true;
        }

        if changed {
            self.updated_at = now;
        }
        changed
    }
}

/// 会话历史中的一条消息
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub message_id: String,
    pub thread_id: ThreadId,
    pub author_id: String,
    pub timestamp: u64,
    pub body: String,
    pub attachments: Vec<AttachmentPointer>,
}

/// 引用中的附件（缩略图只记录指针，不下载）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotedAttachment {
    pub content_type: String,
    pub file_name: Option<String>,
    pub thumbnail: Option<AttachmentPointer>,
}

/// 引用内容来源
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuoteSource {
    /// 本地找到了原消息
    Local { message_id: String },
    /// 原消息不在本地，使用发送端提供的快照
    Snapshot,
}

/// 引用（回复指向的更早消息）
///
/// 作者与时间戳始终存在，即使原消息无法在本地定位
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotedReference {
    pub author_id: String,
    pub timestamp: u64,
    pub text: Option<String>,
    pub attachment: Option<QuotedAttachment>,
    pub source: QuoteSource,
}

impl QuotedReference {
    pub fn is_backed_by_local_message(&self) -> bool {
        matches!(self.source, QuoteSource::Local { .. })
    }
}

/// 编辑框中的引用回复草稿
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotedReplyDraft {
    pub thread_id: ThreadId,
    pub message_id: String,
    pub author_id: String,
    pub timestamp: u64,
    pub body: Option<String>,
    pub attachment: Option<QuotedAttachment>,
}

impl QuotedReplyDraft {
    /// 转换为引用，供预览渲染
    pub fn to_quoted_reference(&self) -> QuotedReference {
        QuotedReference {
            author_id: self.author_id.clone(),
            timestamp: self.timestamp,
            text: self.body.clone(),
            attachment: self.attachment.clone(),
            source: QuoteSource::Local {
                message_id: self.message_id.clone(),
            },
        }
    }
}

/// 去重键：同一会话 + 时间戳 + 接收方只对账一次
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TranscriptKey {
    pub thread_id: ThreadId,
    pub timestamp: u64,
    pub recipient_id: String,
}

impl fmt::Display for TranscriptKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}/{}", self.thread_id, self.timestamp, self.recipient_id)
    }
}

/// 控制标志（互相独立，可同时出现）
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptFlags {
    pub group_update: bool,
    pub expiration_timer_update: bool,
    pub end_session: bool,
}

impl TranscriptFlags {
    /// 是否为用户可见内容（纯控制消息不影响角标）
    pub fn is_user_visible(&self) -> bool {
        !(self.group_update || self.expiration_timer_update || self.end_session)
    }
}

/// 消息自身的阅后即焚状态
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageExpiration {
    /// 开始计时时间（毫秒），0 表示未开始
    pub started_at: u64,
    pub duration_seconds: u32,
}

impl MessageExpiration {
    /// 过期时间（毫秒）
    pub fn expires_at(&self) -> Option<u64> {
        if self.duration_seconds == 0 || self.started_at == 0 {
            return None;
        }
        self.started_at
            .checked_add(u64::from(self.duration_seconds) * 1_000)
    }

    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        self.expires_at().is_some_and(|at| now_ms >= at)
    }
}

/// 对账完成的发送记录，构造后不可变
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    message_id: String,
    thread: Thread,
    author_id: String,
    recipient_id: String,
    timestamp: u64,
    relay: Option<String>,
    group_id: Option<GroupId>,
    body: String,
    attachments: Vec<AttachmentPointer>,
    quoted: Option<QuotedReference>,
    expiration: MessageExpiration,
    flags: TranscriptFlags,
    received_at: DateTime<Utc>,
}

impl Transcript {
    /// 由发送记录、已解析会话与引用组装
    pub fn assemble(
        record: &SentTranscriptRecord,
        thread: Thread,
        quoted: Option<QuotedReference>,
        author_id: &str,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            thread,
            author_id: author_id.to_string(),
            recipient_id: record.recipient_id().to_string(),
            timestamp: record.timestamp(),
            relay: record.relay().map(str::to_string),
            group_id: record.group_id().cloned(),
            body: record.body().to_string(),
            attachments: record.attachment_pointers().to_vec(),
            quoted,
            expiration: MessageExpiration {
                started_at: record.expiration_started_at(),
                duration_seconds: record.expiration_duration(),
            },
            flags: TranscriptFlags {
                group_update: record.is_group_update(),
                expiration_timer_update: record.is_expiration_timer_update(),
                end_session: record.is_end_session_message(),
            },
            received_at,
        }
    }

    pub fn key(&self) -> TranscriptKey {
        TranscriptKey {
            thread_id: self.thread.id.clone(),
            timestamp: self.timestamp,
            recipient_id: self.recipient_id.clone(),
        }
    }

    /// 作为会话历史消息写入（之后可被引用）
    pub fn to_stored_message(&self) -> StoredMessage {
        StoredMessage {
            message_id: self.message_id.clone(),
            thread_id: self.thread.id.clone(),
            author_id: self.author_id.clone(),
            timestamp: self.timestamp,
            body: self.body.clone(),
            attachments: self.attachments.clone(),
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn thread(&self) -> &Thread {
        &self.thread
    }

    pub fn author_id(&self) -> &str {
        &self.author_id
    }

    pub fn recipient_id(&self) -> &str {
        &self.recipient_id
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// 发送时间，时间戳超出范围时为 None
    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        protocol_millis_to_datetime(self.timestamp)
    }

    /// 到达时是否已经过期（发送端计时早已开始）
    pub fn is_expired(&self) -> bool {
        let now = u64::try_from(current_millis()).unwrap_or_default();
        self.expiration.is_expired_at(now)
    }

    pub fn relay(&self) -> Option<&str> {
        self.relay.as_deref()
    }

    pub fn group_id(&self) -> Option<&GroupId> {
        self.group_id.as_ref()
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn attachments(&self) -> &[AttachmentPointer] {
        &self.attachments
    }

    pub fn quoted(&self) -> Option<&QuotedReference> {
        self.quoted.as_ref()
    }

    pub fn expiration(&self) -> MessageExpiration {
        self.expiration
    }

    pub fn flags(&self) -> TranscriptFlags {
        self.flags
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }
}

/// 对账结果
#[derive(Clone, Debug)]
pub enum ReconcileOutcome {
    /// 新记录已提交
    Committed(Box<Transcript>),
    /// 重复投递，幂等确认，未写入任何内容
    Duplicate(TranscriptKey),
}

impl ReconcileOutcome {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, ReconcileOutcome::Duplicate(_))
    }

    pub fn transcript(&self) -> Option<&Transcript> {
        match self {
            ReconcileOutcome::Committed(transcript) => Some(transcript.as_ref()),
            ReconcileOutcome::Duplicate(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_id_is_deterministic() {
        let group = ThreadIdentity::Group(GroupId::new(vec![0xAB, 0x01]));
        assert_eq!(group.thread_id().as_str(), "group:ab01");
        assert_eq!(group.thread_id(), group.clone().thread_id());

        let contact = ThreadIdentity::Contact("+15551234567".to_string());
        assert_eq!(contact.thread_id().as_str(), "contact:+15551234567");
    }

    #[test]
    fn test_group_ids_are_byte_exact() {
        // 不同字节（例如 ASCII 大小写）必须得到不同会话
        let upper = ThreadIdentity::Group(GroupId::new(b"ABC".to_vec()));
        let lower = ThreadIdentity::Group(GroupId::new(b"abc".to_vec()));
        assert_ne!(upper.thread_id(), lower.thread_id());
    }

    #[test]
    fn test_timer_zero_disables() {
        assert_eq!(
            DisappearingTimer::from_update(0, 5_000),
            DisappearingTimer::Disabled
        );
        let timer = DisappearingTimer::from_update(60, 5_000);
        assert!(timer.is_enabled());
        assert_eq!(timer.duration_seconds(), 60);
        assert_eq!(timer.started_at(), Some(5_000));
    }

    #[test]
    fn test_group_metadata_only_applies_to_groups() {
        let now = Utc::now();
        let mut contact = Thread::new(ThreadIdentity::Contact("+1".to_string()), &[], now);
        assert!(!contact.apply_group_metadata(Some("name"), &["+2".to_string()], now));
        assert_eq!(contact.members, BTreeSet::from(["+1".to_string()]));

        let mut group = Thread::new(
            ThreadIdentity::Group(GroupId::new(vec![1])),
            &["+1".to_string()],
            now,
        );
        assert!(group.apply_group_metadata(Some("Team"), &[], now));
        assert_eq!(group.title.as_deref(), Some("Team"));
        assert_eq!(group.members, BTreeSet::from(["+1".to_string()]));
        assert!(!group.apply_group_metadata(Some("Team"), &[], now));
    }

    #[test]
    fn test_message_expiration() {
        let expiration = MessageExpiration {
            started_at: 10_000,
            duration_seconds: 5,
        };
        assert_eq!(expiration.expires_at(), Some(15_000));
        assert!(expiration.is_expired_at(15_000));
        assert!(!expiration.is_expired_at(14_999));
        assert_eq!(MessageExpiration::default().expires_at(), None);
        assert!(!MessageExpiration::default().is_expired_at(u64::MAX));
    }

    #[test]
    fn test_control_flags_are_not_user_visible() {
        assert!(TranscriptFlags::default().is_user_visible());
        assert!(
            !TranscriptFlags {
                group_update: true,
                ..Default::default()
            }
            .is_user_visible()
        );
        assert!(
            !TranscriptFlags {
                expiration_timer_update: true,
                ..Default::default()
            }
            .is_user_visible()
        );
    }
}
