//! 同步发送记录（Sent Transcript）协议结构与解码
//!
//! 信封解密层交付的是已解码的明文结构，本模块只负责把它整理成
//! 不可变的 [`SentTranscriptRecord`]，不处理任何线上字节。

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::domain::model::ThreadIdentity;
use crate::error::{TranscriptError, TranscriptResult};

/// DataMessage.flags：结束加密会话
pub const END_SESSION_FLAG: u32 = 1;
/// DataMessage.flags：阅后即焚计时器变更
pub const EXPIRATION_TIMER_UPDATE_FLAG: u32 = 2;

/// 群组标识（不透明字节，逐字节比较，不做任何大小写归一化）
///
/// JSON 中以标准 base64 字符串表示
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct GroupId(Vec<u8>);

impl GroupId {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 小写十六进制表示，仅用于派生 key 和日志
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Debug for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupId({})", self.to_hex())
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for GroupId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for GroupId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        BASE64
            .decode(raw.as_bytes())
            .map(GroupId)
            .map_err(serde::de::Error::custom)
    }
}

/// 远端附件描述（只有元数据，下载由其他组件延迟完成）
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachmentPointer {
    pub id: u64,
    pub content_type: String,
    pub file_name: Option<String>,
    pub size: Option<u32>,
    pub caption: Option<String>,
}

/// 群组上下文类型
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupContextType {
    #[default]
    Unknown,
    Update,
    Deliver,
    Quit,
    RequestInfo,
}

/// 群组上下文
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupContext {
    pub id: GroupId,
    #[serde(rename = "type")]
    pub kind: GroupContextType,
    pub name: Option<String>,
    pub members: Vec<String>,
}

/// 引用中的附件快照
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotedAttachmentProto {
    pub content_type: String,
    pub file_name: Option<String>,
    pub thumbnail: Option<AttachmentPointer>,
}

/// 引用信息（发送端设备提供的快照）
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuoteProto {
    /// 被引用消息的发送时间戳
    pub id: u64,
    /// 被引用消息的作者
    pub author: String,
    pub text: Option<String>,
    pub attachments: Vec<QuotedAttachmentProto>,
}

/// 数据消息
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataMessage {
    pub body: Option<String>,
    pub attachments: Vec<AttachmentPointer>,
    pub group: Option<GroupContext>,
    pub flags: u32,
    /// 阅后即焚时长（秒）
    pub expire_timer: u32,
    pub timestamp: u64,
    pub quote: Option<QuoteProto>,
}

/// SyncMessage.Sent：本账号在其他设备上发送了一条消息
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSentMessage {
    pub destination: Option<String>,
    pub timestamp: u64,
    pub message: Option<DataMessage>,
    pub expiration_start_timestamp: u64,
}

/// 可接受的最大毫秒时间戳（存储层以有符号 64 位保存）
pub const MAX_TIMESTAMP_MILLIS: u64 = i64::MAX as u64;

/// 已解码的发送记录，构造后不可变
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentTranscriptRecord {
    relay: Option<String>,
    data_message: DataMessage,
    recipient_id: String,
    timestamp: u64,
    expiration_started_at: u64,
    expiration_duration: u32,
    is_group_update: bool,
    is_expiration_timer_update: bool,
    is_end_session_message: bool,
    group_id: Option<GroupId>,
    body: String,
}

impl SentTranscriptRecord {
    /// 从同步消息构造发送记录
    ///
    /// 缺少 DataMessage 的同步消息无法对账，返回 `MalformedRecord`
    pub fn from_sync_message(
        sent: SyncSentMessage,
        relay: Option<String>,
    ) -> TranscriptResult<Self> {
        let data_message = sent.message.ok_or_else(|| {
            TranscriptError::MalformedRecord("sync sent message has no data message".to_string())
        })?;

        let group_id = data_message.group.as_ref().map(|group| group.id.clone());
        let is_group_update = data_message
            .group
            .as_ref()
            .map(|group| group.kind == GroupContextType::Update)
            .unwrap_or(false);

        Ok(Self {
            relay: relay.filter(|r| !r.is_empty()),
            recipient_id: sent.destination.unwrap_or_default(),
            timestamp: sent.timestamp,
            expiration_started_at: sent.expiration_start_timestamp,
            expiration_duration: data_message.expire_timer,
            is_group_update,
            is_expiration_timer_update: data_message.flags & EXPIRATION_TIMER_UPDATE_FLAG != 0,
            is_end_session_message: data_message.flags & END_SESSION_FLAG != 0,
            group_id,
            body: data_message.body.clone().unwrap_or_default(),
            data_message,
        })
    }

    /// 校验寻址信息并得到会话身份
    ///
    /// - 有群组 ID：群组会话（忽略 recipient_id），空群组 ID 视为非法
    /// - 无群组 ID：recipient_id 不能为空
    pub fn thread_identity(&self) -> TranscriptResult<ThreadIdentity> {
        match &self.group_id {
            Some(group_id) if group_id.is_empty() => Err(TranscriptError::MalformedRecord(
                "group id is present but empty".to_string(),
            )),
            Some(group_id) => Ok(ThreadIdentity::Group(group_id.clone())),
            None if self.recipient_id.is_empty() => Err(TranscriptError::MalformedRecord(
                "record has neither group id nor recipient id".to_string(),
            )),
            None => Ok(ThreadIdentity::Contact(self.recipient_id.clone())),
        }
    }

    /// 校验时间戳范围与寻址信息
    pub fn validate(&self) -> TranscriptResult<()> {
        if self.timestamp > MAX_TIMESTAMP_MILLIS {
            return Err(TranscriptError::MalformedRecord(format!(
                "timestamp {} is out of range",
                self.timestamp
            )));
        }
        self.thread_identity().map(|_| ())
    }

    pub fn relay(&self) -> Option<&str> {
        self.relay.as_deref()
    }

    pub fn data_message(&self) -> &DataMessage {
        &self.data_message
    }

    pub fn recipient_id(&self) -> &str {
        &self.recipient_id
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn expiration_started_at(&self) -> u64 {
        self.expiration_started_at
    }

    pub fn expiration_duration(&self) -> u32 {
        self.expiration_duration
    }

    pub fn is_group_update(&self) -> bool {
        self.is_group_update
    }

    pub fn is_expiration_timer_update(&self) -> bool {
        self.is_expiration_timer_update
    }

    pub fn is_end_session_message(&self) -> bool {
        self.is_end_session_message
    }

    pub fn group_id(&self) -> Option<&GroupId> {
        self.group_id.as_ref()
    }

    pub fn group_context(&self) -> Option<&GroupContext> {
        self.data_message.group.as_ref()
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn attachment_pointers(&self) -> &[AttachmentPointer] {
        &self.data_message.attachments
    }

    pub fn quote(&self) -> Option<&QuoteProto> {
        self.data_message.quote.as_ref()
    }
}
