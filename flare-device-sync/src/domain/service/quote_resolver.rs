//! 引用解析 - 在会话历史中查找原消息，找不到时使用发送端快照

use flare_sync_core::try_infra;
use tracing::{debug, warn};

use crate::domain::model::{
    QuoteProto, QuoteSource, QuotedAttachment, QuotedReference, QuotedReplyDraft, StoredMessage,
    Thread,
};
use crate::domain::repository::StoreTransaction;
use crate::error::{TranscriptError, TranscriptResult};

/// 引用解析器（无状态，事务由调用方传入）
#[derive(Clone, Debug, Default)]
pub struct QuoteResolver;

impl QuoteResolver {
    pub fn new() -> Self {
        Self
    }

    /// 解析引用
    ///
    /// - 没有引用信息：返回 None
    /// - 本地找到原消息：使用本地正文和附件，忽略快照
    /// - 本地找不到：使用快照，不报错
    ///
    /// 只有存储读取失败才返回错误，由对账器决定如何处理
    pub async fn resolve(
        &self,
        tx: &mut dyn StoreTransaction,
        quote: Option<&QuoteProto>,
        thread: &Thread,
    ) -> TranscriptResult<Option<QuotedReference>> {
        let Some(quote) = quote else {
            return Ok(None);
        };

        if quote.id == 0 || quote.author.is_empty() {
            warn!(
                thread_id = %thread.id,
                quote_timestamp = quote.id,
                "Ignoring quote without author or timestamp"
            );
            return Ok(None);
        }

        let original = try_infra!(
            tx.find_message(&thread.id, &quote.author, quote.id).await,
            TranscriptError::Persistence,
            "failed to look up quoted message"
        );

        let reference = match original {
            Some(message) => {
                debug!(
                    thread_id = %thread.id,
                    message_id = %message.message_id,
                    "Quoted message found locally"
                );
                QuotedReference {
                    author_id: message.author_id.clone(),
                    timestamp: message.timestamp,
                    text: non_empty(&message.body),
                    attachment: attachment_from_message(&message),
                    source: QuoteSource::Local {
                        message_id: message.message_id,
                    },
                }
            }
            None => {
                debug!(
                    thread_id = %thread.id,
                    quote_timestamp = quote.id,
                    "Quoted message not found locally, using snapshot"
                );
                QuotedReference {
                    author_id: quote.author.clone(),
                    timestamp: quote.id,
                    text: quote.text.clone(),
                    attachment: quote.attachments.first().map(|attachment| QuotedAttachment {
                        content_type: attachment.content_type.clone(),
                        file_name: attachment.file_name.clone(),
                        thumbnail: attachment.thumbnail.clone(),
                    }),
                    source: QuoteSource::Snapshot,
                }
            }
        };

        Ok(Some(reference))
    }

    /// 为指定消息构建引用回复草稿
    pub fn draft_for_message(&self, message: &StoredMessage) -> QuotedReplyDraft {
        QuotedReplyDraft {
            thread_id: message.thread_id.clone(),
            message_id: message.message_id.clone(),
            author_id: message.author_id.clone(),
            timestamp: message.timestamp,
            body: non_empty(&message.body),
            attachment: attachment_from_message(message),
        }
    }
}

fn non_empty(text: &str) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// 取第一个附件作为缩略图指针
fn attachment_from_message(message: &StoredMessage) -> Option<QuotedAttachment> {
    message.attachments.first().map(|pointer| QuotedAttachment {
        content_type: pointer.content_type.clone(),
        file_name: pointer.file_name.clone(),
        thumbnail: Some(pointer.clone()),
    })
}
