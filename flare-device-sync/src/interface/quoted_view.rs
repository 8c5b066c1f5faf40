//! 引用消息视图模型
//!
//! 会话气泡与编辑框预览共用同一个渲染函数，差异由 [`QuotedViewMode`] 表达。
//! 渲染只依赖已解析的 [`QuotedReference`]，不再访问存储。

use serde::Serialize;

use crate::domain::model::{QuotedAttachment, QuotedReference};

/// 本账号作为作者时的显示名
pub const LOCAL_AUTHOR_LABEL: &str = "You";
/// 原消息既无正文也无附件时的占位文本
pub const MISSING_ORIGINAL_PLACEHOLDER: &str = "Original message not found";

/// 截断后的显示文本
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DisplayableText {
    full_text: String,
    display_text: String,
    truncated: bool,
}

impl DisplayableText {
    /// 按字符数截断（不切断多字节字符），截断时追加省略号
    pub fn new(text: &str, limit: usize) -> Self {
        let trimmed = text.trim();
        let truncated = trimmed.chars().count() > limit;
        let display_text = if truncated {
            let mut cut: String = trimmed.chars().take(limit).collect();
            cut.push('…');
            cut
        } else {
            trimmed.to_string()
        };

        Self {
            full_text: text.to_string(),
            display_text,
            truncated,
        }
    }

    pub fn full_text(&self) -> &str {
        &self.full_text
    }

    pub fn display_text(&self) -> &str {
        &self.display_text
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}

/// 渲染模式
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QuotedViewMode {
    /// 会话中的回复气泡，可携带预先计算的显示文本
    ConversationBubble {
        displayable_text: Option<DisplayableText>,
    },
    /// 编辑框上方的引用预览（可取消）
    ComposePreview,
}

/// 引用正文区域
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuotedBody {
    Text { text: String, truncated: bool },
    /// 没有正文，显示附件类型
    AttachmentLabel { label: String },
    Placeholder { text: String },
}

/// 引用视图模型
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QuotedMessageView {
    pub author_label: String,
    pub is_local_author: bool,
    pub body: QuotedBody,
    /// 缩略图附件 ID（只是指针，由其他组件下载）
    pub thumbnail_attachment_id: Option<u64>,
    pub content_type: Option<String>,
    pub show_cancel_button: bool,
    pub is_for_preview: bool,
}

/// 渲染引用视图
pub fn render_quoted_message(
    quote: &QuotedReference,
    mode: &QuotedViewMode,
    local_account_id: &str,
    display_limit: usize,
) -> QuotedMessageView {
    let is_local_author = !local_account_id.is_empty() && quote.author_id == local_account_id;
    let author_label = if is_local_author {
        LOCAL_AUTHOR_LABEL.to_string()
    } else {
        quote.author_id.clone()
    };

    let text = match mode {
        QuotedViewMode::ConversationBubble {
            displayable_text: Some(displayable),
        } => Some(displayable.clone()),
        _ => quote
            .text
            .as_deref()
            .filter(|text| !text.trim().is_empty())
            .map(|text| DisplayableText::new(text, display_limit)),
    };

    let body = match (text, quote.attachment.as_ref()) {
        (Some(text), _) => QuotedBody::Text {
            truncated: text.is_truncated(),
            text: text.display_text,
        },
        (None, Some(attachment)) => QuotedBody::AttachmentLabel {
            label: attachment_label(attachment),
        },
        (None, None) => QuotedBody::Placeholder {
            text: MISSING_ORIGINAL_PLACEHOLDER.to_string(),
        },
    };

    let is_for_preview = matches!(mode, QuotedViewMode::ComposePreview);

    QuotedMessageView {
        author_label,
        is_local_author,
        body,
        thumbnail_attachment_id: quote
            .attachment
            .as_ref()
            .and_then(|attachment| attachment.thumbnail.as_ref())
            .map(|pointer| pointer.id),
        content_type: quote
            .attachment
            .as_ref()
            .map(|attachment| attachment.content_type.clone())
            .filter(|content_type| !content_type.is_empty()),
        show_cancel_button: is_for_preview,
        is_for_preview,
    }
}

fn attachment_label(attachment: &QuotedAttachment) -> String {
    let content_type = attachment.content_type.as_str();
    let label = if content_type.starts_with("image/gif") {
        "GIF"
    } else if content_type.starts_with("image/") {
        "Photo"
    } else if content_type.starts_with("video/") {
        "Video"
    } else if content_type.starts_with("audio/") {
        "Audio"
    } else {
        return attachment
            .file_name
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "Attachment".to_string());
    };
    label.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{AttachmentPointer, QuoteSource};

    fn quote(text: Option<&str>, attachment: Option<QuotedAttachment>) -> QuotedReference {
        QuotedReference {
            author_id: "+15551234567".to_string(),
            timestamp: 500,
            text: text.map(str::to_string),
            attachment,
            source: QuoteSource::Snapshot,
        }
    }

    fn bubble() -> QuotedViewMode {
        QuotedViewMode::ConversationBubble {
            displayable_text: None,
        }
    }

    #[test]
    fn test_displayable_text_truncates_on_chars() {
        let text = DisplayableText::new("你好世界，今天天气不错", 4);
        assert_eq!(text.display_text(), "你好世界…");
        assert!(text.is_truncated());

        let short = DisplayableText::new("  hi  ", 10);
        assert_eq!(short.display_text(), "hi");
        assert_eq!(short.full_text(), "  hi  ");
        assert!(!short.is_truncated());
    }

    #[test]
    fn test_bubble_renders_text() {
        let view = render_quoted_message(&quote(Some("hello"), None), &bubble(), "+1", 120);
        assert_eq!(
            view.body,
            QuotedBody::Text {
                text: "hello".to_string(),
                truncated: false
            }
        );
        assert_eq!(view.author_label, "+15551234567");
        assert!(!view.show_cancel_button);
    }

    #[test]
    fn test_bubble_prefers_precomputed_text() {
        let mode = QuotedViewMode::ConversationBubble {
            displayable_text: Some(DisplayableText::new("precomputed body", 3)),
        };
        let view = render_quoted_message(&quote(Some("ignored"), None), &mode, "+1", 120);
        assert_eq!(
            view.body,
            QuotedBody::Text {
                text: "pre…".to_string(),
                truncated: true
            }
        );
    }

    #[test]
    fn test_preview_for_local_author() {
        let view = render_quoted_message(
            &quote(Some("mine"), None),
            &QuotedViewMode::ComposePreview,
            "+15551234567",
            120,
        );
        assert_eq!(view.author_label, LOCAL_AUTHOR_LABEL);
        assert!(view.is_local_author);
        assert!(view.show_cancel_button);
        assert!(view.is_for_preview);
    }

    #[test]
    fn test_attachment_only_quote_shows_label_and_thumbnail() {
        let attachment = QuotedAttachment {
            content_type: "image/jpeg".to_string(),
            file_name: None,
            thumbnail: Some(AttachmentPointer {
                id: 77,
                content_type: "image/jpeg".to_string(),
                ..Default::default()
            }),
        };
        let view = render_quoted_message(&quote(None, Some(attachment)), &bubble(), "+1", 120);
        assert_eq!(
            view.body,
            QuotedBody::AttachmentLabel {
                label: "Photo".to_string()
            }
        );
        assert_eq!(view.thumbnail_attachment_id, Some(77));
        assert_eq!(view.content_type.as_deref(), Some("image/jpeg"));
    }

    #[test]
    fn test_empty_quote_renders_placeholder() {
        let view = render_quoted_message(&quote(Some("   "), None), &bubble(), "+1", 120);
        assert_eq!(
            view.body,
            QuotedBody::Placeholder {
                text: MISSING_ORIGINAL_PLACEHOLDER.to_string()
            }
        );
        assert_eq!(view.thumbnail_attachment_id, None);
    }
}
