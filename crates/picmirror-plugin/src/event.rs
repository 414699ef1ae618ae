//! Message events exchanged with the host framework.
//!
//! The host adapter converts its own message objects into
//! [`MessageSegment`]s once; everything downstream works on these types.

use async_trait::async_trait;
use picmirror_core::ImageSource;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One component of an inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageSegment {
    Text {
        text: String,
    },
    /// An image reference: a URL, a `base64://` payload or a file token.
    Image {
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        file: Option<String>,
    },
    /// A mention of another user.
    At {
        user_id: String,
    },
    /// A quoted message and its own segments.
    Reply {
        segments: Vec<MessageSegment>,
    },
}

/// Component of an outbound reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplySegment {
    Text(String),
    Image(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingMessage {
    Plain(String),
    Chain(Vec<ReplySegment>),
}

#[async_trait]
pub trait MessageEvent: Send + Sync {
    fn segments(&self) -> &[MessageSegment];

    async fn reply(&self, message: OutgoingMessage) -> anyhow::Result<()>;

    /// Concatenated text segments of the top-level message.
    fn plain_text(&self) -> String {
        self.segments()
            .iter()
            .filter_map(|segment| match segment {
                MessageSegment::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Image references in message order, quoted messages included.
pub fn image_sources(segments: &[MessageSegment]) -> Vec<ImageSource> {
    let mut sources = Vec::new();
    collect_images(segments, &mut sources);
    sources
}

fn collect_images(segments: &[MessageSegment], out: &mut Vec<ImageSource>) {
    for segment in segments {
        match segment {
            MessageSegment::Image { url, file } => {
                let reference = url
                    .as_deref()
                    .filter(|u| !u.trim().is_empty())
                    .or(file.as_deref().filter(|f| !f.trim().is_empty()));
                if let Some(reference) = reference {
                    out.push(ImageSource::parse(reference));
                }
            }
            MessageSegment::Reply { segments } => collect_images(segments, out),
            MessageSegment::Text { .. } | MessageSegment::At { .. } => {}
        }
    }
}

/// First user mentioned in the top-level message.
pub fn mentioned_user(segments: &[MessageSegment]) -> Option<&str> {
    segments.iter().find_map(|segment| match segment {
        MessageSegment::At { user_id } if !user_id.trim().is_empty() => Some(user_id.trim()),
        _ => None,
    })
}
