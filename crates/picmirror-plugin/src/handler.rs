//! Mirror request handler
//!
//! Picks the image to work on (a mentioned user's avatar first, then every
//! attached or quoted image in order), runs the pipeline and turns the result
//! into replies. Only `client_message()` text ever reaches the chat.

use crate::command::{help_text, Command};
use crate::event::{image_sources, mentioned_user, MessageEvent, OutgoingMessage, ReplySegment};
use picmirror_core::{AppError, ErrorMetadata, MirrorMode};
use picmirror_infra::log_error;
use picmirror_services::MirrorPipeline;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// What a handled command ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    Help,
    Mirrored(PathBuf),
    NoImage,
    Failed,
}

pub struct MirrorHandler {
    pipeline: Arc<MirrorPipeline>,
}

impl MirrorHandler {
    pub fn new(pipeline: Arc<MirrorPipeline>) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &MirrorPipeline {
        &self.pipeline
    }

    pub async fn handle(&self, command: Command, event: &dyn MessageEvent) -> HandleOutcome {
        match command {
            Command::Help => {
                send(event, OutgoingMessage::Plain(help_text(self.pipeline.config()))).await;
                HandleOutcome::Help
            }
            Command::Mirror(mode) => self.mirror(mode, event).await,
        }
    }

    #[tracing::instrument(skip(self, event))]
    async fn mirror(&self, mode: MirrorMode, event: &dyn MessageEvent) -> HandleOutcome {
        let config = self.pipeline.config();

        if config.enable_at_avatar {
            if let Some(user_id) = mentioned_user(event.segments()) {
                tracing::info!(user_id, "Mirroring avatar of mentioned user");
                return match self.pipeline.process_avatar(user_id, mode).await {
                    Ok(output) => self.deliver(event, output, mode).await,
                    Err(e) => {
                        log_error(&e);
                        send(event, failure("获取头像失败")).await;
                        HandleOutcome::Failed
                    }
                };
            }
        }

        let sources = image_sources(event.segments());
        if sources.is_empty() {
            send(event, failure("未找到图像")).await;
            return HandleOutcome::NoImage;
        }
        tracing::info!(count = sources.len(), "Found image sources");

        if !config.silent_mode {
            send(
                event,
                OutgoingMessage::Plain(format!("🔄 正在处理图像: {}...", mode.description())),
            )
            .await;
        }

        let mut last_error: Option<AppError> = None;
        for source in &sources {
            match self.pipeline.process_source(source, mode).await {
                Ok(output) => return self.deliver(event, output, mode).await,
                Err(e) => {
                    tracing::debug!(source = ?source, "Image source failed, trying next");
                    log_error(&e);
                    last_error = Some(e);
                }
            }
        }

        let message = last_error
            .map(|e| e.client_message())
            .unwrap_or_else(|| "处理失败".to_string());
        send(event, failure(&message)).await;
        HandleOutcome::Failed
    }

    async fn deliver(&self, event: &dyn MessageEvent, output: PathBuf, mode: MirrorMode) -> HandleOutcome {
        let config = self.pipeline.config();
        let message = if config.silent_mode {
            OutgoingMessage::Chain(vec![ReplySegment::Image(output.clone())])
        } else {
            OutgoingMessage::Chain(vec![
                ReplySegment::Text(format!("✅ {}\n", mode.description())),
                ReplySegment::Image(output.clone()),
            ])
        };
        send(event, message).await;

        if config.enable_auto_cleanup {
            self.schedule(&output, i64::from(config.keep_files_hours));
        }
        HandleOutcome::Mirrored(output)
    }

    fn schedule(&self, output: &Path, hours: i64) {
        if let Err(e) = self.pipeline.schedule_cleanup(output, hours) {
            log_error(&e);
        }
    }
}

fn failure(message: &str) -> OutgoingMessage {
    OutgoingMessage::Plain(format!("❌ {}", message))
}

async fn send(event: &dyn MessageEvent, message: OutgoingMessage) {
    if let Err(e) = event.reply(message).await {
        tracing::warn!(error = %e, "Failed to send reply");
    }
}
