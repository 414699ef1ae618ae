//! Plugin lifecycle.

use crate::command::Command;
use crate::event::MessageEvent;
use crate::handler::{HandleOutcome, MirrorHandler};
use anyhow::Context;
use picmirror_core::constants::PLUGIN_NAME;
use picmirror_core::{DataDir, PluginConfig};
use picmirror_services::MirrorPipeline;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// What the host framework provides to the plugin.
pub trait PluginHost: Send + Sync {
    /// Writable directory owned by `plugin_name`; created on demand.
    fn data_dir(&self, plugin_name: &str) -> PathBuf;

    /// Raw configuration values, if the host has any for this plugin.
    fn config(&self) -> Option<Map<String, Value>>;
}

pub struct MirrorPlugin {
    handler: MirrorHandler,
    started: AtomicBool,
    terminated: AtomicBool,
}

impl MirrorPlugin {
    pub fn new(host: &dyn PluginHost) -> anyhow::Result<Self> {
        let config = PluginConfig::load_from_map(host.config().as_ref());
        let root = host.data_dir(PLUGIN_NAME);
        let data_dir = DataDir::open(&root)
            .with_context(|| format!("failed to open data directory {}", root.display()))?;

        tracing::info!(
            data_dir = %data_dir.root().display(),
            config = %config.summary(),
            "Mirror plugin loaded"
        );
        Ok(Self::with_pipeline(Arc::new(MirrorPipeline::new(
            Arc::new(config),
            data_dir,
        ))))
    }

    pub fn with_pipeline(pipeline: Arc<MirrorPipeline>) -> Self {
        Self {
            handler: MirrorHandler::new(pipeline),
            started: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
        }
    }

    pub fn pipeline(&self) -> &MirrorPipeline {
        self.handler.pipeline()
    }

    /// Start background cleanup when enabled. Later calls do nothing.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.pipeline().config().enable_auto_cleanup {
            self.pipeline().start();
        } else {
            tracing::info!("Auto cleanup disabled, scheduler not started");
        }
    }

    /// Handle an inbound message. Returns `None` when it is not a command.
    pub async fn on_message(&self, event: &dyn MessageEvent) -> Option<HandleOutcome> {
        let command = Command::parse(&event.plain_text())?;
        Some(self.handler.handle(command, event).await)
    }

    /// Drain and stop the cleanup scheduler. Later calls do nothing.
    pub async fn terminate(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        let report = self.pipeline().cleanup_all().await;
        tracing::info!(deleted = report.deleted, "Mirror plugin unloaded");
    }
}
