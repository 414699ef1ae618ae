//! PicMirror CLI: run the mirror pipeline once from the command line.
//!
//! Useful for checking a config file or a suspicious source without a chat
//! host. Logging honours RUST_LOG.

use anyhow::Context;
use clap::Parser;
use picmirror_core::{DataDir, ImageSource, MirrorMode, PluginConfig};
use picmirror_infra::{init_telemetry, log_error, shutdown_telemetry, LogFormat, TelemetryConfig};
use picmirror_services::MirrorPipeline;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "picmirror", about = "Mirror one half of an image onto the other")]
struct Cli {
    /// Image URL, base64:// payload or path relative to the data directory
    #[arg(long, required_unless_present_any = ["avatar", "show_config"])]
    source: Option<String>,

    /// Numeric user id whose avatar should be mirrored instead of --source
    #[arg(long, conflicts_with = "source")]
    avatar: Option<String>,

    /// left_to_right, right_to_left, top_to_bottom or bottom_to_top
    #[arg(long, default_value = "left_to_right", value_parser = parse_mode)]
    mode: MirrorMode,

    /// JSON file with plugin settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Working directory for staged and produced files
    #[arg(long, default_value = "picmirror-data")]
    data_dir: PathBuf,

    /// Override keep_files_hours from the config
    #[arg(long, value_parser = clap::value_parser!(u32).range(0..=168))]
    keep_hours: Option<u32>,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    show_config: bool,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,
}

fn parse_mode(raw: &str) -> Result<MirrorMode, String> {
    MirrorMode::parse(raw).ok_or_else(|| {
        let known: Vec<&str> = MirrorMode::ALL.iter().map(|m| m.as_str()).collect();
        format!("unknown mode '{}', expected one of {}", raw, known.join(", "))
    })
}

fn load_config(cli: &Cli) -> anyhow::Result<PluginConfig> {
    let mut config = match &cli.config {
        Some(path) => PluginConfig::from_json_file(path)?,
        None => PluginConfig::default(),
    };
    if let Some(hours) = cli.keep_hours {
        config.keep_files_hours = hours;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_telemetry(&TelemetryConfig {
        format: if cli.json_logs {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        },
        ..TelemetryConfig::default()
    });

    let config = load_config(&cli)?;
    if cli.show_config {
        let out = serde_json::to_string_pretty(&config).context("Serialize config")?;
        println!("{}", out);
        return Ok(());
    }
    tracing::info!(config = %config.summary(), "Configuration loaded");

    let data_dir = DataDir::open(&cli.data_dir)
        .with_context(|| format!("Failed to open data directory {}", cli.data_dir.display()))?;
    let pipeline = MirrorPipeline::new(Arc::new(config), data_dir);

    let result = match (&cli.avatar, &cli.source) {
        (Some(user_id), _) => pipeline.process_avatar(user_id, cli.mode).await,
        (None, Some(source)) => {
            pipeline
                .process_source(&ImageSource::parse(source), cli.mode)
                .await
        }
        (None, None) => anyhow::bail!("either --source or --avatar is required"),
    };

    let outcome = match result {
        Ok(output) => {
            println!("{}", output.display());
            if pipeline.config().enable_auto_cleanup {
                let hours = i64::from(pipeline.config().keep_files_hours);
                if let Err(e) = pipeline.schedule_cleanup(&output, hours) {
                    log_error(&e);
                }
            }
            Ok(())
        }
        Err(e) => {
            log_error(&e);
            Err(anyhow::Error::new(e).context("Mirror failed"))
        }
    };

    let report = pipeline.cleanup_all().await;
    tracing::debug!(deleted = report.deleted, remaining = report.remaining, "Scheduler drained");
    shutdown_telemetry().await;
    outcome
}
