//! Command aliases and help text.

use picmirror_core::{MirrorMode, PluginConfig};
use std::fmt::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Mirror(MirrorMode),
    Help,
}

const ALIASES: &[(&str, Command)] = &[
    ("左对称", Command::Mirror(MirrorMode::LeftToRight)),
    ("左右对称", Command::Mirror(MirrorMode::LeftToRight)),
    ("mirror left", Command::Mirror(MirrorMode::LeftToRight)),
    ("left", Command::Mirror(MirrorMode::LeftToRight)),
    ("右对称", Command::Mirror(MirrorMode::RightToLeft)),
    ("右左对称", Command::Mirror(MirrorMode::RightToLeft)),
    ("mirror right", Command::Mirror(MirrorMode::RightToLeft)),
    ("right", Command::Mirror(MirrorMode::RightToLeft)),
    ("上对称", Command::Mirror(MirrorMode::TopToBottom)),
    ("上下对称", Command::Mirror(MirrorMode::TopToBottom)),
    ("mirror top", Command::Mirror(MirrorMode::TopToBottom)),
    ("top", Command::Mirror(MirrorMode::TopToBottom)),
    ("下对称", Command::Mirror(MirrorMode::BottomToTop)),
    ("下上对称", Command::Mirror(MirrorMode::BottomToTop)),
    ("mirror bottom", Command::Mirror(MirrorMode::BottomToTop)),
    ("bottom", Command::Mirror(MirrorMode::BottomToTop)),
    ("对称帮助", Command::Help),
    ("镜像帮助", Command::Help),
    ("mirror help", Command::Help),
];

impl Command {
    /// Match the start of a message against the command aliases.
    ///
    /// A leading `/` is ignored, English aliases are case-insensitive and an
    /// alias must be followed by whitespace or the end of the text.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let text = text.strip_prefix('/').unwrap_or(text).trim_start();
        let lower = text.to_lowercase();

        ALIASES
            .iter()
            .filter(|(alias, _)| match lower.strip_prefix(alias) {
                Some(rest) => rest.is_empty() || rest.starts_with(char::is_whitespace),
                None => false,
            })
            .max_by_key(|(alias, _)| alias.len())
            .map(|(_, command)| *command)
    }
}

fn toggle(enabled: bool) -> &'static str {
    if enabled {
        "✅ 已启用"
    } else {
        "❌ 已禁用"
    }
}

/// Usage text. Silent mode omits the configuration summary.
pub fn help_text(config: &PluginConfig) -> String {
    let mut text = String::from("📷 图像对称插件使用说明\n\n");

    if !config.silent_mode {
        let _ = writeln!(text, "当前配置:");
        let _ = writeln!(text, "• 图像大小限制: {}MB", config.image_size_limit_mb);
        let _ = writeln!(text, "• GIF大小限制: {}MB", config.gif_size_limit_mb);
        let _ = writeln!(text, "• GIF处理: {}", toggle(config.enable_gif));
        let _ = writeln!(text, "• 自动清理: {}", toggle(config.enable_auto_cleanup));
        let _ = writeln!(text, "• @头像功能: {}", toggle(config.enable_at_avatar));
        text.push('\n');
    }

    text.push_str("可用指令:\n");
    for (alias, mode) in [
        ("左对称 / mirror left", MirrorMode::LeftToRight),
        ("右对称 / mirror right", MirrorMode::RightToLeft),
        ("上对称 / mirror top", MirrorMode::TopToBottom),
        ("下对称 / mirror bottom", MirrorMode::BottomToTop),
    ] {
        let _ = writeln!(text, "• {} - {}", alias, mode.description());
    }

    text.push_str(
        "\n使用方法:\n\
         1. 回复一条包含图像的消息，然后发送指令\n\
         2. 发送指令并@一个用户 (处理该用户头像)\n\
         3. 直接发送图像和指令在同一消息中\n\n\
         支持格式: PNG, JPG, GIF, BMP, WebP\n",
    );
    if !config.silent_mode {
        let _ = writeln!(
            text,
            "大小限制: 图像<{}MB, GIF<{}MB",
            config.image_size_limit_mb, config.gif_size_limit_mb
        );
    }

    text.push_str("\n示例:\n回复图片消息后发送: 左对称\n@用户 并发送: 右对称\n图片 + 右对称");
    text
}
