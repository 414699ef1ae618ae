use serde::{Deserialize, Serialize};
use std::fmt;

/// Axis-based reflection applied to every frame.
///
/// The half named first is the source half: it is kept unchanged and its
/// mirror image replaces the other half.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorMode {
    LeftToRight,
    RightToLeft,
    TopToBottom,
    BottomToTop,
}

impl MirrorMode {
    pub const ALL: [MirrorMode; 4] = [
        MirrorMode::LeftToRight,
        MirrorMode::RightToLeft,
        MirrorMode::TopToBottom,
        MirrorMode::BottomToTop,
    ];

    /// Parse the canonical snake_case name. Unknown names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "left_to_right" => Some(MirrorMode::LeftToRight),
            "right_to_left" => Some(MirrorMode::RightToLeft),
            "top_to_bottom" => Some(MirrorMode::TopToBottom),
            "bottom_to_top" => Some(MirrorMode::BottomToTop),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MirrorMode::LeftToRight => "left_to_right",
            MirrorMode::RightToLeft => "right_to_left",
            MirrorMode::TopToBottom => "top_to_bottom",
            MirrorMode::BottomToTop => "bottom_to_top",
        }
    }

    /// Whether the reflection axis is vertical (columns are swapped).
    pub fn is_horizontal(self) -> bool {
        matches!(self, MirrorMode::LeftToRight | MirrorMode::RightToLeft)
    }

    /// Human-readable description shown in replies.
    pub fn description(self) -> &'static str {
        match self {
            MirrorMode::LeftToRight => "左半边图像对称到右边",
            MirrorMode::RightToLeft => "右半边图像对称到左边",
            MirrorMode::TopToBottom => "上半边图像对称到下面",
            MirrorMode::BottomToTop => "下半边图像对称到上面",
        }
    }
}

impl fmt::Display for MirrorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
