use crate::constants::BASE64_PREFIX;
use std::fmt;

/// Where an image comes from. Produced once at the framework boundary from
/// whatever the inbound message carried.
#[derive(Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// `http://` or `https://` URL
    Url(String),
    /// `base64://` payload, prefix included
    Base64Payload(String),
    /// Path relative to the plugin data directory
    LocalRelativePath(String),
}

impl ImageSource {
    /// Classify a raw image reference by its prefix.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let lower = trimmed
            .get(..8)
            .map(|head| head.to_ascii_lowercase())
            .unwrap_or_else(|| trimmed.to_ascii_lowercase());

        if lower.starts_with("http://") || lower.starts_with("https://") {
            ImageSource::Url(trimmed.to_string())
        } else if trimmed.starts_with(BASE64_PREFIX) {
            ImageSource::Base64Payload(trimmed.to_string())
        } else {
            ImageSource::LocalRelativePath(trimmed.to_string())
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ImageSource::Url(_) => "url",
            ImageSource::Base64Payload(_) => "base64",
            ImageSource::LocalRelativePath(_) => "local",
        }
    }

    /// Short label safe to log: base64 payloads are never printed in full.
    pub fn log_label(&self) -> String {
        match self {
            ImageSource::Url(url) => truncate(url, 120),
            ImageSource::Base64Payload(payload) => format!("base64 ({} chars)", payload.len()),
            ImageSource::LocalRelativePath(path) => truncate(path, 120),
        }
    }
}

fn truncate(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &value[..idx]),
        None => value.to_string(),
    }
}

impl fmt::Debug for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ImageSource::{}({})", self.kind(), self.log_label())
    }
}
