//! Container detection from magic bytes.

use image::ImageFormat;

/// Raster containers the plugin accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageKind {
    Png,
    Jpeg,
    Gif,
    WebP,
    Bmp,
}

impl ImageKind {
    /// Identify the container from the first bytes of a file.
    ///
    /// Returns `None` when the header matches none of the supported formats.
    pub fn sniff(header: &[u8]) -> Option<Self> {
        if header.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            Some(ImageKind::Png)
        } else if header.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(ImageKind::Jpeg)
        } else if header.starts_with(b"GIF87a") || header.starts_with(b"GIF89a") {
            Some(ImageKind::Gif)
        } else if header.len() >= 12 && &header[..4] == b"RIFF" && &header[8..12] == b"WEBP" {
            Some(ImageKind::WebP)
        } else if header.starts_with(b"BM") {
            Some(ImageKind::Bmp)
        } else {
            None
        }
    }

    /// Map a file extension (with or without the dot) to a kind.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "png" => Some(ImageKind::Png),
            "jpg" | "jpeg" => Some(ImageKind::Jpeg),
            "gif" => Some(ImageKind::Gif),
            "webp" => Some(ImageKind::WebP),
            "bmp" => Some(ImageKind::Bmp),
            _ => None,
        }
    }

    /// File extension including the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            ImageKind::Png => ".png",
            ImageKind::Jpeg => ".jpg",
            ImageKind::Gif => ".gif",
            ImageKind::WebP => ".webp",
            ImageKind::Bmp => ".bmp",
        }
    }

    pub fn image_format(self) -> ImageFormat {
        match self {
            ImageKind::Png => ImageFormat::Png,
            ImageKind::Jpeg => ImageFormat::Jpeg,
            ImageKind::Gif => ImageFormat::Gif,
            ImageKind::WebP => ImageFormat::WebP,
            ImageKind::Bmp => ImageFormat::Bmp,
        }
    }

    pub fn is_animated_container(self) -> bool {
        matches!(self, ImageKind::Gif)
    }

    /// Whether the encoder for this container can store an alpha channel.
    pub fn supports_alpha(self) -> bool {
        matches!(self, ImageKind::Png | ImageKind::Gif | ImageKind::WebP)
    }
}
