use crate::error::ProcessError;
use crate::format::ImageKind;
use crate::transform::{flatten_onto_white, is_fully_opaque};
use image::codecs::bmp::BmpEncoder;
use image::codecs::gif::GifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, Frame, GenericImageView};
use picmirror_core::PluginConfig;
use std::io::Write;

/// Output tuning taken from the plugin configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSettings {
    /// JPEG quality (1-100)
    pub quality: u8,
    pub enable_compression: bool,
    /// Longest edge allowed when compression is enabled
    pub max_dimension: u32,
}

impl OutputSettings {
    pub fn from_config(config: &PluginConfig) -> Self {
        Self {
            quality: config.output_quality.clamp(1, 100),
            enable_compression: config.enable_compression,
            max_dimension: config.max_compression_dimension,
        }
    }
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self::from_config(&PluginConfig::default())
    }
}

/// Shrink to fit `max_dimension` and drop an alpha channel that is fully
/// opaque. A no-op when compression is disabled.
pub fn compress(img: DynamicImage, settings: &OutputSettings) -> DynamicImage {
    if !settings.enable_compression {
        return img;
    }

    let img = downscale(img, settings.max_dimension);
    match img {
        DynamicImage::ImageRgba8(ref rgba) if is_fully_opaque(rgba) => {
            DynamicImage::ImageRgb8(img.to_rgb8())
        }
        other => other,
    }
}

/// Resize with Lanczos3 so neither edge exceeds `max_dimension`, keeping the
/// aspect ratio.
pub fn downscale(img: DynamicImage, max_dimension: u32) -> DynamicImage {
    let (width, height) = img.dimensions();
    if width <= max_dimension && height <= max_dimension {
        return img;
    }

    tracing::debug!(
        width,
        height,
        max_dimension,
        "Downscaling image before encoding"
    );
    img.resize(max_dimension, max_dimension, FilterType::Lanczos3)
}

/// Final colour-model pass so the target encoder accepts the buffer.
pub fn prepare_for_output(img: DynamicImage, kind: ImageKind) -> DynamicImage {
    let img = if kind.supports_alpha() {
        img
    } else {
        flatten_onto_white(img)
    };

    match (kind, img) {
        (ImageKind::WebP, DynamicImage::ImageLuma8(buf)) => {
            DynamicImage::ImageRgb8(DynamicImage::ImageLuma8(buf).to_rgb8())
        }
        (_, img) => img,
    }
}

/// Encode a single frame in the container matching the input.
pub fn encode_static<W: Write>(
    img: &DynamicImage,
    kind: ImageKind,
    quality: u8,
    mut writer: W,
) -> Result<(), ProcessError> {
    match kind {
        ImageKind::Png => img.write_with_encoder(PngEncoder::new_with_quality(
            &mut writer,
            CompressionType::Best,
            PngFilter::Adaptive,
        ))?,
        ImageKind::Jpeg => {
            img.write_with_encoder(JpegEncoder::new_with_quality(&mut writer, quality))?
        }
        ImageKind::WebP => img.write_with_encoder(WebPEncoder::new_lossless(&mut writer))?,
        ImageKind::Bmp => img.write_with_encoder(BmpEncoder::new(&mut writer))?,
        ImageKind::Gif => {
            let mut encoder = GifEncoder::new(&mut writer);
            encoder.encode_frame(Frame::new(img.to_rgba8()))?;
        }
    }
    writer.flush()?;
    Ok(())
}
