//! Axis mirror transform.
//!
//! The source half spans `ceil(d / 2)` rows or columns and is kept as is. It is
//! flipped, and only the trailing `d - ceil(d / 2)` lines of the flipped copy
//! are pasted over the other half, so odd dimensions never overrun.

use image::{imageops, DynamicImage, ImageBuffer, Pixel};
use picmirror_core::MirrorMode;

/// Mirror one half of `img` onto the other. Dimensions and colour type are
/// preserved.
pub fn apply_mirror(img: &DynamicImage, mode: MirrorMode) -> DynamicImage {
    match img {
        DynamicImage::ImageLuma8(buf) => DynamicImage::ImageLuma8(mirror_buffer(buf, mode)),
        DynamicImage::ImageLumaA8(buf) => DynamicImage::ImageLumaA8(mirror_buffer(buf, mode)),
        DynamicImage::ImageRgb8(buf) => DynamicImage::ImageRgb8(mirror_buffer(buf, mode)),
        DynamicImage::ImageRgba8(buf) => DynamicImage::ImageRgba8(mirror_buffer(buf, mode)),
        DynamicImage::ImageLuma16(buf) => DynamicImage::ImageLuma16(mirror_buffer(buf, mode)),
        DynamicImage::ImageLumaA16(buf) => DynamicImage::ImageLumaA16(mirror_buffer(buf, mode)),
        DynamicImage::ImageRgb16(buf) => DynamicImage::ImageRgb16(mirror_buffer(buf, mode)),
        DynamicImage::ImageRgba16(buf) => DynamicImage::ImageRgba16(mirror_buffer(buf, mode)),
        DynamicImage::ImageRgb32F(buf) => DynamicImage::ImageRgb32F(mirror_buffer(buf, mode)),
        DynamicImage::ImageRgba32F(buf) => DynamicImage::ImageRgba32F(mirror_buffer(buf, mode)),
        other => DynamicImage::ImageRgba8(mirror_buffer(&other.to_rgba8(), mode)),
    }
}

/// Mirror by mode name. An unknown name yields an unmodified copy.
pub fn apply_mirror_by_name(img: &DynamicImage, mode: &str) -> DynamicImage {
    match MirrorMode::parse(mode) {
        Some(mode) => apply_mirror(img, mode),
        None => {
            tracing::debug!(mode, "Unknown mirror mode, returning copy");
            img.clone()
        }
    }
}

fn mirror_buffer<P>(
    src: &ImageBuffer<P, Vec<P::Subpixel>>,
    mode: MirrorMode,
) -> ImageBuffer<P, Vec<P::Subpixel>>
where
    P: Pixel + 'static,
{
    let (width, height) = src.dimensions();
    let mut result = src.clone();

    match mode {
        MirrorMode::LeftToRight => {
            let half = width.div_ceil(2);
            let other = width - half;
            if other > 0 {
                let source = imageops::crop_imm(src, 0, 0, half, height).to_image();
                let flipped = imageops::flip_horizontal(&source);
                let piece = imageops::crop_imm(&flipped, half - other, 0, other, height).to_image();
                imageops::replace(&mut result, &piece, i64::from(half), 0);
            }
        }
        MirrorMode::RightToLeft => {
            let half = width.div_ceil(2);
            let other = width - half;
            if other > 0 {
                let source = imageops::crop_imm(src, other, 0, half, height).to_image();
                let flipped = imageops::flip_horizontal(&source);
                let piece = imageops::crop_imm(&flipped, 0, 0, other, height).to_image();
                imageops::replace(&mut result, &piece, 0, 0);
            }
        }
        MirrorMode::TopToBottom => {
            let half = height.div_ceil(2);
            let other = height - half;
            if other > 0 {
                let source = imageops::crop_imm(src, 0, 0, width, half).to_image();
                let flipped = imageops::flip_vertical(&source);
                let piece = imageops::crop_imm(&flipped, 0, half - other, width, other).to_image();
                imageops::replace(&mut result, &piece, 0, i64::from(half));
            }
        }
        MirrorMode::BottomToTop => {
            let half = height.div_ceil(2);
            let other = height - half;
            if other > 0 {
                let source = imageops::crop_imm(src, 0, other, width, half).to_image();
                let flipped = imageops::flip_vertical(&source);
                let piece = imageops::crop_imm(&flipped, 0, 0, width, other).to_image();
                imageops::replace(&mut result, &piece, 0, 0);
            }
        }
    }

    result
}
