//! Mirror processor - decode, guard, transform and encode one staged file
//!
//! Everything here is synchronous and CPU-bound; callers run it on a blocking
//! worker thread.

use crate::animation::GifFrameReader;
use crate::compression::{compress, downscale, encode_static, prepare_for_output, OutputSettings};
use crate::error::ProcessError;
use crate::format::ImageKind;
use crate::guard::{DecompressionGuard, GuardLimits};
use crate::transform::{apply_mirror, normalize_color};
use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, DynamicImage, Frame, ImageDecoder, ImageReader};
use picmirror_core::constants::LARGE_ANIMATION_FRAMES;
use picmirror_core::{MirrorMode, PluginConfig};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Summary of a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub kind: ImageKind,
    pub width: u32,
    pub height: u32,
    pub frames: u32,
}

#[derive(Debug, Clone)]
pub struct MirrorProcessor {
    guard: DecompressionGuard,
    output: OutputSettings,
}

impl MirrorProcessor {
    pub fn new(guard: DecompressionGuard, output: OutputSettings) -> Self {
        Self { guard, output }
    }

    pub fn from_config(config: &PluginConfig) -> Self {
        Self::new(
            DecompressionGuard::new(GuardLimits::from_config(config)),
            OutputSettings::from_config(config),
        )
    }

    pub fn guard(&self) -> &DecompressionGuard {
        &self.guard
    }

    /// Mirror `input` into `output`, using the container named by `kind`.
    ///
    /// On any failure, including cancellation, the partial output file is
    /// removed before returning.
    pub fn process(
        &self,
        input: &Path,
        output: &Path,
        kind: ImageKind,
        mode: MirrorMode,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutcome, ProcessError> {
        let result = if kind.is_animated_container() {
            self.process_animation(input, output, mode, cancel)
        } else {
            self.process_static(input, output, kind, mode, cancel)
        };

        if let Err(e) = &result {
            tracing::debug!(error = %e, output = %output.display(), "Removing partial output");
            if let Err(remove_err) = fs::remove_file(output) {
                if remove_err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(error = %remove_err, "Failed to remove partial output");
                }
            }
        }

        result
    }

    fn process_static(
        &self,
        input: &Path,
        output: &Path,
        kind: ImageKind,
        mode: MirrorMode,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutcome, ProcessError> {
        let mut reader = ImageReader::open(input)?;
        reader.set_format(kind.image_format());
        let decoder = reader.into_decoder()?;
        let (width, height) = decoder.dimensions();
        self.guard.check_dimensions(width, height)?;

        let img = DynamicImage::from_decoder(decoder)?;
        if cancel.is_cancelled() {
            return Err(ProcessError::Cancelled);
        }

        let img = normalize_color(img);
        let mirrored = apply_mirror(&img, mode);
        let compressed = compress(mirrored, &self.output);
        let prepared = prepare_for_output(compressed, kind);

        if cancel.is_cancelled() {
            return Err(ProcessError::Cancelled);
        }

        let file = File::create(output)?;
        encode_static(&prepared, kind, self.output.quality, BufWriter::new(file))?;

        Ok(ProcessOutcome {
            kind,
            width: prepared.width(),
            height: prepared.height(),
            frames: 1,
        })
    }

    fn process_animation(
        &self,
        input: &Path,
        output: &Path,
        mode: MirrorMode,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutcome, ProcessError> {
        let mut reader = GifFrameReader::new(BufReader::new(File::open(input)?), &self.guard)?;
        let mut budget = self.guard.frame_budget();

        let mut writer = BufWriter::new(File::create(output)?);
        let mut out_dimensions = reader.dimensions();
        {
            let mut encoder = GifEncoder::new_with_speed(&mut writer, 10);
            encoder.set_repeat(Repeat::Infinite)?;

            loop {
                if cancel.is_cancelled() {
                    return Err(ProcessError::Cancelled);
                }
                let Some(frame) = reader.next_frame(&mut budget)? else {
                    break;
                };

                let mirrored = apply_mirror(&DynamicImage::ImageRgba8(frame.canvas), mode);
                let mirrored = if self.output.enable_compression {
                    downscale(mirrored, self.output.max_dimension)
                } else {
                    mirrored
                };
                let rgba = mirrored.to_rgba8();
                out_dimensions = rgba.dimensions();

                let delay = Delay::from_numer_denom_ms(frame.delay_ms, 1);
                encoder.encode_frame(Frame::from_parts(rgba, 0, 0, delay))?;
            }
        }
        writer.flush()?;

        let frames = budget.frames_seen();
        if frames == 0 {
            return Err(ProcessError::Decode("animation contains no frames".to_string()));
        }
        if frames as usize > LARGE_ANIMATION_FRAMES {
            tracing::warn!(frames, "Processed large animation");
        }

        Ok(ProcessOutcome {
            kind: ImageKind::Gif,
            width: out_dimensions.0,
            height: out_dimensions.1,
            frames,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::gif::GifDecoder;
    use image::{AnimationDecoder, Rgba, RgbaImage};
    use tempfile::tempdir;

    fn processor() -> MirrorProcessor {
        MirrorProcessor::from_config(&PluginConfig::default())
    }

    fn gradient(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x * 20) as u8, (y * 20) as u8, 100, 255])
        })
    }

    fn write_gif(path: &Path, frames: Vec<RgbaImage>) {
        let mut encoder = GifEncoder::new(File::create(path).unwrap());
        encoder.set_repeat(Repeat::Infinite).unwrap();
        for canvas in frames {
            encoder
                .encode_frame(Frame::from_parts(
                    canvas,
                    0,
                    0,
                    Delay::from_numer_denom_ms(80, 1),
                ))
                .unwrap();
        }
    }

    #[test]
    fn test_static_png_top_to_bottom() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.png");
        let output = dir.path().join("out.png");
        let src = gradient(10, 7);
        src.save(&input).unwrap();

        let outcome = processor()
            .process(
                &input,
                &output,
                ImageKind::Png,
                MirrorMode::TopToBottom,
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!((outcome.width, outcome.height, outcome.frames), (10, 7, 1));

        let out = image::open(&output).unwrap().to_rgba8();
        for y in 0..7 {
            for x in 0..10 {
                assert_eq!(out.get_pixel(x, y), out.get_pixel(x, 6 - y));
                if y < 4 {
                    assert_eq!(out.get_pixel(x, y), src.get_pixel(x, y));
                }
            }
        }
    }

    #[test]
    fn test_animation_mirrors_every_frame() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.gif");
        let output = dir.path().join("out.gif");
        let frames = (0..3)
            .map(|i| {
                let mut canvas = RgbaImage::from_pixel(6, 4, Rgba([0, 0, 0, 255]));
                canvas.put_pixel(0, i, Rgba([255, 0, 0, 255]));
                canvas
            })
            .collect();
        write_gif(&input, frames);

        let outcome = processor()
            .process(
                &input,
                &output,
                ImageKind::Gif,
                MirrorMode::LeftToRight,
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(outcome.frames, 3);

        let decoder = GifDecoder::new(BufReader::new(File::open(&output).unwrap())).unwrap();
        let decoded = decoder.into_frames().collect_frames().unwrap();
        assert_eq!(decoded.len(), 3);
        for (i, frame) in decoded.iter().enumerate() {
            let buf = frame.buffer();
            assert_eq!(buf.dimensions(), (6, 4));
            assert_eq!(buf.get_pixel(0, i as u32), buf.get_pixel(5, i as u32));
            assert_eq!(buf.get_pixel(5, i as u32)[0], 255);
        }
    }

    #[test]
    fn test_cancelled_run_removes_output() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.gif");
        let output = dir.path().join("out.gif");
        write_gif(&input, vec![gradient(4, 4), gradient(4, 4)]);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = processor()
            .process(&input, &output, ImageKind::Gif, MirrorMode::LeftToRight, &cancel)
            .unwrap_err();

        assert!(matches!(err, ProcessError::Cancelled));
        assert!(!output.exists());
    }

    #[test]
    fn test_garbage_input_is_decode_failure() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.png");
        let output = dir.path().join("out.png");
        fs::write(&input, b"\x89PNG\r\n\x1a\nnot really a png").unwrap();

        let err = processor()
            .process(
                &input,
                &output,
                ImageKind::Png,
                MirrorMode::LeftToRight,
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert!(picmirror_core::AppError::from(err).is_rejection());
        assert!(!output.exists());
    }

    #[test]
    fn test_decodes_as_inspected_kind_regardless_of_name() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("upload_without_extension");
        let output = dir.path().join("out.png");
        DynamicImage::ImageRgba8(gradient(6, 6))
            .write_to(&mut File::create(&input).unwrap(), image::ImageFormat::Png)
            .unwrap();

        let outcome = processor()
            .process(
                &input,
                &output,
                ImageKind::Png,
                MirrorMode::BottomToTop,
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!((outcome.width, outcome.height), (6, 6));

        let err = processor()
            .process(
                &input,
                &dir.path().join("out.gif"),
                ImageKind::Bmp,
                MirrorMode::BottomToTop,
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert!(picmirror_core::AppError::from(err).is_rejection());
    }

    #[test]
    fn test_encoded_bytes_match_kind() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.jpg");
        let output = dir.path().join("out.jpg");
        DynamicImage::ImageRgba8(gradient(9, 9))
            .to_rgb8()
            .save(&input)
            .unwrap();

        processor()
            .process(
                &input,
                &output,
                ImageKind::Jpeg,
                MirrorMode::RightToLeft,
                &CancellationToken::new(),
            )
            .unwrap();
        let bytes = fs::read(&output).unwrap();
        assert_eq!(ImageKind::sniff(&bytes), Some(ImageKind::Jpeg));
    }
}
