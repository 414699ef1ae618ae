//! Frame-by-frame GIF decoding.
//!
//! Frames are pulled one at a time: the frame header is read first, the frame
//! is charged against the [`FrameBudget`], and only then are its pixels
//! decoded and composited onto the logical screen. Nothing is buffered beyond
//! the current canvas.

use crate::error::ProcessError;
use crate::guard::{DecompressionGuard, FrameBudget};
use gif::{ColorOutput, DecodeOptions, DisposalMethod, MemoryLimit};
use image::{Rgba, RgbaImage};
use picmirror_core::Rejection;
use std::io::Read;
use std::num::NonZeroU64;

/// Delay used when a frame declares none.
const DEFAULT_FRAME_DELAY_MS: u32 = 100;

/// One fully composited frame.
#[derive(Debug, Clone)]
pub struct AnimationFrame {
    pub canvas: RgbaImage,
    pub delay_ms: u32,
}

#[derive(Debug, Clone, Copy)]
struct FrameHeader {
    left: u32,
    top: u32,
    width: u32,
    height: u32,
    delay_ms: u32,
    dispose: DisposalMethod,
}

pub struct GifFrameReader<R: Read> {
    decoder: gif::Decoder<R>,
    canvas: RgbaImage,
    /// Canvas snapshot restored after a frame disposed with `Previous`.
    saved: Option<RgbaImage>,
    last: Option<FrameHeader>,
    frames_decoded: u32,
}

impl<R: Read> GifFrameReader<R> {
    /// Parse the GIF header and check the logical screen size.
    pub fn new(reader: R, guard: &DecompressionGuard) -> Result<Self, ProcessError> {
        let mut options = DecodeOptions::new();
        options.set_color_output(ColorOutput::RGBA);
        options.check_frame_consistency(true);
        if let Some(limit) = NonZeroU64::new(guard.limits().hard_pixels.saturating_mul(4)) {
            options.set_memory_limit(MemoryLimit::Bytes(limit));
        }

        let decoder = options.read_info(reader)?;
        let width = u32::from(decoder.width());
        let height = u32::from(decoder.height());
        guard.check_dimensions(width, height)?;

        Ok(Self {
            decoder,
            canvas: RgbaImage::new(width, height),
            saved: None,
            last: None,
            frames_decoded: 0,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.canvas.dimensions()
    }

    /// Number of frames whose pixel data has been decoded so far.
    pub fn frames_decoded(&self) -> u32 {
        self.frames_decoded
    }

    /// Decode the next frame, or `None` at the end of the stream.
    pub fn next_frame(
        &mut self,
        budget: &mut FrameBudget,
    ) -> Result<Option<AnimationFrame>, ProcessError> {
        self.dispose_last();

        let header = match self.decoder.next_frame_info()? {
            Some(frame) => FrameHeader {
                left: u32::from(frame.left),
                top: u32::from(frame.top),
                width: u32::from(frame.width),
                height: u32::from(frame.height),
                delay_ms: match frame.delay {
                    0 => DEFAULT_FRAME_DELAY_MS,
                    centis => u32::from(centis) * 10,
                },
                dispose: frame.dispose,
            },
            None => return Ok(None),
        };

        let (canvas_width, canvas_height) = self.canvas.dimensions();
        if u64::from(header.width) * u64::from(header.height)
            > u64::from(canvas_width) * u64::from(canvas_height)
        {
            return Err(Rejection::DecompressionBomb(format!(
                "frame {}x{} larger than canvas {}x{}",
                header.width, header.height, canvas_width, canvas_height
            ))
            .into());
        }
        budget.admit(canvas_width, canvas_height)?;

        let mut buffer = vec![0u8; self.decoder.buffer_size()];
        self.decoder.read_into_buffer(&mut buffer)?;
        self.frames_decoded += 1;

        if header.dispose == DisposalMethod::Previous {
            self.saved = Some(self.canvas.clone());
        }
        self.composite(&header, &buffer);
        self.last = Some(header);

        Ok(Some(AnimationFrame {
            canvas: self.canvas.clone(),
            delay_ms: header.delay_ms,
        }))
    }

    fn composite(&mut self, header: &FrameHeader, rgba: &[u8]) {
        let (canvas_width, canvas_height) = self.canvas.dimensions();
        for (i, px) in rgba.chunks_exact(4).enumerate() {
            if px[3] == 0 {
                continue;
            }
            let x = header.left + (i as u32 % header.width.max(1));
            let y = header.top + (i as u32 / header.width.max(1));
            if x < canvas_width && y < canvas_height {
                self.canvas.put_pixel(x, y, Rgba([px[0], px[1], px[2], px[3]]));
            }
        }
    }

    fn dispose_last(&mut self) {
        let Some(last) = self.last.take() else {
            return;
        };
        match last.dispose {
            DisposalMethod::Background => {
                let (canvas_width, canvas_height) = self.canvas.dimensions();
                let right = (last.left + last.width).min(canvas_width);
                let bottom = (last.top + last.height).min(canvas_height);
                for y in last.top..bottom {
                    for x in last.left..right {
                        self.canvas.put_pixel(x, y, Rgba([0, 0, 0, 0]));
                    }
                }
            }
            DisposalMethod::Previous => {
                if let Some(saved) = self.saved.take() {
                    self.canvas = saved;
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::GuardLimits;
    use image::codecs::gif::{GifEncoder, Repeat};
    use image::{Delay, Frame};
    use std::io::Cursor;

    fn encode_gif(frames: Vec<RgbaImage>) -> Vec<u8> {
        let mut bytes = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut bytes);
            encoder.set_repeat(Repeat::Infinite).unwrap();
            for canvas in frames {
                let delay = Delay::from_numer_denom_ms(50, 1);
                encoder
                    .encode_frame(Frame::from_parts(canvas, 0, 0, delay))
                    .unwrap();
            }
        }
        bytes
    }

    fn guard(max_frames: u32) -> DecompressionGuard {
        DecompressionGuard::new(GuardLimits {
            precheck_bytes: u64::MAX,
            hard_pixels: 1_000_000,
            warn_pixels: 1_000_000,
            max_frames,
            max_total_pixels: 1_000_000,
        })
    }

    #[test]
    fn test_reads_every_frame_with_delay() {
        let frames = (0..3u8)
            .map(|i| RgbaImage::from_pixel(6, 4, Rgba([i * 80, 0, 0, 255])))
            .collect();
        let bytes = encode_gif(frames);

        let guard = guard(10);
        let mut budget = guard.frame_budget();
        let mut reader = GifFrameReader::new(Cursor::new(bytes), &guard).unwrap();
        assert_eq!(reader.dimensions(), (6, 4));

        let mut count = 0;
        while let Some(frame) = reader.next_frame(&mut budget).unwrap() {
            assert_eq!(frame.canvas.dimensions(), (6, 4));
            assert_eq!(frame.delay_ms, 50);
            count += 1;
        }
        assert_eq!(count, 3);
        assert_eq!(budget.frames_seen(), 3);
    }

    #[test]
    fn test_decoding_stops_at_frame_cap() {
        let frames = (0..15u8)
            .map(|i| RgbaImage::from_pixel(8, 8, Rgba([i * 10, 0, 0, 255])))
            .collect();
        let bytes = encode_gif(frames);

        let guard = guard(10);
        let mut budget = guard.frame_budget();
        let mut reader = GifFrameReader::new(Cursor::new(bytes), &guard).unwrap();

        let err = loop {
            match reader.next_frame(&mut budget) {
                Ok(Some(_)) => continue,
                Ok(None) => panic!("cap was never hit"),
                Err(e) => break e,
            }
        };

        assert!(matches!(
            err,
            ProcessError::Rejected(Rejection::DecompressionBomb(_))
        ));
        assert_eq!(reader.frames_decoded(), 10);
    }

    #[test]
    fn test_oversized_logical_screen_rejected_before_frames() {
        let bytes = encode_gif(vec![RgbaImage::from_pixel(40, 40, Rgba([1, 1, 1, 255]))]);
        let guard = DecompressionGuard::new(GuardLimits {
            precheck_bytes: u64::MAX,
            hard_pixels: 1_000,
            warn_pixels: 1_000,
            max_frames: 10,
            max_total_pixels: 1_000_000,
        });

        assert!(matches!(
            GifFrameReader::new(Cursor::new(bytes), &guard),
            Err(ProcessError::Rejected(Rejection::DecompressionBomb(_)))
        ));
    }

    /// Two-frame 4x2 GIF drawn from a palette of red, blue and a transparent
    /// index; the first frame is disposed with `first_dispose`.
    fn encode_overlay(first_dispose: DisposalMethod) -> Vec<u8> {
        const RED: u8 = 0;
        const BLUE: u8 = 1;
        const CLEAR: u8 = 2;
        let palette = [255, 0, 0, 0, 0, 255, 0, 0, 0];

        let mut overlay = vec![CLEAR; 8];
        overlay[3] = BLUE;
        overlay[7] = BLUE;

        let mut bytes = Vec::new();
        {
            let mut encoder = gif::Encoder::new(&mut bytes, 4, 2, &palette).unwrap();
            for (pixels, dispose) in [
                (vec![RED; 8], first_dispose),
                (overlay, DisposalMethod::Keep),
            ] {
                let frame = gif::Frame {
                    width: 4,
                    height: 2,
                    delay: 5,
                    dispose,
                    transparent: Some(CLEAR),
                    buffer: pixels.into(),
                    ..gif::Frame::default()
                };
                encoder.write_frame(&frame).unwrap();
            }
        }
        bytes
    }

    fn second_frame(bytes: Vec<u8>) -> RgbaImage {
        let guard = guard(10);
        let mut budget = guard.frame_budget();
        let mut reader = GifFrameReader::new(Cursor::new(bytes), &guard).unwrap();
        reader.next_frame(&mut budget).unwrap().unwrap();
        reader.next_frame(&mut budget).unwrap().unwrap().canvas
    }

    #[test]
    fn test_transparent_pixels_keep_previous_canvas() {
        let canvas = second_frame(encode_overlay(DisposalMethod::Keep));

        assert_eq!(canvas.get_pixel(0, 0), &Rgba([255, 0, 0, 255]));
        assert_eq!(canvas.get_pixel(2, 1), &Rgba([255, 0, 0, 255]));
        assert_eq!(canvas.get_pixel(3, 1), &Rgba([0, 0, 255, 255]));
    }

    #[test]
    fn test_background_disposal_clears_frame_rect() {
        let canvas = second_frame(encode_overlay(DisposalMethod::Background));

        assert_eq!(canvas.get_pixel(0, 0), &Rgba([0, 0, 0, 0]));
        assert_eq!(canvas.get_pixel(2, 1), &Rgba([0, 0, 0, 0]));
        assert_eq!(canvas.get_pixel(3, 0), &Rgba([0, 0, 255, 255]));
    }
}
