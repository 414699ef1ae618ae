use image::{DynamicImage, Rgb, RgbImage, RgbaImage};

/// Bring a decoded frame into one of the three working colour models:
/// Rgba8 when it carries alpha, Luma8 for plain greyscale, Rgb8 otherwise.
pub fn normalize_color(img: DynamicImage) -> DynamicImage {
    match img {
        DynamicImage::ImageRgba8(_) | DynamicImage::ImageRgb8(_) | DynamicImage::ImageLuma8(_) => {
            img
        }
        other if other.color().has_alpha() => DynamicImage::ImageRgba8(other.to_rgba8()),
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    }
}

pub fn is_fully_opaque(img: &RgbaImage) -> bool {
    img.pixels().all(|p| p[3] == u8::MAX)
}

/// Composite an image with alpha onto a white background. Images without
/// alpha are returned untouched.
pub fn flatten_onto_white(img: DynamicImage) -> DynamicImage {
    if !img.color().has_alpha() {
        return img;
    }

    let rgba = img.to_rgba8();
    let blend = |c: u8, a: u32| ((u32::from(c) * a + 255 * (255 - a) + 127) / 255) as u8;
    let flat = RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let p = rgba.get_pixel(x, y);
        let a = u32::from(p[3]);
        Rgb([blend(p[0], a), blend(p[1], a), blend(p[2], a)])
    });
    DynamicImage::ImageRgb8(flat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayAlphaImage, LumaA, Rgba};

    #[test]
    fn test_normalize_grey_alpha_to_rgba() {
        let img = DynamicImage::ImageLumaA8(GrayAlphaImage::from_pixel(2, 2, LumaA([100, 50])));
        let normalized = normalize_color(img);
        assert!(matches!(normalized, DynamicImage::ImageRgba8(_)));
        assert_eq!(
            normalized.as_rgba8().unwrap().get_pixel(0, 0),
            &Rgba([100, 100, 100, 50])
        );
    }

    #[test]
    fn test_normalize_keeps_working_models() {
        let img = DynamicImage::new_luma8(3, 3);
        assert!(matches!(normalize_color(img), DynamicImage::ImageLuma8(_)));

        let img = DynamicImage::new_rgb16(3, 3);
        assert!(matches!(normalize_color(img), DynamicImage::ImageRgb8(_)));
    }

    #[test]
    fn test_flatten_onto_white() {
        let mut rgba = RgbaImage::from_pixel(2, 1, Rgba([0, 0, 0, 0]));
        rgba.put_pixel(1, 0, Rgba([10, 20, 30, 255]));

        let flat = flatten_onto_white(DynamicImage::ImageRgba8(rgba));
        let flat = flat.as_rgb8().unwrap();
        assert_eq!(flat.get_pixel(0, 0), &Rgb([255, 255, 255]));
        assert_eq!(flat.get_pixel(1, 0), &Rgb([10, 20, 30]));
    }

    #[test]
    fn test_opacity_check() {
        let mut rgba = RgbaImage::from_pixel(2, 2, Rgba([1, 2, 3, 255]));
        assert!(is_fully_opaque(&rgba));
        rgba.put_pixel(0, 0, Rgba([1, 2, 3, 254]));
        assert!(!is_fully_opaque(&rgba));
    }
}
