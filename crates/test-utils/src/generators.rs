//! Synthetic texture images.
//!
//! Images are small gradients so that decoding, resizing and re-encoding can
//! be verified without shipping binary fixtures.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};

/// Creates an RGBA gradient image.
///
/// Red grows left to right, green top to bottom, blue is constant and alpha
/// is opaque.
pub fn create_gradient_image(width: u32, height: u32) -> DynamicImage {
    let mut img = RgbaImage::new(width, height);
    for (x, y, pixel) in img.enumerate_pixels_mut() {
        *pixel = Rgba([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            128,
            255,
        ]);
    }
    DynamicImage::ImageRgba8(img)
}

/// Encodes a gradient image in the given format.
///
/// # Panics
///
/// Panics if the format has no encoder enabled in the `image` crate.
pub fn create_test_image(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let img = create_gradient_image(width, height);
    // JPEG has no alpha channel
    let img = if format == ImageFormat::Jpeg {
        DynamicImage::ImageRgb8(img.to_rgb8())
    } else {
        img
    };

    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, format)
        .expect("test image encoding should not fail");
    out.into_inner()
}

/// PNG-encoded gradient.
pub fn create_test_png(width: u32, height: u32) -> Vec<u8> {
    create_test_image(width, height, ImageFormat::Png)
}

/// JPEG-encoded gradient.
pub fn create_test_jpeg(width: u32, height: u32) -> Vec<u8> {
    create_test_image(width, height, ImageFormat::Jpeg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_png_round_trips_dimensions() {
        let bytes = create_test_png(40, 20);
        let img = image::load_from_memory(&bytes).unwrap();
        assert_eq!((img.width(), img.height()), (40, 20));
    }

    #[test]
    fn test_jpeg_has_jpeg_magic() {
        let bytes = create_test_jpeg(16, 16);
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }
}
