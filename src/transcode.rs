//! Turning a source photo into a size-bounded, optimized JPEG.

use image::{
    imageops::{self, FilterType},
    GenericImageView, RgbImage,
};
use jpeg_encoder::{ColorType, Encoder};
use log::{debug, error, info};
use thiserror::Error;

/// ISO-BMFF major brands used by HEIF/HEIC files.
const HEIF_BRANDS: &[&[u8; 4]] = &[
    b"heic", b"heix", b"hevc", b"hevx", b"heim", b"heis", b"mif1", b"msf1",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("Could not decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("HEIF images can only be decoded when heic2jpg is built with the `heif` feature")]
    HeifUnsupported,

    #[cfg(feature = "heif")]
    #[error("Could not decode HEIF image: {0}")]
    Heif(#[from] libheif_rs::HeifError),

    #[cfg(feature = "heif")]
    #[error("Decoded HEIF image has no interleaved RGB plane")]
    HeifMissingPlane,

    #[error("Image of {width}x{height} is too large to encode as JPEG")]
    TooLarge { width: u32, height: u32 },

    #[error("Could not encode JPEG: {0}")]
    Encode(#[from] jpeg_encoder::EncodingError),
}

/// Decodes `source`, drops it to 8-bit RGB, shrinks it to fit within `max`
/// and encodes it as a JPEG with optimized Huffman tables.
pub fn transcode(source: &[u8], quality: u8, max: Dimensions) -> Result<Vec<u8>, TranscodeError> {
    let result = decode_rgb(source).and_then(|image| {
        let image = shrink_to_fit(image, max);
        encode_jpeg(&image, quality)
    });

    if let Err(err) = &result {
        error!("Error converting image to JPEG: {}", err);
    }

    result
}

/// Computes the size an image of `size` should be scaled to so it fits
/// within `max`, keeping its aspect ratio. Images that already fit are left
/// alone; nothing is ever scaled up.
pub fn fit_within(size: Dimensions, max: Dimensions) -> Dimensions {
    if size.width <= max.width && size.height <= max.height {
        return size;
    }

    let (width, height) = (u64::from(size.width), u64::from(size.height));
    let (max_width, max_height) = (u64::from(max.width), u64::from(max.height));

    // Integer cross-multiplication keeps the rounding exact.
    if max_width * height <= max_height * width {
        Dimensions {
            width: max.width,
            height: (height * max_width / width).max(1) as u32,
        }
    } else {
        Dimensions {
            width: (width * max_height / height).max(1) as u32,
            height: max.height,
        }
    }
}

fn decode_rgb(source: &[u8]) -> Result<RgbImage, TranscodeError> {
    if is_heif(source) {
        return decode_heif(source);
    }

    let image = image::load_from_memory(source)?;
    let (width, height) = image.dimensions();
    debug!(
        "decoded {}x{} image with color type {:?}",
        width,
        height,
        image.color()
    );

    Ok(image.into_rgb8())
}

fn is_heif(source: &[u8]) -> bool {
    if source.len() < 12 || &source[4..8] != b"ftyp" {
        return false;
    }

    HEIF_BRANDS.iter().any(|brand| source[8..12] == brand[..])
}

#[cfg(feature = "heif")]
fn decode_heif(source: &[u8]) -> Result<RgbImage, TranscodeError> {
    use libheif_rs::{ColorSpace, HeifContext, LibHeif, RgbChroma};

    let lib_heif = LibHeif::new();
    let context = HeifContext::read_from_bytes(source)?;
    let handle = context.primary_image_handle()?;
    let image = lib_heif.decode(&handle, ColorSpace::Rgb(RgbChroma::Rgb), None)?;

    let planes = image.planes();
    let Some(plane) = planes.interleaved else {
        return Err(TranscodeError::HeifMissingPlane);
    };

    let row_len = plane.width as usize * 3;
    let mut pixels = Vec::with_capacity(row_len * plane.height as usize);
    for row in plane.data.chunks(plane.stride).take(plane.height as usize) {
        pixels.extend_from_slice(&row[..row_len]);
    }

    debug!("decoded {}x{} HEIF image", plane.width, plane.height);

    RgbImage::from_raw(plane.width, plane.height, pixels).ok_or(TranscodeError::HeifMissingPlane)
}

#[cfg(not(feature = "heif"))]
fn decode_heif(_source: &[u8]) -> Result<RgbImage, TranscodeError> {
    Err(TranscodeError::HeifUnsupported)
}

fn shrink_to_fit(image: RgbImage, max: Dimensions) -> RgbImage {
    let size = Dimensions::new(image.width(), image.height());
    let target = fit_within(size, max);

    if target == size {
        return image;
    }

    let resized = imageops::resize(&image, target.width, target.height, FilterType::Lanczos3);
    info!("Resized image to {}x{}", target.width, target.height);

    resized
}

fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, TranscodeError> {
    let too_large = || TranscodeError::TooLarge {
        width: image.width(),
        height: image.height(),
    };
    let width = u16::try_from(image.width()).map_err(|_| too_large())?;
    let height = u16::try_from(image.height()).map_err(|_| too_large())?;

    let mut encoded = Vec::new();
    let mut encoder = Encoder::new(&mut encoded, quality.clamp(1, 100));
    encoder.set_optimized_huffman_tables(true);
    encoder.encode(image.as_raw(), width, height, ColorType::Rgb)?;

    Ok(encoded)
}

#[cfg(test)]
mod test {
    use super::*;

    use std::io::Cursor;

    use image::{DynamicImage, ImageFormat, ImageOutputFormat, Rgb, Rgba};

    fn png_bytes(image: DynamicImage) -> Vec<u8> {
        let mut buffer = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut buffer), ImageOutputFormat::Png)
            .unwrap();
        buffer
    }

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x ^ y) % 256) as u8])
        }))
    }

    fn decoded_dimensions(jpeg: &[u8]) -> (u32, u32) {
        image::load_from_memory(jpeg).unwrap().dimensions()
    }

    #[test]
    fn images_within_bounds_keep_their_size() {
        let source = png_bytes(gradient(64, 48));

        let jpeg = transcode(&source, 85, Dimensions::new(64, 100)).unwrap();

        assert_eq!(decoded_dimensions(&jpeg), (64, 48));
    }

    #[test]
    fn small_images_are_never_upscaled() {
        let source = png_bytes(gradient(20, 10));

        let jpeg = transcode(&source, 85, Dimensions::new(1920, 1080)).unwrap();

        assert_eq!(decoded_dimensions(&jpeg), (20, 10));
    }

    #[test]
    fn oversize_images_fit_the_binding_axis() {
        let source = png_bytes(gradient(400, 300));

        let jpeg = transcode(&source, 85, Dimensions::new(200, 100)).unwrap();

        assert_eq!(decoded_dimensions(&jpeg), (133, 100));
    }

    #[test]
    fn wide_images_are_bound_by_width() {
        let source = png_bytes(gradient(300, 100));

        let jpeg = transcode(&source, 85, Dimensions::new(150, 150)).unwrap();

        assert_eq!(decoded_dimensions(&jpeg), (150, 50));
    }

    #[test]
    fn fit_within_preserves_aspect_ratio() {
        let max = Dimensions::new(1920, 1080);
        let cases = [(4032, 3024), (3024, 4032), (1921, 1080), (1920, 1081), (5000, 17)];

        for (width, height) in cases {
            let fitted = fit_within(Dimensions::new(width, height), max);

            assert!(fitted.width <= max.width && fitted.height <= max.height);
            assert!(fitted.width == max.width || fitted.height == max.height);

            // Compare aspect ratios to within one pixel of rounding.
            let expected_height = f64::from(fitted.width) * f64::from(height) / f64::from(width);
            assert!((expected_height - f64::from(fitted.height)).abs() <= 1.0);
        }

        assert_eq!(
            fit_within(Dimensions::new(4032, 3024), max),
            Dimensions::new(1440, 1080)
        );
    }

    #[test]
    fn fit_within_never_collapses_to_zero() {
        let fitted = fit_within(Dimensions::new(10_000, 1), Dimensions::new(100, 100));
        assert_eq!(fitted, Dimensions::new(100, 1));
    }

    #[test]
    fn non_rgb_images_become_rgb_jpegs() {
        let rgba = DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
            16,
            16,
            Rgba([10, 200, 30, 128]),
        ));
        let gray = DynamicImage::ImageLuma8(image::GrayImage::from_pixel(16, 16, image::Luma([90])));

        for source in [png_bytes(rgba), png_bytes(gray)] {
            let jpeg = transcode(&source, 85, Dimensions::new(100, 100)).unwrap();

            assert_eq!(image::guess_format(&jpeg).unwrap(), ImageFormat::Jpeg);
            let decoded = image::load_from_memory(&jpeg).unwrap();
            assert_eq!(decoded.color(), image::ColorType::Rgb8);
        }
    }

    #[test]
    fn lower_quality_produces_smaller_output() {
        let source = png_bytes(gradient(128, 128));

        let high = transcode(&source, 95, Dimensions::new(1920, 1080)).unwrap();
        let low = transcode(&source, 10, Dimensions::new(1920, 1080)).unwrap();

        assert!(low.len() < high.len());
    }

    #[test]
    fn undecodable_bytes_are_a_decode_error() {
        let err = transcode(b"mock_heic_data_for_testing", 85, Dimensions::new(10, 10))
            .unwrap_err();

        assert!(matches!(err, TranscodeError::Decode(_)));
    }

    #[test]
    fn sniffs_heif_brands() {
        let mut header = vec![0, 0, 0, 24];
        header.extend_from_slice(b"ftypheic");
        header.extend_from_slice(&[0; 12]);

        assert!(is_heif(&header));
        assert!(!is_heif(b"\x89PNG\r\n\x1a\n0000"));
        assert!(!is_heif(b"ftyp"));
    }

    #[cfg(feature = "heif")]
    #[test]
    fn heif_sources_go_through_libheif() {
        let mut header = vec![0, 0, 0, 24];
        header.extend_from_slice(b"ftypheic");
        header.extend_from_slice(&[0, 0, 0, 0]);
        header.extend_from_slice(b"mif1heic");

        // A bare ftyp box has no image in it, but libheif is the one saying so.
        let err = transcode(&header, 85, Dimensions::new(1920, 1080)).unwrap_err();
        assert!(matches!(err, TranscodeError::Heif(_)), "got {err:?}");
    }

    #[cfg(not(feature = "heif"))]
    #[test]
    fn heif_needs_the_feature() {
        let mut header = vec![0, 0, 0, 24];
        header.extend_from_slice(b"ftypmif1");
        header.extend_from_slice(&[0; 12]);

        let err = transcode(&header, 85, Dimensions::new(10, 10)).unwrap_err();
        assert!(matches!(err, TranscodeError::HeifUnsupported));
    }
}
