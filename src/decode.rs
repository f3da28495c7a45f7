//! Image decode primitive used by the thumbnail loader.
//!
//! The loader only talks to [`ImageSource`]: probe the native size, read
//! (optionally pre-scaled), rescale. [`CodecSource`] is the real codec;
//! tests plug in fakes.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, GrayImage, ImageBuffer, ImageDecoder, ImageReader, Luma, RgbImage};
use jpeg_decoder::PixelFormat;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("decode: {0}")]
    Image(#[from] image::ImageError),
    #[error("jpeg: {0}")]
    Jpeg(#[from] jpeg_decoder::Error),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("image has no pixels")]
    Empty,
}

/// What a cheap header probe tells us.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceInfo {
    pub width: u32,
    pub height: u32,
    pub orientation: Orientation,
}

pub trait ImageSource: Send + Sync + 'static {
    /// Native dimensions and orientation, without decoding pixels.
    fn probe(&self, path: &Path) -> Result<SourceInfo, DecodeError>;

    /// Decode the file. `hint` is the reduced size the caller wants; codecs
    /// that can decode at lower resolution use it, others ignore it.
    fn read(&self, path: &Path, hint: Option<(u32, u32)>) -> Result<DynamicImage, DecodeError>;

    /// Precise pass: fit `img` inside `max_side` x `max_side`, keeping aspect.
    fn rescale(&self, img: DynamicImage, max_side: u32) -> DynamicImage {
        img.resize(max_side, max_side, FilterType::Triangle)
    }
}

/// Size that fits `width` x `height` inside a `max_side` square, or `None`
/// when the image already fits.
pub fn fit_within(width: u32, height: u32, max_side: u32) -> Option<(u32, u32)> {
    if width == 0 || height == 0 {
        return None;
    }
    let max_side = max_side.max(1);
    let scale = f64::min(
        max_side as f64 / width as f64,
        max_side as f64 / height as f64,
    );
    if scale >= 1.0 {
        return None;
    }
    let w = ((width as f64 * scale) as u32).max(1);
    let h = ((height as f64 * scale) as u32).max(1);
    Some((w, h))
}

/// `image` crate for everything, `jpeg-decoder` for DCT-scaled JPEG reads.
#[derive(Clone, Copy, Debug, Default)]
pub struct CodecSource;

impl ImageSource for CodecSource {
    fn probe(&self, path: &Path) -> Result<SourceInfo, DecodeError> {
        let mut decoder = ImageReader::open(path)?
            .with_guessed_format()?
            .into_decoder()?;
        let (width, height) = decoder.dimensions();
        if width == 0 || height == 0 {
            return Err(DecodeError::Empty);
        }
        let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
        Ok(SourceInfo {
            width,
            height,
            orientation,
        })
    }

    fn read(&self, path: &Path, hint: Option<(u32, u32)>) -> Result<DynamicImage, DecodeError> {
        if let Some((w, h)) = hint {
            if is_jpeg(path) {
                match read_jpeg_scaled(path, w, h) {
                    Ok(img) => return Ok(img),
                    Err(DecodeError::Unsupported(why)) => {
                        log::debug!("scaled jpeg read skipped ({}): {}", why, path.display());
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(ImageReader::open(path)?.with_guessed_format()?.decode()?)
    }
}

fn is_jpeg(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("jpg") || e.eq_ignore_ascii_case("jpeg"))
        .unwrap_or(false)
}

fn clamp_u16(v: u32) -> u16 {
    v.clamp(1, u16::MAX as u32) as u16
}

/// Decode a JPEG at the smallest DCT scale (1/8..1) that still covers
/// `w` x `h`. CMYK is left to the full decoder.
fn read_jpeg_scaled(path: &Path, w: u32, h: u32) -> Result<DynamicImage, DecodeError> {
    let mut decoder = jpeg_decoder::Decoder::new(BufReader::new(File::open(path)?));
    decoder.scale(clamp_u16(w), clamp_u16(h))?;
    let info = decoder.info().ok_or(DecodeError::Empty)?;
    if info.pixel_format == PixelFormat::CMYK32 {
        return Err(DecodeError::Unsupported("cmyk".into()));
    }
    let pixels = decoder.decode()?;
    let (width, height) = (info.width as u32, info.height as u32);

    let img = match info.pixel_format {
        PixelFormat::L8 => GrayImage::from_raw(width, height, pixels).map(DynamicImage::ImageLuma8),
        PixelFormat::L16 => {
            let wide: Vec<u16> = pixels
                .chunks_exact(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]))
                .collect();
            ImageBuffer::<Luma<u16>, _>::from_raw(width, height, wide)
                .map(DynamicImage::ImageLuma16)
        }
        PixelFormat::RGB24 => RgbImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgb8),
        _ => None,
    };
    img.ok_or(DecodeError::Empty)
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── fit_within ──────────────────────────────────────────────────────

    #[test]
    fn fit_landscape() {
        assert_eq!(fit_within(400, 200, 100), Some((100, 50)));
    }

    #[test]
    fn fit_portrait() {
        assert_eq!(fit_within(300, 600, 120), Some((60, 120)));
    }

    #[test]
    fn fit_already_small() {
        assert_eq!(fit_within(80, 40, 120), None);
        assert_eq!(fit_within(120, 120, 120), None);
    }

    #[test]
    fn fit_never_zero() {
        assert_eq!(fit_within(10_000, 1, 100), Some((100, 1)));
    }

    #[test]
    fn fit_degenerate_input() {
        assert_eq!(fit_within(0, 100, 50), None);
        assert_eq!(fit_within(100, 0, 50), None);
    }

    // ── CodecSource ─────────────────────────────────────────────────────

    #[test]
    fn probe_png() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("a.png");
        RgbImage::new(40, 30).save(&p).unwrap();
        let info = CodecSource.probe(&p).unwrap();
        assert_eq!((info.width, info.height), (40, 30));
        assert_eq!(info.orientation, Orientation::NoTransforms);
    }

    #[test]
    fn probe_garbage_fails() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("broken.png");
        std::fs::write(&p, b"definitely not a png").unwrap();
        assert!(CodecSource.probe(&p).is_err());
    }

    #[test]
    fn probe_missing_is_io_error() {
        let err = CodecSource.probe(Path::new("/no/such/file.png")).unwrap_err();
        assert!(matches!(err, DecodeError::Io(_)));
    }

    #[test]
    fn jpeg_read_uses_dct_scaling() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("big.jpg");
        RgbImage::from_pixel(800, 600, image::Rgb([200, 10, 10]))
            .save(&p)
            .unwrap();
        let img = CodecSource.read(&p, Some((100, 75))).unwrap();
        // 1/8 scale is exactly 100x75
        assert_eq!((img.width(), img.height()), (100, 75));
    }

    #[test]
    fn read_without_hint_is_full_size() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("full.jpg");
        RgbImage::new(64, 48).save(&p).unwrap();
        let img = CodecSource.read(&p, None).unwrap();
        assert_eq!((img.width(), img.height()), (64, 48));
    }

    #[test]
    fn default_rescale_keeps_aspect() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(300, 150));
        let out = CodecSource.rescale(img, 100);
        assert_eq!((out.width(), out.height()), (100, 50));
    }
}
