//! Image normalisation: raw upload bytes → a canonical OCR-ready image.
//!
//! Shelf photos arrive as compressed phone JPEGs with uneven lighting and
//! small text. Recognition quality improves markedly on a grayscale,
//! contrast-boosted, sharpened image at a minimum pixel size, so every scan
//! pays this fixed preprocessing cost up front. Everything in this module is
//! a pure function of its input — the normalised image lives exactly as long
//! as the request that produced it.

use crate::config::ScanConfig;
use crate::error::ScanError;
use crate::pipeline::ocr::Rotation;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::imageops::FilterType;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// A decoded, preprocessed image at a fixed orientation.
#[derive(Clone)]
pub struct NormalizedImage {
    image: DynamicImage,
}

impl NormalizedImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn as_dynamic(&self) -> &DynamicImage {
        &self.image
    }

    /// Return a copy rotated clockwise by the given step.
    ///
    /// 90°-step rotations are lossless pixel shuffles; no resampling happens
    /// here, so repeated attempts in the rotation resolver never degrade the
    /// image they re-read.
    pub fn rotated(&self, rotation: Rotation) -> Self {
        let image = match rotation {
            Rotation::None => self.image.clone(),
            Rotation::Cw90 => self.image.rotate90(),
            Rotation::Cw180 => self.image.rotate180(),
            Rotation::Cw270 => self.image.rotate270(),
        };
        Self { image }
    }

    /// Encode as PNG for a provider payload.
    ///
    /// PNG over JPEG: lossless compression preserves text crispness, and
    /// vision models are notably worse at reading spine text through JPEG
    /// artefacts.
    pub fn to_png_bytes(&self) -> Result<Vec<u8>, ScanError> {
        let mut buf = Vec::new();
        self.image
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .map_err(|e| ScanError::Internal(format!("PNG encoding failed: {e}")))?;
        Ok(buf)
    }

    /// Base64 PNG ready for a data-URI in a provider request body.
    pub fn to_png_base64(&self) -> Result<String, ScanError> {
        let bytes = self.to_png_bytes()?;
        let b64 = STANDARD.encode(&bytes);
        debug!("Encoded image -> {} bytes base64", b64.len());
        Ok(b64)
    }
}

/// Decode and validate raw upload bytes.
///
/// # Errors
/// [`ScanError::ImageTooLarge`] above the configured ceiling, otherwise
/// [`ScanError::InvalidImage`] for empty input, a non-image content type, or
/// bytes the decoder rejects.
pub fn decode_image(
    bytes: &[u8],
    content_type: &str,
    config: &ScanConfig,
) -> Result<DynamicImage, ScanError> {
    if !content_type.starts_with("image/") {
        return Err(ScanError::InvalidImage {
            content_type: content_type.to_string(),
            reason: "content type is not image/*".to_string(),
        });
    }
    if bytes.is_empty() {
        return Err(ScanError::InvalidImage {
            content_type: content_type.to_string(),
            reason: "empty upload".to_string(),
        });
    }
    if bytes.len() > config.max_image_bytes {
        return Err(ScanError::ImageTooLarge {
            size: bytes.len(),
            max: config.max_image_bytes,
        });
    }

    image::load_from_memory(bytes).map_err(|e| ScanError::InvalidImage {
        content_type: content_type.to_string(),
        reason: e.to_string(),
    })
}

/// Preprocess a decoded image for recognition.
///
/// Grayscale → contrast boost → unsharp mask → Lanczos3 upscale when either
/// dimension is under [`ScanConfig::min_dimension_px`].
pub fn preprocess(image: DynamicImage, config: &ScanConfig) -> NormalizedImage {
    let (orig_w, orig_h) = (image.width(), image.height());

    // Contrast/sharpen values tuned on spine text: enough to separate
    // lettering from cloth and gloss, not enough to halo serif edges.
    let mut image = image.grayscale().adjust_contrast(30.0).unsharpen(1.0, 3);

    let min_px = config.min_dimension_px;
    if image.width() < min_px || image.height() < min_px {
        let scale = f64::max(
            min_px as f64 / image.width() as f64,
            min_px as f64 / image.height() as f64,
        );
        let new_w = (image.width() as f64 * scale).round() as u32;
        let new_h = (image.height() as f64 * scale).round() as u32;
        image = image.resize(new_w, new_h, FilterType::Lanczos3);
    }

    debug!(
        "Normalised image {}x{} -> {}x{}",
        orig_w,
        orig_h,
        image.width(),
        image.height()
    );

    NormalizedImage { image }
}

/// Decode, validate, and preprocess in one step.
pub fn normalize(
    bytes: &[u8],
    content_type: &str,
    config: &ScanConfig,
) -> Result<NormalizedImage, ScanError> {
    let decoded = decode_image(bytes, content_type, config)?;
    Ok(preprocess(decoded, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([120, 80, 200])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn rejects_non_image_content_type() {
        let config = ScanConfig::default();
        let err = decode_image(&png_bytes(4, 4), "application/pdf", &config).unwrap_err();
        assert!(matches!(err, ScanError::InvalidImage { .. }));
    }

    #[test]
    fn rejects_empty_and_garbage_bytes() {
        let config = ScanConfig::default();
        assert!(matches!(
            decode_image(&[], "image/png", &config),
            Err(ScanError::InvalidImage { .. })
        ));
        assert!(matches!(
            decode_image(b"not an image at all", "image/png", &config),
            Err(ScanError::InvalidImage { .. })
        ));
    }

    #[test]
    fn rejects_oversized_upload() {
        let config = ScanConfig::builder().max_image_bytes(1024).build().unwrap();
        let bytes = png_bytes(200, 200);
        assert!(bytes.len() > 1024);
        assert!(matches!(
            decode_image(&bytes, "image/png", &config),
            Err(ScanError::ImageTooLarge { .. })
        ));
    }

    #[test]
    fn small_images_are_upscaled_to_floor() {
        let config = ScanConfig::default();
        let normalized = normalize(&png_bytes(100, 50), "image/png", &config).unwrap();
        assert!(normalized.width() >= 1000 || normalized.height() >= 1000);
        // Aspect ratio preserved within rounding.
        let ratio = normalized.width() as f64 / normalized.height() as f64;
        assert!((ratio - 2.0).abs() < 0.05, "ratio = {ratio}");
    }

    #[test]
    fn large_images_pass_through_unscaled() {
        let config = ScanConfig::default();
        let normalized = normalize(&png_bytes(1200, 1600), "image/png", &config).unwrap();
        assert_eq!(normalized.width(), 1200);
        assert_eq!(normalized.height(), 1600);
    }

    #[test]
    fn rotation_swaps_dimensions() {
        let config = ScanConfig::default();
        let normalized = normalize(&png_bytes(1200, 1600), "image/png", &config).unwrap();
        let rotated = normalized.rotated(Rotation::Cw90);
        assert_eq!(rotated.width(), 1600);
        assert_eq!(rotated.height(), 1200);
        let back = rotated.rotated(Rotation::Cw270);
        assert_eq!(back.width(), 1200);
    }

    #[test]
    fn png_base64_is_decodable() {
        let config = ScanConfig::default();
        let normalized = normalize(&png_bytes(1100, 1100), "image/png", &config).unwrap();
        let b64 = normalized.to_png_base64().unwrap();
        let decoded = STANDARD.decode(b64).unwrap();
        assert_eq!(&decoded[1..4], b"PNG");
    }
}
