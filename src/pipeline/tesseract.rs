//! Tesseract-backed [`OcrEngine`] via the system `tesseract` binary.
//!
//! Only compiled with the `tesseract` feature. The implementation shells out
//! through `rusty-tesseract` rather than linking libtesseract, so the crate
//! builds everywhere and the binary is a runtime requirement only where real
//! OCR is wanted.
//!
//! Tesseract reads from the filesystem, so each call writes the normalised
//! image to a managed temp file that is cleaned up on drop. The CLI call is
//! blocking; it runs under `spawn_blocking` to keep the scan task honest.

use crate::error::StageError;
use crate::pipeline::normalize::NormalizedImage;
use crate::pipeline::ocr::{OcrEngine, OcrLine, OcrOutcome, OrientationEstimate, Rotation};
use async_trait::async_trait;
use rusty_tesseract::{Args, Image};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

/// OCR engine backed by the system tesseract installation.
pub struct TesseractEngine {
    lang: String,
}

impl TesseractEngine {
    pub fn new() -> Self {
        Self::with_language("eng")
    }

    pub fn with_language(lang: impl Into<String>) -> Self {
        Self { lang: lang.into() }
    }

    fn args(&self, psm: Option<i32>) -> Args {
        Args {
            lang: self.lang.clone(),
            config_variables: HashMap::new(),
            dpi: Some(300),
            psm,
            oem: Some(3),
        }
    }

    /// Write the image to a temp PNG and run `f` on its path.
    async fn with_temp_png<T, F>(&self, image: &NormalizedImage, f: F) -> Result<T, StageError>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> Result<T, StageError> + Send + 'static,
    {
        let png = image.to_png_bytes().map_err(|e| StageError::Ocr(e.to_string()))?;
        tokio::task::spawn_blocking(move || {
            let file = tempfile::Builder::new()
                .suffix(".png")
                .tempfile()
                .map_err(|e| StageError::Ocr(format!("temp file: {e}")))?;
            std::fs::write(file.path(), &png)
                .map_err(|e| StageError::Ocr(format!("temp file write: {e}")))?;
            f(file.path())
        })
        .await
        .map_err(|e| StageError::Ocr(format!("blocking task: {e}")))?
    }
}

impl Default for TesseractEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    async fn recognize(&self, image: &NormalizedImage) -> Result<OcrOutcome, StageError> {
        let args = self.args(None);
        let data = self
            .with_temp_png(image, move |path| {
                let img = Image::from_path(path)
                    .map_err(|e| StageError::Ocr(format!("image load: {e:?}")))?;
                rusty_tesseract::image_to_data(&img, &args)
                    .map_err(|e| StageError::Ocr(format!("tesseract: {e:?}")))
            })
            .await?;

        // Group word boxes into lines; tesseract numbers lines per
        // (block, paragraph), so the composite key is required to avoid
        // merging unrelated lines that share a line_num.
        let mut lines: Vec<OcrLine> = Vec::new();
        let mut current_key: Option<(i32, i32, i32)> = None;
        let mut words: Vec<String> = Vec::new();
        let mut confs: Vec<f64> = Vec::new();

        let mut flush =
            |words: &mut Vec<String>, confs: &mut Vec<f64>, lines: &mut Vec<OcrLine>| {
                if !words.is_empty() {
                    let confidence = confs.iter().sum::<f64>() / confs.len() as f64 / 100.0;
                    lines.push(OcrLine {
                        text: words.join(" "),
                        confidence: confidence.clamp(0.0, 1.0),
                    });
                    words.clear();
                    confs.clear();
                }
            };

        for word in &data.data {
            let text = word.text.trim();
            if text.is_empty() || word.conf < 0.0 {
                continue;
            }
            let key = (word.block_num, word.par_num, word.line_num);
            if current_key != Some(key) {
                flush(&mut words, &mut confs, &mut lines);
                current_key = Some(key);
            }
            words.push(text.to_string());
            confs.push(f64::from(word.conf));
        }
        flush(&mut words, &mut confs, &mut lines);

        debug!("Tesseract recognised {} lines", lines.len());
        Ok(OcrOutcome::from_lines(lines))
    }

    async fn detect_orientation(
        &self,
        image: &NormalizedImage,
    ) -> Result<OrientationEstimate, StageError> {
        // PSM 0 is tesseract's OSD-only mode: no recognition, just
        // orientation and script estimates printed as key-value lines.
        let args = self.args(Some(0));
        let result = self
            .with_temp_png(image, move |path| {
                let img = Image::from_path(path)
                    .map_err(|e| StageError::Ocr(format!("image load: {e:?}")))?;
                rusty_tesseract::image_to_string(&img, &args)
                    .map_err(|e| StageError::Ocr(format!("tesseract osd: {e:?}")))
            })
            .await;

        match result {
            Ok(output) => Ok(parse_osd_output(&output)),
            Err(e) => {
                // OSD routinely fails on low-text images; that is a shrug,
                // not an error — the fallback retries cover it.
                warn!("OSD detection failed: {e}");
                Ok(OrientationEstimate::unknown())
            }
        }
    }
}

/// Parse tesseract's `--psm 0` key-value output.
///
/// Relevant lines look like:
/// ```text
/// Rotate: 90
/// Orientation confidence: 12.76
/// ```
/// `Rotate` is the clockwise correction to apply. Confidence is an open-ended
/// score; it is normalised by 100 and clamped into `[0,1]`.
fn parse_osd_output(output: &str) -> OrientationEstimate {
    let mut rotation = Rotation::None;
    let mut confidence = 0.0_f64;

    for line in output.lines() {
        if let Some(value) = line.strip_prefix("Rotate:") {
            if let Ok(degrees) = value.trim().parse::<i32>() {
                rotation = Rotation::from_degrees(degrees);
            }
        } else if let Some(value) = line.strip_prefix("Orientation confidence:") {
            if let Ok(raw) = value.trim().parse::<f64>() {
                confidence = (raw / 100.0).clamp(0.0, 1.0);
            }
        }
    }

    OrientationEstimate {
        rotation,
        confidence,
    }
}
