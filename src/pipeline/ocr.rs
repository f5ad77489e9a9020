//! The OCR seam: line-level recognition plus orientation detection.
//!
//! The pipeline never talks to a concrete OCR engine directly. Everything it
//! needs is behind [`OcrEngine`]: line-level text with confidences, and an
//! optional orientation estimate. The tesseract-backed implementation lives
//! in [`crate::pipeline::tesseract`] behind the `tesseract` feature; tests
//! drive the pipeline with scripted engines.

use crate::error::StageError;
use crate::pipeline::normalize::NormalizedImage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A clockwise rotation in 90° steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    None,
    Cw90,
    Cw180,
    Cw270,
}

impl Rotation {
    pub fn degrees(self) -> u16 {
        match self {
            Rotation::None => 0,
            Rotation::Cw90 => 90,
            Rotation::Cw180 => 180,
            Rotation::Cw270 => 270,
        }
    }

    /// Snap an arbitrary degree value (as reported by OSD) to a step.
    ///
    /// Values that are not multiples of 90 round to the nearest step; OSD
    /// backends only ever report multiples in practice.
    pub fn from_degrees(degrees: i32) -> Self {
        let normalized = degrees.rem_euclid(360);
        match (normalized + 45) / 90 % 4 {
            1 => Rotation::Cw90,
            2 => Rotation::Cw180,
            3 => Rotation::Cw270,
            _ => Rotation::None,
        }
    }

    /// Compose two rotations (mod 360).
    pub fn then(self, other: Rotation) -> Self {
        Self::from_degrees(i32::from(self.degrees()) + i32::from(other.degrees()))
    }
}

/// One recognised text line with its mean word confidence in `[0,1]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrLine {
    pub text: String,
    pub confidence: f64,
}

/// The result of one recognition pass.
#[derive(Debug, Clone, Default)]
pub struct OcrOutcome {
    /// Recognised lines in reading order.
    pub lines: Vec<OcrLine>,
    /// The full recognised text, newline-joined.
    pub text: String,
    /// Mean word confidence across the whole image, in `[0,1]`.
    pub mean_confidence: f64,
}

impl OcrOutcome {
    /// Build an outcome from lines, deriving text and mean confidence.
    pub fn from_lines(lines: Vec<OcrLine>) -> Self {
        let text = lines
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let mean_confidence = if lines.is_empty() {
            0.0
        } else {
            lines.iter().map(|l| l.confidence).sum::<f64>() / lines.len() as f64
        };
        Self {
            lines,
            text,
            mean_confidence,
        }
    }
}

/// An orientation estimate from script detection.
#[derive(Debug, Clone, Copy)]
pub struct OrientationEstimate {
    pub rotation: Rotation,
    /// Estimate confidence in `[0,1]`; 0 means "no idea".
    pub confidence: f64,
}

impl OrientationEstimate {
    /// The estimate an engine without OSD support returns: upright, no
    /// confidence. The rotation resolver treats it as "proceed and let the
    /// fallback retries sort it out".
    pub fn unknown() -> Self {
        Self {
            rotation: Rotation::None,
            confidence: 0.0,
        }
    }
}

/// Line-level OCR with optional orientation detection.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Recognise text in the image.
    async fn recognize(&self, image: &NormalizedImage) -> Result<OcrOutcome, StageError>;

    /// Estimate how the image is rotated.
    ///
    /// The default implementation reports [`OrientationEstimate::unknown`],
    /// which is correct for engines without script detection.
    async fn detect_orientation(
        &self,
        _image: &NormalizedImage,
    ) -> Result<OrientationEstimate, StageError> {
        Ok(OrientationEstimate::unknown())
    }
}
