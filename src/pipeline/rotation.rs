//! Rotation resolution: find the orientation at which OCR reads best.
//!
//! Spine text on shelf photos is usually sideways, and orientation/script
//! detection (OSD) alone misjudges sparse or stylised text. The resolver is
//! a small state machine over an [`OcrEngine`]:
//!
//! ```text
//! initial ──▶ osd_detect ──▶ primary_ocr ──▶ fallback_retry ──▶ done
//!                (estimate)    (1 pass)       (≤ 2 extra passes,
//!                                              only when confidence is low)
//! ```
//!
//! Fallback tries +90° before +270° because top-to-bottom spine text (the
//! dominant shelving convention) photographs as a 90° rotation. 180° is
//! never retried — upside-down shelving is rare enough that the extra OCR
//! pass on every low-confidence scan costs more than the misses.
//! Worst case: 4 engine passes (OSD + primary + 2 fallbacks).

use crate::config::{RotationMode, ScanConfig};
use crate::output::RotationReport;
use crate::pipeline::normalize::NormalizedImage;
use crate::pipeline::ocr::{OcrEngine, OcrOutcome, OrientationEstimate, Rotation};
use std::time::Instant;
use tracing::{debug, info, warn};

/// The winning attempt: rotation, its image, and what OCR read there.
pub struct RotationOutcome {
    /// Total clockwise correction relative to the input image.
    pub rotation: Rotation,
    /// The image at the winning orientation, ready for the vision fallback.
    pub image: NormalizedImage,
    /// OCR output at the winning orientation.
    pub ocr: OcrOutcome,
    pub report: RotationReport,
}

/// Orientations retried when the primary pass reads poorly, in priority
/// order, relative to the OSD-corrected image.
const FALLBACK_ROTATIONS: [Rotation; 2] = [Rotation::Cw90, Rotation::Cw270];

/// Run OSD, primary OCR, and (mode permitting) fallback retries, keeping the
/// globally best-confidence attempt.
///
/// Engine failures degrade: a failed OSD becomes "unknown", a failed
/// recognition pass becomes an empty zero-confidence outcome. The resolver
/// itself never fails a scan.
pub async fn resolve<E: OcrEngine + ?Sized>(
    engine: &E,
    image: NormalizedImage,
    config: &ScanConfig,
) -> RotationOutcome {
    let start = Instant::now();
    let mode = config.rotation_mode;

    if mode == RotationMode::Disabled {
        let ocr = recognize_or_empty(engine, &image).await;
        let report = RotationReport {
            mode,
            final_angle_degrees: 0,
            osd_angle_degrees: None,
            osd_confidence: None,
            attempts: 1,
            angles_tried: vec![0],
            best_confidence: ocr.mean_confidence,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        return RotationOutcome {
            rotation: Rotation::None,
            image,
            ocr,
            report,
        };
    }

    // ── osd_detect ───────────────────────────────────────────────────────
    let estimate = match engine.detect_orientation(&image).await {
        Ok(estimate) => estimate,
        Err(e) => {
            warn!("OSD detection failed: {e}");
            OrientationEstimate::unknown()
        }
    };
    debug!(
        "OSD estimate: {}°, confidence {:.2}",
        estimate.rotation.degrees(),
        estimate.confidence
    );

    // ── primary_ocr ──────────────────────────────────────────────────────
    let base_rotation = estimate.rotation;
    let base_image = if base_rotation == Rotation::None {
        image
    } else {
        info!(
            "Rotating image by {}° (OSD confidence: {:.2})",
            base_rotation.degrees(),
            estimate.confidence
        );
        image.rotated(base_rotation)
    };
    let primary = recognize_or_empty(engine, &base_image).await;

    let mut attempts = 1u32;
    let mut angles_tried = vec![base_rotation.degrees()];
    let mut best_rotation = base_rotation;
    let mut best_image = base_image.clone();
    let mut best_ocr = primary;

    // ── fallback_retry ───────────────────────────────────────────────────
    let threshold = f64::from(config.rotation_confidence_threshold);
    if mode == RotationMode::OsdFallback && best_ocr.mean_confidence < threshold {
        info!(
            "OCR confidence {:.2} below threshold {:.2}, trying fallback rotations",
            best_ocr.mean_confidence, threshold
        );
        for extra in FALLBACK_ROTATIONS {
            let candidate_rotation = base_rotation.then(extra);
            let candidate_image = base_image.rotated(extra);
            let outcome = recognize_or_empty(engine, &candidate_image).await;
            attempts += 1;
            angles_tried.push(candidate_rotation.degrees());
            debug!(
                "Rotation {}°: confidence {:.2}",
                candidate_rotation.degrees(),
                outcome.mean_confidence
            );
            if outcome.mean_confidence > best_ocr.mean_confidence {
                best_rotation = candidate_rotation;
                best_image = candidate_image;
                best_ocr = outcome;
            }
        }
    }

    // ── done ─────────────────────────────────────────────────────────────
    let report = RotationReport {
        mode,
        final_angle_degrees: best_rotation.degrees(),
        osd_angle_degrees: Some(estimate.rotation.degrees()),
        osd_confidence: Some(estimate.confidence),
        attempts,
        angles_tried,
        best_confidence: best_ocr.mean_confidence,
        duration_ms: start.elapsed().as_millis() as u64,
    };
    info!(
        "Rotation resolved: mode={:?}, final_angle={}°, confidence={:.2}, attempts={}, {}ms",
        mode,
        report.final_angle_degrees,
        report.best_confidence,
        report.attempts,
        report.duration_ms
    );

    RotationOutcome {
        rotation: best_rotation,
        image: best_image,
        ocr: best_ocr,
        report,
    }
}

async fn recognize_or_empty<E: OcrEngine + ?Sized>(
    engine: &E,
    image: &NormalizedImage,
) -> OcrOutcome {
    match engine.recognize(image).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!("OCR pass failed, treating as empty: {e}");
            OcrOutcome::default()
        }
    }
}
