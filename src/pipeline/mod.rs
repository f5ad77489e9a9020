//! The scan pipeline stages.
//!
//! Each stage is an independent module with a narrow interface; the
//! orchestrator in [`crate::scan`] sequences them:
//!
//! 1. [`normalize`] — decode, validate, and preprocess the upload.
//! 2. [`rotation`] — pick the orientation that reads best (OSD + retries).
//! 3. [`extract`] — OCR lines to title candidates, rules first, vision
//!    fallback when the rules come up short.
//! 4. [`resolve`] — fuzzy-match candidates against the book catalog.
//!
//! The OCR seam ([`ocr::OcrEngine`]) and its tesseract implementation
//! ([`tesseract`], behind the `tesseract` feature) live here too.

pub mod extract;
pub mod normalize;
pub mod ocr;
pub mod resolve;
pub mod rotation;
#[cfg(feature = "tesseract")]
pub mod tesseract;
