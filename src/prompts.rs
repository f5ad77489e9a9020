//! Prompts for the intelligence providers.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — tightening an extraction rule or the
//!    scoring rubric is a one-place edit applied to every provider.
//!
//! 2. **Testability** — unit tests inspect prompts directly without calling
//!    a real provider, so prompt regressions are caught cheaply.
//!
//! All prompts demand JSON-only responses; the providers share one repair +
//! parse path for the (frequent) cases where a model disobeys.

use crate::book::{ProfileBook, ResolvedBook};

/// Vision prompt: read book titles off a shelf photo.
pub const EXTRACT_TITLES_PROMPT: &str = r#"Analyze this image of a bookshelf or book covers and extract all visible book titles.

For each book you can clearly identify, provide:
1. The full title (as accurately as you can read it)
2. A confidence score from 0.0 to 1.0 based on how clearly you can read the title

Rules:
- Only include actual book titles you can see in the image
- DO NOT include author names, publisher names, or other text
- If you can only partially read a title, include what you can see and lower the confidence
- If text is blurry or unclear, give it a lower confidence score (0.3-0.6)
- If text is crystal clear, give it a high confidence score (0.8-1.0)
- Ignore ISBN numbers, prices, barcodes, or other metadata
- Include short titles like "1984" but skip "Chapter 1984"
- Include both horizontal and vertical text (book spines)

Return ONLY a JSON array with this exact format (no other text):
[{"title": "Book Title Here", "confidence": 0.95}, {"title": "Another Book", "confidence": 0.80}]

If you cannot identify any book titles with reasonable confidence, return an empty array: []"#;

/// Append OCR context to the extraction prompt when the rule phase already
/// produced text. The raw OCR text helps the model disambiguate blurry
/// spines; it is truncated so a noisy scan cannot blow the token budget.
pub fn extract_titles_context(ocr_text: &str) -> String {
    if ocr_text.trim().is_empty() {
        return EXTRACT_TITLES_PROMPT.to_string();
    }
    let excerpt: String = ocr_text.chars().take(2000).collect();
    format!(
        "{EXTRACT_TITLES_PROMPT}\n\nOCR text extracted from the same image (may contain errors):\n{excerpt}"
    )
}

/// Build the match-scoring prompt for one candidate against a profile excerpt.
///
/// The excerpt is already capped by the caller
/// ([`crate::config::ScanConfig::profile_excerpt_len`]); this function only
/// formats it.
pub fn score_match_prompt(candidate: &ResolvedBook, excerpt: &[ProfileBook], total: usize) -> String {
    let library_summary = if excerpt.is_empty() {
        "The reader has an empty library (new reader).".to_string()
    } else {
        let mut lines: Vec<String> = excerpt
            .iter()
            .map(|book| {
                format!(
                    "- {} by {}",
                    book.title,
                    book.author.as_deref().unwrap_or("Unknown")
                )
            })
            .collect();
        if total > excerpt.len() {
            lines.push(format!("... and {} more books", total - excerpt.len()));
        }
        format!("Reader's library:\n{}", lines.join("\n"))
    };

    let mut detected = vec![format!("Title: {}", candidate.title)];
    if let Some(author) = &candidate.author {
        detected.push(format!("Author: {author}"));
    }
    if !candidate.categories.is_empty() {
        detected.push(format!("Categories: {}", candidate.categories.join(", ")));
    }
    if let Some(rating) = candidate.rating {
        detected.push(format!("Rating: {rating}/5"));
    }

    format!(
        r#"You are a book recommendation expert. Analyze how well a detected book matches a reader's preferences based on their library.

{library_summary}

Detected book to evaluate:
{detected}

Please provide:
1. A match score from 0.0 to 1.0 (where 1.0 is a perfect match for this reader)
2. A brief explanation (1-2 sentences) of why this book matches or doesn't match their preferences

Consider:
- Genre and category overlap
- Author familiarity
- Thematic similarities
- Reading level and complexity

Respond in this exact JSON format:
{{"score": 0.85, "explanation": "Your explanation here"}}

Important: Only respond with the JSON object, no other text."#,
        library_summary = library_summary,
        detected = detected.join("\n"),
    )
}
