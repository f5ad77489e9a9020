//! CLI binary for shelfscan.
//!
//! A thin shim over the library crate that maps CLI flags to `ScanConfig`
//! and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use shelfscan::{LlmStrategy, ProfileBook, ProviderKind, RotationMode, ScanConfig, Scanner};
use std::io;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"Environment:
  GEMINI_API_KEY / GOOGLE_API_KEY   Google Gemini credentials
  OPENAI_API_KEY                    OpenAI credentials
  ANTHROPIC_API_KEY                 Anthropic credentials
  GOOGLE_BOOKS_API_KEY              Optional catalog API key (higher quota)

The scanner uses whichever providers are configured, cheapest first. With no
keys set, pass --no-llm to run the fully deterministic pipeline.

Requires a system `tesseract` install (the binary on PATH)."#;

/// Scan a bookshelf photo and print ranked book recommendations.
#[derive(Parser, Debug)]
#[command(
    name = "shelfscan",
    version,
    about = "Scan a bookshelf photo and print ranked book recommendations",
    long_about = "Detect book spines in a shelf photo via OCR (with a vision-model fallback), \
resolve them against the Google Books catalog, and rank them against a reader profile.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Path to the shelf photo (PNG or JPEG).
    image: PathBuf,

    /// JSON file with the reader's library: an array of profile books.
    #[arg(short, long, env = "SHELFSCAN_PROFILE")]
    profile: Option<PathBuf>,

    /// Rotation handling: disabled, osd_only, osd_fallback.
    #[arg(long, env = "SHELFSCAN_ROTATION", default_value = "osd_fallback")]
    rotation_mode: String,

    /// Vision fallback strategy: conservative, aggressive, disabled.
    #[arg(long, env = "SHELFSCAN_LLM_STRATEGY", default_value = "conservative")]
    llm_strategy: String,

    /// Preferred provider: gemini, openai, anthropic.
    #[arg(long, env = "SHELFSCAN_PROVIDER")]
    provider: Option<String>,

    /// Disable the provider layer entirely (rules-only pipeline).
    #[arg(long, env = "SHELFSCAN_NO_LLM")]
    no_llm: bool,

    /// Minimum catalog match similarity (0.0–1.0).
    #[arg(long, env = "SHELFSCAN_MATCH_THRESHOLD", default_value_t = 0.70)]
    match_threshold: f64,

    /// Print the full scan output (result + stats) as JSON.
    #[arg(long, env = "SHELFSCAN_JSON")]
    json: bool,

    /// Verbose logging (debug level).
    #[arg(short, long, env = "SHELFSCAN_VERBOSE")]
    verbose: bool,

    /// Suppress all logging.
    #[arg(short, long, env = "SHELFSCAN_QUIET")]
    quiet: bool,
}

fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg" | "jpeg") => "image/jpeg",
        _ => "image/png",
    }
}

fn parse_enum_arg<T: serde::de::DeserializeOwned>(name: &str, value: &str) -> Result<T> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .with_context(|| format!("Invalid --{name} value '{value}'"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let rotation_mode: RotationMode = parse_enum_arg("rotation-mode", &cli.rotation_mode)?;
    let llm_strategy: LlmStrategy = parse_enum_arg("llm-strategy", &cli.llm_strategy)?;
    let mut builder = ScanConfig::builder()
        .rotation_mode(rotation_mode)
        .llm_strategy(llm_strategy)
        .llm_enabled(!cli.no_llm)
        .match_threshold(cli.match_threshold);
    if let Some(provider) = &cli.provider {
        let kind: ProviderKind = provider
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))
            .context("Invalid --provider value")?;
        builder = builder.primary_provider(kind);
    }
    let config = builder.build()?;

    // ── Load inputs ──────────────────────────────────────────────────────
    let bytes = std::fs::read(&cli.image)
        .with_context(|| format!("Failed to read image {}", cli.image.display()))?;
    let content_type = content_type_for(&cli.image);

    let profile: Vec<ProfileBook> = match &cli.profile {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read profile {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse profile {}", path.display()))?
        }
        None => Vec::new(),
    };

    // ── Scan ─────────────────────────────────────────────────────────────
    let scanner = Scanner::new(config)?;
    let output = scanner.scan(&bytes, content_type, &profile).await?;

    // ── Print ────────────────────────────────────────────────────────────
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if let Some(message) = &output.result.message {
        println!("{}", dim(message));
        return Ok(());
    }

    println!(
        "{} {}",
        cyan("◆"),
        bold(&format!(
            "Detected {} books ({} recommended)",
            output.result.detected.len(),
            output.result.recommended.len()
        ))
    );
    for book in &output.result.recommended {
        let author = book.book.author.as_deref().unwrap_or("Unknown author");
        println!(
            "  {}  {} {}",
            green(&format!("{:.2}", book.match_score)),
            bold(&book.book.title),
            dim(&format!("by {author}"))
        );
        if let Some(explanation) = &book.explanation {
            println!("        {}", dim(explanation));
        }
    }
    if !cli.quiet {
        eprintln!(
            "{}",
            dim(&format!(
                "rotation {}°, {} OCR passes, {} candidates, {}ms total",
                output.stats.rotation.final_angle_degrees,
                output.stats.rotation.attempts,
                output.stats.extracted_candidates,
                output.stats.total_duration_ms
            ))
        );
    }
    Ok(())
}
