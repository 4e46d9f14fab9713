//! CLI binary for medocr.
//!
//! A thin shim over the library crate: maps flags to `ProcessingParameters`
//! and `PipelineConfig`, resolves inputs, runs the orchestrator over the
//! batch and prints text or JSON.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use medocr::pipeline::input::resolve_input;
use medocr::{
    BatchControl, DocumentResult, ErrorKind, OcrEngine, Orchestrator, Phase, PipelineConfig,
    ProcessingError, ProcessingParameters, ProgressTracker, RetryPolicy, SourceDocument,
    StatusCallback, TesseractEngine, VisionOcrEngine,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── Progress bar polling the tracker ─────────────────────────────────────────

const BAR_SCALE: u64 = 1000;

/// Phase transitions show up as the bar prefix.
struct BarStatus {
    bar: ProgressBar,
}

impl StatusCallback for BarStatus {
    fn on_phase(&self, phase: Phase, _message: &str) {
        self.bar.set_prefix(phase.to_string());
    }
}

fn new_bar() -> ProgressBar {
    let bar = ProgressBar::new(BAR_SCALE);
    let style = ProgressStyle::with_template(
        "{spinner:.cyan} {prefix:.bold:<16} [{bar:42.green/238}] {percent:>3}%  {msg}  ⏱ {elapsed_precise}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("█▉▊▋▌▍▎▏  ")
    .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
    bar.set_style(style);
    bar.set_prefix("starting");
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

/// Read-only observer: copies tracker snapshots onto the bar until aborted.
fn spawn_bar_poller(bar: ProgressBar, tracker: Arc<ProgressTracker>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(100));
        loop {
            ticker.tick().await;
            let snap = tracker.snapshot();
            let s = snap.state;
            bar.set_position((snap.fraction * BAR_SCALE as f64) as u64);
            bar.set_message(format!(
                "file {}/{}  page {}/{}  {:.1} p/s",
                (s.current_file_index + 1).min(s.total_files.max(1)),
                s.total_files,
                s.current_page_index,
                s.total_pages_for_current_file,
                snap.pages_per_second()
            ));
        }
    })
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # OCR a scanned PDF, print text
  medocr scan.pdf

  # Several files, JSON with plugin annotations
  medocr --json a.pdf b.png notes.txt -o results.json

  # Russian-only, lower DPI, two pages in memory at a time
  medocr --lang rus --dpi 200 --batch-size 2 big-scan.pdf

  # Only term extraction, no cache
  medocr --plugins medical_term --no-cache report.pdf

  # Vision-LLM OCR instead of tesseract
  medocr --engine vision --provider openai --model gpt-4.1-mini handwritten.jpg

  # Give up on a document after five minutes
  medocr --timeout 300 archive.pdf

FORMATS:
  pdf                      rendered page by page (pdfium) and OCR'd
  png jpg jpeg bmp tif     OCR'd as one page
  txt text md csv json     converted directly, no OCR

ENVIRONMENT VARIABLES:
  PDFIUM_LIB_PATH         Path to libpdfium
  TESSERACT_PATH          Path to the tesseract binary
  OPENAI_API_KEY          Vision engine (OpenAI)
  ANTHROPIC_API_KEY       Vision engine (Anthropic)
  EDGEQUAKE_PROVIDER      Vision engine provider (same as --provider)
  EDGEQUAKE_LLM_PROVIDER  Vision engine provider fallback
  EDGEQUAKE_MODEL         Vision engine model override
  RUST_LOG                Log filter (overrides -v / -q)
"#;

/// Medical document OCR pipeline.
#[derive(Parser, Debug)]
#[command(
    name = "medocr",
    version,
    about = "OCR and annotate medical documents (PDF, images, text)",
    long_about = "Convert scanned medical documents to normalised page text with medical-term \
and table annotations. PDFs are rendered in bounded windows and OCR'd on a worker pool; \
results are cached by content fingerprint.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local file paths or HTTP/HTTPS URLs.
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Treat every input as this format (pdf, png, txt, …) instead of using
    /// the file extension.
    #[arg(long, env = "MEDOCR_FORMAT")]
    format: Option<String>,

    /// Write output to this file instead of stdout.
    #[arg(short, long, env = "MEDOCR_OUTPUT")]
    output: Option<PathBuf>,

    /// OCR languages, comma separated (tesseract codes).
    #[arg(long, env = "MEDOCR_LANG", value_delimiter = ',', default_value = "eng,rus")]
    lang: Vec<String>,

    /// Rendering DPI (72–600).
    #[arg(long, env = "MEDOCR_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Pages rendered and held in memory at once.
    #[arg(long, env = "MEDOCR_BATCH_SIZE", default_value_t = 4)]
    batch_size: usize,

    /// Worker pool size (default: available parallelism).
    #[arg(short, long, env = "MEDOCR_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Plugins to run, comma separated (medical_term, table_detector).
    #[arg(long, env = "MEDOCR_PLUGINS", value_delimiter = ',',
          default_value = "medical_term,table_detector")]
    plugins: Vec<String>,

    /// Disable plugins entirely.
    #[arg(long, conflicts_with = "plugins")]
    no_plugins: bool,

    /// Neither read nor write the result cache.
    #[arg(long, env = "MEDOCR_NO_CACHE")]
    no_cache: bool,

    /// Result cache directory.
    #[arg(long, env = "MEDOCR_CACHE_DIR", default_value = ".cache")]
    cache_dir: PathBuf,

    /// Cache entry lifetime in hours.
    #[arg(long, env = "MEDOCR_CACHE_TTL_HOURS", default_value_t = 24)]
    cache_ttl_hours: u64,

    /// Remove every cache entry before processing.
    #[arg(long)]
    clear_cache: bool,

    /// PDFs below this many bytes render the next batch while the current one is in OCR.
    #[arg(long, env = "MEDOCR_CHUNK_THRESHOLD", default_value_t = 5 * 1024 * 1024)]
    chunk_threshold: usize,

    /// OCR engine.
    #[arg(long, env = "MEDOCR_ENGINE", value_enum, default_value = "tesseract")]
    engine: EngineArg,

    /// Path to the tesseract binary.
    #[arg(long, env = "TESSERACT_PATH")]
    tesseract_path: Option<PathBuf>,

    /// LLM provider for `--engine vision` (openai, anthropic, gemini, ollama, …).
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// LLM model for `--engine vision`.
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Per-document deadline in seconds.
    #[arg(long, env = "MEDOCR_TIMEOUT")]
    timeout: Option<u64>,

    /// Retries per failing page (default: none, fail the document).
    #[arg(long, env = "MEDOCR_MAX_RETRIES", default_value_t = 0)]
    max_retries: u32,

    /// Base backoff between page retries, in milliseconds.
    #[arg(long, env = "MEDOCR_RETRY_BACKOFF_MS", default_value_t = 500)]
    retry_backoff_ms: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "MEDOCR_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Output structured JSON instead of text.
    #[arg(long, env = "MEDOCR_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "MEDOCR_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "MEDOCR_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "MEDOCR_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum EngineArg {
    Tesseract,
    Vision,
}

/// One entry of the JSON report.
#[derive(Serialize)]
struct FileReport<'a> {
    input: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a DocumentResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorReport>,
}

#[derive(Serialize)]
struct ErrorReport {
    kind: ErrorKind,
    message: String,
    details: BTreeMap<String, String>,
}

impl From<&ProcessingError> for ErrorReport {
    fn from(e: &ProcessingError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
            details: e.details(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar is the feedback when shown; keep library logs to
    // errors so they don't tear it.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
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
    let params = build_params(&cli)?;
    let config = build_config(&cli)?;
    let engine = build_engine(&cli)?;

    let bar = show_progress.then(new_bar);
    let tracker = Arc::new(ProgressTracker::default());
    let mut builder = Orchestrator::builder(config)
        .engine(engine)
        .tracker(Arc::clone(&tracker));
    if let Some(bar) = &bar {
        builder = builder.status_callback(Arc::new(BarStatus { bar: bar.clone() }));
    }
    let orchestrator = builder.build();
    let _sweeper = orchestrator.start_cache_sweeper();

    if cli.clear_cache {
        let cache = Arc::clone(orchestrator.cache());
        tokio::task::spawn_blocking(move || cache.clear())
            .await
            .context("Cache clear task failed")?;
    }

    // ── Ctrl-C stops new pages; running ones finish ──────────────────────
    let control = BatchControl::new();
    let cancel = control.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.store(true, Ordering::SeqCst);
        }
    });
    let timeout = cli.timeout.map(Duration::from_secs);
    let per_document = || {
        let c = BatchControl::new().with_cancel(control.cancel_flag());
        match timeout {
            Some(t) => c.with_timeout(t),
            None => c,
        }
    };

    // ── Resolve inputs ───────────────────────────────────────────────────
    let download_timeout = Duration::from_secs(cli.download_timeout);
    let mut resolved: Vec<Result<SourceDocument, ProcessingError>> = Vec::new();
    for input in &cli.inputs {
        if let Some(bar) = &bar {
            bar.set_prefix("resolving");
        }
        resolved.push(resolve_input(input, cli.format.as_deref(), download_timeout).await);
    }
    let documents: Vec<SourceDocument> = resolved
        .iter()
        .filter_map(|r| r.as_ref().ok().cloned())
        .collect();

    // ── Run pipeline ─────────────────────────────────────────────────────
    let poller = bar
        .as_ref()
        .map(|b| spawn_bar_poller(b.clone(), Arc::clone(&tracker)));
    let mut processed = orchestrator
        .process_files_with(&documents, &params, per_document)
        .await
        .into_iter();
    if let Some(p) = poller {
        p.abort();
    }
    if let Some(bar) = &bar {
        bar.finish_and_clear();
    }

    let outcomes: Vec<Result<DocumentResult, ProcessingError>> = resolved
        .into_iter()
        .map(|r| match r {
            Ok(_) => processed.next().unwrap_or_else(|| {
                Err(ProcessingError::Internal("missing result".to_string()))
            }),
            Err(e) => Err(e),
        })
        .collect();

    // ── Output ───────────────────────────────────────────────────────────
    let rendered = if cli.json {
        render_json(&cli.inputs, &outcomes)?
    } else {
        render_text(&cli.inputs, &outcomes)
    };
    match &cli.output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            tokio::fs::write(path, rendered)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(rendered.as_bytes())
                .context("Failed to write to stdout")?;
        }
    }

    // ── Summary ──────────────────────────────────────────────────────────
    let failed = outcomes.iter().filter(|r| r.is_err()).count();
    if !cli.quiet {
        for (input, outcome) in cli.inputs.iter().zip(&outcomes) {
            match outcome {
                Ok(doc) => eprintln!(
                    "  {} {}  {}",
                    green("✓"),
                    input,
                    dim(&format!("{} pages", doc.metadata.total_pages))
                ),
                Err(e) => eprintln!("  {} {}  {}", red("✗"), input, red(&e.to_string())),
            }
        }
        let snap = tracker.snapshot();
        eprintln!(
            "{} {}/{} documents  {} pages  {:.1}s",
            if failed == 0 { green("✔") } else { red("✘") },
            bold(&(outcomes.len() - failed).to_string()),
            outcomes.len(),
            snap.pages_completed,
            snap.elapsed.as_secs_f64()
        );
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} documents failed", outcomes.len());
    }
    Ok(())
}

/// Map CLI args to `ProcessingParameters`.
fn build_params(cli: &Cli) -> Result<ProcessingParameters> {
    let plugins: Vec<String> = if cli.no_plugins {
        Vec::new()
    } else {
        cli.plugins
            .iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect()
    };
    ProcessingParameters::builder()
        .languages(cli.lang.iter().map(|l| l.trim().to_string()))
        .dpi(cli.dpi)
        .batch_size(cli.batch_size)
        .plugins(plugins)
        .use_cache(!cli.no_cache)
        .build()
        .context("Invalid processing parameters")
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .cache_dir(&cli.cache_dir)
        .cache_ttl(hours(cli.cache_ttl_hours))
        .chunk_threshold_bytes(cli.chunk_threshold)
        .retry(RetryPolicy {
            max_retries: cli.max_retries,
            backoff_ms: cli.retry_backoff_ms,
        });
    if let Some(n) = cli.concurrency {
        builder = builder.concurrency(n);
    }
    builder.build().context("Invalid pipeline configuration")
}

/// Saturates instead of overflowing; a huge TTL just never expires.
fn hours(h: u64) -> Duration {
    Duration::from_secs(h.saturating_mul(60 * 60))
}

fn build_engine(cli: &Cli) -> Result<Arc<dyn OcrEngine>> {
    Ok(match cli.engine {
        EngineArg::Tesseract => {
            let mut engine = TesseractEngine::new();
            if let Some(path) = &cli.tesseract_path {
                engine = engine.with_binary(path);
            }
            Arc::new(engine)
        }
        EngineArg::Vision => Arc::new(
            VisionOcrEngine::from_config(cli.provider.as_deref(), cli.model.as_deref())
                .context("Failed to configure the vision engine")?,
        ),
    })
}

fn render_json(
    inputs: &[String],
    outcomes: &[Result<DocumentResult, ProcessingError>],
) -> Result<String> {
    let reports: Vec<FileReport<'_>> = inputs
        .iter()
        .zip(outcomes)
        .map(|(input, outcome)| FileReport {
            input,
            result: outcome.as_ref().ok(),
            error: outcome.as_ref().err().map(ErrorReport::from),
        })
        .collect();
    let mut json = if reports.len() == 1 {
        serde_json::to_string_pretty(&reports[0])
    } else {
        serde_json::to_string_pretty(&reports)
    }
    .context("Failed to serialise output")?;
    json.push('\n');
    Ok(json)
}

fn render_text(inputs: &[String], outcomes: &[Result<DocumentResult, ProcessingError>]) -> String {
    let many = inputs.len() > 1;
    let mut out = String::new();
    for (input, outcome) in inputs.iter().zip(outcomes) {
        let Ok(doc) = outcome else { continue };
        if many {
            out.push_str(&format!("==> {input} <==\n"));
        }
        out.push_str(&doc.text());
        out.push('\n');
        if many {
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn huge_cache_ttl_saturates() {
        assert_eq!(hours(2), Duration::from_secs(7200));
        assert_eq!(hours(u64::MAX), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn config_accepts_max_cache_ttl() {
        let max = u64::MAX.to_string();
        let cli = Cli::parse_from(["medocr", "--cache-ttl-hours", &max, "scan.pdf"]);
        let config = build_config(&cli).unwrap();
        assert_eq!(config.cache_ttl, Duration::from_secs(u64::MAX));
    }
}
