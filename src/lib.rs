//! # medocr
//!
//! Turn scanned medical documents (PDFs, images, text exports) into
//! normalised page text plus structured annotations: medical terms and
//! table regions.
//!
//! ## Why this crate?
//!
//! Per-format extraction is easy. The hard part is the pipeline around it:
//! OCR-ing a 500-page scan without holding 500 bitmaps in memory, fanning
//! pages out over a worker pool while keeping page order, running
//! best-effort enrichment plugins, caching expensive results by content
//! fingerprint, and reporting progress across a batch of files.
//!
//! ## Pipeline Overview
//!
//! ```text
//! SourceDocument
//!  │
//!  ├─ 1. Cache     fingerprint(bytes, params) → hit? return it
//!  ├─ 2. Source    render `batch_size` pages at a time (pdfium), or decode
//!  │               one image, or convert text through the registry
//!  ├─ 3. Execute   bounded pool; per page: OCR → normalise → plugins
//!  ├─ 4. Assemble  pages 1..N in order, never partial
//!  └─ 5. Cache     persist the DocumentResult
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use medocr::{DocumentFormat, Orchestrator, PipelineConfig, ProcessingParameters, SourceDocument};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let orchestrator = Orchestrator::new(PipelineConfig::default());
//!     let _sweeper = orchestrator.start_cache_sweeper();
//!
//!     let bytes = std::fs::read("discharge-summary.pdf")?;
//!     let doc = SourceDocument::new(bytes, DocumentFormat::Pdf);
//!     let params = ProcessingParameters::builder().dpi(200).build()?;
//!
//!     let result = orchestrator.process(&doc, &params).await?;
//!     for page in &result.pages {
//!         println!("--- page {} ---\n{}", page.index, page.text);
//!         if let Some(terms) = page.plugin_results.get("medical_term") {
//!             println!("terms: {terms}");
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `medocr` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! medocr = { version = "0.1", default-features = false }
//! ```
//!
//! ## Native dependencies
//!
//! PDF rendering binds `libpdfium` at runtime (`PDFIUM_LIB_PATH`, the working
//! directory, then the system library). The default OCR engine runs the
//! `tesseract` binary (`TESSERACT_PATH` to override) with the language packs
//! named in [`ProcessingParameters::language_set`].

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cache;
pub mod config;
pub mod converter;
pub mod error;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod plugins;
pub mod progress;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cache::{CacheKey, CacheStore, SweepHandle};
pub use config::{
    PipelineConfig, PipelineConfigBuilder, ProcessingParameters, ProcessingParametersBuilder,
    RetryPolicy, MEDICAL_TERM_PLUGIN, TABLE_DETECTOR_PLUGIN,
};
pub use converter::{
    ConvertedDocument, Converter, ConverterRegistry, JsonConverter, PlainTextConverter,
};
pub use error::{ErrorKind, OcrError, ProcessingError};
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use output::{
    DocumentFormat, DocumentMetadata, DocumentResult, PageContent, PageResult, PageUnit,
    PluginResults, SourceDocument,
};
pub use pipeline::executor::{BatchControl, BatchExecutor, CancelFlag};
pub use pipeline::ocr::{OcrEngine, TesseractEngine};
pub use pipeline::render::{PageRenderer, PdfiumRenderer, RenderSettings};
pub use pipeline::vision::VisionOcrEngine;
pub use plugins::{Plugin, PluginContext, PluginInput, PluginPipeline};
pub use progress::{
    NoopStatusCallback, Phase, ProgressSnapshot, ProgressState, ProgressTracker, StatusCallback,
};
