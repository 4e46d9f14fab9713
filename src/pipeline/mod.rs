//! Pipeline stages for document processing.
//!
//! Each submodule implements one step and is testable on its own; the
//! orchestrator wires them together.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ source ──▶ executor ──▶ ocr/vision ──▶ normalize ──▶ plugins
//! (path/URL) (windows)  (pool)       (page text)    (cleanup)     (enrich)
//!              │
//!            render (pdfium)
//! ```
//!
//! 1. [`input`]: resolve a CLI path or URL into a `SourceDocument`
//! 2. [`render`]: rasterise a page range; synchronous, pdfium is not
//!    async-safe
//! 3. [`source`]: yield `batch_size` windows of rendered pages lazily so
//!    peak memory is bounded by the window, not the document
//! 4. [`executor`]: bounded worker pool with order restoration, fail-fast,
//!    cancellation, deadline and optional retry
//! 5. [`ocr`]: the `OcrEngine` seam and the tesseract engine
//! 6. [`vision`]: OCR through a vision-capable LLM
//! 7. [`normalize`]: deterministic text cleanup before enrichment

pub mod executor;
pub mod input;
pub mod normalize;
pub mod ocr;
pub mod render;
pub mod source;
pub mod vision;
