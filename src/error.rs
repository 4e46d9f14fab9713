//! Error types for the medocr pipeline.
//!
//! Two families of error live here, split by whether they may reach a caller:
//!
//! * [`ProcessingError`]: **Fatal** for one processing call. Every call to
//!   [`crate::orchestrator::Orchestrator::process`] yields exactly one
//!   complete [`crate::output::DocumentResult`] or exactly one of these.
//!   A page-level OCR failure fails the whole document and names the page.
//!
//! * [`CacheError`], [`PluginError`]: **Contained**. Cache failures are
//!   logged and downgraded to a miss inside [`crate::cache::CacheStore`];
//!   plugin failures are logged and the plugin's key is omitted from the
//!   page inside [`crate::plugins::PluginPipeline`]. Neither ever escapes.
//!
//! [`OcrError`] and [`ConversionError`] are what the engine and adapter seams
//! return; the orchestrator wraps them with the page index / format tag.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse category of a [`ProcessingError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Conversion,
    OcrEngine,
    Timeout,
    Validation,
    Input,
    Cancelled,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Conversion => "conversion",
            ErrorKind::OcrEngine => "ocr_engine",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Validation => "validation",
            ErrorKind::Input => "input",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// The single failure type returned by a processing call.
#[derive(Debug, Clone, Error)]
pub enum ProcessingError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The format adapter (or the page renderer) could not read the document.
    #[error("Conversion of '{format}' document failed{}: {message}", page_suffix(.page))]
    Conversion {
        format: String,
        message: String,
        page: Option<usize>,
    },

    /// Parameters or input were malformed or unsupported.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// A path or URL could not be resolved to document bytes.
    #[error("Cannot read input '{input}': {reason}")]
    Input { input: String, reason: String },

    // ── Page errors ───────────────────────────────────────────────────────
    /// The OCR engine failed on a page; the whole document is failed.
    #[error("OCR failed on page {page}: {message}\nRe-run the document to retry.")]
    OcrEngine { page: usize, message: String },

    // ── Control errors ────────────────────────────────────────────────────
    /// The caller-supplied deadline expired before all pages completed.
    #[error("Processing timed out after {elapsed_ms}ms ({completed_pages} pages completed)")]
    Timeout {
        elapsed_ms: u64,
        completed_pages: usize,
    },

    /// The caller cancelled the batch.
    #[error("Processing cancelled ({completed_pages} pages completed)")]
    Cancelled { completed_pages: usize },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (task panic, broken invariant).
    #[error("Internal error: {0}")]
    Internal(String),
}

fn page_suffix(page: &Option<usize>) -> String {
    match page {
        Some(p) => format!(" on page {p}"),
        None => String::new(),
    }
}

impl ProcessingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProcessingError::Conversion { .. } => ErrorKind::Conversion,
            ProcessingError::Validation(_) => ErrorKind::Validation,
            ProcessingError::Input { .. } => ErrorKind::Input,
            ProcessingError::OcrEngine { .. } => ErrorKind::OcrEngine,
            ProcessingError::Timeout { .. } => ErrorKind::Timeout,
            ProcessingError::Cancelled { .. } => ErrorKind::Cancelled,
            ProcessingError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The offending 1-based page index, when the failure is page-specific.
    pub fn page(&self) -> Option<usize> {
        match self {
            ProcessingError::Conversion { page, .. } => *page,
            ProcessingError::OcrEngine { page, .. } => Some(*page),
            _ => None,
        }
    }

    /// Structured key/value details for reporting alongside the message.
    pub fn details(&self) -> BTreeMap<String, String> {
        let mut d = BTreeMap::new();
        d.insert("kind".to_string(), self.kind().to_string());
        if let Some(page) = self.page() {
            d.insert("page".to_string(), page.to_string());
        }
        match self {
            ProcessingError::Conversion { format, .. } => {
                d.insert("format".to_string(), format.clone());
            }
            ProcessingError::Timeout {
                elapsed_ms,
                completed_pages,
            } => {
                d.insert("elapsed_ms".to_string(), elapsed_ms.to_string());
                d.insert("completed_pages".to_string(), completed_pages.to_string());
            }
            ProcessingError::Cancelled { completed_pages } => {
                d.insert("completed_pages".to_string(), completed_pages.to_string());
            }
            ProcessingError::Input { input, .. } => {
                d.insert("input".to_string(), input.clone());
            }
            _ => {}
        }
        d
    }
}

/// Failure reported by an [`crate::pipeline::ocr::OcrEngine`].
#[derive(Debug, Clone, Error)]
#[error("{engine}: {message}")]
pub struct OcrError {
    pub engine: String,
    pub message: String,
}

impl OcrError {
    pub fn new(engine: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            message: message.into(),
        }
    }
}

/// Failure reported by a [`crate::converter::Converter`] adapter.
#[derive(Debug, Clone, Error)]
pub enum ConversionError {
    #[error("unsupported format '{0}'")]
    Unsupported(String),

    #[error("malformed document: {0}")]
    Malformed(String),
}

/// Contained cache failure; never leaves [`crate::cache::CacheStore`].
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt cache entry '{path}': {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Contained plugin failure; never leaves [`crate::plugins::PluginPipeline`].
#[derive(Debug, Clone, Error)]
pub enum PluginError {
    #[error("plugin '{0}' is already registered")]
    Duplicate(String),

    #[error("plugin '{plugin}' failed: {message}")]
    Failed { plugin: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ocr_failure_names_page() {
        let e = ProcessingError::OcrEngine {
            page: 3,
            message: "engine crashed".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("page 3"), "got: {msg}");
        assert_eq!(e.kind(), ErrorKind::OcrEngine);
        assert_eq!(e.page(), Some(3));
    }

    #[test]
    fn conversion_display_with_and_without_page() {
        let with_page = ProcessingError::Conversion {
            format: "pdf".into(),
            message: "bad xref".into(),
            page: Some(7),
        };
        assert!(with_page.to_string().contains("on page 7"));

        let without = ProcessingError::Conversion {
            format: "docx".into(),
            message: "zip error".into(),
            page: None,
        };
        assert!(!without.to_string().contains("on page"));
        assert_eq!(without.page(), None);
    }

    #[test]
    fn timeout_details() {
        let e = ProcessingError::Timeout {
            elapsed_ms: 5000,
            completed_pages: 2,
        };
        let d = e.details();
        assert_eq!(d.get("kind").map(String::as_str), Some("timeout"));
        assert_eq!(d.get("elapsed_ms").map(String::as_str), Some("5000"));
        assert_eq!(d.get("completed_pages").map(String::as_str), Some("2"));
    }

    #[test]
    fn error_kind_serialises_snake_case() {
        let json = serde_json::to_string(&ErrorKind::OcrEngine).unwrap();
        assert_eq!(json, "\"ocr_engine\"");
    }
}
