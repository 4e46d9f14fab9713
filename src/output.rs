//! Data model flowing through the pipeline.
//!
//! ```text
//! SourceDocument ──▶ PageUnit* ──▶ PageResult* ──▶ DocumentResult
//!   (bytes, tag)     (transient)    (immutable)     (cached, returned)
//! ```

use chrono::{DateTime, Utc};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Per-plugin structured output, keyed by plugin name.
pub type PluginResults = BTreeMap<String, serde_json::Value>;

/// Declared format of an input document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentFormat {
    /// Paginated; rendered page by page.
    Pdf,
    /// Single raster image (tag kept for logging).
    Image(String),
    /// UTF-8 text, no OCR.
    Text,
    /// Anything else; resolved through the converter registry.
    Other(String),
}

impl DocumentFormat {
    /// Map a format tag or file extension (case-insensitive, leading dot
    /// allowed) to a format.
    pub fn from_tag(tag: &str) -> Self {
        let t = tag.trim().trim_start_matches('.').to_ascii_lowercase();
        match t.as_str() {
            "pdf" => DocumentFormat::Pdf,
            "png" | "jpg" | "jpeg" | "bmp" | "tif" | "tiff" => DocumentFormat::Image(t),
            "txt" | "text" | "md" => DocumentFormat::Text,
            _ => DocumentFormat::Other(t),
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Image(t) => t,
            DocumentFormat::Text => "txt",
            DocumentFormat::Other(t) => t,
        }
    }

    pub fn is_paginated(&self) -> bool {
        matches!(self, DocumentFormat::Pdf)
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Raw input: immutable bytes plus the declared format.
///
/// Bytes are behind an `Arc` so render windows running on blocking threads
/// can share them without copying.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    bytes: Arc<[u8]>,
    format: DocumentFormat,
    name: Option<String>,
}

impl SourceDocument {
    pub fn new(bytes: impl Into<Arc<[u8]>>, format: DocumentFormat) -> Self {
        Self {
            bytes: bytes.into(),
            format,
            name: None,
        }
    }

    /// Attach a display name (file name or URL) used in logs.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn shared_bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes)
    }

    pub fn format(&self) -> &DocumentFormat {
        &self.format
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("<memory>")
    }
}

/// What a worker has to work with for one unit.
#[derive(Debug)]
pub enum PageContent {
    /// Rendered page or decoded image; needs OCR.
    Raster(DynamicImage),
    /// Text already extracted by a converter; OCR is skipped.
    Text(String),
}

/// One processable unit of a document.
///
/// Created by the page source, moved into exactly one worker, and dropped
/// (releasing the image buffer) as soon as that worker produced its
/// [`PageResult`].
#[derive(Debug)]
pub struct PageUnit {
    /// 1-based, contiguous ordinal within the document.
    pub index: usize,
    pub content: PageContent,
}

impl PageUnit {
    pub fn raster(index: usize, image: DynamicImage) -> Self {
        Self {
            index,
            content: PageContent::Raster(image),
        }
    }

    pub fn text(index: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            content: PageContent::Text(text.into()),
        }
    }
}

/// Result for one page. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    /// 1-based page index.
    pub index: usize,
    /// Normalised page text.
    pub text: String,
    /// Output of every plugin that validated and succeeded on this page.
    #[serde(default)]
    pub plugin_results: PluginResults,
}

/// Document-level metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub processed_at: DateTime<Utc>,
    pub total_pages: usize,
    /// Format tag the document was processed as.
    pub format: String,
    /// Metadata reported by a converter adapter, if any.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub source: BTreeMap<String, String>,
}

/// Complete result of one processing call; the unit stored in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentResult {
    /// Ordered by `index`, contiguous from 1.
    pub pages: Vec<PageResult>,
    pub metadata: DocumentMetadata,
}

impl DocumentResult {
    /// Assemble a document from page results in any order.
    ///
    /// Sorts by index and checks the pages are exactly `1..=expected`.
    pub fn assemble(
        mut pages: Vec<PageResult>,
        expected: usize,
        format: &DocumentFormat,
        source: BTreeMap<String, String>,
    ) -> Result<Self, String> {
        pages.sort_by_key(|p| p.index);
        if pages.len() != expected {
            return Err(format!(
                "expected {expected} pages, got {}",
                pages.len()
            ));
        }
        if let Some((pos, page)) = pages
            .iter()
            .enumerate()
            .find(|(pos, p)| p.index != pos + 1)
        {
            return Err(format!(
                "page index {} at position {} (gap or duplicate)",
                page.index,
                pos + 1
            ));
        }
        Ok(Self {
            metadata: DocumentMetadata {
                processed_at: Utc::now(),
                total_pages: pages.len(),
                format: format.tag().to_string(),
                source,
            },
            pages,
        })
    }

    /// All page texts joined with a blank line.
    pub fn text(&self) -> String {
        self.pages
            .iter()
            .map(|p| p.text.trim_end())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
