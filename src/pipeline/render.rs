//! PDF rasterisation behind the [`PageRenderer`] seam.
//!
//! ## Why a trait?
//!
//! The chunked page source only needs two things from a paginated format:
//! how many pages there are, and "render pages `a..b` now". Hiding pdfium
//! behind that seam keeps the windowing logic testable without a native
//! library and leaves room for other backends.
//!
//! ## Threading
//!
//! pdfium keeps internal state and is not async-safe, so renderers are
//! synchronous and the page source always calls them from
//! `tokio::task::spawn_blocking`. [`PdfiumRenderer`] binds the library and
//! loads the document per call; nothing pdfium-owned outlives one window.
//!
//! ## Why cap pixels as well as DPI?
//!
//! Page sizes vary wildly: an A0 poster at 300 DPI would be a
//! 10,000 × 14,000 px bitmap. `max_pixels` caps either edge regardless of
//! physical size so one odd page cannot blow the per-window memory bound.

use crate::error::ProcessingError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::ops::Range;
use tracing::{debug, info};

/// Fixed rendering settings for one processing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderSettings {
    pub dpi: u32,
    pub max_pixels: u32,
}

/// Synchronous page rasteriser for a paginated format.
pub trait PageRenderer: Send + Sync {
    /// Number of pages in the document.
    fn page_count(&self, bytes: &[u8]) -> Result<usize, ProcessingError>;

    /// Render the 0-based page range, in order.
    fn render_pages(
        &self,
        bytes: &[u8],
        pages: Range<usize>,
        settings: &RenderSettings,
    ) -> Result<Vec<DynamicImage>, ProcessingError>;
}

/// pdfium-backed renderer.
///
/// Binds to `PDFIUM_LIB_PATH` when set, else a `libpdfium` next to the
/// working directory, else the system library.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfiumRenderer;

impl PdfiumRenderer {
    fn bind() -> Result<Pdfium, ProcessingError> {
        let bindings = match std::env::var("PDFIUM_LIB_PATH") {
            Ok(path) if !path.is_empty() => Pdfium::bind_to_library(path),
            _ => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
                .or_else(|_| Pdfium::bind_to_system_library()),
        }
        .map_err(|e| {
            ProcessingError::Internal(format!(
                "Failed to bind to pdfium library: {e:?}\n\
                 Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
            ))
        })?;
        Ok(Pdfium::new(bindings))
    }
}

fn load_error(e: PdfiumError) -> ProcessingError {
    let detail = format!("{e:?}");
    let message = if detail.to_ascii_lowercase().contains("password") {
        "document is encrypted and requires a password".to_string()
    } else {
        format!("corrupt PDF: {detail}")
    };
    ProcessingError::Conversion {
        format: "pdf".to_string(),
        message,
        page: None,
    }
}

fn page_error(idx: usize, e: PdfiumError) -> ProcessingError {
    ProcessingError::Conversion {
        format: "pdf".to_string(),
        message: format!("rasterisation failed: {e:?}"),
        page: Some(idx + 1),
    }
}

impl PageRenderer for PdfiumRenderer {
    fn page_count(&self, bytes: &[u8]) -> Result<usize, ProcessingError> {
        let pdfium = Self::bind()?;
        let document = pdfium
            .load_pdf_from_byte_slice(bytes, None)
            .map_err(load_error)?;
        let total = document.pages().len() as usize;
        info!("PDF loaded: {} pages", total);
        Ok(total)
    }

    fn render_pages(
        &self,
        bytes: &[u8],
        pages: Range<usize>,
        settings: &RenderSettings,
    ) -> Result<Vec<DynamicImage>, ProcessingError> {
        let pdfium = Self::bind()?;
        let document = pdfium
            .load_pdf_from_byte_slice(bytes, None)
            .map_err(load_error)?;
        let doc_pages = document.pages();

        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(settings.dpi as f32 / 72.0)
            .set_maximum_width(settings.max_pixels as i32)
            .set_maximum_height(settings.max_pixels as i32);

        let mut images = Vec::with_capacity(pages.len());
        for idx in pages {
            let page = doc_pages
                .get(idx as u16)
                .map_err(|e| page_error(idx, e))?;
            let bitmap = page
                .render_with_config(&render_config)
                .map_err(|e| page_error(idx, e))?;
            let image = bitmap.as_image();
            debug!(
                "Rendered page {} → {}x{} px",
                idx + 1,
                image.width(),
                image.height()
            );
            images.push(image);
        }
        Ok(images)
    }
}
