//! Lazy, windowed page source.
//!
//! A 500-page scan rendered at 300 DPI is several gigabytes of bitmaps. The
//! source therefore renders one window (`batch_size` pages) per call: the
//! orchestrator pulls a window and hands its [`PageUnit`]s to the executor,
//! which drops each image as soon as its page is done. For small files the
//! orchestrator may pull the next window while the current one is in OCR,
//! so at most two windows are alive. Peak raster memory is O(window),
//! whatever the page count.
//!
//! Non-paginated inputs (a decoded image, converter text) yield exactly one
//! unit. A source is single-pass: once a window has been yielded it is never
//! produced again.

use super::render::{PageRenderer, RenderSettings};
use crate::error::ProcessingError;
use crate::output::{PageUnit, SourceDocument};
use std::sync::Arc;
use tracing::debug;

enum Inner {
    Paged {
        renderer: Arc<dyn PageRenderer>,
        bytes: Arc<[u8]>,
        settings: RenderSettings,
        window: usize,
        next: usize,
    },
    Single(Option<PageUnit>),
}

/// Single-pass sequence of page windows for one document.
pub struct ChunkedPageSource {
    inner: Inner,
    total_pages: usize,
}

impl std::fmt::Debug for ChunkedPageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedPageSource")
            .field("total_pages", &self.total_pages)
            .field("remaining", &self.remaining())
            .finish()
    }
}

impl ChunkedPageSource {
    /// Open a paginated document. Only the page count is read here.
    ///
    /// `window` is clamped to at least 1 and at most the page count.
    pub async fn open(
        renderer: Arc<dyn PageRenderer>,
        document: &SourceDocument,
        settings: RenderSettings,
        window: usize,
    ) -> Result<Self, ProcessingError> {
        let bytes = document.shared_bytes();
        let total_pages = {
            let renderer = Arc::clone(&renderer);
            let bytes = Arc::clone(&bytes);
            tokio::task::spawn_blocking(move || renderer.page_count(&bytes))
                .await
                .map_err(|e| ProcessingError::Internal(format!("Page count task panicked: {e}")))??
        };
        if total_pages == 0 {
            return Err(ProcessingError::Conversion {
                format: document.format().tag().to_string(),
                message: "document has no pages".to_string(),
                page: None,
            });
        }
        let window = window.clamp(1, total_pages);
        debug!(
            "Opened {} ({} pages, window {})",
            document.name(),
            total_pages,
            window
        );
        Ok(Self {
            inner: Inner::Paged {
                renderer,
                bytes,
                settings,
                window,
                next: 0,
            },
            total_pages,
        })
    }

    /// A source yielding exactly one ready-made unit.
    pub fn single(unit: PageUnit) -> Self {
        Self {
            inner: Inner::Single(Some(unit)),
            total_pages: 1,
        }
    }

    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    /// Pages per window (1 for single-unit sources).
    pub fn window(&self) -> usize {
        match &self.inner {
            Inner::Paged { window, .. } => *window,
            Inner::Single(_) => 1,
        }
    }

    /// Pages not yet yielded.
    pub fn remaining(&self) -> usize {
        match &self.inner {
            Inner::Paged { next, .. } => self.total_pages - next,
            Inner::Single(unit) => usize::from(unit.is_some()),
        }
    }

    /// Render and return the next window, or `None` once exhausted.
    ///
    /// A render failure is returned once and ends the sequence.
    pub async fn next_window(&mut self) -> Option<Result<Vec<PageUnit>, ProcessingError>> {
        let total = self.total_pages;
        match &mut self.inner {
            Inner::Single(unit) => unit.take().map(|u| Ok(vec![u])),
            Inner::Paged {
                renderer,
                bytes,
                settings,
                window,
                next,
            } => {
                if *next >= total {
                    return None;
                }
                let start = *next;
                let end = (start + *window).min(total);
                // Advance first: a failed window is not retried.
                *next = end;

                let renderer = Arc::clone(renderer);
                let bytes = Arc::clone(bytes);
                let settings = *settings;
                debug!("Rendering pages {}..={} of {}", start + 1, end, total);

                let rendered = tokio::task::spawn_blocking(move || {
                    renderer.render_pages(&bytes, start..end, &settings)
                })
                .await
                .map_err(|e| ProcessingError::Internal(format!("Render task panicked: {e}")))
                .and_then(|r| r);

                let result = rendered.and_then(|images| {
                    if images.len() != end - start {
                        return Err(ProcessingError::Internal(format!(
                            "renderer returned {} images for {} pages",
                            images.len(),
                            end - start
                        )));
                    }
                    Ok(images
                        .into_iter()
                        .enumerate()
                        .map(|(i, img)| PageUnit::raster(start + i + 1, img))
                        .collect())
                });
                if result.is_err() {
                    *next = total;
                }
                Some(result)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{DocumentFormat, PageContent};
    use image::{DynamicImage, RgbImage};
    use parking_lot::Mutex;
    use std::ops::Range;

    /// Renders tiny blank pages and records every requested range.
    struct FakeRenderer {
        pages: usize,
        calls: Mutex<Vec<Range<usize>>>,
        fail_at: Option<usize>,
    }

    impl FakeRenderer {
        fn new(pages: usize) -> Self {
            Self {
                pages,
                calls: Mutex::new(Vec::new()),
                fail_at: None,
            }
        }
    }

    impl PageRenderer for FakeRenderer {
        fn page_count(&self, _bytes: &[u8]) -> Result<usize, ProcessingError> {
            Ok(self.pages)
        }

        fn render_pages(
            &self,
            _bytes: &[u8],
            pages: Range<usize>,
            _settings: &RenderSettings,
        ) -> Result<Vec<DynamicImage>, ProcessingError> {
            self.calls.lock().push(pages.clone());
            if let Some(bad) = self.fail_at {
                if pages.contains(&bad) {
                    return Err(ProcessingError::Conversion {
                        format: "pdf".into(),
                        message: "bad page".into(),
                        page: Some(bad + 1),
                    });
                }
            }
            Ok(pages
                .map(|_| DynamicImage::ImageRgb8(RgbImage::new(4, 4)))
                .collect())
        }
    }

    fn doc() -> SourceDocument {
        SourceDocument::new(b"%PDF-1.7".to_vec(), DocumentFormat::Pdf)
    }

    fn settings() -> RenderSettings {
        RenderSettings {
            dpi: 150,
            max_pixels: 2000,
        }
    }

    #[tokio::test]
    async fn yields_windows_in_order() {
        let renderer = Arc::new(FakeRenderer::new(5));
        let mut source = ChunkedPageSource::open(renderer.clone(), &doc(), settings(), 2)
            .await
            .unwrap();
        assert_eq!(source.total_pages(), 5);

        let mut indices = Vec::new();
        let mut sizes = Vec::new();
        while let Some(window) = source.next_window().await {
            let window = window.unwrap();
            sizes.push(window.len());
            indices.extend(window.iter().map(|u| u.index));
            assert!(window
                .iter()
                .all(|u| matches!(u.content, PageContent::Raster(_))));
        }
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(indices, vec![1, 2, 3, 4, 5]);
        assert_eq!(*renderer.calls.lock(), vec![0..2, 2..4, 4..5]);
        assert_eq!(source.remaining(), 0);
    }

    #[tokio::test]
    async fn renders_lazily() {
        let renderer = Arc::new(FakeRenderer::new(10));
        let mut source = ChunkedPageSource::open(renderer.clone(), &doc(), settings(), 3)
            .await
            .unwrap();
        assert!(renderer.calls.lock().is_empty());
        let _ = source.next_window().await;
        assert_eq!(renderer.calls.lock().len(), 1);
        assert_eq!(source.remaining(), 7);
    }

    #[tokio::test]
    async fn window_clamped_to_page_count() {
        let renderer = Arc::new(FakeRenderer::new(3));
        let source = ChunkedPageSource::open(renderer, &doc(), settings(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(source.window(), 3);
    }

    #[tokio::test]
    async fn empty_document_rejected() {
        let renderer = Arc::new(FakeRenderer::new(0));
        let err = ChunkedPageSource::open(renderer, &doc(), settings(), 2)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no pages"));
    }

    #[tokio::test]
    async fn render_failure_ends_sequence() {
        let mut fake = FakeRenderer::new(4);
        fake.fail_at = Some(2);
        let mut source = ChunkedPageSource::open(Arc::new(fake), &doc(), settings(), 2)
            .await
            .unwrap();
        assert!(source.next_window().await.unwrap().is_ok());
        let err = source.next_window().await.unwrap().unwrap_err();
        assert_eq!(err.page(), Some(3));
        assert!(source.next_window().await.is_none());
    }

    #[tokio::test]
    async fn single_unit_source() {
        let mut source = ChunkedPageSource::single(PageUnit::text(1, "hello"));
        assert_eq!(source.total_pages(), 1);
        let window = source.next_window().await.unwrap().unwrap();
        assert_eq!(window.len(), 1);
        assert!(source.next_window().await.is_none());
    }
}
