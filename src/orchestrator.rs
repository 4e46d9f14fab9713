//! Document processing orchestrator.
//!
//! One call to [`Orchestrator::process`] walks this state machine:
//!
//! ```text
//! CACHE_LOOKUP ─┬─ hit ──▶ CACHE_HIT ──▶ DONE
//!               └─ miss ─▶ SOURCE_OPEN ─▶ BATCH_PROCESS ─▶ ENRICH
//!                                  ─▶ ASSEMBLE ─▶ CACHE_WRITE ─▶ DONE
//! any failure ──▶ FAILED
//! ```
//!
//! and yields exactly one complete [`DocumentResult`] or one
//! [`ProcessingError`]. Nothing partial is ever cached or returned.
//!
//! ## Strategy selection
//!
//! | Declared format | Units |
//! |---|---|
//! | `pdf` below `chunk_threshold_bytes` | windows of `batch_size` pages, next window rendered during OCR |
//! | `pdf` at or above the threshold | windows of `batch_size` pages, rendered one at a time |
//! | image | one decoded raster unit |
//! | anything else | one text unit from the registered converter |
//!
//! Plugins run inside the page worker, right after OCR, while the page image
//! is still alive; the image is dropped with the unit as soon as its
//! [`PageResult`] exists. Peak memory is one window for large PDFs and two
//! (current plus prefetched) for small ones.

use crate::cache::{spawn_sweeper, CacheKey, CacheStore, SweepHandle};
use crate::config::{PipelineConfig, ProcessingParameters};
use crate::converter::ConverterRegistry;
use crate::error::ProcessingError;
use crate::output::{
    DocumentFormat, DocumentResult, PageContent, PageResult, PageUnit, SourceDocument,
};
use crate::pipeline::executor::{BatchControl, BatchExecutor};
use crate::pipeline::normalize::normalize_text;
use crate::pipeline::ocr::{OcrEngine, TesseractEngine};
use crate::pipeline::render::{PageRenderer, PdfiumRenderer, RenderSettings};
use crate::pipeline::source::ChunkedPageSource;
use crate::plugins::{PluginContext, PluginInput, PluginPipeline};
use crate::progress::{Phase, ProgressTracker, SharedStatusCallback};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// Key under which converter-extracted tables are attached to page 1.
pub const CONVERTER_RESULT_KEY: &str = "converter";

/// Composes cache, page source, executor, OCR engine and plugins.
///
/// Cheap to share behind an `Arc`; every collaborator is itself shared and
/// internally synchronised.
pub struct Orchestrator {
    config: PipelineConfig,
    engine: Arc<dyn OcrEngine>,
    renderer: Arc<dyn PageRenderer>,
    plugins: Arc<PluginPipeline>,
    converters: Arc<ConverterRegistry>,
    cache: Arc<CacheStore>,
    tracker: Arc<ProgressTracker>,
    status: Option<SharedStatusCallback>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("engine", &self.engine.name())
            .field("plugins", &self.plugins)
            .field("converters", &self.converters)
            .field("cache_dir", &self.cache.dir())
            .finish()
    }
}

/// Builder for [`Orchestrator`]. Unset collaborators get defaults: the
/// tesseract engine, the pdfium renderer, the built-in plugins and
/// converters, and a cache opened from the config.
pub struct OrchestratorBuilder {
    config: PipelineConfig,
    engine: Option<Arc<dyn OcrEngine>>,
    renderer: Option<Arc<dyn PageRenderer>>,
    plugins: Option<PluginPipeline>,
    converters: Option<ConverterRegistry>,
    cache: Option<Arc<CacheStore>>,
    tracker: Option<Arc<ProgressTracker>>,
    status: Option<SharedStatusCallback>,
}

impl OrchestratorBuilder {
    pub fn engine(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn PageRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn plugins(mut self, plugins: PluginPipeline) -> Self {
        self.plugins = Some(plugins);
        self
    }

    pub fn converters(mut self, converters: ConverterRegistry) -> Self {
        self.converters = Some(converters);
        self
    }

    /// Share an existing store (e.g. between orchestrators in tests).
    pub fn cache(mut self, cache: Arc<CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn tracker(mut self, tracker: Arc<ProgressTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn status_callback(mut self, cb: SharedStatusCallback) -> Self {
        self.status = Some(cb);
        self
    }

    pub fn build(self) -> Orchestrator {
        let cache = self.cache.unwrap_or_else(|| {
            Arc::new(CacheStore::open(
                self.config.cache_dir.clone(),
                self.config.cache_ttl,
            ))
        });
        Orchestrator {
            engine: self
                .engine
                .unwrap_or_else(|| Arc::new(TesseractEngine::default())),
            renderer: self.renderer.unwrap_or_else(|| Arc::new(PdfiumRenderer)),
            plugins: Arc::new(self.plugins.unwrap_or_else(PluginPipeline::with_defaults)),
            converters: Arc::new(
                self.converters
                    .unwrap_or_else(ConverterRegistry::with_defaults),
            ),
            cache,
            tracker: self.tracker.unwrap_or_default(),
            status: self.status,
            config: self.config,
        }
    }
}

impl Orchestrator {
    pub fn builder(config: PipelineConfig) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            engine: None,
            renderer: None,
            plugins: None,
            converters: None,
            cache: None,
            tracker: None,
            status: None,
        }
    }

    /// Orchestrator with every default collaborator.
    pub fn new(config: PipelineConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn tracker(&self) -> &Arc<ProgressTracker> {
        &self.tracker
    }

    pub fn plugins(&self) -> &PluginPipeline {
        &self.plugins
    }

    /// Start the periodic expiry sweep. Stops when the handle is dropped.
    pub fn start_cache_sweeper(&self) -> SweepHandle {
        spawn_sweeper(&self.cache, self.config.sweep_interval)
    }

    // ── Entry points ─────────────────────────────────────────────────────

    /// Process one document with no deadline.
    pub async fn process(
        &self,
        document: &SourceDocument,
        params: &ProcessingParameters,
    ) -> Result<DocumentResult, ProcessingError> {
        self.process_with(document, params, &BatchControl::new())
            .await
    }

    /// Process one document under a caller-supplied deadline / cancel flag.
    ///
    /// Resets the tracker to a one-file batch.
    pub async fn process_with(
        &self,
        document: &SourceDocument,
        params: &ProcessingParameters,
        control: &BatchControl,
    ) -> Result<DocumentResult, ProcessingError> {
        self.tracker.start_batch(1);
        let generation = self.tracker.begin_file(0);
        let result = self.run(document, params, control, generation).await;
        if result.is_ok() {
            self.tracker.update(Some(1), None, None);
        }
        result
    }

    /// Process several documents one after another.
    ///
    /// Returns one result per input, in input order; a failed document does
    /// not stop the rest. The tracker's file axis follows the batch.
    pub async fn process_files(
        &self,
        documents: &[SourceDocument],
        params: &ProcessingParameters,
    ) -> Vec<Result<DocumentResult, ProcessingError>> {
        self.process_files_with(documents, params, BatchControl::new)
            .await
    }

    /// [`Self::process_files`] with a fresh [`BatchControl`] per document
    /// from `control` (so each gets its own deadline).
    pub async fn process_files_with<C>(
        &self,
        documents: &[SourceDocument],
        params: &ProcessingParameters,
        control: C,
    ) -> Vec<Result<DocumentResult, ProcessingError>>
    where
        C: Fn() -> BatchControl,
    {
        let total = documents.len();
        self.tracker.start_batch(total);
        let mut results = Vec::with_capacity(total);
        for (i, document) in documents.iter().enumerate() {
            let generation = self.tracker.begin_file(i);
            info!("File {}/{}: {}", i + 1, total, document.name());
            results.push(self.run(document, params, &control(), generation).await);
        }
        self.tracker.update(Some(total), None, None);
        results
    }

    // ── State machine ────────────────────────────────────────────────────

    async fn run(
        &self,
        document: &SourceDocument,
        params: &ProcessingParameters,
        control: &BatchControl,
        generation: u64,
    ) -> Result<DocumentResult, ProcessingError> {
        let started = Instant::now();
        let result = self.run_inner(document, params, control, generation).await;
        match &result {
            Ok(doc) => {
                info!(
                    "{}: {} pages in {}ms",
                    document.name(),
                    doc.metadata.total_pages,
                    started.elapsed().as_millis()
                );
            }
            Err(e) => {
                error!("{}: {}", document.name(), e);
                self.emit(Phase::Failed, &e.to_string());
            }
        }
        result
    }

    async fn run_inner(
        &self,
        document: &SourceDocument,
        params: &ProcessingParameters,
        control: &BatchControl,
        generation: u64,
    ) -> Result<DocumentResult, ProcessingError> {
        params.validate()?;

        // ── CACHE_LOOKUP ─────────────────────────────────────────────────
        let key = if params.use_cache {
            self.emit(Phase::CacheLookup, document.name());
            let key = self.derive_key(document, params).await?;
            if let Some(hit) = self.cache_get(&key).await {
                let pages = hit.metadata.total_pages;
                self.tracker.update(None, Some(pages), Some(pages));
                self.emit(Phase::CacheHit, &format!("{pages} pages from cache ({key})"));
                self.emit(Phase::Done, document.name());
                return Ok(hit);
            }
            debug!("Cache miss for {} ({})", document.name(), key);
            Some(key)
        } else {
            None
        };

        // ── SOURCE_OPEN ──────────────────────────────────────────────────
        self.emit(Phase::SourceOpen, document.format().tag());
        let Opened {
            mut source,
            prefetch,
            source_metadata,
            converter_tables,
        } = self.open_source(document, params).await?;
        let total_pages = source.total_pages();
        self.tracker.update(None, None, Some(total_pages));

        // ── BATCH_PROCESS (OCR + per-page enrichment) ────────────────────
        self.emit(
            Phase::BatchProcess,
            &format!("{} pages, window {}", total_pages, source.window()),
        );
        let executor = BatchExecutor::new(self.config.concurrency, self.config.retry);
        let work = self.page_worker(params, generation);
        let mut pages: Vec<PageResult> = Vec::with_capacity(total_pages);
        let mut prefetched = None;
        loop {
            if control.is_cancelled() {
                return Err(ProcessingError::Cancelled {
                    completed_pages: pages.len(),
                });
            }
            if control.expired() {
                return Err(control.timeout_error(pages.len()));
            }
            let next = match prefetched.take() {
                Some(next) => next,
                None => source.next_window().await,
            };
            let Some(window) = next else {
                break;
            };
            let done_before = pages.len();
            let batch = executor.run(window?, control, Arc::clone(&work));
            let results = if prefetch && source.remaining() > 0 {
                let (results, next) = tokio::join!(batch, source.next_window());
                prefetched = Some(next);
                results
            } else {
                batch.await
            };
            pages.extend(results.map_err(|e| offset_completed(e, done_before))?);
        }

        // ── ENRICH ───────────────────────────────────────────────────────
        if let Some(tables) = converter_tables {
            if let Some(first) = pages.iter_mut().find(|p| p.index == 1) {
                first
                    .plugin_results
                    .insert(CONVERTER_RESULT_KEY.to_string(), tables);
            }
        }
        let annotated = pages
            .iter()
            .map(|p| p.plugin_results.len())
            .sum::<usize>();
        self.emit(
            Phase::Enrich,
            &format!("{annotated} annotations on {} pages", pages.len()),
        );

        // ── ASSEMBLE ─────────────────────────────────────────────────────
        self.emit(Phase::Assemble, document.name());
        let result =
            DocumentResult::assemble(pages, total_pages, document.format(), source_metadata)
                .map_err(ProcessingError::Internal)?;

        // ── CACHE_WRITE ──────────────────────────────────────────────────
        if let Some(key) = key {
            self.emit(Phase::CacheWrite, &key.to_string());
            self.cache_set(key, &result).await;
        }

        self.emit(Phase::Done, document.name());
        Ok(result)
    }

    // ── Steps ────────────────────────────────────────────────────────────

    async fn derive_key(
        &self,
        document: &SourceDocument,
        params: &ProcessingParameters,
    ) -> Result<CacheKey, ProcessingError> {
        let bytes = document.shared_bytes();
        let params = params.clone();
        let scope = self.cache_scope();
        tokio::task::spawn_blocking(move || CacheKey::derive_scoped(&bytes, &params, &scope))
            .await
            .map_err(|e| ProcessingError::Internal(format!("Fingerprint task panicked: {e}")))
    }

    /// Pipeline identity that changes output without being a parameter.
    fn cache_scope(&self) -> String {
        format!(
            "{};max_px={}",
            self.engine.fingerprint(),
            self.config.max_rendered_pixels
        )
    }

    async fn cache_get(&self, key: &CacheKey) -> Option<DocumentResult> {
        let cache = Arc::clone(&self.cache);
        let key = key.clone();
        tokio::task::spawn_blocking(move || cache.get_by_key(&key))
            .await
            .unwrap_or_default()
    }

    async fn cache_set(&self, key: CacheKey, result: &DocumentResult) {
        let cache = Arc::clone(&self.cache);
        let result = result.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || cache.set_by_key(&key, &result)).await
        {
            // Best effort: a failed write only costs a future miss.
            error!("Cache write task failed: {}", e);
        }
    }

    async fn open_source(
        &self,
        document: &SourceDocument,
        params: &ProcessingParameters,
    ) -> Result<Opened, ProcessingError> {
        match document.format() {
            DocumentFormat::Pdf => {
                if !document.bytes().starts_with(b"%PDF") {
                    return Err(ProcessingError::Conversion {
                        format: "pdf".to_string(),
                        message: "missing %PDF header".to_string(),
                        page: None,
                    });
                }
                let prefetch = document.size() < self.config.chunk_threshold_bytes;
                let settings = RenderSettings {
                    dpi: params.dpi,
                    max_pixels: self.config.max_rendered_pixels,
                };
                let source = ChunkedPageSource::open(
                    Arc::clone(&self.renderer),
                    document,
                    settings,
                    params.batch_size,
                )
                .await?;
                Ok(Opened {
                    prefetch,
                    ..Opened::plain(source)
                })
            }
            DocumentFormat::Image(tag) => {
                let bytes = document.shared_bytes();
                let tag = tag.clone();
                let image = tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
                    .await
                    .map_err(|e| ProcessingError::Internal(format!("Decode task panicked: {e}")))?
                    .map_err(|e| ProcessingError::Conversion {
                        format: tag,
                        message: format!("cannot decode image: {e}"),
                        page: None,
                    })?;
                Ok(Opened::plain(ChunkedPageSource::single(PageUnit::raster(
                    1, image,
                ))))
            }
            DocumentFormat::Text | DocumentFormat::Other(_) => {
                let tag = document.format().tag().to_string();
                let converter = self
                    .converters
                    .resolve(&tag)
                    .map_err(|e| ProcessingError::Validation(e.to_string()))?;
                let bytes = document.shared_bytes();
                let params = params.clone();
                let converted =
                    tokio::task::spawn_blocking(move || converter.convert(&bytes, &params))
                        .await
                        .map_err(|e| {
                            ProcessingError::Internal(format!("Converter task panicked: {e}"))
                        })?
                        .map_err(|e| ProcessingError::Conversion {
                            format: tag.clone(),
                            message: e.to_string(),
                            page: None,
                        })?;
                let converter_tables = if converted.tables.is_empty() {
                    None
                } else {
                    Some(serde_json::json!({ "tables": converted.tables }))
                };
                Ok(Opened {
                    source: ChunkedPageSource::single(PageUnit::text(1, converted.text)),
                    prefetch: false,
                    source_metadata: converted.metadata,
                    converter_tables,
                })
            }
        }
    }

    /// The per-page work run on a blocking worker: OCR (raster pages only),
    /// normalisation, plugins, progress.
    ///
    /// Page advances are tagged with `generation` so a worker abandoned by a
    /// timeout cannot move the tracker once the next file has begun.
    fn page_worker(
        &self,
        params: &ProcessingParameters,
        generation: u64,
    ) -> Arc<impl Fn(&PageUnit) -> Result<PageResult, ProcessingError> + Send + Sync + 'static>
    {
        let engine = Arc::clone(&self.engine);
        let plugins = Arc::clone(&self.plugins);
        let tracker = Arc::clone(&self.tracker);
        let params = params.clone();

        Arc::new(move |unit: &PageUnit| -> Result<PageResult, ProcessingError> {
            let (raw, image) = match &unit.content {
                PageContent::Raster(img) => {
                    let text = engine.recognize(img, &params).map_err(|e| {
                        ProcessingError::OcrEngine {
                            page: unit.index,
                            message: e.to_string(),
                        }
                    })?;
                    (text, Some(img))
                }
                PageContent::Text(text) => (text.clone(), None),
            };
            let text = normalize_text(&raw);
            let plugin_results = plugins.run(
                &PluginInput {
                    text: &text,
                    image,
                },
                &PluginContext {
                    page_index: unit.index,
                    params: &params,
                },
            );
            tracker.advance_page_for(generation);
            Ok(PageResult {
                index: unit.index,
                text,
                plugin_results,
            })
        })
    }

    fn emit(&self, phase: Phase, message: &str) {
        debug!("[{}] {}", phase, message);
        if let Some(cb) = &self.status {
            cb.on_phase(phase, message);
        }
    }
}

struct Opened {
    source: ChunkedPageSource,
    /// Render the next window while the current one is in OCR.
    prefetch: bool,
    source_metadata: BTreeMap<String, String>,
    converter_tables: Option<serde_json::Value>,
}

impl Opened {
    fn plain(source: ChunkedPageSource) -> Self {
        Self {
            source,
            prefetch: false,
            source_metadata: BTreeMap::new(),
            converter_tables: None,
        }
    }
}

/// Executor counts only its own window; report document-wide progress.
fn offset_completed(e: ProcessingError, done_before: usize) -> ProcessingError {
    match e {
        ProcessingError::Timeout {
            elapsed_ms,
            completed_pages,
        } => ProcessingError::Timeout {
            elapsed_ms,
            completed_pages: completed_pages + done_before,
        },
        ProcessingError::Cancelled { completed_pages } => ProcessingError::Cancelled {
            completed_pages: completed_pages + done_before,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OcrError;
    use crate::progress::StatusCallback;
    use image::{DynamicImage, RgbImage};
    use parking_lot::Mutex;
    use std::ops::Range;
    use tempfile::TempDir;

    struct Pages(usize);

    impl PageRenderer for Pages {
        fn page_count(&self, _bytes: &[u8]) -> Result<usize, ProcessingError> {
            Ok(self.0)
        }

        fn render_pages(
            &self,
            _bytes: &[u8],
            pages: Range<usize>,
            _settings: &RenderSettings,
        ) -> Result<Vec<DynamicImage>, ProcessingError> {
            // Encode the 0-based page index in the image width.
            Ok(pages
                .map(|i| DynamicImage::ImageRgb8(RgbImage::new(i as u32 + 1, 1)))
                .collect())
        }
    }

    /// "page N" where N is recovered from the image width.
    struct WidthEngine;

    impl OcrEngine for WidthEngine {
        fn name(&self) -> &str {
            "width"
        }

        fn recognize(
            &self,
            image: &DynamicImage,
            _params: &ProcessingParameters,
        ) -> Result<String, OcrError> {
            Ok(format!("page {}", image.width()))
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Phase>>);

    impl StatusCallback for Recorder {
        fn on_phase(&self, phase: Phase, _message: &str) {
            self.0.lock().push(phase);
        }
    }

    fn orchestrator(dir: &TempDir, pages: usize) -> Orchestrator {
        let config = PipelineConfig::builder()
            .cache_dir(dir.path())
            .concurrency(2)
            .build()
            .unwrap();
        Orchestrator::builder(config)
            .renderer(Arc::new(Pages(pages)))
            .engine(Arc::new(WidthEngine))
            .build()
    }

    fn pdf() -> SourceDocument {
        SourceDocument::new(b"%PDF-1.7 fake".to_vec(), DocumentFormat::Pdf)
    }

    #[tokio::test]
    async fn phases_on_miss_then_hit() {
        let dir = TempDir::new().unwrap();
        let recorder = Arc::new(Recorder::default());
        let config = PipelineConfig::builder()
            .cache_dir(dir.path())
            .build()
            .unwrap();
        let orch = Orchestrator::builder(config)
            .renderer(Arc::new(Pages(2)))
            .engine(Arc::new(WidthEngine))
            .status_callback(recorder.clone())
            .build();
        let params = ProcessingParameters::default();

        orch.process(&pdf(), &params).await.unwrap();
        assert_eq!(
            *recorder.0.lock(),
            vec![
                Phase::CacheLookup,
                Phase::SourceOpen,
                Phase::BatchProcess,
                Phase::Enrich,
                Phase::Assemble,
                Phase::CacheWrite,
                Phase::Done,
            ]
        );

        recorder.0.lock().clear();
        orch.process(&pdf(), &params).await.unwrap();
        assert_eq!(
            *recorder.0.lock(),
            vec![Phase::CacheLookup, Phase::CacheHit, Phase::Done]
        );
    }

    #[tokio::test]
    async fn pdf_pages_in_order_with_text() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir, 5);
        let params = ProcessingParameters::builder()
            .batch_size(2)
            .use_cache(false)
            .build()
            .unwrap();
        let doc = orch.process(&pdf(), &params).await.unwrap();
        let texts: Vec<&str> = doc.pages.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(
            texts,
            vec!["page 1\n", "page 2\n", "page 3\n", "page 4\n", "page 5\n"]
        );
        assert_eq!(doc.metadata.total_pages, 5);
        assert_eq!(doc.metadata.format, "pdf");
        assert_eq!(orch.tracker().fraction(), 1.0);
    }

    #[tokio::test]
    async fn missing_pdf_magic_is_conversion_error() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir, 1);
        let doc = SourceDocument::new(b"hello".to_vec(), DocumentFormat::Pdf);
        let err = orch
            .process(&doc, &ProcessingParameters::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessingError::Conversion { .. }));
    }

    #[tokio::test]
    async fn unknown_format_without_converter_is_validation_error() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir, 1);
        let doc = SourceDocument::new(b"PK..".to_vec(), DocumentFormat::from_tag("docx"));
        let err = orch
            .process(&doc, &ProcessingParameters::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessingError::Validation(_)));
        assert!(err.to_string().contains("docx"));
    }

    #[tokio::test]
    async fn invalid_params_rejected_before_work() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir, 1);
        let params = ProcessingParameters {
            dpi: 10,
            ..ProcessingParameters::default()
        };
        let err = orch.process(&pdf(), &params).await.unwrap_err();
        assert!(matches!(err, ProcessingError::Validation(_)));
        assert!(orch.cache().is_empty());
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir, 3);
        let control = BatchControl::new();
        control.cancel();
        let err = orch
            .process_with(&pdf(), &ProcessingParameters::default(), &control)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProcessingError::Cancelled { completed_pages: 0 }
        ));
        assert!(orch.cache().is_empty());
    }

    #[test]
    fn offset_adds_prior_windows() {
        let e = offset_completed(
            ProcessingError::Timeout {
                elapsed_ms: 10,
                completed_pages: 1,
            },
            4,
        );
        assert!(matches!(
            e,
            ProcessingError::Timeout {
                completed_pages: 5,
                ..
            }
        ));
    }
}
