//! Configuration types for document processing.
//!
//! Two structs split the knobs by whether they change the *result*:
//!
//! * [`ProcessingParameters`]: options that affect the output (languages,
//!   DPI, window size, enabled plugins). They are serialised canonically into
//!   the cache fingerprint, so changing any field is a cache miss.
//! * [`PipelineConfig`]: options that only affect *how* the work runs
//!   (cache location and TTL, worker count, retry policy). Changing them never
//!   invalidates cached results.
//!
//! Both are built through builders that validate in `build()`.

use crate::error::ProcessingError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

/// Name of the built-in term-extraction plugin.
pub const MEDICAL_TERM_PLUGIN: &str = "medical_term";
/// Name of the built-in table-detection plugin.
pub const TABLE_DETECTOR_PLUGIN: &str = "table_detector";

/// Options that control the content of a [`crate::output::DocumentResult`].
///
/// Field order is fixed and `enable_plugins` is a sorted set, so the JSON
/// serialisation is canonical: two equal values always serialise to the same
/// bytes, which is what the cache fingerprint relies on.
///
/// # Example
/// ```rust
/// use medocr::ProcessingParameters;
///
/// let params = ProcessingParameters::builder()
///     .languages(["eng", "rus"])
///     .dpi(200)
///     .batch_size(2)
///     .build()
///     .unwrap();
/// assert_eq!(params.language_set, vec!["eng", "rus"]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingParameters {
    /// OCR language codes, in priority order. Default: `["eng", "rus"]`.
    pub language_set: Vec<String>,

    /// Rendering DPI for paginated documents. Range: 72–600. Default: 300.
    ///
    /// Lower values trade recognition accuracy for memory and speed; the
    /// pipeline never adjusts this on its own.
    pub dpi: u32,

    /// Pages rendered and held in memory at once. Default: 4.
    pub batch_size: usize,

    /// Plugins to run on each page. Default: all built-in plugins.
    pub enable_plugins: BTreeSet<String>,

    /// Consult and populate the result cache. Default: true.
    pub use_cache: bool,
}

impl Default for ProcessingParameters {
    fn default() -> Self {
        Self {
            language_set: vec!["eng".to_string(), "rus".to_string()],
            dpi: 300,
            batch_size: 4,
            enable_plugins: [MEDICAL_TERM_PLUGIN, TABLE_DETECTOR_PLUGIN]
                .into_iter()
                .map(String::from)
                .collect(),
            use_cache: true,
        }
    }
}

impl ProcessingParameters {
    pub fn builder() -> ProcessingParametersBuilder {
        ProcessingParametersBuilder {
            params: Self::default(),
        }
    }

    /// Re-check invariants on a value that did not come through the builder
    /// (e.g. a struct literal or a deserialised request).
    pub fn validate(&self) -> Result<(), ProcessingError> {
        if self.dpi < 72 || self.dpi > 600 {
            return Err(ProcessingError::Validation(format!(
                "DPI must be 72–600, got {}",
                self.dpi
            )));
        }
        if self.batch_size == 0 {
            return Err(ProcessingError::Validation(
                "batch_size must be ≥ 1".into(),
            ));
        }
        if self.language_set.is_empty() {
            return Err(ProcessingError::Validation(
                "at least one OCR language is required".into(),
            ));
        }
        if let Some(bad) = self
            .language_set
            .iter()
            .find(|l| l.is_empty() || !l.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
        {
            return Err(ProcessingError::Validation(format!(
                "invalid OCR language code '{bad}'"
            )));
        }
        Ok(())
    }

    /// Languages joined the way tesseract expects them (`eng+rus`).
    pub fn language_spec(&self) -> String {
        self.language_set.join("+")
    }

    pub fn plugin_enabled(&self, name: &str) -> bool {
        self.enable_plugins.contains(name)
    }
}

/// Builder for [`ProcessingParameters`].
#[derive(Debug)]
pub struct ProcessingParametersBuilder {
    params: ProcessingParameters,
}

impl ProcessingParametersBuilder {
    /// Replace the language list. Duplicates are dropped, first one wins.
    pub fn languages<I, S>(mut self, langs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = BTreeSet::new();
        self.params.language_set = langs
            .into_iter()
            .map(Into::into)
            .filter(|l: &String| seen.insert(l.clone()))
            .collect();
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.params.dpi = dpi;
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.params.batch_size = n;
        self
    }

    /// Replace the enabled plugin set.
    pub fn plugins<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params.enable_plugins = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn use_cache(mut self, v: bool) -> Self {
        self.params.use_cache = v;
        self
    }

    /// Build the parameters, validating constraints.
    pub fn build(self) -> Result<ProcessingParameters, ProcessingError> {
        self.params.validate()?;
        Ok(self.params)
    }
}

/// Per-page retry behaviour of the batch executor.
///
/// The default is no retry: a failing page fails the document, and the error
/// names the page so the caller can retry deliberately. When retries are
/// enabled the delay doubles after each attempt
/// (`backoff_ms * 2^(attempt-1)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            backoff_ms: 500,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self::default()
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.backoff_ms.saturating_mul(factor))
    }
}

/// Runtime configuration of the pipeline; never part of the cache key.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory holding one JSON file per cache entry. Default: `.cache`.
    pub cache_dir: PathBuf,

    /// Entries older than this are treated as absent. Default: 24 h.
    pub cache_ttl: Duration,

    /// Interval of the background expiry sweep. Default: 1 h.
    pub sweep_interval: Duration,

    /// Worker pool size. Default: available parallelism.
    pub concurrency: usize,

    /// PDFs below this size render their next `batch_size` window while the
    /// current one is in OCR; larger ones render one window at a time.
    /// Default: 5 MiB.
    pub chunk_threshold_bytes: usize,

    /// Cap on either rendered dimension, independent of DPI. Default: 4000.
    pub max_rendered_pixels: u32,

    /// Per-page retry behaviour. Default: no retry.
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(".cache"),
            cache_ttl: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(60 * 60),
            concurrency: default_concurrency(),
            chunk_threshold_bytes: 5 * 1024 * 1024,
            max_rendered_pixels: 4000,
            retry: RetryPolicy::default(),
        }
    }
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = dir.into();
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache_ttl = ttl;
        self
    }

    pub fn sweep_interval(mut self, every: Duration) -> Self {
        self.config.sweep_interval = every;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn chunk_threshold_bytes(mut self, n: usize) -> Self {
        self.config.chunk_threshold_bytes = n;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, ProcessingError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(ProcessingError::Validation(
                "concurrency must be ≥ 1".into(),
            ));
        }
        if c.sweep_interval.is_zero() {
            return Err(ProcessingError::Validation(
                "sweep interval must be non-zero".into(),
            ));
        }
        if c.max_rendered_pixels < 100 {
            return Err(ProcessingError::Validation(format!(
                "max_rendered_pixels must be ≥ 100, got {}",
                c.max_rendered_pixels
            )));
        }
        Ok(self.config)
    }
}
