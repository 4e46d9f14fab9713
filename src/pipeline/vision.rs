//! Vision-LLM OCR engine.
//!
//! Sends each page image to a multimodal model through `edgequake-llm` and
//! uses the reply as the page text. Useful for handwriting and poor scans
//! where tesseract struggles; slower and costlier per page.
//!
//! ## Message layout
//!
//! 1. **System message**: transcription rules ([`TRANSCRIBE_PROMPT`]) plus a
//!    line naming the expected languages
//! 2. **User message**: the page as a base64 PNG attachment, empty text
//!
//! ## Threading
//!
//! [`OcrEngine::recognize`] is synchronous and runs on a blocking worker, so
//! the engine keeps a [`tokio::runtime::Handle`] captured at construction and
//! `block_on`s the provider call. Construct it inside the runtime that will
//! run the pipeline.

use super::ocr::OcrEngine;
use crate::config::ProcessingParameters;
use crate::error::{OcrError, ProcessingError};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use image::DynamicImage;
use std::io::Cursor;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::debug;

/// Model used when a provider is named without one.
pub const DEFAULT_VISION_MODEL: &str = "gpt-4.1-nano";

/// Transcription rules for a scanned medical page.
pub const TRANSCRIBE_PROMPT: &str = r#"You are an OCR engine for scanned medical documents. Transcribe the text on the page image exactly.

Rules:
1. Output ONLY the text on the page, in natural reading order.
2. Preserve line breaks between paragraphs, list items and table rows.
3. Keep medical terms, drug names, dosages, units and numbers exactly as written. Do not expand abbreviations.
4. Render table rows as cells separated by " | ".
5. Mark illegible words as [illegible]. Never guess.
6. Do not add commentary, headings, Markdown fences or page numbers that are not on the page."#;

/// Page transcription through a vision-capable LLM provider.
pub struct VisionOcrEngine {
    provider: Arc<dyn LLMProvider>,
    runtime: Handle,
    temperature: f32,
    max_tokens: usize,
}

impl std::fmt::Debug for VisionOcrEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisionOcrEngine")
            .field("provider", &"<dyn LLMProvider>")
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl VisionOcrEngine {
    /// Wrap a provider. Must be called from within a tokio runtime.
    pub fn new(provider: Arc<dyn LLMProvider>) -> Result<Self, ProcessingError> {
        let runtime = Handle::try_current().map_err(|e| {
            ProcessingError::Internal(format!("vision engine needs a tokio runtime: {e}"))
        })?;
        Ok(Self {
            provider,
            runtime,
            temperature: 0.0,
            max_tokens: 4096,
        })
    }

    /// Resolve a provider by name/model, or auto-detect one from the
    /// environment.
    ///
    /// Order: explicit `provider` name; `EDGEQUAKE_LLM_PROVIDER` +
    /// `EDGEQUAKE_MODEL`; `OPENAI_API_KEY`; full auto-detection.
    pub fn from_config(
        provider: Option<&str>,
        model: Option<&str>,
    ) -> Result<Self, ProcessingError> {
        Self::new(resolve_provider(provider, model)?)
    }

    pub fn with_temperature(mut self, t: f32) -> Self {
        self.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn with_max_tokens(mut self, n: usize) -> Self {
        self.max_tokens = n;
        self
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

impl OcrEngine for VisionOcrEngine {
    fn name(&self) -> &str {
        "vision"
    }

    fn fingerprint(&self) -> String {
        format!(
            "vision:{}:{}:t={}",
            self.provider.name(),
            self.provider.model(),
            self.temperature
        )
    }

    fn recognize(
        &self,
        image: &DynamicImage,
        params: &ProcessingParameters,
    ) -> Result<String, OcrError> {
        let data = encode_page(image)
            .map_err(|e| OcrError::new("vision", format!("image encoding failed: {e}")))?;
        let messages = vec![
            ChatMessage::system(system_prompt(params)),
            ChatMessage::user_with_images("", vec![data]),
        ];
        let options = self.options();

        let response = self
            .runtime
            .block_on(self.provider.chat(&messages, Some(&options)))
            .map_err(|e| OcrError::new("vision", e.to_string()))?;
        debug!(
            "vision: {} input tokens, {} output tokens",
            response.prompt_tokens, response.completion_tokens
        );
        Ok(response.content)
    }
}

fn system_prompt(params: &ProcessingParameters) -> String {
    format!(
        "{TRANSCRIBE_PROMPT}\n\nExpected languages (tesseract codes): {}.",
        params.language_set.join(", ")
    )
}

/// Encode a page as a lossless base64 PNG with full-resolution detail.
pub fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    let b64 = STANDARD.encode(&buf);
    debug!("Encoded page image → {} bytes base64", b64.len());
    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

fn create_provider(name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, ProcessingError> {
    ProviderFactory::create_llm_provider(name, model).map_err(|e| {
        ProcessingError::Validation(format!("LLM provider '{name}' is not configured: {e}"))
    })
}

fn resolve_provider(
    name: Option<&str>,
    model: Option<&str>,
) -> Result<Arc<dyn LLMProvider>, ProcessingError> {
    if let Some(name) = name {
        return create_provider(name, model.unwrap_or(DEFAULT_VISION_MODEL));
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_provider(&prov, model.unwrap_or(&env_model));
        }
    }

    if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        return create_provider("openai", model.unwrap_or(DEFAULT_VISION_MODEL));
    }

    let (llm, _embedding) = ProviderFactory::from_env().map_err(|e| {
        ProcessingError::Validation(format!(
            "No LLM provider could be auto-detected from environment.\n\
             Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or pass --provider.\n\
             Error: {e}"
        ))
    })?;
    Ok(llm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let data = encode_page(&img).unwrap();
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).unwrap();
        assert_eq!(&decoded[1..4], b"PNG");
    }

    #[test]
    fn prompt_names_languages() {
        let params = ProcessingParameters::builder()
            .languages(["rus", "eng"])
            .build()
            .unwrap();
        let prompt = system_prompt(&params);
        assert!(prompt.starts_with(TRANSCRIBE_PROMPT));
        assert!(prompt.ends_with("rus, eng."));
    }

    #[test]
    fn prompt_forbids_fences_and_guessing() {
        assert!(TRANSCRIBE_PROMPT.contains("Never guess"));
        assert!(TRANSCRIBE_PROMPT.contains("Markdown fences"));
    }
}
