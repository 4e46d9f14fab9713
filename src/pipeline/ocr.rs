//! OCR engine seam and the Tesseract CLI engine.
//!
//! The pipeline treats recognition as an opaque, possibly slow, possibly
//! failing call. Engines are synchronous because they are always invoked
//! from a blocking worker thread (see [`super::executor`]).

use crate::config::ProcessingParameters;
use crate::error::OcrError;
use image::DynamicImage;
use std::path::PathBuf;
use std::process::Command;
use tracing::debug;

/// Page image → text.
pub trait OcrEngine: Send + Sync {
    /// Short name used in logs and error messages.
    fn name(&self) -> &str;

    /// Identity folded into the cache key. Engines or settings that can read
    /// the same page differently must report different fingerprints.
    fn fingerprint(&self) -> String {
        self.name().to_string()
    }

    /// Recognise the text of one page image.
    ///
    /// Uses `params.language_set` and `params.dpi` as hints where the engine
    /// supports them.
    fn recognize(
        &self,
        image: &DynamicImage,
        params: &ProcessingParameters,
    ) -> Result<String, OcrError>;
}

/// Shells out to the `tesseract` binary.
///
/// Each page is written to a temporary PNG which is deleted when the call
/// returns. Recognised text is read from stdout.
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    binary: PathBuf,
    /// Page segmentation mode (`--psm`). Default 3: fully automatic.
    psm: u8,
}

impl Default for TesseractEngine {
    fn default() -> Self {
        let binary = std::env::var_os("TESSERACT_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("tesseract"));
        Self { binary, psm: 3 }
    }
}

impl TesseractEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_psm(mut self, psm: u8) -> Self {
        self.psm = psm;
        self
    }

    fn command(&self, image_path: &std::path::Path, params: &ProcessingParameters) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(image_path)
            .arg("stdout")
            .arg("-l")
            .arg(params.language_spec())
            .arg("--dpi")
            .arg(params.dpi.to_string())
            .arg("--psm")
            .arg(self.psm.to_string());
        cmd
    }
}

impl OcrEngine for TesseractEngine {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn fingerprint(&self) -> String {
        format!("tesseract:psm={}", self.psm)
    }

    fn recognize(
        &self,
        image: &DynamicImage,
        params: &ProcessingParameters,
    ) -> Result<String, OcrError> {
        let err = |msg: String| OcrError::new("tesseract", msg);

        let tmp = tempfile::Builder::new()
            .prefix("medocr-page-")
            .suffix(".png")
            .tempfile()
            .map_err(|e| err(format!("cannot create temp image: {e}")))?;
        image
            .save_with_format(tmp.path(), image::ImageFormat::Png)
            .map_err(|e| err(format!("cannot write temp image: {e}")))?;

        let output = self.command(tmp.path(), params).output().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                err(format!(
                    "'{}' not found; install tesseract or set TESSERACT_PATH",
                    self.binary.display()
                ))
            } else {
                err(e.to_string())
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(err(format!(
                "exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!(
            "tesseract recognised {} chars ({}x{} px)",
            text.chars().count(),
            image.width(),
            image.height()
        );
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn command_carries_languages_and_dpi() {
        let params = ProcessingParameters::builder()
            .languages(["eng", "deu"])
            .dpi(200)
            .build()
            .unwrap();
        let engine = TesseractEngine::new().with_binary("tess").with_psm(6);
        let cmd = engine.command(std::path::Path::new("/tmp/p.png"), &params);
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(cmd.get_program(), "tess");
        assert_eq!(
            args,
            vec!["/tmp/p.png", "stdout", "-l", "eng+deu", "--dpi", "200", "--psm", "6"]
        );
    }

    #[test]
    fn fingerprint_tracks_segmentation_mode() {
        let auto = TesseractEngine::new();
        let block = TesseractEngine::new().with_psm(6);
        assert_eq!(auto.fingerprint(), "tesseract:psm=3");
        assert_ne!(auto.fingerprint(), block.fingerprint());
    }

    #[test]
    fn missing_binary_is_an_ocr_error() {
        let engine = TesseractEngine::new().with_binary("/nonexistent/medocr-tesseract");
        let img = DynamicImage::ImageRgb8(RgbImage::new(8, 8));
        let err = engine
            .recognize(&img, &ProcessingParameters::default())
            .unwrap_err();
        assert_eq!(err.engine, "tesseract");
        assert!(err.message.contains("not found"), "got {}", err.message);
    }
}
