//! Input resolution: turn a user-supplied path or URL into a
//! [`SourceDocument`].
//!
//! The format comes from an explicit override when given, else from the file
//! extension (URL path for downloads). Nothing here inspects content; magic
//! bytes are checked by the orchestrator for the format that was declared.

use crate::error::ProcessingError;
use crate::output::{DocumentFormat, SourceDocument};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Read a local file or download a URL.
///
/// `format` overrides extension-based detection.
pub async fn resolve_input(
    input: &str,
    format: Option<&str>,
    download_timeout: Duration,
) -> Result<SourceDocument, ProcessingError> {
    let (bytes, name) = if is_url(input) {
        (download_url(input, download_timeout).await?, url_file_name(input))
    } else {
        (read_local(input).await?, local_file_name(input))
    };

    let tag = match format {
        Some(f) => f.trim_start_matches('.').to_string(),
        None => extension_of(&name).ok_or_else(|| ProcessingError::Input {
            input: input.to_string(),
            reason: "cannot infer the format from the file name; pass --format".to_string(),
        })?,
    };
    let format = DocumentFormat::from_tag(&tag);
    debug!("Resolved {} as {} ({} bytes)", input, format, bytes.len());
    Ok(SourceDocument::new(bytes, format).with_name(name))
}

async fn read_local(path_str: &str) -> Result<Vec<u8>, ProcessingError> {
    tokio::fs::read(path_str).await.map_err(|e| {
        let reason = match e.kind() {
            std::io::ErrorKind::NotFound => "file not found".to_string(),
            std::io::ErrorKind::PermissionDenied => "permission denied".to_string(),
            _ => e.to_string(),
        };
        ProcessingError::Input {
            input: path_str.to_string(),
            reason,
        }
    })
}

async fn download_url(url: &str, timeout: Duration) -> Result<Vec<u8>, ProcessingError> {
    info!("Downloading document from: {}", url);
    let fail = |reason: String| ProcessingError::Input {
        input: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| fail(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            fail(format!("download timed out after {}s", timeout.as_secs()))
        } else {
            fail(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(fail(format!("HTTP {}", response.status())));
    }

    let bytes = response.bytes().await.map_err(|e| fail(e.to_string()))?;
    info!("Downloaded {} bytes", bytes.len());
    Ok(bytes.to_vec())
}

fn local_file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

/// Last non-empty path segment of a URL, or `"download"`.
fn url_file_name(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut s| s.next_back().map(str::to_string))
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "download".to_string())
}

fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .filter(|e| !e.is_empty())
}
