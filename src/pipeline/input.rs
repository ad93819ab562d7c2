//! Input resolution: turn a user-supplied path or URL into validated PDF bytes.
//!
//! ## Why bytes, not a path?
//!
//! Detection reads the document twice (rasterise, then metadata on demand)
//! and never writes back to it. Holding the bytes in memory lets both passes
//! open it through `load_pdf_from_byte_slice` without temp files, and makes
//! URL and local inputs identical from here on.
//!
//! Inputs are checked for the `%PDF` magic and for the upload size limit
//! before pdfium ever sees them, so callers get a precise error instead of a
//! generic parse failure.

use crate::error::DetectError;
use std::path::PathBuf;
use tracing::{debug, info};

/// Largest accepted input, in bytes.
pub const MAX_INPUT_BYTES: u64 = 50 * 1024 * 1024;

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve `input` (local path or http(s) URL) to PDF bytes.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<Vec<u8>, DetectError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        read_local(input).await
    }
}

/// Reject inputs that are too large or do not start with `%PDF`.
pub fn validate_pdf_bytes(bytes: &[u8], source_name: &str) -> Result<(), DetectError> {
    let size = bytes.len() as u64;
    if size > MAX_INPUT_BYTES {
        return Err(DetectError::TooLarge {
            source_name: source_name.to_string(),
            size,
            limit: MAX_INPUT_BYTES,
        });
    }
    if !bytes.starts_with(b"%PDF") {
        let mut magic = [0u8; 4];
        let n = bytes.len().min(4);
        magic[..n].copy_from_slice(&bytes[..n]);
        return Err(DetectError::NotAPdf {
            source_name: source_name.to_string(),
            magic,
        });
    }
    Ok(())
}

async fn read_local(path_str: &str) -> Result<Vec<u8>, DetectError> {
    let path = PathBuf::from(path_str);

    let meta = tokio::fs::metadata(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => DetectError::PermissionDenied { path: path.clone() },
        _ => DetectError::FileNotFound { path: path.clone() },
    })?;
    if meta.len() > MAX_INPUT_BYTES {
        return Err(DetectError::TooLarge {
            source_name: path.display().to_string(),
            size: meta.len(),
            limit: MAX_INPUT_BYTES,
        });
    }

    let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => DetectError::PermissionDenied { path: path.clone() },
        _ => DetectError::FileNotFound { path: path.clone() },
    })?;
    validate_pdf_bytes(&bytes, &path.display().to_string())?;

    debug!("Resolved local PDF: {} ({} bytes)", path.display(), bytes.len());
    Ok(bytes)
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<Vec<u8>, DetectError> {
    info!("Downloading PDF from: {}", url);

    let failed = |reason: String| DetectError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            DetectError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }
    if let Some(len) = response.content_length() {
        if len > MAX_INPUT_BYTES {
            return Err(DetectError::TooLarge {
                source_name: url.to_string(),
                size: len,
                limit: MAX_INPUT_BYTES,
            });
        }
    }

    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
    validate_pdf_bytes(&bytes, url)?;

    info!("Downloaded {} bytes", bytes.len());
    Ok(bytes.to_vec())
}
