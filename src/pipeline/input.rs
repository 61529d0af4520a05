//! Input resolution: a user-supplied path or URL → PDF bytes plus filename.
//!
//! pdfium loads from a byte slice, so URL downloads stay in memory. The
//! filename is kept because the document name (the idempotency key) is
//! derived from its stem. PDF magic bytes (`%PDF`) are checked here so
//! callers get a meaningful error rather than a pdfium failure.

use crate::error::Pdf2SlidesError;
use std::path::PathBuf;
use tracing::{debug, info};

/// A resolved input: the raw PDF and the name it was uploaded under.
#[derive(Clone)]
pub struct ResolvedInput {
    pub bytes: Vec<u8>,
    /// File name including extension, e.g. `Week 3 - Cells.pdf`.
    pub filename: String,
}

impl std::fmt::Debug for ResolvedInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedInput")
            .field("filename", &self.filename)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve a local path or HTTP(S) URL to PDF bytes.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, Pdf2SlidesError> {
    if input.trim().is_empty() {
        return Err(Pdf2SlidesError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        resolve_local(input).await
    }
}

async fn resolve_local(path_str: &str) -> Result<ResolvedInput, Pdf2SlidesError> {
    let path = PathBuf::from(path_str);

    let bytes = match tokio::fs::read(&path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(Pdf2SlidesError::PermissionDenied { path });
        }
        Err(_) => return Err(Pdf2SlidesError::FileNotFound { path }),
    };

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Pdf2SlidesError::InvalidInput {
            input: path_str.to_string(),
        })?;
    check_pdf_magic(&filename, &bytes)?;

    debug!("Resolved local PDF: {} ({} bytes)", path.display(), bytes.len());
    Ok(ResolvedInput { bytes, filename })
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, Pdf2SlidesError> {
    info!("Downloading PDF from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Pdf2SlidesError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            Pdf2SlidesError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            Pdf2SlidesError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(Pdf2SlidesError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let filename = filename_from_url(url);
    let bytes = response
        .bytes()
        .await
        .map_err(|e| Pdf2SlidesError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?
        .to_vec();
    check_pdf_magic(url, &bytes)?;

    info!("Downloaded {} ({} bytes)", filename, bytes.len());
    Ok(ResolvedInput { bytes, filename })
}

fn check_pdf_magic(source_name: &str, bytes: &[u8]) -> Result<(), Pdf2SlidesError> {
    if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
        return Err(Pdf2SlidesError::NotAPdf {
            source_name: source_name.to_string(),
            magic: bytes[..bytes.len().min(4)].to_vec(),
        });
    }
    Ok(())
}

/// Last path segment of the URL when it looks like a filename, percent-decoded.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return percent_decode(last);
                }
            }
        }
    }
    "downloaded.pdf".to_string()
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(b) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url("doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn filename_comes_from_last_segment() {
        assert_eq!(filename_from_url("https://x.example/a/Week%203.pdf"), "Week 3.pdf");
        assert_eq!(filename_from_url("https://x.example/a/deck.pdf?sig=1"), "deck.pdf");
        assert_eq!(filename_from_url("https://x.example/download"), "downloaded.pdf");
    }

    #[tokio::test]
    async fn local_pdf_is_read_with_its_filename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Cells 101.pdf");
        std::fs::write(&path, b"%PDF-1.7\n%fake").unwrap();

        let input = resolve_input(path.to_str().unwrap(), 5).await.unwrap();
        assert_eq!(input.filename, "Cells 101.pdf");
        assert!(input.bytes.starts_with(b"%PDF"));
    }

    #[tokio::test]
    async fn local_non_pdf_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.pdf");
        std::fs::write(&path, b"PK\x03\x04zip").unwrap();

        let err = resolve_input(path.to_str().unwrap(), 5).await.unwrap_err();
        assert!(matches!(err, Pdf2SlidesError::NotAPdf { ref magic, .. } if magic == b"PK\x03\x04"));
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let err = resolve_input("/definitely/not/here.pdf", 5).await.unwrap_err();
        assert!(matches!(err, Pdf2SlidesError::FileNotFound { .. }));
        let err = resolve_input("  ", 5).await.unwrap_err();
        assert!(matches!(err, Pdf2SlidesError::InvalidInput { .. }));
    }
}
