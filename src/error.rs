//! Error types for the edgequake-pdf2slides library.
//!
//! Two tiers mirror the two ways a run can go wrong:
//!
//! * [`Pdf2SlidesError`] — **Fatal**: the run cannot proceed or its persisted
//!   state would be ambiguous (undecodable PDF, failed retirement, a second
//!   run on the same module/document key). Returned as `Err` from the
//!   top-level entry points.
//!
//! * [`PageError`] — **Non-fatal**: one page could not be materialised
//!   (unreadable raster, classifier outage, store write failure). Recorded in
//!   [`crate::output::PageOutcome`] while the run moves on to the next page.
//!
//! The collaborator errors ([`ArtifactError`], [`ExtractionError`],
//! [`PersistenceError`], [`StorageError`]) are what the individual seams
//! return; the orchestrator converts them into one of the two tiers at the
//! page or run boundary.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-pdf2slides library.
#[derive(Debug, Error)]
pub enum Pdf2SlidesError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The bytes were read, but they are not a PDF.
    #[error("Input '{source_name}' is not a valid PDF\nFirst bytes: {magic:?}")]
    NotAPdf { source_name: String, magic: Vec<u8> },

    /// The upload filename has no usable stem.
    #[error("Cannot derive a document name from '{filename}'")]
    InvalidDocumentName { filename: String },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF could not be decoded, or it has no pages.
    #[error("PDF '{document}' could not be decoded: {detail}")]
    Decode { document: String, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{document}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { document: String },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{document}'")]
    WrongPassword { document: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Install libpdfium for your platform, or point PDFIUM_LIB_PATH at an\n\
existing copy (the directory containing libpdfium.so / .dylib / pdfium.dll).\n"
    )]
    PdfiumBindingFailed(String),

    // ── Slide set errors ──────────────────────────────────────────────────
    /// Retiring the previous slide set failed; the module state is unknown.
    #[error("Failed to retire previous slides of '{document}' in module {module_id}: {source}")]
    RetirementFailed {
        module_id: i64,
        document: String,
        #[source]
        source: PersistenceError,
    },

    /// Another run already holds the claim on this (module, document) key.
    #[error("A run for document '{document}' in module {module_id} is already in progress")]
    RunInProgress { module_id: i64, document: String },

    /// A read-only store query failed.
    #[error("Slide store error: {0}")]
    Persistence(#[from] PersistenceError),

    // ── Classifier errors ─────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single page.
///
/// Stored inside [`crate::output::PageOutcome`] when a page fails; the run
/// continues with the remaining pages.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The page raster could not be turned into media artifacts.
    #[error("Page {page}: artifact derivation failed: {detail}")]
    Artifact { page: usize, detail: String },

    /// The classifier failed and the policy is to skip the page.
    #[error("Page {page}: content extraction failed: {detail}")]
    Extraction { page: usize, detail: String },

    /// The object store rejected the upload.
    #[error("Page {page}: upload failed: {detail}")]
    Upload { page: usize, detail: String },

    /// The install unit of work (artifact, slide, link) was rolled back.
    #[error("Page {page}: persistence failed: {detail}")]
    Persistence { page: usize, detail: String },
}

impl PageError {
    /// 1-based page number the error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::Artifact { page, .. }
            | PageError::Extraction { page, .. }
            | PageError::Upload { page, .. }
            | PageError::Persistence { page, .. } => *page,
        }
    }
}

/// Unreadable or unencodable page image.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("image decode failed: {0}")]
    Decode(String),

    #[error("image encode failed: {0}")]
    Encode(String),

    #[error("raster has zero width or height")]
    EmptyRaster,
}

/// Classifier failure. Never escapes the content extractor.
#[derive(Debug, Clone, Error)]
pub enum ExtractionError {
    #[error("classifier timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("classifier rejected credentials: {0}")]
    Auth(String),

    #[error("classifier API error: {0}")]
    Api(String),

    #[error("classifier returned a malformed response: {0}")]
    Malformed(String),
}

/// Slide store failure.
#[derive(Debug, Clone, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(String),

    #[error("media {media_id} does not exist")]
    MissingMedia { media_id: i64 },

    #[error("slide {slide_id} does not exist")]
    MissingSlide { slide_id: i64 },

    #[error("slide {slide_id} is already linked to module {module_id}")]
    DuplicateLink { module_id: i64, slide_id: i64 },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for PersistenceError {
    fn from(e: sqlx::Error) -> Self {
        PersistenceError::Database(e.to_string())
    }
}

/// Object store failure.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("upload failed: {0}")]
    UploadFailed(String),

    #[error("invalid storage key: {0}")]
    InvalidKey(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_error_reports_its_page() {
        let e = PageError::Upload {
            page: 4,
            detail: "503".into(),
        };
        assert_eq!(e.page(), 4);
        assert!(e.to_string().contains("Page 4"));
    }

    #[test]
    fn retirement_failure_display() {
        let e = Pdf2SlidesError::RetirementFailed {
            module_id: 7,
            document: "intro".into(),
            source: PersistenceError::Database("deadlock detected".into()),
        };
        let msg = e.to_string();
        assert!(msg.contains("module 7"), "got: {msg}");
        assert!(msg.contains("deadlock"), "got: {msg}");
    }

    #[test]
    fn run_in_progress_display() {
        let e = Pdf2SlidesError::RunInProgress {
            module_id: 3,
            document: "week1".into(),
        };
        assert!(e.to_string().contains("week1"));
    }

    #[test]
    fn persistence_converts_into_fatal() {
        let e: Pdf2SlidesError = PersistenceError::Unavailable("down".into()).into();
        assert!(matches!(e, Pdf2SlidesError::Persistence(_)));
    }
}
