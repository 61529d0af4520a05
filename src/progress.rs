//! Progress-callback trait for per-run materialisation events.
//!
//! Inject an [`Arc<dyn RunProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the orchestrator walks the pages. Callers can forward them to a
//! terminal progress bar, a job-status row, or a websocket.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdf2slides::{PipelineConfig, RunProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     installed: AtomicUsize,
//! }
//!
//! impl RunProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, page_num: usize, total_pages: usize, slide_id: i64) {
//!         self.installed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Page {}/{} → slide {}", page_num, total_pages, slide_id);
//!     }
//! }
//!
//! let cb = Arc::new(CountingCallback { installed: AtomicUsize::new(0) });
//! let config = PipelineConfig::builder()
//!     .progress_callback(cb as Arc<dyn RunProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the orchestrator as a run progresses.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Page events arrive in page order.
pub trait RunProgressCallback: Send + Sync {
    /// Called once the PDF has been rasterised.
    fn on_run_start(&self, document: &str, total_pages: usize) {
        let _ = (document, total_pages);
    }

    /// Called after the previous slide set was retired.
    fn on_retired(&self, retired_slides: usize) {
        let _ = retired_slides;
    }

    /// Called before a page enters derivation.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page's slide and module link are committed.
    fn on_page_complete(&self, page_num: usize, total_pages: usize, slide_id: i64) {
        let _ = (page_num, total_pages, slide_id);
    }

    /// Called when a page is recorded as failed.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: String) {
        let _ = (page_num, total_pages, error);
    }

    /// Called once after finalisation.
    fn on_run_complete(&self, total_pages: usize, succeeded: usize) {
        let _ = (total_pages, succeeded);
    }
}

/// A no-op implementation; the default when no callback is configured.
pub struct NoopProgressCallback;

impl RunProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn RunProgressCallback>;
