//! # edgequake-pdf2slides
//!
//! Materialise a PDF deck into a course module's slide list: one image
//! artifact, one classified slide record, and one ordered module link per
//! page, using a Vision Language Model to read each page.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input     resolve local file or download from URL
//!  ├─ 2. Render    rasterise pages via pdfium (CPU-bound, spawn_blocking)
//!  ├─ 3. Retire    delete the document's previous slides in the module (once)
//!  ├─ 4. Derive    JPEG base image + thumbnail/card variants, canonical filenames
//!  ├─ 5. Extract   VLM → {title, content, type, links}, normalised
//!  ├─ 6. Upload    object store (local directory or in-memory)
//!  ├─ 7. Install   media → slide → link, one transaction per page, page order
//!  └─ 8. Finalize  link order = page index, structured RunResult
//! ```
//!
//! Re-running the same document replaces its slides instead of appending, and
//! reuses page images already stored under their canonical filenames.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdf2slides::{MemoryObjectStore, MemorySlideStore, Pipeline, PipelineConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let pipeline = Pipeline::from_config(
//!         PipelineConfig::default(),
//!         Arc::new(MemoryObjectStore::default()),
//!         Arc::new(MemorySlideStore::new()),
//!     )?;
//!     let result = pipeline.materialize_input("deck.pdf", 42, None).await?;
//!     println!("{}/{} pages installed", result.succeeded(), result.total_pages);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature    | Default | Description |
//! |------------|---------|-------------|
//! | `cli`      | on      | Enables the `pdf2slides` binary (clap + anyhow + tracing-subscriber) |
//! | `postgres` | off     | `PgSlideStore` over the media / slides / modules_rels tables (sqlx) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod materialize;
pub mod model;
pub mod naming;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod replace;
pub mod storage;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    ContentFallback, ExtractionFailurePolicy, PipelineConfig, PipelineConfigBuilder, VariantSize,
};
pub use error::{PageError, Pdf2SlidesError};
pub use materialize::{inspect, InputSummary, Pipeline};
pub use model::{MediaRecord, ModuleSlideLink, ModuleSummary, SlideKind, SlideRecord};
pub use naming::DocumentName;
pub use output::{InstalledSlide, PageOutcome, PageStage, RunResult, RunStatus};
pub use progress::{NoopProgressCallback, ProgressCallback, RunProgressCallback};
pub use replace::{RunClaims, SlideSetReplacer};
pub use storage::{LocalObjectStore, MemoryObjectStore, ObjectStore};
pub use store::{MemorySlideStore, SlideStore, StoreClaim};
#[cfg(feature = "postgres")]
pub use store::PgSlideStore;
