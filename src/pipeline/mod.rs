//! Per-page pipeline stages for PDF-to-slide materialisation.
//!
//! Each submodule implements exactly one transformation step and is
//! independently testable. The orchestrator in [`crate::materialize`] drives
//! them; the persistence side lives in [`crate::replace`].
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ derive ───────────────▶ (upload + install)
//! (URL/path) (pdfium)  (JPEG + 2 variants)
//!                 └──▶ encode ──▶ llm ──▶ normalize/extract ──┘
//!                      (base64)  (VLM)   (flat text + policy)
//! ```
//!
//! 1. [`input`]     — read a local path or download a URL; check `%PDF`
//! 2. [`render`]    — rasterise every page; `spawn_blocking` because pdfium
//!    is not async-safe
//! 3. [`derive`]    — base JPEG plus fixed-size `thumbnail` and `card`
//! 4. [`encode`]    — base64-wrap the raster for the multimodal request
//! 5. [`llm`]       — the [`llm::SlideClassifier`] seam and its VLM
//!    implementation with retry/backoff
//! 6. [`normalize`] — flatten any JSON content shape into one string
//! 7. [`extract`]   — title default, content fallback, classification
//!    coercion, failure sentinel

pub mod derive;
pub mod encode;
pub mod extract;
pub mod input;
pub mod llm;
pub mod normalize;
pub mod render;
