//! Configuration types for PDF-to-slide materialisation.
//!
//! Every knob of a run lives in [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. Collaborators (store, object store, classifier)
//! are not configuration; they are passed to [`crate::materialize::Pipeline`]
//! explicitly.

use crate::error::Pdf2SlidesError;
use crate::model::SlideKind;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for a materialisation run.
///
/// # Example
/// ```rust
/// use edgequake_pdf2slides::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .dpi(150)
///     .concurrency(4)
///     .model("gpt-4.1-nano")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Rendering DPI used when rasterising each page. Range: 72–400. Default: 150.
    pub dpi: u32,

    /// Longest edge of a rendered page in pixels. Default: 2000.
    ///
    /// Caps memory on oversized pages (posters, A0 scans) independently of DPI.
    pub max_rendered_pixels: u32,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Directory or file of the pdfium shared library. `None` binds the
    /// system library.
    pub pdfium_library_path: Option<PathBuf>,

    /// Fixed size of the `thumbnail` variant. Default: 400×300.
    pub thumbnail_size: VariantSize,

    /// Fixed size of the `card` variant. Default: 768×1024.
    pub card_size: VariantSize,

    /// JPEG quality for the base image and variants (1–100). Default: 85.
    pub jpeg_quality: u8,

    /// Pre-constructed vision provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Vision provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Vision model identifier. If None, uses `gpt-4.1-nano`.
    pub model: Option<String>,

    /// Sampling temperature for classification. Default: 0.0.
    pub temperature: f32,

    /// Maximum tokens the classifier may generate per page. Default: 2048.
    pub max_tokens: usize,

    /// Retries per classifier call on transient failure. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-classifier-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Custom classifier system prompt. If None, uses the built-in prompt.
    pub system_prompt: Option<String>,

    /// Pages whose classification may be in flight ahead of the install
    /// cursor. Installs always happen in page order. Default: 4.
    pub concurrency: usize,

    /// What to store as content when normalisation yields nothing.
    pub content_fallback: ContentFallback,

    /// Classification assigned when the classifier returns an unknown value.
    pub unknown_classification: SlideKind,

    /// What to do with a page whose classification failed.
    pub extraction_failure: ExtractionFailurePolicy,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Optional per-run progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dpi: 150,
            max_rendered_pixels: 2000,
            password: None,
            pdfium_library_path: None,
            thumbnail_size: VariantSize::new(400, 300),
            card_size: VariantSize::new(768, 1024),
            jpeg_quality: 85,
            provider: None,
            provider_name: None,
            model: None,
            temperature: 0.0,
            max_tokens: 2048,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            system_prompt: None,
            concurrency: 4,
            content_fallback: ContentFallback::default(),
            unknown_classification: SlideKind::Regular,
            extraction_failure: ExtractionFailurePolicy::default(),
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("pdfium_library_path", &self.pdfium_library_path)
            .field("thumbnail_size", &self.thumbnail_size)
            .field("card_size", &self.card_size)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("provider_name", &self.provider_name)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("concurrency", &self.concurrency)
            .field("content_fallback", &self.content_fallback)
            .field("unknown_classification", &self.unknown_classification)
            .field("extraction_failure", &self.extraction_failure)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
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
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn pdfium_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library_path = Some(path.into());
        self
    }

    pub fn thumbnail_size(mut self, width: u32, height: u32) -> Self {
        self.config.thumbnail_size = VariantSize::new(width, height);
        self
    }

    pub fn card_size(mut self, width: u32, height: u32) -> Self {
        self.config.card_size = VariantSize::new(width, height);
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q.clamp(1, 100);
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn content_fallback(mut self, fallback: ContentFallback) -> Self {
        self.config.content_fallback = fallback;
        self
    }

    pub fn unknown_classification(mut self, kind: SlideKind) -> Self {
        self.config.unknown_classification = kind;
        self
    }

    pub fn extraction_failure(mut self, policy: ExtractionFailurePolicy) -> Self {
        self.config.extraction_failure = policy;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, Pdf2SlidesError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(Pdf2SlidesError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        for (name, size) in [("thumbnail", c.thumbnail_size), ("card", c.card_size)] {
            if size.width == 0 || size.height == 0 {
                return Err(Pdf2SlidesError::InvalidConfig(format!(
                    "{name} size must be non-zero, got {}x{}",
                    size.width, size.height
                )));
            }
        }
        if c.concurrency == 0 {
            return Err(Pdf2SlidesError::InvalidConfig(
                "Concurrency must be at least 1".into(),
            ));
        }
        if !(1..=100).contains(&c.jpeg_quality) {
            return Err(Pdf2SlidesError::InvalidConfig(format!(
                "JPEG quality must be 1–100, got {}",
                c.jpeg_quality
            )));
        }
        if let ContentFallback::Fixed(ref s) = c.content_fallback {
            if s.trim().is_empty() {
                return Err(Pdf2SlidesError::InvalidConfig(
                    "Fixed content fallback must not be blank".into(),
                ));
            }
        }
        Ok(self.config)
    }
}

// ── Policy types ─────────────────────────────────────────────────────────

/// Target pixel size of a derived variant. Variants are resized to exactly
/// this size, never cropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantSize {
    pub width: u32,
    pub height: u32,
}

impl VariantSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Substitute stored as slide content when the normalised body is empty.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ContentFallback {
    /// Use the slide title (default).
    #[default]
    Title,
    /// Use a fixed string.
    Fixed(String),
}

/// How the orchestrator treats a page whose classifier call failed.
///
/// The extractor itself never fails; it hands back a sentinel record. This
/// policy decides whether that sentinel is worth persisting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExtractionFailurePolicy {
    /// Report the page as failed and install nothing for it (default).
    #[default]
    FailPage,
    /// Install the sentinel slide so the page keeps its slot in the module.
    InstallSentinel,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_published_artifact_sizes() {
        let c = PipelineConfig::default();
        assert_eq!(c.thumbnail_size, VariantSize::new(400, 300));
        assert_eq!(c.card_size, VariantSize::new(768, 1024));
        assert_eq!(c.jpeg_quality, 85);
        assert_eq!(c.unknown_classification, SlideKind::Regular);
        assert_eq!(c.content_fallback, ContentFallback::Title);
        assert_eq!(c.extraction_failure, ExtractionFailurePolicy::FailPage);
    }

    #[test]
    fn builder_clamps_out_of_range_values() {
        let c = PipelineConfig::builder()
            .dpi(1000)
            .concurrency(0)
            .jpeg_quality(0)
            .build()
            .unwrap();
        assert_eq!(c.dpi, 400);
        assert_eq!(c.concurrency, 1);
        assert_eq!(c.jpeg_quality, 1);
    }

    #[test]
    fn zero_variant_size_is_rejected() {
        let err = PipelineConfig::builder().card_size(0, 10).build().unwrap_err();
        assert!(err.to_string().contains("card"));
    }

    #[test]
    fn blank_fixed_fallback_is_rejected() {
        let err = PipelineConfig::builder()
            .content_fallback(ContentFallback::Fixed("  ".into()))
            .build()
            .unwrap_err();
        assert!(matches!(err, Pdf2SlidesError::InvalidConfig(_)));
    }
}
