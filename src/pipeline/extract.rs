//! Content extraction: classifier reply → normalised slide fields.
//!
//! The extractor never fails. A classifier error becomes a sentinel record
//! titled [`EXTRACTION_FAILED_TITLE`] carrying the error text, and the
//! orchestrator decides (via [`crate::config::ExtractionFailurePolicy`]) whether
//! that sentinel is installed or the page is reported as failed.

use crate::config::{ContentFallback, PipelineConfig};
use crate::error::ExtractionError;
use crate::model::SlideKind;
use crate::pipeline::llm::{ClassifierOutput, SlideClassifier};
use crate::pipeline::normalize::{normalize, normalize_str};
use crate::pipeline::render::RasterPage;
use std::sync::Arc;
use tracing::{debug, warn};

/// Title of the record returned when classification failed.
pub const EXTRACTION_FAILED_TITLE: &str = "extraction failed";

/// Normalised slide fields for one page.
#[derive(Debug, Clone)]
pub struct ExtractedContent {
    pub title: String,
    pub content: String,
    pub kind: SlideKind,
    pub links: Vec<String>,
    /// Set on the sentinel record.
    pub failure: Option<ExtractionError>,
}

impl ExtractedContent {
    pub fn sentinel(error: ExtractionError) -> Self {
        Self {
            title: EXTRACTION_FAILED_TITLE.to_string(),
            content: error.to_string(),
            kind: SlideKind::default(),
            links: Vec::new(),
            failure: Some(error),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.failure.is_some()
    }
}

/// Wraps a [`SlideClassifier`] with the normalisation and fallback policy.
#[derive(Clone)]
pub struct ContentExtractor {
    classifier: Arc<dyn SlideClassifier>,
    fallback: ContentFallback,
    unknown: SlideKind,
}

impl ContentExtractor {
    pub fn new(classifier: Arc<dyn SlideClassifier>, config: &PipelineConfig) -> Self {
        Self {
            classifier,
            fallback: config.content_fallback.clone(),
            unknown: config.unknown_classification,
        }
    }

    pub async fn extract(&self, page: &RasterPage) -> ExtractedContent {
        match self.classifier.classify(page).await {
            Ok(output) => self.shape(page.index, output),
            Err(e) => {
                warn!("Page {}: extraction failed: {}", page.index, e);
                ExtractedContent::sentinel(e)
            }
        }
    }

    /// Apply normalisation, the title default, the content fallback, and
    /// classification coercion.
    pub fn shape(&self, page_num: usize, output: ClassifierOutput) -> ExtractedContent {
        let title = output
            .title
            .as_deref()
            .map(normalize_str)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| format!("Slide {page_num}"));

        let mut content = normalize(&output.content);
        if content.is_empty() {
            content = match self.fallback {
                ContentFallback::Title => title.clone(),
                ContentFallback::Fixed(ref s) => s.clone(),
            };
        }

        let kind = match output.kind.as_deref() {
            Some(raw) => {
                let kind = SlideKind::parse_or(raw, self.unknown);
                if SlideKind::parse(raw).is_none() {
                    debug!("Page {}: unknown classification '{}' → {}", page_num, raw, kind);
                }
                kind
            }
            None => SlideKind::default(),
        };

        ExtractedContent {
            title,
            content,
            kind,
            links: output.links,
            failure: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::normalize::RawContent;
    use async_trait::async_trait;
    use image::{DynamicImage, Rgba, RgbaImage};
    use serde_json::json;

    struct Scripted(Result<ClassifierOutput, ExtractionError>);

    #[async_trait]
    impl SlideClassifier for Scripted {
        async fn classify(&self, _page: &RasterPage) -> Result<ClassifierOutput, ExtractionError> {
            self.0.clone()
        }
    }

    fn page(index: usize) -> RasterPage {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255])));
        RasterPage::from_image(index, &img).unwrap()
    }

    fn extractor(reply: Result<ClassifierOutput, ExtractionError>, config: &PipelineConfig) -> ContentExtractor {
        ContentExtractor::new(Arc::new(Scripted(reply)), config)
    }

    #[tokio::test]
    async fn nested_content_is_flattened() {
        let out = ClassifierOutput {
            title: Some("  Cell   Biology ".into()),
            content: RawContent::from(json!({"text": ["Cells", {"content": "divide"}]})),
            kind: Some("Quiz".into()),
            links: vec!["https://x.example".into()],
        };
        let got = extractor(Ok(out), &PipelineConfig::default()).extract(&page(1)).await;
        assert_eq!(got.title, "Cell Biology");
        assert_eq!(got.content, "Cells divide");
        assert_eq!(got.kind, SlideKind::Quiz);
        assert_eq!(got.links, vec!["https://x.example"]);
        assert!(!got.is_sentinel());
    }

    #[tokio::test]
    async fn empty_content_falls_back_to_title() {
        let out = ClassifierOutput {
            title: Some("Only a title".into()),
            ..Default::default()
        };
        let got = extractor(Ok(out), &PipelineConfig::default()).extract(&page(1)).await;
        assert_eq!(got.content, "Only a title");
    }

    #[tokio::test]
    async fn missing_title_defaults_to_page_label() {
        let got = extractor(Ok(ClassifierOutput::default()), &PipelineConfig::default())
            .extract(&page(7))
            .await;
        assert_eq!(got.title, "Slide 7");
        assert_eq!(got.content, "Slide 7");
        assert_eq!(got.kind, SlideKind::Regular);
    }

    #[tokio::test]
    async fn fixed_fallback_and_unknown_kind_are_configurable() {
        let config = PipelineConfig::builder()
            .content_fallback(ContentFallback::Fixed("(no text)".into()))
            .unknown_classification(SlideKind::Resources)
            .build()
            .unwrap();
        let out = ClassifierOutput {
            title: Some("T".into()),
            kind: Some("diagram".into()),
            ..Default::default()
        };
        let got = extractor(Ok(out), &config).extract(&page(1)).await;
        assert_eq!(got.content, "(no text)");
        assert_eq!(got.kind, SlideKind::Resources);
    }

    #[tokio::test]
    async fn unknown_kind_defaults_to_regular() {
        let out = ClassifierOutput {
            kind: Some("poster".into()),
            ..Default::default()
        };
        let got = extractor(Ok(out), &PipelineConfig::default()).extract(&page(1)).await;
        assert_eq!(got.kind, SlideKind::Regular);
    }

    #[tokio::test]
    async fn classifier_failure_yields_sentinel() {
        let got = extractor(
            Err(ExtractionError::Timeout { secs: 60 }),
            &PipelineConfig::default(),
        )
        .extract(&page(2))
        .await;
        assert_eq!(got.title, EXTRACTION_FAILED_TITLE);
        assert!(got.content.contains("timed out"));
        assert_eq!(got.kind, SlideKind::Regular);
        assert!(got.links.is_empty());
        assert!(got.is_sentinel());
    }
}
