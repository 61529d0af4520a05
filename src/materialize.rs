//! The run orchestrator: PDF bytes → a module's replaced slide set.
//!
//! ```text
//! claim ─▶ rasterize ─▶ retire (once) ─▶ per page, in page order:
//!                                          lookup/derive ─▶ extract ─▶ upload ─▶ install
//!                                       ─▶ finalize order ─▶ RunResult
//! ```
//!
//! Preparation (artifact lookup, derivation, classification, upload) runs
//! up to `concurrency` pages ahead; installs are strictly sequential in page
//! order. A page failure is recorded and the run moves on. Only decoding,
//! retirement, and a conflicting claim abort a run.

use crate::config::{ExtractionFailurePolicy, PipelineConfig};
use crate::error::{PageError, Pdf2SlidesError, StorageError};
use crate::model::{MediaRecord, ModuleSlideLink, ModuleSummary, SlideRecord};
use crate::naming::DocumentName;
use crate::output::{InstalledSlide, PageOutcome, PageStage, RunPhase, RunResult};
use crate::pipeline::derive::{ArtifactDeriver, DerivedArtifact};
use crate::pipeline::extract::{ContentExtractor, ExtractedContent};
use crate::pipeline::input::resolve_input;
use crate::pipeline::llm::{SlideClassifier, VisionClassifier};
use crate::pipeline::render::{PdfiumRasterizer, RasterPage, Rasterizer};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::replace::{RunClaims, SlideSetReplacer};
use crate::storage::ObjectStore;
use crate::store::{MediaSource, NewMedia, NewSlide, PageInstall, SlideStore};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// What `inspect` reports about an input without touching any store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputSummary {
    pub filename: String,
    pub document: String,
    pub page_count: usize,
    pub size_bytes: usize,
}

/// Summarise an input with pdfium alone; needs neither a provider nor a store.
pub async fn inspect(input: &str, config: &PipelineConfig) -> Result<InputSummary, Pdf2SlidesError> {
    summarize(&PdfiumRasterizer::new(config), input, config.download_timeout_secs).await
}

async fn summarize(
    rasterizer: &dyn Rasterizer,
    input: &str,
    timeout_secs: u64,
) -> Result<InputSummary, Pdf2SlidesError> {
    let resolved = resolve_input(input, timeout_secs).await?;
    let document = DocumentName::from_filename(&resolved.filename)?;
    let page_count = rasterizer.page_count(&document, &resolved.bytes).await?;
    Ok(InputSummary {
        filename: resolved.filename,
        document: document.to_string(),
        page_count,
        size_bytes: resolved.bytes.len(),
    })
}

/// Media side of a prepared page.
enum Artifact {
    /// Found by canonical filename; nothing derived or uploaded.
    Reused(MediaRecord),
    /// Freshly derived and uploaded.
    Uploaded { media: NewMedia },
}

/// Media decision taken before classification; uploads wait until the
/// page is known to be installable.
enum Pending {
    Reuse(MediaRecord),
    Fresh(DerivedArtifact),
}

/// A page ready for its install unit of work.
struct PreparedPage {
    page: usize,
    outcome: Result<(Artifact, ExtractedContent), PageError>,
}

/// Wires the stages and collaborators together.
pub struct Pipeline {
    config: PipelineConfig,
    rasterizer: Arc<dyn Rasterizer>,
    deriver: ArtifactDeriver,
    extractor: ContentExtractor,
    objects: Arc<dyn ObjectStore>,
    replacer: SlideSetReplacer,
    claims: Arc<RunClaims>,
    progress: ProgressCallback,
}

impl Pipeline {
    /// Build a pipeline from explicit collaborators.
    pub fn new(
        config: PipelineConfig,
        rasterizer: Arc<dyn Rasterizer>,
        classifier: Arc<dyn SlideClassifier>,
        objects: Arc<dyn ObjectStore>,
        store: Arc<dyn SlideStore>,
    ) -> Self {
        let progress = config
            .progress_callback
            .clone()
            .unwrap_or_else(|| Arc::new(NoopProgressCallback) as ProgressCallback);
        Self {
            deriver: ArtifactDeriver::new(&config),
            extractor: ContentExtractor::new(classifier, &config),
            rasterizer,
            objects,
            replacer: SlideSetReplacer::new(store),
            claims: RunClaims::new(),
            progress,
            config,
        }
    }

    /// Build a pipeline with pdfium rendering and the configured vision provider.
    pub fn from_config(
        config: PipelineConfig,
        objects: Arc<dyn ObjectStore>,
        store: Arc<dyn SlideStore>,
    ) -> Result<Self, Pdf2SlidesError> {
        let rasterizer = Arc::new(PdfiumRasterizer::new(&config));
        let classifier = Arc::new(VisionClassifier::from_config(&config)?);
        Ok(Self::new(config, rasterizer, classifier, objects, store))
    }

    /// Share a claim registry with other pipelines in this process.
    pub fn with_claims(mut self, claims: Arc<RunClaims>) -> Self {
        self.claims = claims;
        self
    }

    pub fn claims(&self) -> &Arc<RunClaims> {
        &self.claims
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    // ── Entry points ─────────────────────────────────────────────────────

    /// Replace `document`'s slides in `module_id` with one slide per page of `pdf`.
    ///
    /// Returns `Err` only for run-fatal conditions; page failures are
    /// reported in the [`RunResult`].
    pub async fn replace_slides(
        &self,
        module_id: i64,
        document: &DocumentName,
        pdf: &[u8],
    ) -> Result<RunResult, Pdf2SlidesError> {
        let start = Instant::now();
        let _claim = self.claims.claim(module_id, document)?;
        let _store_claim = self.replacer.claim(module_id, document).await?;
        info!("Run started: '{}' → module {}", document, module_id);
        debug!("Phase {:?}", RunPhase::Started);

        let rasters = self.rasterizer.rasterize(document, pdf).await?;
        let total = rasters.len();
        self.progress.on_run_start(document.as_str(), total);

        debug!("Phase {:?}", RunPhase::Retiring);
        let retired = self.replacer.retire(module_id, document, total).await?;
        self.progress.on_retired(retired.slides);

        debug!("Phase {:?}", RunPhase::PageProcessing);

        let prepared = stream::iter(
            rasters
                .into_iter()
                .map(|raster| self.prepare(document, raster, total)),
        )
        .buffered(self.config.concurrency.max(1));
        let mut prepared = std::pin::pin!(prepared);

        let mut outcomes = Vec::with_capacity(total);
        while let Some(page) = prepared.next().await {
            let outcome = self.install(module_id, page).await;
            match (&outcome.slide, &outcome.error) {
                (Some(slide), _) => {
                    self.progress
                        .on_page_complete(outcome.page_num, total, slide.slide_id)
                }
                (None, Some(e)) => {
                    warn!("{}", e);
                    self.progress
                        .on_page_error(outcome.page_num, total, e.to_string())
                }
                (None, None) => {}
            }
            outcomes.push(outcome);
        }

        debug!("Phase {:?}", RunPhase::Finalizing);
        let order: Vec<(i64, usize)> = outcomes
            .iter()
            .filter_map(|o| o.slide.as_ref().map(|s| (s.slide_id, s.page_num)))
            .collect();
        // Installs already wrote these orders; a failed rewrite changes nothing.
        if let Err(e) = self.replacer.finalize(module_id, &order).await {
            warn!("Finalising order for module {} failed: {}", module_id, e);
        }

        let result = RunResult::from_outcomes(
            module_id,
            document.to_string(),
            total,
            retired.slides,
            outcomes,
            start.elapsed().as_millis() as u64,
        );
        self.progress.on_run_complete(total, result.succeeded());
        info!(
            "Run finished: '{}' → module {}: {}/{} pages installed ({:?}, {} ms)",
            document,
            module_id,
            result.succeeded(),
            total,
            RunPhase::from(result.status),
            result.duration_ms
        );
        Ok(result)
    }

    /// Resolve a path or URL, name the document after its file stem (or
    /// `name`), and run [`Self::replace_slides`].
    pub async fn materialize_input(
        &self,
        input: &str,
        module_id: i64,
        name: Option<&str>,
    ) -> Result<RunResult, Pdf2SlidesError> {
        let resolved = resolve_input(input, self.config.download_timeout_secs).await?;
        let document = match name {
            Some(n) => DocumentName::new(n)?,
            None => DocumentName::from_filename(&resolved.filename)?,
        };
        self.replace_slides(module_id, &document, &resolved.bytes).await
    }

    /// Number of slides `document` currently has in `module_id`.
    pub async fn get_document_page_count(
        &self,
        module_id: i64,
        document: &DocumentName,
    ) -> Result<usize, Pdf2SlidesError> {
        Ok(self.replacer.page_count(module_id, document).await?)
    }

    /// Page count and derived document name of an input, without classifying
    /// or persisting anything.
    pub async fn inspect(&self, input: &str) -> Result<InputSummary, Pdf2SlidesError> {
        summarize(self.rasterizer.as_ref(), input, self.config.download_timeout_secs).await
    }

    /// Modules, optionally restricted to a course.
    pub async fn modules(&self, course_id: Option<i64>) -> Result<Vec<ModuleSummary>, Pdf2SlidesError> {
        Ok(self.replacer.store().modules(course_id).await?)
    }

    /// A module's links in ascending order, with their slides.
    pub async fn module_slides(
        &self,
        module_id: i64,
    ) -> Result<Vec<(ModuleSlideLink, SlideRecord)>, Pdf2SlidesError> {
        Ok(self.replacer.store().module_slides(module_id).await?)
    }

    // ── Per-page stages ──────────────────────────────────────────────────

    async fn prepare(&self, document: &DocumentName, raster: RasterPage, total: usize) -> PreparedPage {
        let page = raster.index;
        self.progress.on_page_start(page, total);
        debug!("Page {}: {:?}", page, PageStage::Rasterized);
        let outcome = self.prepare_inner(document, raster).await;
        PreparedPage { page, outcome }
    }

    async fn prepare_inner(
        &self,
        document: &DocumentName,
        raster: RasterPage,
    ) -> Result<(Artifact, ExtractedContent), PageError> {
        let page = raster.index;
        let filename = document.canonical_filename(page);

        let existing = self
            .replacer
            .existing_artifact(&filename)
            .await
            .map_err(|e| PageError::Persistence {
                page,
                detail: e.to_string(),
            })?;
        let pending = match existing {
            Some(media) if media.url.is_some() => {
                debug!("Page {}: reusing media {} ({})", page, media.id, filename);
                Pending::Reuse(media)
            }
            _ => Pending::Fresh(self.derive(document, &raster).await?),
        };
        debug!("Page {}: {:?}", page, PageStage::Derived);

        let content = self.extractor.extract(&raster).await;
        debug!("Page {}: {:?}", page, PageStage::Extracted);
        if let Some(ref failure) = content.failure {
            if self.config.extraction_failure == ExtractionFailurePolicy::FailPage {
                return Err(PageError::Extraction {
                    page,
                    detail: failure.to_string(),
                });
            }
        }

        let artifact = match pending {
            Pending::Reuse(media) => Artifact::Reused(media),
            Pending::Fresh(artifact) => Artifact::Uploaded {
                media: self.upload(document, artifact).await?,
            },
        };
        Ok((artifact, content))
    }

    async fn derive(&self, document: &DocumentName, raster: &RasterPage) -> Result<DerivedArtifact, PageError> {
        let page = raster.index;
        let deriver = self.deriver.clone();
        let document = document.clone();
        let raster = raster.clone();
        tokio::task::spawn_blocking(move || deriver.derive(&document, &raster))
            .await
            .map_err(|e| PageError::Artifact {
                page,
                detail: format!("derive task panicked: {e}"),
            })?
            .map_err(|e| PageError::Artifact {
                page,
                detail: e.to_string(),
            })
    }

    /// Upload the base image and its variants; returns the media row to write.
    async fn upload(&self, document: &DocumentName, artifact: DerivedArtifact) -> Result<NewMedia, PageError> {
        let page = artifact.page;
        let upload_err = |e: StorageError| PageError::Upload {
            page,
            detail: e.to_string(),
        };

        let variants = artifact.variant_metadata();
        let filesize = artifact.filesize();
        for v in artifact.variants {
            self.objects
                .put(
                    &document.variant_object_key(page, &v.meta.name),
                    v.bytes,
                    &v.meta.mime_type,
                )
                .await
                .map_err(upload_err)?;
        }
        let url = self
            .objects
            .put(&artifact.object_key, artifact.bytes, &artifact.mime_type)
            .await
            .map_err(upload_err)?;
        debug!("Page {}: uploaded {}", page, url);

        Ok(NewMedia {
            filename: artifact.filename,
            url,
            width: artifact.width,
            height: artifact.height,
            filesize,
            mime_type: artifact.mime_type,
            variants,
        })
    }

    async fn install(&self, module_id: i64, prepared: PreparedPage) -> PageOutcome {
        let page = prepared.page;
        let (artifact, content) = match prepared.outcome {
            Ok(ready) => ready,
            Err(e) => return PageOutcome::failed(e),
        };

        let (media, url) = match artifact {
            Artifact::Reused(m) => (
                MediaSource::Existing { media_id: m.id },
                m.url.unwrap_or_default(),
            ),
            Artifact::Uploaded { media } => {
                let url = media.url.clone();
                (MediaSource::New(media), url)
            }
        };

        let unit = PageInstall {
            media,
            slide: NewSlide {
                title: content.title.clone(),
                content: content.content,
                kind: content.kind,
                image_url: url.clone(),
                links: content.links,
            },
            order: page,
        };

        match self.replacer.install(module_id, &unit).await {
            Ok(installed) => PageOutcome::installed(InstalledSlide {
                page_num: page,
                slide_id: installed.slide_id,
                media_id: installed.media_id,
                media_reused: installed.media_reused,
                title: content.title,
                kind: content.kind,
                url,
            }),
            Err(e) => PageOutcome::failed(PageError::Persistence {
                page,
                detail: e.to_string(),
            }),
        }
    }
}
