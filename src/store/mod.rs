//! Relational slide store: media artifacts, slides, and ordered module links.
//!
//! [`SlideStore`] is the persistence seam. Two implementations ship:
//! [`MemorySlideStore`] (tests, dry runs) and, behind the `postgres` feature,
//! `PgSlideStore`.
//!
//! Every mutating method is one unit of work. In particular
//! [`SlideStore::install_page`] writes media, slide and link together or not
//! at all, so a slide never exists without its media and a link never points
//! at a missing slide.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemorySlideStore;
#[cfg(feature = "postgres")]
pub use postgres::PgSlideStore;

use crate::error::PersistenceError;
use crate::model::{MediaRecord, ModuleSlideLink, ModuleSummary, SizeVariant, SlideKind, SlideRecord};
use crate::naming::DocumentName;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// A slide of a module that belongs to a document's generation set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviousSlide {
    pub slide_id: i64,
    pub media_id: i64,
    pub filename: String,
    /// Page index parsed from the canonical filename.
    pub page: usize,
    pub order: Option<usize>,
}

/// Media fields written for a freshly derived artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMedia {
    pub filename: String,
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub filesize: u64,
    pub mime_type: String,
    pub variants: Vec<SizeVariant>,
}

/// Where a page's media row comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// An artifact found by canonical filename before derivation.
    Existing { media_id: i64 },
    /// A new artifact; reused instead if its filename appeared meanwhile.
    New(NewMedia),
}

/// Slide fields written for one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSlide {
    pub title: String,
    pub content: String,
    pub kind: SlideKind,
    pub image_url: String,
    pub links: Vec<String>,
}

/// One page's install unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageInstall {
    pub media: MediaSource,
    pub slide: NewSlide,
    /// Link order; equals the page index.
    pub order: usize,
}

/// Identifiers produced by a committed install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstalledPage {
    pub media_id: i64,
    pub slide_id: i64,
    pub media_reused: bool,
}

/// Rows removed by a retirement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetirementReport {
    pub links: usize,
    pub slides: usize,
    pub media: usize,
}

/// A run claim held in the store, released when dropped.
///
/// Unlike [`crate::RunClaims`], it excludes runs in other processes that
/// share the same backing store.
pub struct StoreClaim {
    _guard: Box<dyn Send>,
}

impl StoreClaim {
    pub fn new(guard: impl Send + 'static) -> Self {
        Self {
            _guard: Box::new(guard),
        }
    }
}

impl std::fmt::Debug for StoreClaim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StoreClaim")
    }
}

/// Persistence collaborator of the slide set replacer.
#[async_trait]
pub trait SlideStore: Send + Sync {
    /// Try to take the exclusive run claim for `(module_id, document)`.
    ///
    /// `None` means another holder, possibly in another process, has it.
    async fn claim_run(&self, module_id: i64, document: &DocumentName) -> PersistenceResult<Option<StoreClaim>>;

    /// Slides linked to `module_id` whose media filename belongs to `document`.
    async fn find_document_slides(
        &self,
        module_id: i64,
        document: &DocumentName,
    ) -> PersistenceResult<Vec<PreviousSlide>>;

    /// Unique lookup by canonical filename.
    async fn find_media_by_filename(&self, filename: &str) -> PersistenceResult<Option<MediaRecord>>;

    /// Delete, in one transaction, every link to `slides`, the slides
    /// themselves, then their media. Media whose filename is in
    /// `keep_media` or that another slide still references survives.
    async fn retire(
        &self,
        module_id: i64,
        slides: &[PreviousSlide],
        keep_media: &HashSet<String>,
    ) -> PersistenceResult<RetirementReport>;

    /// Persist media (or reuse by filename), slide, and module link in one
    /// transaction.
    async fn install_page(&self, module_id: i64, page: &PageInstall) -> PersistenceResult<InstalledPage>;

    /// Rewrite the `order` of the given `(slide_id, order)` links of `module_id`.
    async fn set_order(&self, module_id: i64, order: &[(i64, usize)]) -> PersistenceResult<()>;

    /// Links of a module in ascending order, with their slides.
    async fn module_slides(&self, module_id: i64) -> PersistenceResult<Vec<(ModuleSlideLink, SlideRecord)>>;

    /// Modules, optionally restricted to one course, by title.
    async fn modules(&self, course_id: Option<i64>) -> PersistenceResult<Vec<ModuleSummary>>;
}
