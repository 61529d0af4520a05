//! Slide set replacement for one (module, document) pair.
//!
//! Replace-not-merge: the previous generation of a document's slides is
//! retired once, before the first page is installed, so old and new slides
//! for the same page index never coexist under one canonical filename.
//! Installs then happen page by page, each as its own unit of work.
//!
//! No two runs on the same key interleave their retirement and installs:
//! [`RunClaims`] excludes runs within one process and
//! [`SlideSetReplacer::claim`] excludes runs sharing the store.

use crate::error::{PersistenceError, Pdf2SlidesError};
use crate::model::MediaRecord;
use crate::naming::DocumentName;
use crate::store::{
    InstalledPage, PageInstall, PreviousSlide, RetirementReport, SlideStore, StoreClaim,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

type ClaimKey = (i64, String);

/// In-process registry of (module, document) keys with a run in flight.
#[derive(Debug, Default)]
pub struct RunClaims {
    held: Mutex<HashSet<ClaimKey>>,
}

impl RunClaims {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn held(&self) -> MutexGuard<'_, HashSet<ClaimKey>> {
        self.held.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Take the exclusive claim for `(module_id, document)`.
    ///
    /// Fails with [`Pdf2SlidesError::RunInProgress`] if it is already held.
    /// The claim is released when the returned guard drops.
    pub fn claim(
        self: &Arc<Self>,
        module_id: i64,
        document: &DocumentName,
    ) -> Result<RunClaim, Pdf2SlidesError> {
        self.try_claim(module_id, document)
            .ok_or_else(|| Pdf2SlidesError::RunInProgress {
                module_id,
                document: document.to_string(),
            })
    }

    /// Like [`RunClaims::claim`], but `None` when the key is taken.
    pub fn try_claim(self: &Arc<Self>, module_id: i64, document: &DocumentName) -> Option<RunClaim> {
        let key = (module_id, document.as_str().to_string());
        if !self.held().insert(key.clone()) {
            return None;
        }
        debug!("Claimed module {} / '{}'", module_id, document);
        Some(RunClaim {
            claims: Arc::clone(self),
            key,
        })
    }

    pub fn is_held(&self, module_id: i64, document: &DocumentName) -> bool {
        self.held()
            .contains(&(module_id, document.as_str().to_string()))
    }
}

/// Guard for a held run claim.
#[derive(Debug)]
pub struct RunClaim {
    claims: Arc<RunClaims>,
    key: ClaimKey,
}

impl Drop for RunClaim {
    fn drop(&mut self) {
        self.claims.held().remove(&self.key);
    }
}

/// Store-facing half of a run: find, retire, install, finalise.
#[derive(Clone)]
pub struct SlideSetReplacer {
    store: Arc<dyn SlideStore>,
}

impl SlideSetReplacer {
    pub fn new(store: Arc<dyn SlideStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn SlideStore> {
        &self.store
    }

    /// Take the store-wide claim for `(module_id, document)`.
    ///
    /// Fails with [`Pdf2SlidesError::RunInProgress`] while another run,
    /// in this process or another one, holds it.
    pub async fn claim(&self, module_id: i64, document: &DocumentName) -> Result<StoreClaim, Pdf2SlidesError> {
        self.store
            .claim_run(module_id, document)
            .await?
            .ok_or_else(|| Pdf2SlidesError::RunInProgress {
                module_id,
                document: document.to_string(),
            })
    }

    /// Slides of `module_id` that belong to `document`'s generation set.
    pub async fn find_previous(
        &self,
        module_id: i64,
        document: &DocumentName,
    ) -> Result<Vec<PreviousSlide>, PersistenceError> {
        self.store.find_document_slides(module_id, document).await
    }

    /// Retire the previous generation ahead of installing `total_pages` new pages.
    ///
    /// Media for pages `1..=total_pages` is kept so the new run can reuse it
    /// by canonical filename; everything else goes. Any failure is fatal
    /// because the module's state is then unknown.
    pub async fn retire(
        &self,
        module_id: i64,
        document: &DocumentName,
        total_pages: usize,
    ) -> Result<RetirementReport, Pdf2SlidesError> {
        let fail = |source: PersistenceError| Pdf2SlidesError::RetirementFailed {
            module_id,
            document: document.to_string(),
            source,
        };

        let previous = self.find_previous(module_id, document).await.map_err(fail)?;
        if previous.is_empty() {
            debug!("No previous slides for '{}' in module {}", document, module_id);
            return Ok(RetirementReport::default());
        }

        let keep: HashSet<String> = (1..=total_pages)
            .map(|n| document.canonical_filename(n))
            .collect();
        let report = self
            .store
            .retire(module_id, &previous, &keep)
            .await
            .map_err(fail)?;

        info!(
            "Retired {} slides ({} links, {} media) of '{}' in module {}",
            report.slides, report.links, report.media, document, module_id
        );
        Ok(report)
    }

    /// Existing artifact for a canonical filename, if any.
    pub async fn existing_artifact(&self, filename: &str) -> Result<Option<MediaRecord>, PersistenceError> {
        self.store.find_media_by_filename(filename).await
    }

    /// Install one page: media (or reuse) → slide → link, atomically.
    pub async fn install(&self, module_id: i64, page: &PageInstall) -> Result<InstalledPage, PersistenceError> {
        self.store.install_page(module_id, page).await
    }

    /// Write the final order: each installed slide keeps its page index.
    pub async fn finalize(&self, module_id: i64, installed: &[(i64, usize)]) -> Result<(), PersistenceError> {
        if installed.is_empty() {
            return Ok(());
        }
        self.store.set_order(module_id, installed).await
    }

    /// Number of slides `document` currently has in `module_id`.
    pub async fn page_count(&self, module_id: i64, document: &DocumentName) -> Result<usize, PersistenceError> {
        Ok(self.find_previous(module_id, document).await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SlideKind;
    use crate::store::{MediaSource, MemorySlideStore, NewMedia, NewSlide};

    fn doc() -> DocumentName {
        DocumentName::new("deck").unwrap()
    }

    fn page(n: usize) -> PageInstall {
        PageInstall {
            media: MediaSource::New(NewMedia {
                filename: doc().canonical_filename(n),
                url: format!("https://o/deck/deck_page_{n}.jpg"),
                width: 8,
                height: 6,
                filesize: 1,
                mime_type: "image/jpeg".into(),
                variants: Vec::new(),
            }),
            slide: NewSlide {
                title: format!("Slide {n}"),
                content: "c".into(),
                kind: SlideKind::Regular,
                image_url: format!("https://o/deck/deck_page_{n}.jpg"),
                links: Vec::new(),
            },
            order: n,
        }
    }

    #[test]
    fn second_claim_on_same_key_is_rejected_until_release() {
        let claims = RunClaims::new();
        let first = claims.claim(1, &doc()).unwrap();
        assert!(matches!(
            claims.claim(1, &doc()),
            Err(Pdf2SlidesError::RunInProgress { module_id: 1, .. })
        ));
        // Different key is independent.
        let _other = claims.claim(2, &doc()).unwrap();
        drop(first);
        assert!(!claims.is_held(1, &doc()));
        assert!(claims.claim(1, &doc()).is_ok());
    }

    #[tokio::test]
    async fn store_claim_rejects_a_second_replacer_on_the_same_store() {
        let store = MemorySlideStore::new();
        let a = SlideSetReplacer::new(Arc::new(store.clone()));
        let b = SlideSetReplacer::new(Arc::new(store));

        let held = a.claim(1, &doc()).await.unwrap();
        assert!(matches!(
            b.claim(1, &doc()).await,
            Err(Pdf2SlidesError::RunInProgress { module_id: 1, .. })
        ));
        drop(held);
        assert!(b.claim(1, &doc()).await.is_ok());
    }

    #[tokio::test]
    async fn retire_keeps_media_for_pages_being_reinstalled() {
        let store = Arc::new(MemorySlideStore::new());
        let replacer = SlideSetReplacer::new(store.clone());
        for n in 1..=3 {
            replacer.install(5, &page(n)).await.unwrap();
        }

        let report = replacer.retire(5, &doc(), 2).await.unwrap();
        assert_eq!(report.slides, 3);
        assert_eq!(report.media, 1);
        let names: Vec<_> = store.media().into_iter().map(|m| m.filename).collect();
        assert_eq!(names, vec!["deck_page_1 (1).jpg", "deck_page_2 (1).jpg"]);
        assert_eq!(replacer.page_count(5, &doc()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn retirement_failure_is_fatal() {
        let store = Arc::new(MemorySlideStore::new());
        let replacer = SlideSetReplacer::new(store.clone());
        replacer.install(5, &page(1)).await.unwrap();
        store.fail_retire(true);

        let err = replacer.retire(5, &doc(), 1).await.unwrap_err();
        assert!(matches!(err, Pdf2SlidesError::RetirementFailed { module_id: 5, .. }));
        assert_eq!(replacer.page_count(5, &doc()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn finalize_rewrites_orders() {
        let store = Arc::new(MemorySlideStore::new());
        let replacer = SlideSetReplacer::new(store.clone());
        let a = replacer.install(5, &page(1)).await.unwrap();
        let b = replacer.install(5, &page(3)).await.unwrap();

        replacer
            .finalize(5, &[(a.slide_id, 1), (b.slide_id, 3)])
            .await
            .unwrap();
        let orders: Vec<_> = store.links(5).iter().map(|l| l.order).collect();
        assert_eq!(orders, vec![1, 3]);
        assert!(replacer.finalize(5, &[(999, 1)]).await.is_err());
    }
}
