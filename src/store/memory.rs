use super::{
    InstalledPage, MediaSource, PageInstall, PersistenceResult, PreviousSlide, RetirementReport,
    SlideStore, StoreClaim,
};
use crate::error::PersistenceError;
use crate::model::{
    MediaRecord, ModuleSlideLink, ModuleSummary, SlideRecord, DEFAULT_FOCAL_POINT, SLIDES_PATH,
};
use crate::naming::DocumentName;
use crate::replace::RunClaims;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Default)]
struct Tables {
    next_id: i64,
    media: BTreeMap<i64, MediaRecord>,
    slides: BTreeMap<i64, SlideRecord>,
    links: Vec<ModuleSlideLink>,
    modules: BTreeMap<i64, (String, Option<i64>)>,
}

impl Tables {
    fn id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn media_by_filename(&self, filename: &str) -> Option<&MediaRecord> {
        self.media.values().find(|m| m.filename == filename)
    }
}

#[derive(Debug, Default)]
struct Faults {
    unavailable: bool,
    fail_retire: bool,
    /// Orders whose install fails before anything is written.
    fail_install: HashSet<usize>,
    /// Orders whose install fails after media and slide rows are written.
    fail_link: HashSet<usize>,
}

#[derive(Default)]
struct Shared {
    tables: Mutex<Tables>,
    faults: Mutex<Faults>,
    claims: Arc<RunClaims>,
}

/// In-memory [`SlideStore`] with transactional semantics and fault injection.
///
/// Each mutating call works on a copy of the tables and swaps it in only on
/// success, so an injected failure leaves no partial rows behind. Clones are
/// further handles on the same tables and run claims, like two connections
/// to one database.
#[derive(Clone, Default)]
pub struct MemorySlideStore {
    shared: Arc<Shared>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

impl MemorySlideStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Seeding ──────────────────────────────────────────────────────────

    /// Register a module, optionally under a course.
    pub fn add_module(&self, id: i64, title: impl Into<String>, course_id: Option<i64>) {
        let mut t = lock(&self.shared.tables);
        t.modules.insert(id, (title.into(), course_id));
        t.next_id = t.next_id.max(id);
    }

    /// Insert a media row directly, as an earlier crashed run would leave it.
    pub fn seed_media(&self, filename: impl Into<String>, url: impl Into<String>) -> i64 {
        self.seed_media_row(filename.into(), Some(url.into()))
    }

    /// Insert a media row whose upload never completed (`url` is NULL).
    pub fn seed_media_without_url(&self, filename: impl Into<String>) -> i64 {
        self.seed_media_row(filename.into(), None)
    }

    fn seed_media_row(&self, filename: String, url: Option<String>) -> i64 {
        let mut t = lock(&self.shared.tables);
        let id = t.id();
        t.media.insert(
            id,
            MediaRecord {
                id,
                filename,
                url,
                width: 1,
                height: 1,
                filesize: 0,
                mime_type: "image/jpeg".into(),
                focal_x: DEFAULT_FOCAL_POINT,
                focal_y: DEFAULT_FOCAL_POINT,
                variants: Vec::new(),
            },
        );
        id
    }

    // ── Fault injection ──────────────────────────────────────────────────

    pub fn set_unavailable(&self, unavailable: bool) {
        lock(&self.shared.faults).unavailable = unavailable;
    }

    pub fn fail_retire(&self, fail: bool) {
        lock(&self.shared.faults).fail_retire = fail;
    }

    pub fn fail_install_at(&self, order: usize) {
        lock(&self.shared.faults).fail_install.insert(order);
    }

    pub fn fail_link_at(&self, order: usize) {
        lock(&self.shared.faults).fail_link.insert(order);
    }

    pub fn clear_faults(&self) {
        *lock(&self.shared.faults) = Faults::default();
    }

    // ── Inspection ───────────────────────────────────────────────────────

    pub fn media(&self) -> Vec<MediaRecord> {
        lock(&self.shared.tables).media.values().cloned().collect()
    }

    pub fn slides(&self) -> Vec<SlideRecord> {
        lock(&self.shared.tables).slides.values().cloned().collect()
    }

    pub fn links(&self, module_id: i64) -> Vec<ModuleSlideLink> {
        let mut links: Vec<_> = lock(&self.shared.tables)
            .links
            .iter()
            .filter(|l| l.module_id == module_id)
            .cloned()
            .collect();
        links.sort_by_key(|l| l.order);
        links
    }

    fn check_available(&self) -> PersistenceResult<()> {
        if lock(&self.shared.faults).unavailable {
            return Err(PersistenceError::Unavailable("memory store offline".into()));
        }
        Ok(())
    }

    /// Run `f` against a copy of the tables; commit only on success.
    fn transaction<R>(
        &self,
        f: impl FnOnce(&mut Tables) -> PersistenceResult<R>,
    ) -> PersistenceResult<R> {
        let mut guard = lock(&self.shared.tables);
        let mut working = guard.clone();
        let out = f(&mut working)?;
        *guard = working;
        Ok(out)
    }
}

#[async_trait]
impl SlideStore for MemorySlideStore {
    async fn claim_run(&self, module_id: i64, document: &DocumentName) -> PersistenceResult<Option<StoreClaim>> {
        self.check_available()?;
        Ok(self
            .shared
            .claims
            .try_claim(module_id, document)
            .map(StoreClaim::new))
    }

    async fn find_document_slides(
        &self,
        module_id: i64,
        document: &DocumentName,
    ) -> PersistenceResult<Vec<PreviousSlide>> {
        self.check_available()?;
        let t = lock(&self.shared.tables);
        let mut found: Vec<PreviousSlide> = t
            .links
            .iter()
            .filter(|l| l.module_id == module_id)
            .filter_map(|l| {
                let slide = t.slides.get(&l.slide_id)?;
                let media = t.media.get(&slide.media_id)?;
                let page = document.page_of(&media.filename)?;
                Some(PreviousSlide {
                    slide_id: slide.id,
                    media_id: media.id,
                    filename: media.filename.clone(),
                    page,
                    order: Some(l.order),
                })
            })
            .collect();
        found.sort_by_key(|p| (p.page, p.slide_id));
        Ok(found)
    }

    async fn find_media_by_filename(&self, filename: &str) -> PersistenceResult<Option<MediaRecord>> {
        self.check_available()?;
        Ok(lock(&self.shared.tables).media_by_filename(filename).cloned())
    }

    async fn retire(
        &self,
        _module_id: i64,
        slides: &[PreviousSlide],
        keep_media: &HashSet<String>,
    ) -> PersistenceResult<RetirementReport> {
        self.check_available()?;
        if lock(&self.shared.faults).fail_retire {
            return Err(PersistenceError::Database("injected retirement failure".into()));
        }

        let slide_ids: HashSet<i64> = slides.iter().map(|s| s.slide_id).collect();
        self.transaction(|t| {
            let before = t.links.len();
            t.links.retain(|l| !slide_ids.contains(&l.slide_id));
            let links = before - t.links.len();

            let before = t.slides.len();
            t.slides.retain(|id, _| !slide_ids.contains(id));
            let slides_removed = before - t.slides.len();

            let still_referenced: HashSet<i64> = t.slides.values().map(|s| s.media_id).collect();
            let mut media = 0;
            for s in slides {
                let Some(m) = t.media.get(&s.media_id) else {
                    continue;
                };
                if keep_media.contains(&m.filename) || still_referenced.contains(&m.id) {
                    continue;
                }
                t.media.remove(&s.media_id);
                media += 1;
            }

            Ok(RetirementReport {
                links,
                slides: slides_removed,
                media,
            })
        })
    }

    async fn install_page(&self, module_id: i64, page: &PageInstall) -> PersistenceResult<InstalledPage> {
        self.check_available()?;
        let (fail_install, fail_link) = {
            let f = lock(&self.shared.faults);
            (
                f.fail_install.contains(&page.order),
                f.fail_link.contains(&page.order),
            )
        };
        if fail_install {
            return Err(PersistenceError::Database(format!(
                "injected install failure at order {}",
                page.order
            )));
        }

        self.transaction(|t| {
            let (media_id, media_reused) = match page.media {
                MediaSource::Existing { media_id } => {
                    if !t.media.contains_key(&media_id) {
                        return Err(PersistenceError::MissingMedia { media_id });
                    }
                    (media_id, true)
                }
                MediaSource::New(ref new) => match t.media_by_filename(&new.filename).map(|m| m.id) {
                    Some(id) => {
                        // A row left by an interrupted upload gets the fresh URL.
                        if let Some(m) = t.media.get_mut(&id) {
                            m.url.get_or_insert_with(|| new.url.clone());
                        }
                        (id, true)
                    }
                    None => {
                        let id = t.id();
                        t.media.insert(
                            id,
                            MediaRecord {
                                id,
                                filename: new.filename.clone(),
                                url: Some(new.url.clone()),
                                width: new.width,
                                height: new.height,
                                filesize: new.filesize,
                                mime_type: new.mime_type.clone(),
                                focal_x: DEFAULT_FOCAL_POINT,
                                focal_y: DEFAULT_FOCAL_POINT,
                                variants: new.variants.clone(),
                            },
                        );
                        (id, false)
                    }
                },
            };

            let slide_id = t.id();
            t.slides.insert(
                slide_id,
                SlideRecord {
                    id: slide_id,
                    title: page.slide.title.clone(),
                    content: page.slide.content.clone(),
                    kind: page.slide.kind,
                    media_id,
                    image_url: page.slide.image_url.clone(),
                    links: page.slide.links.clone(),
                },
            );

            if fail_link {
                return Err(PersistenceError::Database(format!(
                    "injected link failure at order {}",
                    page.order
                )));
            }
            if t
                .links
                .iter()
                .any(|l| l.module_id == module_id && l.slide_id == slide_id)
            {
                return Err(PersistenceError::DuplicateLink { module_id, slide_id });
            }
            t.links.push(ModuleSlideLink {
                module_id,
                slide_id,
                order: page.order,
                path: SLIDES_PATH.to_string(),
            });

            Ok(InstalledPage {
                media_id,
                slide_id,
                media_reused,
            })
        })
    }

    async fn set_order(&self, module_id: i64, order: &[(i64, usize)]) -> PersistenceResult<()> {
        self.check_available()?;
        self.transaction(|t| {
            for &(slide_id, ord) in order {
                let link = t
                    .links
                    .iter_mut()
                    .find(|l| l.module_id == module_id && l.slide_id == slide_id)
                    .ok_or(PersistenceError::MissingSlide { slide_id })?;
                link.order = ord;
            }
            Ok(())
        })
    }

    async fn module_slides(&self, module_id: i64) -> PersistenceResult<Vec<(ModuleSlideLink, SlideRecord)>> {
        self.check_available()?;
        let links = self.links(module_id);
        let t = lock(&self.shared.tables);
        Ok(links
            .into_iter()
            .filter_map(|l| t.slides.get(&l.slide_id).cloned().map(|s| (l, s)))
            .collect())
    }

    async fn modules(&self, course_id: Option<i64>) -> PersistenceResult<Vec<ModuleSummary>> {
        self.check_available()?;
        let t = lock(&self.shared.tables);
        let mut out: Vec<_> = t
            .modules
            .iter()
            .filter(|(_, (_, course))| course_id.is_none() || *course == course_id)
            .map(|(&id, (title, _))| ModuleSummary {
                id,
                title: title.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.title.cmp(&b.title));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SlideKind;
    use crate::store::{NewMedia, NewSlide};

    fn doc() -> DocumentName {
        DocumentName::new("deck").unwrap()
    }

    fn install(page: usize) -> PageInstall {
        let d = doc();
        PageInstall {
            media: MediaSource::New(NewMedia {
                filename: d.canonical_filename(page),
                url: format!("https://o/{}", d.page_object_key(page)),
                width: 10,
                height: 10,
                filesize: 3,
                mime_type: "image/jpeg".into(),
                variants: Vec::new(),
            }),
            slide: NewSlide {
                title: format!("Slide {page}"),
                content: "body".into(),
                kind: SlideKind::Regular,
                image_url: format!("https://o/{}", d.page_object_key(page)),
                links: Vec::new(),
            },
            order: page,
        }
    }

    #[tokio::test]
    async fn install_writes_media_slide_and_link() {
        let store = MemorySlideStore::new();
        let out = store.install_page(7, &install(1)).await.unwrap();
        assert!(!out.media_reused);

        let links = store.links(7);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].path, "slides");
        assert_eq!(links[0].order, 1);
        assert_eq!(store.slides()[0].media_id, out.media_id);
        assert_eq!(store.media()[0].focal_x, 50);
    }

    #[tokio::test]
    async fn install_reuses_media_by_filename() {
        let store = MemorySlideStore::new();
        let orphan = store.seed_media(doc().canonical_filename(1), "https://o/old");
        let out = store.install_page(7, &install(1)).await.unwrap();
        assert!(out.media_reused);
        assert_eq!(out.media_id, orphan);
        assert_eq!(store.media().len(), 1);
    }

    #[tokio::test]
    async fn reused_media_without_url_gets_the_uploaded_url() {
        let store = MemorySlideStore::new();
        let pending = store.seed_media_without_url(doc().canonical_filename(1));
        let out = store.install_page(7, &install(1)).await.unwrap();
        assert!(out.media_reused);
        assert_eq!(out.media_id, pending);
        assert_eq!(
            store.media()[0].url.as_deref(),
            Some("https://o/deck/deck_page_1.jpg")
        );
    }

    #[tokio::test]
    async fn reused_media_keeps_its_existing_url() {
        let store = MemorySlideStore::new();
        store.seed_media(doc().canonical_filename(1), "https://o/old");
        store.install_page(7, &install(1)).await.unwrap();
        assert_eq!(store.media()[0].url.as_deref(), Some("https://o/old"));
    }

    #[tokio::test]
    async fn slide_links_are_stored_and_listed() {
        let store = MemorySlideStore::new();
        let mut p = install(1);
        p.slide.links = vec!["https://example.com/a".into(), "https://example.com/b".into()];
        store.install_page(7, &p).await.unwrap();

        let listed = store.module_slides(7).await.unwrap();
        assert_eq!(listed[0].1.links, p.slide.links);
    }

    #[tokio::test]
    async fn handles_on_one_store_share_run_claims() {
        let first = MemorySlideStore::new();
        let second = first.clone();

        let held = first.claim_run(7, &doc()).await.unwrap();
        assert!(held.is_some());
        assert!(second.claim_run(7, &doc()).await.unwrap().is_none());
        assert!(second.claim_run(8, &doc()).await.unwrap().is_some());

        drop(held);
        assert!(second.claim_run(7, &doc()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn link_failure_rolls_back_media_and_slide() {
        let store = MemorySlideStore::new();
        store.fail_link_at(2);
        store.install_page(7, &install(1)).await.unwrap();
        assert!(store.install_page(7, &install(2)).await.is_err());

        assert_eq!(store.slides().len(), 1);
        assert_eq!(store.media().len(), 1);
        assert_eq!(store.links(7).len(), 1);
    }

    #[tokio::test]
    async fn find_matches_exact_document_only() {
        let store = MemorySlideStore::new();
        store.install_page(7, &install(1)).await.unwrap();
        let other = DocumentName::new("deck2").unwrap();
        let mut p = install(1);
        if let MediaSource::New(ref mut m) = p.media {
            m.filename = other.canonical_filename(1);
        }
        store.install_page(7, &p).await.unwrap();

        let found = store.find_document_slides(7, &doc()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].page, 1);
        assert!(store.find_document_slides(8, &doc()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn retire_keeps_requested_and_shared_media() {
        let store = MemorySlideStore::new();
        store.install_page(7, &install(1)).await.unwrap();
        store.install_page(7, &install(2)).await.unwrap();
        // Module 8 shares page 2's artifact.
        store.install_page(8, &install(2)).await.unwrap();

        let previous = store.find_document_slides(7, &doc()).await.unwrap();
        let keep: HashSet<String> = [doc().canonical_filename(1)].into_iter().collect();
        let report = store.retire(7, &previous, &keep).await.unwrap();

        assert_eq!(report.slides, 2);
        assert_eq!(report.links, 2);
        assert_eq!(report.media, 0);
        assert!(store.links(7).is_empty());
        assert_eq!(store.links(8).len(), 1);
        assert_eq!(store.media().len(), 2);
    }

    #[tokio::test]
    async fn retire_deletes_unreferenced_media() {
        let store = MemorySlideStore::new();
        store.install_page(7, &install(1)).await.unwrap();
        let previous = store.find_document_slides(7, &doc()).await.unwrap();
        let report = store.retire(7, &previous, &HashSet::new()).await.unwrap();
        assert_eq!(report.media, 1);
        assert!(store.media().is_empty());
    }

    #[tokio::test]
    async fn modules_filter_by_course_and_sort_by_title() {
        let store = MemorySlideStore::new();
        store.add_module(1, "Zoology", Some(10));
        store.add_module(2, "Anatomy", Some(10));
        store.add_module(3, "Botany", Some(11));

        let all = store.modules(None).await.unwrap();
        assert_eq!(all.iter().map(|m| m.id).collect::<Vec<_>>(), vec![2, 3, 1]);
        let course = store.modules(Some(10)).await.unwrap();
        assert_eq!(course.iter().map(|m| m.id).collect::<Vec<_>>(), vec![2, 1]);
    }

    #[tokio::test]
    async fn unavailable_store_errors() {
        let store = MemorySlideStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.find_media_by_filename("x").await,
            Err(PersistenceError::Unavailable(_))
        ));
    }
}
