//! Run results returned to callers.
//!
//! A run that gets past retirement always produces a [`RunResult`], even if
//! every page failed; only run-fatal conditions surface as
//! [`crate::error::Pdf2SlidesError`].

use crate::error::PageError;
use crate::model::SlideKind;
use serde::{Deserialize, Serialize};

/// Lifecycle of a run.
///
/// ```text
/// Started ─▶ Retiring ─▶ PageProcessing* ─▶ Finalizing ─▶ Completed
///                                                      └─▶ CompletedWithFailures
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunPhase {
    Started,
    Retiring,
    PageProcessing,
    Finalizing,
    Completed,
    CompletedWithFailures,
}

/// Per-page lifecycle. A failure at any stage moves the page to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageStage {
    Rasterized,
    Derived,
    Extracted,
    Installed,
    Failed,
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Completed,
    CompletedWithFailures,
}

impl From<RunStatus> for RunPhase {
    fn from(s: RunStatus) -> Self {
        match s {
            RunStatus::Completed => RunPhase::Completed,
            RunStatus::CompletedWithFailures => RunPhase::CompletedWithFailures,
        }
    }
}

/// What was installed for one successful page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledSlide {
    pub page_num: usize,
    pub slide_id: i64,
    pub media_id: i64,
    /// True when an existing media artifact was reused by filename.
    pub media_reused: bool,
    pub title: String,
    pub kind: SlideKind,
    pub url: String,
}

/// Outcome of one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageOutcome {
    /// 1-based page number.
    pub page_num: usize,
    /// Last stage the page reached.
    pub stage: PageStage,
    pub slide: Option<InstalledSlide>,
    pub error: Option<PageError>,
}

impl PageOutcome {
    pub fn installed(slide: InstalledSlide) -> Self {
        Self {
            page_num: slide.page_num,
            stage: PageStage::Installed,
            slide: Some(slide),
            error: None,
        }
    }

    pub fn failed(error: PageError) -> Self {
        Self {
            page_num: error.page(),
            stage: PageStage::Failed,
            slide: None,
            error: Some(error),
        }
    }

    pub fn is_installed(&self) -> bool {
        self.slide.is_some()
    }
}

/// Structured result of one run against a (module, document) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub module_id: i64,
    pub document: String,
    pub status: RunStatus,
    pub total_pages: usize,
    /// Slides removed during retirement.
    pub retired_slides: usize,
    /// Page outcomes in page order.
    pub pages: Vec<PageOutcome>,
    pub duration_ms: u64,
}

impl RunResult {
    pub(crate) fn from_outcomes(
        module_id: i64,
        document: String,
        total_pages: usize,
        retired_slides: usize,
        mut pages: Vec<PageOutcome>,
        duration_ms: u64,
    ) -> Self {
        pages.sort_by_key(|p| p.page_num);
        let status = if pages.iter().all(PageOutcome::is_installed) {
            RunStatus::Completed
        } else {
            RunStatus::CompletedWithFailures
        };
        Self {
            module_id,
            document,
            status,
            total_pages,
            retired_slides,
            pages,
            duration_ms,
        }
    }

    /// Number of pages installed.
    pub fn succeeded(&self) -> usize {
        self.pages.iter().filter(|p| p.is_installed()).count()
    }

    /// Number of pages that failed.
    pub fn failed(&self) -> usize {
        self.pages.len() - self.succeeded()
    }

    /// 1-based numbers of installed pages, ascending.
    pub fn succeeded_pages(&self) -> Vec<usize> {
        self.pages
            .iter()
            .filter(|p| p.is_installed())
            .map(|p| p.page_num)
            .collect()
    }

    /// 1-based numbers of failed pages, ascending.
    pub fn failed_pages(&self) -> Vec<usize> {
        self.pages
            .iter()
            .filter(|p| !p.is_installed())
            .map(|p| p.page_num)
            .collect()
    }

    /// Artifact URLs of installed pages, in page order.
    pub fn urls(&self) -> Vec<&str> {
        self.pages
            .iter()
            .filter_map(|p| p.slide.as_ref())
            .map(|s| s.url.as_str())
            .collect()
    }

    /// Errors of failed pages, in page order.
    pub fn errors(&self) -> impl Iterator<Item = &PageError> {
        self.pages.iter().filter_map(|p| p.error.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn installed(page: usize) -> PageOutcome {
        PageOutcome::installed(InstalledSlide {
            page_num: page,
            slide_id: page as i64 * 10,
            media_id: page as i64,
            media_reused: false,
            title: format!("Slide {page}"),
            kind: SlideKind::Regular,
            url: format!("https://cdn/deck/deck_page_{page}.jpg"),
        })
    }

    #[test]
    fn outcomes_are_sorted_and_counted() {
        let pages = vec![
            installed(3),
            PageOutcome::failed(PageError::Extraction {
                page: 2,
                detail: "timeout".into(),
            }),
            installed(1),
        ];
        let r = RunResult::from_outcomes(1, "deck".into(), 3, 0, pages, 5);
        assert_eq!(r.status, RunStatus::CompletedWithFailures);
        assert_eq!(r.succeeded_pages(), vec![1, 3]);
        assert_eq!(r.failed_pages(), vec![2]);
        assert_eq!(
            r.urls(),
            vec!["https://cdn/deck/deck_page_1.jpg", "https://cdn/deck/deck_page_3.jpg"]
        );
        assert_eq!(r.errors().count(), 1);
    }

    #[test]
    fn all_installed_is_completed() {
        let r = RunResult::from_outcomes(1, "deck".into(), 2, 2, vec![installed(1), installed(2)], 1);
        assert_eq!(r.status, RunStatus::Completed);
        assert_eq!(r.failed(), 0);
        assert_eq!(RunPhase::from(r.status), RunPhase::Completed);
    }

    #[test]
    fn result_is_json_serialisable() {
        let r = RunResult::from_outcomes(9, "deck".into(), 1, 0, vec![installed(1)], 1);
        let json = serde_json::to_string(&r).unwrap();
        assert!(json.contains("\"status\":\"Completed\""));
        assert!(json.contains("\"kind\":\"regular\""));
    }
}
