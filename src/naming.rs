//! Document identity and the canonical artifact filename scheme.
//!
//! The filename scheme is the only format contract the pipeline has with the
//! outside world: it is the dedup key for media artifacts and the pattern
//! retirement uses to find a document's previous slides. It must stay
//! byte-for-byte stable across releases.
//!
//! ```text
//! deck.pdf  ──▶  document "deck"
//!                 page 3 base     deck_page_3 (1).jpg
//!                 page 3 variants deck_page_3 (1)-thumbnail.jpg
//!                                 deck_page_3 (1)-card.jpg
//!                 object key      deck/deck_page_3.jpg
//! ```

use crate::error::Pdf2SlidesError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Disambiguation suffix applied uniformly to every derived filename.
pub const CANONICAL_SUFFIX: &str = " (1)";

/// Extension of every derived artifact (all artifacts are JPEG).
pub const ARTIFACT_EXTENSION: &str = "jpg";

const PAGE_MARKER: &str = "_page_";

/// Logical name of an uploaded PDF: the filename stem.
///
/// This is the idempotency key for slide replacement within a module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentName(String);

impl DocumentName {
    /// Derive the document name from an upload filename or path.
    ///
    /// Only the final path component is considered and only the last
    /// extension is stripped: `slides/week1.v2.pdf` → `week1.v2`.
    pub fn from_filename(filename: &str) -> Result<Self, Pdf2SlidesError> {
        let stem = Path::new(filename.trim())
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::trim)
            .unwrap_or("");
        Self::new(stem).map_err(|_| Pdf2SlidesError::InvalidDocumentName {
            filename: filename.to_string(),
        })
    }

    /// Wrap an already-derived name, rejecting names that would break the
    /// object key layout.
    pub fn new(name: impl Into<String>) -> Result<Self, Pdf2SlidesError> {
        let name = name.into();
        if name.is_empty() || name.contains('/') || name.contains('\\') || name == "." || name == ".." {
            return Err(Pdf2SlidesError::InvalidDocumentName { filename: name });
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `<document>_page_<n>` — the stem every artifact of page `n` shares.
    pub fn page_stem(&self, page: usize) -> String {
        format!("{}{}{}", self.0, PAGE_MARKER, page)
    }

    /// Canonical base artifact filename, the dedup key: `<document>_page_<n> (1).jpg`.
    pub fn canonical_filename(&self, page: usize) -> String {
        format!(
            "{}{}.{}",
            self.page_stem(page),
            CANONICAL_SUFFIX,
            ARTIFACT_EXTENSION
        )
    }

    /// Filename of a named size variant: `<document>_page_<n> (1)-<variant>.jpg`.
    pub fn variant_filename(&self, page: usize, variant: &str) -> String {
        format!(
            "{}{}-{}.{}",
            self.page_stem(page),
            CANONICAL_SUFFIX,
            variant,
            ARTIFACT_EXTENSION
        )
    }

    /// Object-store key for the page image: `<document>/<document>_page_<n>.jpg`.
    pub fn page_object_key(&self, page: usize) -> String {
        format!("{}/{}.{}", self.0, self.page_stem(page), ARTIFACT_EXTENSION)
    }

    /// Object-store key for a variant file.
    pub fn variant_object_key(&self, page: usize, variant: &str) -> String {
        format!("{}/{}", self.0, self.variant_filename(page, variant))
    }

    /// Page index encoded in `filename` when it is this document's canonical
    /// base filename, `None` otherwise.
    ///
    /// Matching is exact on the document name: `intro` does not claim
    /// `intro2_page_1 (1).jpg`, and `_`/`%` in names carry no wildcard meaning.
    pub fn page_of(&self, filename: &str) -> Option<usize> {
        let rest = filename.strip_prefix(self.0.as_str())?;
        let rest = rest.strip_prefix(PAGE_MARKER)?;
        let digits_end = rest
            .char_indices()
            .find(|(_, c)| !c.is_ascii_digit())
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        if digits_end == 0 {
            return None;
        }
        let (digits, tail) = rest.split_at(digits_end);
        let expected_tail = format!("{}.{}", CANONICAL_SUFFIX, ARTIFACT_EXTENSION);
        if tail != expected_tail {
            return None;
        }
        digits.parse().ok().filter(|&n| n >= 1)
    }

    /// True when `filename` belongs to this document's generation set.
    pub fn owns(&self, filename: &str) -> bool {
        self.page_of(filename).is_some()
    }

    /// SQL `LIKE` prefix pattern with wildcards escaped (`\` escape char).
    ///
    /// Used to narrow database scans; callers still confirm with [`Self::owns`].
    pub fn like_pattern(&self) -> String {
        let mut escaped = String::with_capacity(self.0.len() + 8);
        for c in self.0.chars() {
            if matches!(c, '%' | '_' | '\\') {
                escaped.push('\\');
            }
            escaped.push(c);
        }
        format!("{}\\_page\\_%", escaped)
    }
}

impl fmt::Display for DocumentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(s: &str) -> DocumentName {
        DocumentName::new(s).unwrap()
    }

    #[test]
    fn name_from_filename_strips_last_extension() {
        assert_eq!(DocumentName::from_filename("deck.pdf").unwrap().as_str(), "deck");
        assert_eq!(
            DocumentName::from_filename("/tmp/uploads/week1.v2.pdf").unwrap().as_str(),
            "week1.v2"
        );
        assert_eq!(DocumentName::from_filename("notes").unwrap().as_str(), "notes");
    }

    #[test]
    fn empty_stem_is_rejected() {
        assert!(DocumentName::from_filename("").is_err());
        assert!(DocumentName::from_filename("   ").is_err());
        assert!(DocumentName::new("a/b").is_err());
    }

    #[test]
    fn canonical_filenames_match_the_published_scheme() {
        let d = doc("Intro Lecture");
        assert_eq!(d.canonical_filename(3), "Intro Lecture_page_3 (1).jpg");
        assert_eq!(
            d.variant_filename(3, "thumbnail"),
            "Intro Lecture_page_3 (1)-thumbnail.jpg"
        );
        assert_eq!(d.variant_filename(3, "card"), "Intro Lecture_page_3 (1)-card.jpg");
        assert_eq!(d.page_object_key(3), "Intro Lecture/Intro Lecture_page_3.jpg");
    }

    #[test]
    fn derivation_is_deterministic() {
        let d = doc("deck");
        assert_eq!(d.canonical_filename(12), d.canonical_filename(12));
    }

    #[test]
    fn page_of_round_trips_and_rejects_neighbours() {
        let d = doc("intro");
        assert_eq!(d.page_of(&d.canonical_filename(7)), Some(7));
        assert_eq!(d.page_of("intro2_page_1 (1).jpg"), None);
        assert_eq!(d.page_of("intro_page_ (1).jpg"), None);
        assert_eq!(d.page_of("intro_page_1 (1)-card.jpg"), None);
        assert_eq!(d.page_of("intro_page_0 (1).jpg"), None);
        assert_eq!(doc("a").page_of("a_page_1_page_2 (1).jpg"), None);
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(doc("my_deck%").like_pattern(), "my\\_deck\\%\\_page\\_%");
    }
}
