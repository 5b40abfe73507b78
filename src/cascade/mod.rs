//! The per-format extraction cascades: PDF, DOC/DOCX, and image passes, all
//! built from the same shape — escalating passes, each gated by
//! [`crate::reliability`], writing through [`crate::writer`] on the first
//! accept.

pub mod doc;
pub mod docx;
pub mod image;
pub mod pdf;

use crate::writer::Page;

/// Normalized result of one pass attempt, prior to being handed to the
/// writer. Collapses the dynamic `{"text": ...}` vs `{"pages": [...]}`
/// payload shapes of the system this crate's cascades are modeled on into a
/// single tagged variant.
pub enum PassOutcome {
    /// A document-level result: one synthetic page containing the whole
    /// document's text, with a single overall reliability score.
    PerDoc { text: String, score: f64 },
    /// A page-level result: one reliability-scored page per document page.
    PerPage { pages: Vec<ScoredPage> },
}

/// A single page's extracted text and its reliability score.
#[derive(Debug, Clone)]
pub struct ScoredPage {
    pub number: usize,
    pub text: String,
    pub score: f64,
}

impl PassOutcome {
    /// The pass's overall score: the stored score for `PerDoc`, or the
    /// median of per-page scores for `PerPage`.
    pub fn overall_score(&self) -> f64 {
        match self {
            PassOutcome::PerDoc { score, .. } => *score,
            PassOutcome::PerPage { pages } => {
                let scores: Vec<f64> = pages.iter().map(|p| p.score).collect();
                crate::reliability::median(&scores)
            }
        }
    }

    /// Normalize to the flat `[Page]` shape the writer expects.
    pub fn into_writer_pages(self) -> Vec<Page> {
        match self {
            PassOutcome::PerDoc { text, .. } => vec![Page { number: 1, text }],
            PassOutcome::PerPage { pages } => pages
                .into_iter()
                .map(|p| Page {
                    number: p.number,
                    text: p.text,
                })
                .collect(),
        }
    }
}

/// Which aggregation granularity a PDF is processed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    PerDoc,
    PerPage,
}
