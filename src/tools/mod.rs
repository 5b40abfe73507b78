//! Thin adapters over the external CLI tools the cascade shells out to.
//!
//! Each concern gets its own trait so tests can swap in an in-process fake
//! instead of spawning real processes, the same shape as
//! [`crate::cpu_limit`]'s caller, the `OcrEngine` trait in the teacher this
//! crate grew from.

pub mod legacy_doc;
pub mod office_convert;
pub mod ocr;
pub mod pdf;
pub mod portfolio;

use crate::prelude::*;

/// A page rendered to raw 8-bit samples, either grayscale or RGB.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub width: u32,
    pub height: u32,
    pub grayscale: bool,
    pub samples: Vec<u8>,
}

/// Reads page counts from a PDF.
#[async_trait]
pub trait PdfInfo: Send + Sync {
    async fn page_count(&self, pdf_path: &Path) -> Result<usize>;
}

/// Extracts the text layer of a single 1-based page from a PDF.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn page_text(&self, pdf_path: &Path, page_number_1based: usize) -> Result<String>;
}

/// Rasterizes a single 0-based PDF page to pixel samples.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    async fn render_page(
        &self,
        pdf_path: &Path,
        page_index_0based: usize,
        dpi: u32,
        grayscale: bool,
        rotation_degrees: u32,
    ) -> Result<RenderedPage>;
}

/// Runs OCR over a rendered page, returning its text.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn ocr(&self, page: &RenderedPage) -> Result<String>;
}

/// Extracts text from a legacy binary `.doc` file.
#[async_trait]
pub trait LegacyDocConverter: Send + Sync {
    async fn doc_text(&self, doc_path: &Path) -> Result<String>;
}

/// Converts a DOC/DOCX file to PDF via a headless office suite.
#[async_trait]
pub trait DocConverter: Send + Sync {
    async fn convert_to_pdf(&self, doc_path: &Path, out_dir: &Path) -> Result<PathBuf>;
}

/// Detects and extracts PDF portfolio attachments.
#[async_trait]
pub trait PortfolioDetacher: Send + Sync {
    /// Number of embedded attachments, or `0` if this is not a portfolio.
    async fn attachment_count(&self, pdf_path: &Path) -> Result<usize>;
    /// Extract every attachment into `out_dir`, returning the extracted
    /// file paths.
    async fn extract_all(&self, pdf_path: &Path, out_dir: &Path) -> Result<Vec<PathBuf>>;
}

/// The bundle of real, process-spawning tool adapters used outside tests.
pub struct Tools {
    pub pdf_info: Box<dyn PdfInfo>,
    pub text_extractor: Box<dyn TextExtractor>,
    pub rasterizer: Box<dyn Rasterizer>,
    pub ocr_engine: Box<dyn OcrEngine>,
    pub legacy_doc: Box<dyn LegacyDocConverter>,
    pub doc_converter: Box<dyn DocConverter>,
    pub portfolio: Box<dyn PortfolioDetacher>,
}

impl Tools {
    /// The real tool bundle, spawning `pdfinfo`, `pdftotext`, `pdftoppm`,
    /// `tesseract`, `antiword`/`catdoc`, `libreoffice`/`unoconv`, and
    /// `pdfdetach`.
    pub fn real() -> Self {
        Self {
            pdf_info: Box::new(pdf::PdfInfoTool),
            text_extractor: Box::new(pdf::PdfToTextExtractor),
            rasterizer: Box::new(pdf::PdfToppmRasterizer),
            ocr_engine: Box::new(ocr::TesseractOcrEngine),
            legacy_doc: Box::new(legacy_doc::AntiwordThenCatdoc),
            doc_converter: Box::new(office_convert::LibreOfficeThenUnoconv),
            portfolio: Box::new(portfolio::PdfDetachTool),
        }
    }
}
