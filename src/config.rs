//! Process-wide configuration, assembled once from the environment at
//! startup. Nothing downstream reads `env::var` directly; everything takes a
//! `&Config`.

use std::env;

use crate::prelude::*;

/// Tunables for the extraction cascade, resolved once from the environment
/// (with a `.env` file already loaded by the caller) and threaded through the
/// rest of the pipeline by reference.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory under which relative paths in the catalog are computed.
    pub input_dir: PathBuf,
    /// Scratch directory for temporary renders and hidden portfolio parents.
    pub work_dir: PathBuf,

    /// Minimum median reliability for the PDF text-layer pass to accept.
    pub pass_txt_cutoff: f64,
    /// Minimum median reliability for the fast OCR pass to accept.
    pub pass_ocr_a_cutoff: f64,
    /// Minimum median reliability for the aggressive (rotation-sweep) OCR pass.
    pub pass_ocr_b_cutoff: f64,
    /// Minimum reliability for legacy `.doc` native extraction to accept.
    pub pass_doc_cutoff: f64,
    /// Minimum reliability for `.docx` native extraction to accept.
    pub pass_docx_cutoff: f64,
    /// Minimum per-image reliability for embedded-image OCR in a `.docx`.
    pub doc_img_ocr_cutoff: f64,

    /// File size, in MiB, at or above which a PDF is processed per-page.
    pub bigpdf_size_limit_mb: u64,
    /// Page count at or above which a PDF is processed per-page.
    pub bigpdf_page_limit: u64,

    /// Hard byte budget per combined-text chunk file.
    pub max_combined_bytes: u64,

    /// Minimum free bytes required on `work_dir` before attempting OCR.
    pub min_free_bytes_for_ocr: u64,

    /// Optional unRAID-style owner fixup applied to output paths.
    pub puid: Option<u32>,
    pub pgid: Option<u32>,
}

impl Config {
    /// Build a `Config` from the environment, falling back to the documented
    /// defaults for anything unset or unparsable.
    pub fn from_env(input_dir: PathBuf, work_dir: PathBuf) -> Self {
        Self {
            input_dir,
            work_dir,
            pass_txt_cutoff: env_f64("PASS_TXT_CUTOFF", 0.80),
            pass_ocr_a_cutoff: env_f64("PASS_OCR_A_CUTOFF", 0.70),
            pass_ocr_b_cutoff: env_f64("PASS_OCR_B_CUTOFF", 0.60),
            pass_doc_cutoff: env_f64("PASS_DOC_CUTOFF", 0.75),
            pass_docx_cutoff: env_f64("PASS_DOCX_CUTOFF", 0.70),
            doc_img_ocr_cutoff: env_f64("DOC_IMG_OCR_CUTOFF", 0.50),
            bigpdf_size_limit_mb: env_u64("BIGPDF_SIZE_LIMIT_MB", 50),
            bigpdf_page_limit: env_u64("BIGPDF_PAGE_LIMIT", 500),
            max_combined_bytes: env_u64("MAX_COMBINED_BYTES", 3_000_000),
            min_free_bytes_for_ocr: env_u64("MIN_FREE_BYTES_FOR_OCR", 1_073_741_824),
            puid: env::var("PUID").ok().and_then(|s| s.parse().ok()),
            pgid: env::var("PGID").ok().and_then(|s| s.parse().ok()),
        }
    }
}

fn env_f64(name: &str, default: f64) -> f64 {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = Config::from_env(PathBuf::from("/in"), PathBuf::from("/work"));
        assert_eq!(cfg.pass_txt_cutoff, 0.80);
        assert_eq!(cfg.bigpdf_page_limit, 500);
        assert_eq!(cfg.max_combined_bytes, 3_000_000);
    }
}
