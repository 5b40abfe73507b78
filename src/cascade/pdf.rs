//! PDF cascade: native text layer, then fast OCR, then an aggressive OCR
//! pass that sweeps page rotations, escalating on reliability.

use crate::{
    cascade::{Mode, PassOutcome, ScoredPage},
    config::Config,
    errors::PipelineError,
    prelude::*,
    reliability,
    tools::Tools,
};

const TRIAGE_SAMPLE_PAGES: usize = 6;
const TRIAGE_MIN_CHARS: usize = 40;
const TRIAGE_RELIABILITY_CAP: f64 = 0.15;
const OCR_A_DPI: u32 = 300;
const OCR_B_DPI: u32 = 400;
const OCR_B_ROTATIONS: [u32; 3] = [0, 90, 270];

/// Outcome of running the whole PDF cascade over one file.
pub struct PdfCascadeResult {
    pub pages: Vec<crate::writer::Page>,
    pub pass_used: &'static str,
    pub score: f64,
    pub used_ocr: bool,
}

/// Mode selection for a PDF given its size and page count.
pub fn select_mode(size_mb: u64, total_pages: usize, config: &Config) -> Mode {
    if size_mb >= config.bigpdf_size_limit_mb || total_pages as u64 >= config.bigpdf_page_limit {
        Mode::PerPage
    } else {
        Mode::PerDoc
    }
}

/// Run the full `text_layer -> ocr_fast -> ocr_aggressive` cascade.
///
/// Returns `Ok(Some(result))` on accept, `Ok(None)` if every pass rejected
/// (the caller writes an `ERROR` row and quarantines), and `Err` only for a
/// pre-OCR low-disk guard failure, which the caller should also quarantine.
pub async fn run(
    pdf_path: &Path,
    size_mb: u64,
    config: &Config,
    tools: &Tools,
) -> Result<Option<PdfCascadeResult>> {
    let total_pages = tools
        .pdf_info
        .page_count(pdf_path)
        .await
        .map_err(|err| PipelineError::Unparseable(err.to_string()))?;
    let mut mode = select_mode(size_mb, total_pages, config);

    if let Some(outcome) =
        text_layer_pass(pdf_path, total_pages, mode, config, tools).await
    {
        let score = outcome.overall_score();
        return Ok(Some(PdfCascadeResult {
            pages: outcome.into_writer_pages(),
            pass_used: "pdf_text",
            score,
            used_ocr: false,
        }));
    }

    // Once OCR is required, per-doc escalates to per-page: OCR quality is too
    // uneven across pages to aggregate as a single score.
    if mode == Mode::PerDoc {
        mode = Mode::PerPage;
    }

    check_free_disk(config)?;

    if let Some(outcome) =
        ocr_pass(pdf_path, total_pages, mode, config, tools, OCR_A_DPI, &[0]).await
    {
        let score = outcome.overall_score();
        return Ok(Some(PdfCascadeResult {
            pages: outcome.into_writer_pages(),
            pass_used: "pdf_ocr_a",
            score,
            used_ocr: true,
        }));
    }

    if let Some(outcome) = ocr_pass(
        pdf_path,
        total_pages,
        mode,
        config,
        tools,
        OCR_B_DPI,
        &OCR_B_ROTATIONS,
    )
    .await
    {
        let score = outcome.overall_score();
        return Ok(Some(PdfCascadeResult {
            pages: outcome.into_writer_pages(),
            pass_used: "pdf_ocr_b",
            score,
            used_ocr: true,
        }));
    }

    Ok(None)
}

fn check_free_disk(config: &Config) -> Result<()> {
    if let Ok(free) = free_bytes(&config.work_dir) {
        if free < config.min_free_bytes_for_ocr {
            return Err(PipelineError::LowDisk(format!(
                "work_dir free={free} threshold={}",
                config.min_free_bytes_for_ocr
            ))
            .into());
        }
    }
    Ok(())
}

#[cfg(unix)]
fn free_bytes(path: &Path) -> Result<u64> {
    use std::ffi::CString;
    use std::mem::MaybeUninit;

    let c_path = CString::new(path.as_os_str().as_encoded_bytes())
        .context("work_dir path contains a NUL byte")?;
    let mut stat: MaybeUninit<libc::statvfs> = MaybeUninit::uninit();
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };
    if rc != 0 {
        return Err(anyhow!("statvfs failed for {path:?}"));
    }
    let stat = unsafe { stat.assume_init() };
    Ok(stat.f_bavail as u64 * stat.f_frsize as u64)
}

#[cfg(not(unix))]
fn free_bytes(_path: &Path) -> Result<u64> {
    Err(anyhow!("free space check unavailable on this platform"))
}

async fn text_layer_pass(
    pdf_path: &Path,
    total_pages: usize,
    mode: Mode,
    config: &Config,
    tools: &Tools,
) -> Option<PassOutcome> {
    let sample_target = TRIAGE_SAMPLE_PAGES.min(total_pages.max(1));
    let sample_idxs = reliability::sample_page_indices(total_pages, sample_target);
    let mut samples = Vec::with_capacity(sample_idxs.len());
    for idx in &sample_idxs {
        let text = tools
            .text_extractor
            .page_text(pdf_path, idx + 1)
            .await
            .unwrap_or_default();
        samples.push(text);
    }
    if reliability::likely_scan_only(&samples, TRIAGE_MIN_CHARS, TRIAGE_RELIABILITY_CAP) {
        debug!("TXT triage: likely scan-only, escalating to OCR");
        return None;
    }

    let mut pages = Vec::with_capacity(total_pages);
    for i in 0..total_pages {
        let text = tools
            .text_extractor
            .page_text(pdf_path, i + 1)
            .await
            .unwrap_or_default();
        let score = reliability::score(&text);
        pages.push(ScoredPage {
            number: i + 1,
            text,
            score,
        });
    }
    accept_or_reject(pages, mode, config.pass_txt_cutoff)
}

async fn ocr_pass(
    pdf_path: &Path,
    total_pages: usize,
    mode: Mode,
    config: &Config,
    tools: &Tools,
    dpi: u32,
    rotations: &[u32],
) -> Option<PassOutcome> {
    let mut pages = Vec::with_capacity(total_pages);
    for i in 0..total_pages {
        let (text, score) = best_of_rotations(pdf_path, i, dpi, rotations, tools).await;
        pages.push(ScoredPage {
            number: i + 1,
            text,
            score,
        });
    }
    let cutoff = if dpi == OCR_A_DPI {
        config.pass_ocr_a_cutoff
    } else {
        config.pass_ocr_b_cutoff
    };
    accept_or_reject(pages, mode, cutoff)
}

async fn best_of_rotations(
    pdf_path: &Path,
    page_index_0based: usize,
    dpi: u32,
    rotations: &[u32],
    tools: &Tools,
) -> (String, f64) {
    let mut best = (String::new(), 0.0);
    for &rotation in rotations {
        let rendered = match tools
            .rasterizer
            .render_page(pdf_path, page_index_0based, dpi, true, rotation)
            .await
        {
            Ok(page) => page,
            Err(err) => {
                warn!("render failed @page={} rotation={rotation}: {err:#}", page_index_0based + 1);
                continue;
            }
        };
        let text = match tools.ocr_engine.ocr(&rendered).await {
            Ok(text) => text,
            Err(err) => {
                warn!("OCR failed @page={} rotation={rotation}: {err:#}", page_index_0based + 1);
                continue;
            }
        };
        let score = reliability::score(&text);
        if score > best.1 {
            best = (text, score);
        }
    }
    best
}

fn accept_or_reject(pages: Vec<ScoredPage>, mode: Mode, cutoff: f64) -> Option<PassOutcome> {
    let scores: Vec<f64> = pages.iter().map(|p| p.score).collect();
    let med = reliability::median(&scores);
    if med < cutoff {
        return None;
    }
    match mode {
        Mode::PerDoc => {
            let text = pages
                .into_iter()
                .map(|p| p.text)
                .collect::<Vec<_>>()
                .join("\n");
            Some(PassOutcome::PerDoc { text, score: med })
        }
        Mode::PerPage => Some(PassOutcome::PerPage { pages }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_selects_per_page_for_large_file_size() {
        let config = Config::from_env(PathBuf::from("/in"), PathBuf::from("/work"));
        assert_eq!(select_mode(60, 3, &config), Mode::PerPage);
    }

    #[test]
    fn mode_selects_per_page_for_many_pages() {
        let config = Config::from_env(PathBuf::from("/in"), PathBuf::from("/work"));
        assert_eq!(select_mode(1, 600, &config), Mode::PerPage);
    }

    #[test]
    fn mode_selects_per_doc_otherwise() {
        let config = Config::from_env(PathBuf::from("/in"), PathBuf::from("/work"));
        assert_eq!(select_mode(1, 3, &config), Mode::PerDoc);
    }

    #[test]
    fn accept_or_reject_honors_cutoff() {
        let pages = vec![
            ScoredPage { number: 1, text: "ok".into(), score: 0.9 },
            ScoredPage { number: 2, text: "ok".into(), score: 0.9 },
        ];
        assert!(accept_or_reject(pages.clone(), Mode::PerDoc, 0.95).is_none());
        assert!(accept_or_reject(pages, Mode::PerDoc, 0.5).is_some());
    }
}
