//! DOC/DOCX cascade: native extraction (DOCX via its OPC container, legacy
//! DOC via `antiword`/`catdoc`), an embedded-image OCR fallback for DOCX,
//! and a DOC/DOCX -> PDF -> text-layer second chance for anything that
//! still falls short.

use crate::{
    cascade::docx,
    config::Config,
    errors::PipelineError,
    prelude::*,
    reliability,
    tools::Tools,
    writer::Page,
};

const MAX_EMBEDDED_IMAGES: usize = 12;
const UPSCALE_MIN_DIMENSION: u32 = 600;
const UPSCALE_FACTOR: u32 = 2;

/// Outcome of the DOC/DOCX cascade for one file.
pub struct DocCascadeResult {
    pub pages: Vec<Page>,
    pub pass_used: &'static str,
    pub score: f64,
    pub used_ocr: bool,
}

/// One extraction candidate tried by the DOC/DOCX cascade, tagged with
/// whether producing it required OCR (so the catalog's `used_ocr` and
/// `pass_used` fields reflect the winning candidate's real provenance, not
/// just "DOCX vs. DOC").
struct Candidate {
    text: String,
    score: f64,
    pass_used: &'static str,
    used_ocr: bool,
}

/// Run the DOC/DOCX cascade. Returns `Ok(None)` only when every path
/// (native, embedded-image OCR, and the PDF fallback) failed to produce
/// text; the caller then writes an `ERROR` row and quarantines.
pub async fn run(
    doc_path: &Path,
    is_docx: bool,
    config: &Config,
    tools: &Tools,
) -> Result<Option<DocCascadeResult>> {
    let (cutoff, native_result) = if is_docx {
        (
            config.pass_docx_cutoff,
            native_docx(doc_path, config, tools).await,
        )
    } else {
        (config.pass_doc_cutoff, native_doc(doc_path, tools).await)
    };
    let method = if is_docx { "docx_text" } else { "doc_text" };

    match native_result {
        Ok(candidate) if candidate.score >= cutoff && !candidate.text.trim().is_empty() => {
            return Ok(Some(DocCascadeResult {
                pages: vec![Page { number: 1, text: candidate.text }],
                pass_used: candidate.pass_used,
                score: candidate.score,
                used_ocr: candidate.used_ocr,
            }));
        }
        Ok(candidate) => {
            debug!(
                "{method} below cutoff: score={:.2} cutoff={cutoff}, trying PDF fallback",
                candidate.score
            );
        }
        Err(err) => {
            warn!("{method} extraction failed: {err:#}, trying PDF fallback");
        }
    }

    match fallback_via_pdf(doc_path, config, tools).await {
        Ok(Some(result)) => Ok(Some(result)),
        Ok(None) => Ok(None),
        Err(err) => {
            warn!("PDF fallback errored: {err:#}");
            Ok(None)
        }
    }
}

async fn native_doc(doc_path: &Path, tools: &Tools) -> Result<Candidate> {
    let text = tools.legacy_doc.doc_text(doc_path).await?;
    let score = reliability::score(&text);
    Ok(Candidate { text, score, pass_used: "doc_text", used_ocr: false })
}

/// Native DOCX extraction, falling through to embedded-image OCR when the
/// paragraph/table text alone is empty or too unreliable. The native-text
/// candidate is preferred on ties since it's cheaper and isn't OCR; when the
/// image-OCR candidate wins outright, the result is tagged `docx_img_ocr`/
/// `used_ocr: true` so the catalog records the real provenance of the
/// winning text instead of reporting an OCR result as native extraction.
async fn native_docx(doc_path: &Path, config: &Config, tools: &Tools) -> Result<Candidate> {
    let content = docx::read_docx(doc_path)
        .map_err(|err| PipelineError::Unparseable(err.to_string()))?;
    let native_score = reliability::score(&content.text);

    if !content.text.trim().is_empty() && native_score >= config.pass_docx_cutoff {
        return Ok(Candidate {
            text: content.text,
            score: native_score,
            pass_used: "docx_text",
            used_ocr: false,
        });
    }

    let (image_text, image_score) = ocr_embedded_images(&content.media, config, tools).await;

    if image_score > native_score {
        Ok(Candidate {
            text: image_text,
            score: image_score,
            pass_used: "docx_img_ocr",
            used_ocr: true,
        })
    } else {
        Ok(Candidate {
            text: content.text,
            score: native_score,
            pass_used: "docx_text",
            used_ocr: false,
        })
    }
}

async fn ocr_embedded_images(
    media: &[(String, Vec<u8>)],
    config: &Config,
    tools: &Tools,
) -> (String, f64) {
    let mut accepted_texts = Vec::new();

    for (name, bytes) in media.iter().take(MAX_EMBEDDED_IMAGES) {
        let Ok(dynamic) = image::load_from_memory(bytes) else {
            debug!("skipping non-decodable embedded media {name}");
            continue;
        };
        let dynamic = maybe_upscale(dynamic);
        let luma = dynamic.to_luma8();
        let page = crate::tools::RenderedPage {
            width: luma.width(),
            height: luma.height(),
            grayscale: true,
            samples: luma.into_raw(),
        };
        let text = match tools.ocr_engine.ocr(&page).await {
            Ok(text) => text,
            Err(err) => {
                warn!("embedded image OCR failed for {name}: {err:#}");
                continue;
            }
        };
        let score = reliability::score(&text);
        if score >= config.doc_img_ocr_cutoff {
            accepted_texts.push(text);
        }
    }

    if accepted_texts.is_empty() {
        (String::new(), 0.0)
    } else {
        let combined = accepted_texts.join("\n");
        let combined_score = reliability::score(&combined);
        (combined, combined_score)
    }
}

fn maybe_upscale(img: image::DynamicImage) -> image::DynamicImage {
    if img.width() < UPSCALE_MIN_DIMENSION || img.height() < UPSCALE_MIN_DIMENSION {
        img.resize(
            img.width() * UPSCALE_FACTOR,
            img.height() * UPSCALE_FACTOR,
            image::imageops::FilterType::Nearest,
        )
    } else {
        img
    }
}

/// Convert the DOC/DOCX to PDF via a headless office suite, then run only
/// the PDF text-layer logic (any non-empty text is accepted; the caller has
/// already tried everything cheaper).
async fn fallback_via_pdf(
    doc_path: &Path,
    config: &Config,
    tools: &Tools,
) -> Result<Option<DocCascadeResult>> {
    let tmpdir = tempfile::TempDir::with_prefix("doc_to_pdf")?;
    let pdf_path = tools
        .doc_converter
        .convert_to_pdf(doc_path, tmpdir.path())
        .await?;

    let total_pages = tools.pdf_info.page_count(&pdf_path).await?;
    let mut parts = Vec::with_capacity(total_pages);
    for i in 0..total_pages {
        let text = tools
            .text_extractor
            .page_text(&pdf_path, i + 1)
            .await
            .unwrap_or_default();
        parts.push(text);
    }
    let text = parts.join("\n");

    if text.trim().is_empty() {
        return Ok(None);
    }

    let score = reliability::score(&text);
    let _ = config;
    Ok(Some(DocCascadeResult {
        pages: vec![Page { number: 1, text }],
        pass_used: "doc_pdf_text",
        score,
        used_ocr: false,
    }))
}
