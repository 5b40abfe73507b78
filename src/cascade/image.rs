//! Image pass: multi-frame TIFF (and single-frame PNG/JPEG) OCR, trying a
//! plain-grayscale and a hard-threshold variant per frame and keeping
//! whichever scores higher.

use tiff::ColorType;
use tiff::decoder::{Decoder, DecodingResult};

use crate::{prelude::*, reliability, tools::RenderedPage, tools::Tools};

const THRESHOLD: u8 = 128;

/// Result of OCRing every frame of an image file.
pub struct ImagePassResult {
    pub pages: Vec<crate::writer::Page>,
    pub score: f64,
    pub has_text: bool,
}

/// Run the image pass over `path`, trying both a grayscale and a
/// threshold-binarized variant of each frame and keeping the better-scoring
/// one.
pub async fn run(path: &Path, tools: &Tools) -> Result<ImagePassResult> {
    let frames = decode_frames(path)?;
    let mut pages = Vec::with_capacity(frames.len());
    let mut best_overall = 0.0;
    let mut has_text = false;

    for (idx, frame) in frames.into_iter().enumerate() {
        let thresholded = threshold_variant(&frame);

        let (text_a, score_a) = ocr_variant(&frame, tools).await;
        let (text_b, score_b) = ocr_variant(&thresholded, tools).await;

        let (text, score) = if score_b > score_a {
            (text_b, score_b)
        } else {
            (text_a, score_a)
        };

        if !text.trim().is_empty() {
            has_text = true;
        }
        if score > best_overall {
            best_overall = score;
        }
        pages.push(crate::writer::Page {
            number: idx + 1,
            text,
        });
    }

    Ok(ImagePassResult {
        pages,
        score: best_overall,
        has_text,
    })
}

async fn ocr_variant(page: &RenderedPage, tools: &Tools) -> (String, f64) {
    match tools.ocr_engine.ocr(page).await {
        Ok(text) => {
            let score = reliability::score(&text);
            (text, score)
        }
        Err(err) => {
            warn!("image OCR failed: {err:#}");
            (String::new(), 0.0)
        }
    }
}

fn threshold_variant(page: &RenderedPage) -> RenderedPage {
    let samples = page
        .samples
        .iter()
        .map(|&b| if b < THRESHOLD { 0 } else { 255 })
        .collect();
    RenderedPage {
        width: page.width,
        height: page.height,
        grayscale: true,
        samples,
    }
}

/// Decode every frame of `path` to grayscale samples. Multi-frame TIFF is
/// handled via the `tiff` crate directly (the `image` crate only exposes a
/// single page); anything else is decoded as one frame via `image`.
fn decode_frames(path: &Path) -> Result<Vec<RenderedPage>> {
    let is_tiff = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("tif") || e.eq_ignore_ascii_case("tiff"))
        .unwrap_or(false);

    if is_tiff {
        decode_tiff_frames(path)
    } else {
        let dynamic = image::open(path)
            .with_context(|| format!("failed to decode image {path:?}"))?;
        let luma = dynamic.to_luma8();
        Ok(vec![RenderedPage {
            width: luma.width(),
            height: luma.height(),
            grayscale: true,
            samples: luma.into_raw(),
        }])
    }
}

fn decode_tiff_frames(path: &Path) -> Result<Vec<RenderedPage>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open TIFF {path:?}"))?;
    let mut decoder =
        Decoder::new(file).with_context(|| format!("failed to open TIFF decoder for {path:?}"))?;

    let mut frames = Vec::new();
    loop {
        let (width, height) = decoder.dimensions().context("failed to read TIFF dimensions")?;
        let color_type = decoder.colortype().context("failed to read TIFF color type")?;
        let data = decoder.read_image().context("failed to decode TIFF frame")?;
        frames.push(RenderedPage {
            width,
            height,
            grayscale: true,
            samples: to_grayscale_samples(data, color_type)?,
        });
        if !decoder.more_images() {
            break;
        }
        decoder
            .next_image()
            .context("failed to advance to next TIFF frame")?;
    }
    Ok(frames)
}

fn to_grayscale_samples(data: DecodingResult, color_type: ColorType) -> Result<Vec<u8>> {
    let channels = match color_type {
        ColorType::Gray(_) => 1,
        ColorType::RGB(_) => 3,
        ColorType::RGBA(_) | ColorType::CMYK(_) => 4,
        other => return Err(anyhow!("unsupported TIFF color type {other:?}")),
    };

    let bytes: Vec<u8> = match data {
        DecodingResult::U8(v) => v,
        DecodingResult::U16(v) => v.into_iter().map(|s| (s >> 8) as u8).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|s| (s >> 24) as u8).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|s| (s >> 56) as u8).collect(),
        DecodingResult::I8(v) => v.into_iter().map(|s| s as u8).collect(),
        DecodingResult::I16(v) => v.into_iter().map(|s| (s >> 8) as u8).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|s| (s >> 24) as u8).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|s| (s >> 56) as u8).collect(),
        DecodingResult::F32(v) => v.into_iter().map(|s| (s.clamp(0.0, 1.0) * 255.0) as u8).collect(),
        DecodingResult::F64(v) => v.into_iter().map(|s| (s.clamp(0.0, 1.0) * 255.0) as u8).collect(),
    };

    if channels == 1 {
        Ok(bytes)
    } else {
        Ok(bytes
            .chunks_exact(channels)
            .map(|c| ((c[0] as u32 * 299 + c[1] as u32 * 587 + c[2] as u32 * 114) / 1000) as u8)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_binarizes_around_128() {
        let page = RenderedPage {
            width: 4,
            height: 1,
            grayscale: true,
            samples: vec![0, 127, 128, 255],
        };
        let thresholded = threshold_variant(&page);
        assert_eq!(thresholded.samples, vec![0, 0, 255, 255]);
    }
}
