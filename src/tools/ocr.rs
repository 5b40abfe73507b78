//! OCR via the `tesseract` CLI.

use std::io::Write as _;

use image::{ImageBuffer, Luma, Rgb};
use tokio::process::Command;

use crate::{async_utils::check_for_command_failure, cpu_limit::with_cpu_semaphore, prelude::*};

use super::{OcrEngine, RenderedPage};

/// Wraps the `tesseract` CLI tool at `-l eng --oem 1 --psm 6`, inverting
/// detection so light-on-dark scans still OCR cleanly.
pub struct TesseractOcrEngine;

#[async_trait]
impl OcrEngine for TesseractOcrEngine {
    #[instrument(level = "debug", skip_all)]
    async fn ocr(&self, page: &RenderedPage) -> Result<String> {
        let tmpdir = tempfile::TempDir::with_prefix("tesseract")?;
        let input_path = tmpdir.path().join("input.png");
        let output_base = tmpdir.path().join("output");

        encode_png(page, &input_path)?;

        let output = with_cpu_semaphore(|| async {
            Command::new("tesseract")
                .arg(&input_path)
                .arg(&output_base)
                .arg("-l")
                .arg("eng")
                .arg("--oem")
                .arg("1")
                .arg("--psm")
                .arg("6")
                .arg("-c")
                .arg("tessedit_do_invert=1")
                .output()
                .await
                .context("failed to run tesseract")
        })
        .await?;
        check_for_command_failure("tesseract", output.status)?;

        let output_path = output_base.with_extension("txt");
        std::fs::read_to_string(&output_path)
            .with_context(|| format!("failed to read tesseract output at {output_path:?}"))
    }
}

fn encode_png(page: &RenderedPage, path: &Path) -> Result<()> {
    let mut file = std::fs::File::create(path)
        .with_context(|| format!("failed to create OCR input file at {path:?}"))?;
    if page.grayscale {
        let buf: ImageBuffer<Luma<u8>, _> =
            ImageBuffer::from_raw(page.width, page.height, page.samples.clone())
                .ok_or_else(|| anyhow!("rendered page samples did not match its dimensions"))?;
        let mut bytes = Vec::new();
        buf.write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageFormat::Png,
        )
        .context("failed to encode grayscale PNG")?;
        file.write_all(&bytes).context("failed to write PNG")?;
    } else {
        let buf: ImageBuffer<Rgb<u8>, _> =
            ImageBuffer::from_raw(page.width, page.height, page.samples.clone())
                .ok_or_else(|| anyhow!("rendered page samples did not match its dimensions"))?;
        let mut bytes = Vec::new();
        buf.write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageFormat::Png,
        )
        .context("failed to encode RGB PNG")?;
        file.write_all(&bytes).context("failed to write PNG")?;
    }
    Ok(())
}
