//! PDF page counting, text-layer extraction, and rasterization via Poppler's
//! `pdfinfo`, `pdftotext`, and `pdftoppm` CLI tools.

use regex::Regex;
use std::sync::LazyLock;
use tokio::process::Command;

use crate::{async_utils::check_for_command_failure, cpu_limit::with_cpu_semaphore, prelude::*};

use super::{PdfInfo, RenderedPage, Rasterizer, TextExtractor};

static PAGES_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^Pages:\s*(\d+)\s*$").expect("valid regex"));

/// Reads page counts via `pdfinfo`.
pub struct PdfInfoTool;

#[async_trait]
impl PdfInfo for PdfInfoTool {
    #[instrument(level = "debug", skip(self), fields(path = %pdf_path.display()))]
    async fn page_count(&self, pdf_path: &Path) -> Result<usize> {
        let output = Command::new("pdfinfo")
            .arg(pdf_path)
            .output()
            .await
            .context("failed to run pdfinfo")?;
        check_for_command_failure("pdfinfo", output.status)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let captures = PAGES_LINE
            .captures(&stdout)
            .ok_or_else(|| anyhow!("pdfinfo output did not contain a Pages: line"))?;
        captures[1]
            .parse::<usize>()
            .context("pdfinfo Pages: value was not an integer")
    }
}

/// Extracts a single page's text layer via `pdftotext -layout`.
pub struct PdfToTextExtractor;

#[async_trait]
impl TextExtractor for PdfToTextExtractor {
    #[instrument(level = "debug", skip(self), fields(path = %pdf_path.display(), page_number_1based))]
    async fn page_text(&self, pdf_path: &Path, page_number_1based: usize) -> Result<String> {
        let page_str = page_number_1based.to_string();
        let output = with_cpu_semaphore(|| async {
            Command::new("pdftotext")
                .arg("-layout")
                .arg("-f")
                .arg(&page_str)
                .arg("-l")
                .arg(&page_str)
                .arg(pdf_path)
                .arg("-")
                .output()
                .await
                .context("failed to run pdftotext")
        })
        .await?;
        check_for_command_failure("pdftotext", output.status)?;
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(normalize_line_endings(&text))
    }
}

/// Rasterizes a page with `pdftoppm`, producing raw PGM/PPM samples.
pub struct PdfToppmRasterizer;

#[async_trait]
impl Rasterizer for PdfToppmRasterizer {
    #[instrument(level = "debug", skip(self), fields(path = %pdf_path.display(), page_index_0based, dpi, rotation_degrees))]
    async fn render_page(
        &self,
        pdf_path: &Path,
        page_index_0based: usize,
        dpi: u32,
        grayscale: bool,
        rotation_degrees: u32,
    ) -> Result<RenderedPage> {
        let page_number = page_index_0based + 1;
        let tmpdir = tempfile::TempDir::with_prefix("render")?;
        let out_prefix = tmpdir.path().join("page");

        let page_str = page_number.to_string();
        let dpi_str = dpi.to_string();
        let status = with_cpu_semaphore(|| async {
            let mut cmd = Command::new("pdftoppm");
            cmd.arg("-f")
                .arg(&page_str)
                .arg("-l")
                .arg(&page_str)
                .arg("-r")
                .arg(&dpi_str);
            if grayscale {
                cmd.arg("-gray");
            }
            cmd.arg(pdf_path)
                .arg(&out_prefix)
                .status()
                .await
                .context("failed to run pdftoppm")
        })
        .await?;
        check_for_command_failure("pdftoppm", status)?;

        let rendered_path = find_single_ppm(tmpdir.path())?;
        let bytes = std::fs::read(&rendered_path)
            .with_context(|| format!("failed to read rendered page at {rendered_path:?}"))?;
        let page = decode_netpbm(&bytes, grayscale)?;
        Ok(page.rotated(rotation_degrees))
    }
}

impl RenderedPage {
    /// Rotate the page clockwise by `degrees`, one of `0`, `90`, `180`, `270`.
    /// `pdftoppm` has no native rotation flag, so OCR-B's rotation sweep is
    /// done in-process on the decoded samples instead.
    pub fn rotated(self, degrees: u32) -> Self {
        let channels = if self.grayscale { 1 } else { 3 };
        match degrees % 360 {
            90 => {
                let (w, h) = (self.width as usize, self.height as usize);
                let mut out = vec![0u8; self.samples.len()];
                for y in 0..h {
                    for x in 0..w {
                        let src = (y * w + x) * channels;
                        let dst_x = h - 1 - y;
                        let dst_y = x;
                        let dst = (dst_y * h + dst_x) * channels;
                        out[dst..dst + channels]
                            .copy_from_slice(&self.samples[src..src + channels]);
                    }
                }
                RenderedPage {
                    width: self.height,
                    height: self.width,
                    grayscale: self.grayscale,
                    samples: out,
                }
            }
            180 => {
                let mut out = self.samples.clone();
                for (px_out, px_in) in out
                    .chunks_mut(channels)
                    .zip(self.samples.chunks(channels).rev())
                {
                    px_out.copy_from_slice(px_in);
                }
                RenderedPage { samples: out, ..self }
            }
            270 => {
                let (w, h) = (self.width as usize, self.height as usize);
                let mut out = vec![0u8; self.samples.len()];
                for y in 0..h {
                    for x in 0..w {
                        let src = (y * w + x) * channels;
                        let dst_x = y;
                        let dst_y = w - 1 - x;
                        let dst = (dst_y * h + dst_x) * channels;
                        out[dst..dst + channels]
                            .copy_from_slice(&self.samples[src..src + channels]);
                    }
                }
                RenderedPage {
                    width: self.height,
                    height: self.width,
                    grayscale: self.grayscale,
                    samples: out,
                }
            }
            _ => self,
        }
    }
}

fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

fn find_single_ppm(dir: &Path) -> Result<PathBuf> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .context("failed to read rasterizer temp directory")?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("ppm") | Some("pgm")
            )
        })
        .collect();
    entries.sort();
    entries
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("pdftoppm produced no output file"))
}

/// Parse a binary PGM (P5) or PPM (P6) file into raw samples, converting RGB
/// to grayscale by averaging channels if `want_grayscale` and the file is
/// P6.
fn decode_netpbm(bytes: &[u8], want_grayscale: bool) -> Result<RenderedPage> {
    let text_prefix_len = bytes.len().min(64);
    let header_text = String::from_utf8_lossy(&bytes[..text_prefix_len]);
    let mut tokens = header_text.split_whitespace();
    let magic = tokens.next().ok_or_else(|| anyhow!("empty netpbm header"))?;
    let is_color = match magic {
        "P5" => false,
        "P6" => true,
        other => return Err(anyhow!("unsupported netpbm magic {other:?}")),
    };
    let width: u32 = tokens
        .next()
        .ok_or_else(|| anyhow!("missing netpbm width"))?
        .parse()
        .context("invalid netpbm width")?;
    let height: u32 = tokens
        .next()
        .ok_or_else(|| anyhow!("missing netpbm height"))?
        .parse()
        .context("invalid netpbm height")?;
    let _maxval: u32 = tokens
        .next()
        .ok_or_else(|| anyhow!("missing netpbm maxval"))?
        .parse()
        .context("invalid netpbm maxval")?;

    // Find where the pixel data begins: right after the single whitespace
    // character following the maxval token.
    let header_len_in_prefix = {
        let mut count = 0usize;
        let mut seen = 0usize;
        for (i, b) in header_text.as_bytes().iter().enumerate() {
            if b.is_ascii_whitespace() {
                seen += 1;
                if seen == 4 {
                    count = i + 1;
                    break;
                }
            }
        }
        count
    };
    let data_start = header_len_in_prefix;
    let pixels = &bytes[data_start..];

    if is_color && want_grayscale {
        let samples = pixels
            .chunks_exact(3)
            .map(|c| {
                ((c[0] as u32 * 299 + c[1] as u32 * 587 + c[2] as u32 * 114) / 1000) as u8
            })
            .collect();
        Ok(RenderedPage {
            width,
            height,
            grayscale: true,
            samples,
        })
    } else {
        Ok(RenderedPage {
            width,
            height,
            grayscale: !is_color,
            samples: pixels.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_grayscale_pgm() {
        let pgm = b"P5\n2 1\n255\n\x00\xFF";
        let page = decode_netpbm(pgm, true).unwrap();
        assert_eq!((page.width, page.height), (2, 1));
        assert!(page.grayscale);
        assert_eq!(page.samples, vec![0, 255]);
    }

    #[test]
    fn decode_color_ppm_converted_to_grayscale() {
        let ppm = b"P6\n1 1\n255\n\xFF\xFF\xFF";
        let page = decode_netpbm(ppm, true).unwrap();
        assert!(page.grayscale);
        assert_eq!(page.samples, vec![255]);
    }
}
