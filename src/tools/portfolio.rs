//! PDF portfolio (embedded attachment) detection and extraction via
//! Poppler's `pdfdetach`.

use std::sync::LazyLock;

use regex::Regex;
use tokio::process::Command;

use crate::prelude::*;

use super::PortfolioDetacher;

static ATTACHMENT_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\d+:").expect("valid regex"));

pub struct PdfDetachTool;

#[async_trait]
impl PortfolioDetacher for PdfDetachTool {
    #[instrument(level = "debug", skip(self), fields(path = %pdf_path.display()))]
    async fn attachment_count(&self, pdf_path: &Path) -> Result<usize> {
        let output = Command::new("pdfdetach")
            .arg("-list")
            .arg(pdf_path)
            .output()
            .await
            .context("failed to run pdfdetach -list")?;
        if !output.status.success() {
            // Not every PDF opens under pdfdetach; treat as "no attachments"
            // rather than a hard error, matching the original scanner.
            return Ok(0);
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .filter(|line| ATTACHMENT_LINE.is_match(line))
            .count())
    }

    #[instrument(level = "debug", skip(self), fields(path = %pdf_path.display()))]
    async fn extract_all(&self, pdf_path: &Path, out_dir: &Path) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(out_dir)
            .with_context(|| format!("failed to create portfolio output dir {out_dir:?}"))?;
        let output = Command::new("pdfdetach")
            .arg("-saveall")
            .arg("-o")
            .arg(out_dir)
            .arg(pdf_path)
            .output()
            .await
            .context("failed to run pdfdetach -saveall")?;
        if !output.status.success() {
            return Err(anyhow!(
                "pdfdetach failed for {pdf_path:?}: {}",
                String::from_utf8_lossy(&output.stderr)
            ));
        }
        let mut children: Vec<PathBuf> = std::fs::read_dir(out_dir)
            .with_context(|| format!("failed to read {out_dir:?}"))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect();
        children.sort();
        Ok(children)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_line_matches_numbered_entries() {
        assert!(ATTACHMENT_LINE.is_match("1: name: foo.pdf"));
        assert!(ATTACHMENT_LINE.is_match("  12: name: bar.docx"));
        assert!(!ATTACHMENT_LINE.is_match("Creator: Acrobat"));
    }
}
