//! DOC/DOCX → PDF conversion via a headless office suite, used as the
//! second-chance path when native extraction falls below its cutoff.

use tokio::process::Command;

use crate::{async_utils::check_for_command_failure, prelude::*};

use super::DocConverter;

pub struct LibreOfficeThenUnoconv;

#[async_trait]
impl DocConverter for LibreOfficeThenUnoconv {
    #[instrument(level = "debug", skip(self), fields(path = %doc_path.display()))]
    async fn convert_to_pdf(&self, doc_path: &Path, out_dir: &Path) -> Result<PathBuf> {
        let expected = out_dir.join(doc_path.with_extension("pdf").file_name().ok_or_else(
            || anyhow!("could not determine output filename for {doc_path:?}"),
        )?);

        match try_libreoffice(doc_path, out_dir).await {
            Ok(()) if expected.exists() => return Ok(expected),
            Ok(()) => debug!("libreoffice reported success but produced no PDF"),
            Err(err) => debug!("libreoffice conversion failed: {err:#}"),
        }

        try_unoconv(doc_path, &expected).await?;
        if expected.exists() {
            Ok(expected)
        } else {
            Err(anyhow!(
                "neither libreoffice nor unoconv produced a PDF for {doc_path:?}"
            ))
        }
    }
}

async fn try_libreoffice(doc_path: &Path, out_dir: &Path) -> Result<()> {
    let status = Command::new("libreoffice")
        .arg("--headless")
        .arg("--convert-to")
        .arg("pdf")
        .arg("--outdir")
        .arg(out_dir)
        .arg(doc_path)
        .status()
        .await
        .context("failed to run libreoffice")?;
    check_for_command_failure("libreoffice", status)
}

async fn try_unoconv(doc_path: &Path, expected_pdf: &Path) -> Result<()> {
    let status = Command::new("unoconv")
        .arg("-f")
        .arg("pdf")
        .arg("-o")
        .arg(expected_pdf)
        .arg(doc_path)
        .status()
        .await
        .context("failed to run unoconv")?;
    check_for_command_failure("unoconv", status)
}
