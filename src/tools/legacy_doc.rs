//! Legacy binary `.doc` text extraction: `antiword`, falling back to
//! `catdoc` when `antiword` is missing or produces nothing.

use tokio::process::Command;

use crate::{errors::PipelineError, prelude::*};

use super::LegacyDocConverter;

pub struct AntiwordThenCatdoc;

#[async_trait]
impl LegacyDocConverter for AntiwordThenCatdoc {
    #[instrument(level = "debug", skip(self), fields(path = %doc_path.display()))]
    async fn doc_text(&self, doc_path: &Path) -> Result<String> {
        match run_and_capture("antiword", doc_path).await {
            Ok(text) if !text.is_empty() => return Ok(text),
            Ok(_) => debug!("antiword produced empty output, trying catdoc"),
            Err(err) => debug!("antiword unavailable or failed: {err:#}"),
        }

        match run_and_capture("catdoc", doc_path).await {
            Ok(text) if !text.is_empty() => Ok(text),
            Ok(_) => Err(PipelineError::Unparseable(
                "neither antiword nor catdoc produced text".to_owned(),
            )
            .into()),
            Err(err) => Err(PipelineError::ToolMissing(format!(
                "neither antiword nor catdoc produced text: {err:#}"
            ))
            .into()),
        }
    }
}

async fn run_and_capture(tool: &str, doc_path: &Path) -> Result<String> {
    let output = Command::new(tool)
        .arg(doc_path)
        .output()
        .await
        .with_context(|| format!("failed to spawn {tool}"))?;
    if !output.status.success() {
        return Err(anyhow!("{tool} exited with {:?}", output.status.code()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
