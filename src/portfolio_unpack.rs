//! Pre-pass over the run directory that unpacks PDF portfolios (PDFs that
//! carry other files as embedded attachments rather than rendered pages)
//! before the main tree walk ever sees them.
//!
//! Each portfolio parent is neutralized (hidden, never itself cataloged or
//! OCRed) and its children are extracted alongside it, renamed
//! `<Parent>::<Child>` so the catalog can trace them back to their source.

use csv::WriterBuilder;
use walkdir::WalkDir;

use crate::{prelude::*, tools::Tools};

const MIN_FREE_BYTES_FOR_UNPACK: u64 = 1_073_741_824;

/// One row of `portfolio_manifest.csv`.
struct ManifestRow {
    parent_pdf: String,
    child_name: String,
    child_relpath: String,
    size_bytes: u64,
}

/// Walk `run_dir`, unpack every PDF portfolio found, and write
/// `portfolio_manifest.csv` under `output_root`. Best-effort: a portfolio
/// that fails to unpack is left in place for the main walk to process (and
/// likely reject) as an ordinary PDF.
pub async fn unpack_all(run_dir: &Path, output_root: &Path, tools: &Tools) -> Result<()> {
    let mut rows = Vec::new();

    let pdf_paths: Vec<PathBuf> = WalkDir::new(run_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("pdf"))
                .unwrap_or(false)
        })
        .collect();

    for pdf_path in pdf_paths {
        match tools.portfolio.attachment_count(&pdf_path).await {
            Ok(0) => continue,
            Ok(_) => {}
            Err(err) => {
                warn!("portfolio detection failed for {pdf_path:?}: {err:#}");
                continue;
            }
        }

        if !has_enough_free_space(run_dir) {
            warn!("skipping portfolio unpack for {pdf_path:?}: low free disk space");
            continue;
        }

        match unpack_one(&pdf_path, tools).await {
            Ok(mut unpacked_rows) => rows.append(&mut unpacked_rows),
            Err(err) => {
                warn!("portfolio unpack failed for {pdf_path:?}: {err:#}");
            }
        }
    }

    if !rows.is_empty() {
        write_manifest(output_root, &rows)?;
    }
    Ok(())
}

async fn unpack_one(pdf_path: &Path, tools: &Tools) -> Result<Vec<ManifestRow>> {
    let parent_dir = pdf_path
        .parent()
        .ok_or_else(|| anyhow!("{pdf_path:?} has no parent directory"))?;
    let stem = pdf_path
        .file_stem()
        .ok_or_else(|| anyhow!("{pdf_path:?} has no file stem"))?
        .to_string_lossy()
        .into_owned();
    let out_dir = parent_dir.join(format!("{stem}__portfolio"));

    let children = tools.portfolio.extract_all(pdf_path, &out_dir).await?;

    let mut rows = Vec::with_capacity(children.len());
    for child in &children {
        let child_name = child
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let renamed = out_dir.join(format!("{stem}::{child_name}"));
        std::fs::rename(child, &renamed)
            .with_context(|| format!("failed to rename {child:?} to {renamed:?}"))?;
        let size_bytes = std::fs::metadata(&renamed).map(|m| m.len()).unwrap_or(0);
        rows.push(ManifestRow {
            parent_pdf: pdf_path.display().to_string(),
            child_name: format!("{stem}::{child_name}"),
            child_relpath: renamed.display().to_string(),
            size_bytes,
        });
    }

    neutralize_parent(pdf_path)?;
    Ok(rows)
}

/// Move the portfolio parent out of the main walk's path, preferring a
/// dot-prefixed rename inside the run directory over deleting it outright:
/// the parent still carries the portfolio's own metadata, which operators
/// sometimes want to recover.
fn neutralize_parent(pdf_path: &Path) -> Result<()> {
    let parent_dir = pdf_path
        .parent()
        .ok_or_else(|| anyhow!("{pdf_path:?} has no parent directory"))?;
    let name = pdf_path
        .file_name()
        .ok_or_else(|| anyhow!("{pdf_path:?} has no file name"))?
        .to_string_lossy()
        .into_owned();
    let hidden = parent_dir.join(format!(".{name}"));
    std::fs::rename(pdf_path, &hidden)
        .with_context(|| format!("failed to hide portfolio parent {pdf_path:?}"))?;
    Ok(())
}

fn has_enough_free_space(path: &Path) -> bool {
    free_bytes(path).map(|free| free >= MIN_FREE_BYTES_FOR_UNPACK).unwrap_or(true)
}

#[cfg(unix)]
fn free_bytes(path: &Path) -> Result<u64> {
    use std::ffi::CString;
    use std::mem::MaybeUninit;

    let c_path = CString::new(path.as_os_str().as_encoded_bytes())
        .context("path contains a NUL byte")?;
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

fn write_manifest(output_root: &Path, rows: &[ManifestRow]) -> Result<()> {
    std::fs::create_dir_all(output_root)
        .with_context(|| format!("failed to create output root {output_root:?}"))?;
    let manifest_path = output_root.join("portfolio_manifest.csv");
    let mut writer = WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .from_path(&manifest_path)
        .with_context(|| format!("failed to create {manifest_path:?}"))?;
    writer.write_record(["parent_pdf", "child_name", "child_relpath", "size_bytes"])?;
    for row in rows {
        writer.write_record([
            row.parent_pdf.clone(),
            row.child_name.clone(),
            row.child_relpath.clone(),
            row.size_bytes.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
