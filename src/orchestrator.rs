//! The run orchestrator: walks a run directory, classifies each file,
//! dispatches it to the matching extraction cascade, and manages the
//! terminal disposition of every input — delete the source on success, move
//! it into `<output_root>/Mandatory Review/` with a manifest entry on
//! failure — without ever corrupting the run catalog.

use std::fs::OpenOptions;

use csv::WriterBuilder;
use walkdir::WalkDir;

use crate::{
    cascade::{doc, image as image_pass, pdf},
    config::Config,
    errors::{Disposition, PipelineError},
    portfolio_unpack,
    prelude::*,
    reliability,
    tools::Tools,
    writer::{self, Page, WriteRequest},
};

const QUARANTINE_DIR_NAME: &str = "Mandatory Review";
const NOISE_EXTENSIONS: &[&str] = &["wav"];
const IMAGE_EXTENSIONS: &[&str] = &["tif", "tiff", "png", "jpg", "jpeg"];
const JUNK_FILE_NAMES: &[&str] = &[".ds_store", "thumbs.db"];

/// How a discovered file is routed to a pass (or out of the run entirely).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Classification {
    Pdf,
    Doc,
    Docx,
    Txt,
    Image,
    Unsupported,
    Noise,
}

fn classify(path: &Path) -> Classification {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Classification::Pdf,
        "doc" => Classification::Doc,
        "docx" => Classification::Docx,
        "txt" => Classification::Txt,
        _ if NOISE_EXTENSIONS.contains(&ext.as_str()) => Classification::Noise,
        _ if IMAGE_EXTENSIONS.contains(&ext.as_str()) => Classification::Image,
        _ => Classification::Unsupported,
    }
}

/// One row of `review_manifest.csv`.
struct ReviewRow {
    filename: String,
    reason: String,
    note: String,
}

/// The disposition of one dispatched file, plus whatever a quarantine would
/// need to record about it.
struct PassResult {
    disposition: Disposition,
    reason: String,
    note: String,
}

/// Process one run directory to completion: unpack portfolios, walk the
/// tree, dispatch every file to its cascade, and leave the run root either
/// empty (everything succeeded) or holding only quarantined files.
///
/// Returns `Err` only for setup failures (can't create the output tree, the
/// run directory doesn't exist). A run that completes with some or all files
/// quarantined still returns `Ok(())`; per-file failures are recorded in the
/// catalog and `review_manifest.csv`, never propagated as an error here.
pub async fn run(run_dir: &Path, output_dir: &Path, config: &Config, tools: &Tools) -> Result<()> {
    let run_dir = run_dir
        .canonicalize()
        .with_context(|| format!("run directory {run_dir:?} does not exist"))?;
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create output directory {output_dir:?}"))?;
    let output_root = output_dir
        .canonicalize()
        .with_context(|| format!("failed to resolve output directory {output_dir:?}"))?;

    let quarantine_dir = output_root.join(QUARANTINE_DIR_NAME);
    ensure_output_scaffold(&output_root, &quarantine_dir)?;

    info!("unpacking PDF portfolios under {run_dir:?}");
    if let Err(err) = portfolio_unpack::unpack_all(&run_dir, &output_root, tools).await {
        warn!("portfolio unpack pre-pass failed: {err:#}");
    }

    let run_name = run_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "run".to_owned());
    let files = collect_files(&run_dir);
    let catalog_path = output_root.join(catalog_file_name(&run_name, &files));
    writer::ensure_catalog_header(&catalog_path)?;

    let mut manifest_rows = Vec::new();

    for file in &files {
        let relative = file.strip_prefix(&run_dir).unwrap_or(file).to_path_buf();
        match classify(file) {
            Classification::Noise => {
                info!("deleting noise file {relative:?}");
                if let Err(err) = std::fs::remove_file(file) {
                    warn!("failed to delete noise file {file:?}: {err:#}");
                }
            }
            Classification::Unsupported => {
                manifest_rows.push(ReviewRow {
                    filename: relative.display().to_string(),
                    reason: "unsupported".to_owned(),
                    note: String::new(),
                });
                quarantine_file(file, &run_dir, &quarantine_dir);
            }
            classification => {
                let result =
                    dispatch(&catalog_path, &run_name, file, classification, config, tools).await;
                match result.disposition {
                    Disposition::Accepted => {
                        if let Err(err) = std::fs::remove_file(file) {
                            warn!("failed to delete source after success {file:?}: {err:#}");
                        }
                    }
                    Disposition::Quarantined => {
                        manifest_rows.push(ReviewRow {
                            filename: relative.display().to_string(),
                            reason: result.reason,
                            note: result.note,
                        });
                        quarantine_file(file, &run_dir, &quarantine_dir);
                    }
                }
            }
        }
    }

    if let Err(err) = write_review_manifest(&output_root, &manifest_rows) {
        error!("failed to write review manifest: {err:#}");
    }

    prune_empty_dirs(&run_dir, config);
    fixup_ownership(&output_root, config);
    Ok(())
}

fn ensure_output_scaffold(output_root: &Path, quarantine_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(output_root)
        .with_context(|| format!("failed to create output root {output_root:?}"))?;
    std::fs::create_dir_all(quarantine_dir)
        .with_context(|| format!("failed to create quarantine dir {quarantine_dir:?}"))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        let _ = std::fs::set_permissions(output_root, std::fs::Permissions::from_mode(0o2775));
        let _ = std::fs::set_permissions(quarantine_dir, std::fs::Permissions::from_mode(0o2775));
    }
    Ok(())
}

/// Depth-first, name-sorted file listing of `run_dir`, skipping any
/// directory named "Mandatory Review" or starting with `.` (including
/// neutralized portfolio parents, which are dot-renamed in place).
fn collect_files(run_dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(run_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            if name.starts_with('.') {
                return false;
            }
            if entry.file_type().is_dir() && name == QUARANTINE_DIR_NAME {
                return false;
            }
            true
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect()
}

/// `<stem>.csv` when the run contains exactly one processable file
/// (excluding unsupported/noise), else `<run_name>.csv`.
fn catalog_file_name(run_name: &str, files: &[PathBuf]) -> String {
    let mut processable = files
        .iter()
        .filter(|f| !matches!(classify(f), Classification::Unsupported | Classification::Noise));
    let first = processable.next();
    match (first, processable.next()) {
        (Some(only), None) => {
            let stem = only
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| run_name.to_owned());
            format!("{stem}.csv")
        }
        _ => format!("{run_name}.csv"),
    }
}

async fn dispatch(
    catalog_path: &Path,
    run_name: &str,
    file: &Path,
    classification: Classification,
    config: &Config,
    tools: &Tools,
) -> PassResult {
    match classification {
        Classification::Txt => dispatch_txt(catalog_path, run_name, file, config),
        Classification::Pdf => dispatch_pdf(catalog_path, run_name, file, config, tools).await,
        Classification::Doc => dispatch_doc(catalog_path, run_name, file, false, config, tools).await,
        Classification::Docx => dispatch_doc(catalog_path, run_name, file, true, config, tools).await,
        Classification::Image => dispatch_image(catalog_path, run_name, file, config, tools).await,
        Classification::Unsupported | Classification::Noise => {
            unreachable!("unsupported/noise are routed by the caller before dispatch")
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn finish(
    catalog_path: &Path,
    run_name: &str,
    file: &Path,
    config: &Config,
    pages: &[Page],
    pass_used: &str,
    score: f64,
    status: &str,
    used_ocr: bool,
    notes: &str,
    reason: &str,
) -> PassResult {
    let req = WriteRequest {
        csv_path: catalog_path,
        run_name,
        original_file: file,
        pages,
        pass_used,
        score,
        status,
        used_ocr,
        notes,
    };
    if let Err(err) = writer::write_result(config, &req) {
        error!("catalog append failed for {file:?}: {err:#}");
    }
    let disposition = if status == "OK" {
        Disposition::Accepted
    } else {
        Disposition::Quarantined
    };
    PassResult {
        disposition,
        reason: reason.to_owned(),
        note: notes.to_owned(),
    }
}

fn dispatch_txt(catalog_path: &Path, run_name: &str, file: &Path, config: &Config) -> PassResult {
    match std::fs::read_to_string(file) {
        Ok(text) => {
            let score = reliability::score(&text);
            let pages = vec![Page { number: 1, text }];
            finish(
                catalog_path,
                run_name,
                file,
                config,
                &pages,
                "txt",
                score,
                "OK",
                false,
                "",
                "",
            )
        }
        Err(err) => {
            warn!("failed to read txt file {file:?}: {err:#}");
            finish(
                catalog_path,
                run_name,
                file,
                config,
                &[],
                "txt",
                0.0,
                "ERROR",
                false,
                &err.to_string(),
                "pass rc=1",
            )
        }
    }
}

async fn dispatch_pdf(
    catalog_path: &Path,
    run_name: &str,
    file: &Path,
    config: &Config,
    tools: &Tools,
) -> PassResult {
    let size_mb = std::fs::metadata(file)
        .map(|m| m.len().div_ceil(1_048_576).max(1))
        .unwrap_or(1);
    match pdf::run(file, size_mb, config, tools).await {
        Ok(Some(result)) => finish(
            catalog_path,
            run_name,
            file,
            config,
            &result.pages,
            result.pass_used,
            result.score,
            "OK",
            result.used_ocr,
            "",
            "",
        ),
        Ok(None) => finish(
            catalog_path,
            run_name,
            file,
            config,
            &[],
            "pdf_ocr_b",
            0.0,
            "ERROR",
            true,
            "all passes below cutoff",
            "pass rc=1",
        ),
        Err(err) => match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::LowDisk(msg)) => finish(
                catalog_path,
                run_name,
                file,
                config,
                &[],
                "pdf_ocr_a",
                0.0,
                "ERROR",
                false,
                msg,
                &format!("pass rc=1 LOW_DISK: {msg}"),
            ),
            _ => finish(
                catalog_path,
                run_name,
                file,
                config,
                &[],
                "pdf_text",
                0.0,
                "ERROR",
                false,
                &err.to_string(),
                "pass rc=1",
            ),
        },
    }
}

async fn dispatch_doc(
    catalog_path: &Path,
    run_name: &str,
    file: &Path,
    is_docx: bool,
    config: &Config,
    tools: &Tools,
) -> PassResult {
    let base_pass = if is_docx { "docx_text" } else { "doc_text" };
    match doc::run(file, is_docx, config, tools).await {
        Ok(Some(result)) => finish(
            catalog_path,
            run_name,
            file,
            config,
            &result.pages,
            result.pass_used,
            result.score,
            "OK",
            result.used_ocr,
            "",
            "",
        ),
        Ok(None) => finish(
            catalog_path,
            run_name,
            file,
            config,
            &[],
            "doc_pdf_text",
            0.0,
            "ERROR",
            false,
            "all passes below cutoff",
            "pass rc=1",
        ),
        Err(err) => finish(
            catalog_path,
            run_name,
            file,
            config,
            &[],
            base_pass,
            0.0,
            "ERROR",
            false,
            &err.to_string(),
            "pass rc=1",
        ),
    }
}

async fn dispatch_image(
    catalog_path: &Path,
    run_name: &str,
    file: &Path,
    config: &Config,
    tools: &Tools,
) -> PassResult {
    match image_pass::run(file, tools).await {
        Ok(result) if result.has_text => finish(
            catalog_path,
            run_name,
            file,
            config,
            &result.pages,
            "image_ocr",
            result.score,
            "OK",
            true,
            "",
            "",
        ),
        Ok(result) => finish(
            catalog_path,
            run_name,
            file,
            config,
            &result.pages,
            "image_ocr",
            result.score,
            "ERROR",
            true,
            "no usable text",
            "pass rc=1",
        ),
        Err(err) => finish(
            catalog_path,
            run_name,
            file,
            config,
            &[],
            "image_ocr",
            0.0,
            "ERROR",
            true,
            &err.to_string(),
            "pass rc=1",
        ),
    }
}

fn quarantine_file(file: &Path, run_dir: &Path, quarantine_dir: &Path) {
    let relative = file.strip_prefix(run_dir).unwrap_or(file);
    let dest = quarantine_dir.join(relative);
    if let Some(parent) = dest.parent() {
        if let Err(err) = std::fs::create_dir_all(parent) {
            warn!("failed to create quarantine parent {parent:?}: {err:#}");
            return;
        }
    }
    if std::fs::rename(file, &dest).is_ok() {
        return;
    }
    // `rename` fails with EXDEV when the run tree and the output tree live on
    // different filesystems, which is the common case for this tool.
    match std::fs::copy(file, &dest) {
        Ok(_) => {
            if let Err(err) = std::fs::remove_file(file) {
                warn!("quarantined {file:?} via copy but failed to remove source: {err:#}");
            }
        }
        Err(err) => warn!("failed to quarantine {file:?} to {dest:?}: {err:#}"),
    }
}

fn write_review_manifest(output_root: &Path, rows: &[ReviewRow]) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    let manifest_path = output_root.join("review_manifest.csv");
    let write_header = !manifest_path.exists();
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&manifest_path)
        .with_context(|| format!("failed to open {manifest_path:?}"))?;
    let mut writer = WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .has_headers(false)
        .from_writer(file);
    if write_header {
        writer.write_record(["filename", "reason", "note"])?;
    }
    for row in rows {
        writer.write_record([&row.filename, &row.reason, &row.note])?;
    }
    writer.flush()?;
    Ok(())
}

/// Remove empty subdirectories bottom-up, ignoring known junk files. The run
/// root itself is only removed when it sits directly under `config.input_dir`
/// (i.e. this run was one subfolder of the configured inbox tree).
fn prune_empty_dirs(run_dir: &Path, config: &Config) {
    let mut dirs: Vec<PathBuf> = WalkDir::new(run_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.into_path())
        .collect();
    dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));

    for dir in &dirs {
        if dir == run_dir {
            continue;
        }
        remove_dir_if_empty(dir);
    }

    if should_remove_run_root(run_dir, config) {
        remove_dir_if_empty(run_dir);
    }
}

fn should_remove_run_root(run_dir: &Path, config: &Config) -> bool {
    let input_dir = config
        .input_dir
        .canonicalize()
        .unwrap_or_else(|_| config.input_dir.clone());
    run_dir.parent() == Some(input_dir.as_path())
}

/// Remove `dir` if it holds nothing but known junk files (deleted first) or
/// is already empty. Returns whether it was removed.
fn remove_dir_if_empty(dir: &Path) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    let mut junk_paths = Vec::new();
    for entry in entries.filter_map(|e| e.ok()) {
        let name = entry.file_name().to_string_lossy().to_ascii_lowercase();
        if JUNK_FILE_NAMES.contains(&name.as_str()) {
            junk_paths.push(entry.path());
        } else {
            return false;
        }
    }
    for path in &junk_paths {
        let _ = std::fs::remove_file(path);
    }
    std::fs::remove_dir(dir).is_ok()
}

#[cfg(unix)]
fn fixup_ownership(output_root: &Path, config: &Config) {
    let (Some(uid), Some(gid)) = (config.puid, config.pgid) else {
        return;
    };
    // SAFETY: geteuid takes no arguments and cannot fail.
    if unsafe { libc::geteuid() } != 0 {
        return;
    }
    for entry in WalkDir::new(output_root).into_iter().filter_map(|e| e.ok()) {
        if let Err(err) = std::os::unix::fs::chown(entry.path(), Some(uid), Some(gid)) {
            warn!("failed to chown {:?} to {uid}:{gid}: {err:#}", entry.path());
        }
    }
}

#[cfg(not(unix))]
fn fixup_ownership(_output_root: &Path, _config: &Config) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_extensions() {
        assert_eq!(classify(Path::new("a.pdf")), Classification::Pdf);
        assert_eq!(classify(Path::new("a.PDF")), Classification::Pdf);
        assert_eq!(classify(Path::new("a.doc")), Classification::Doc);
        assert_eq!(classify(Path::new("a.docx")), Classification::Docx);
        assert_eq!(classify(Path::new("a.txt")), Classification::Txt);
        assert_eq!(classify(Path::new("a.tiff")), Classification::Image);
        assert_eq!(classify(Path::new("a.wav")), Classification::Noise);
        assert_eq!(classify(Path::new("a.xlsx")), Classification::Unsupported);
    }

    #[test]
    fn catalog_name_uses_stem_for_single_file_run() {
        let files = vec![PathBuf::from("/run/one.txt")];
        assert_eq!(catalog_file_name("run", &files), "one.csv");
    }

    #[test]
    fn catalog_name_uses_run_name_for_multiple_files() {
        let files = vec![PathBuf::from("/run/one.txt"), PathBuf::from("/run/two.pdf")];
        assert_eq!(catalog_file_name("run", &files), "run.csv");
    }

    #[test]
    fn catalog_name_ignores_unsupported_and_noise_when_counting() {
        let files = vec![
            PathBuf::from("/run/one.txt"),
            PathBuf::from("/run/noise.wav"),
            PathBuf::from("/run/skip.xlsx"),
        ];
        assert_eq!(catalog_file_name("run", &files), "one.csv");
    }
}
