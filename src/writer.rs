//! Centralized writer for the run catalog, per-document text files, and the
//! size-bounded combined-text chunks.
//!
//! Passes call [`write_result`] exactly once per source document.

use std::{
    fs::OpenOptions,
    io::Write as _,
    time::{SystemTime, UNIX_EPOCH},
};

use csv::WriterBuilder;

use crate::{config::Config, errors::PipelineError, prelude::*};

/// One page of extracted text, 1-based page number paired with its text.
#[derive(Debug, Clone)]
pub struct Page {
    pub number: usize,
    pub text: String,
}

/// The outcome a pass hands to the writer.
pub struct WriteRequest<'a> {
    pub csv_path: &'a Path,
    /// Name of the run this document belongs to; seeds both the combined-text
    /// chunk prefix (`<run_name>_all_text_NNN.txt`) and the catalog `run_id`.
    pub run_name: &'a str,
    pub original_file: &'a Path,
    pub pages: &'a [Page],
    pub pass_used: &'a str,
    pub score: f64,
    pub status: &'a str,
    pub used_ocr: bool,
    pub notes: &'a str,
}

/// Write the per-document `.txt` (if any usable text exists), append to the
/// run's combined-text chunk, and append exactly one row to the run catalog.
///
/// Never propagates a text- or combined-chunk-write failure: those are
/// logged and degrade the catalog row (empty `txt_relative_path`) instead.
/// Only the catalog append itself can make this function return `Err`, and
/// even that is logged by callers rather than treated as fatal to the run.
pub fn write_result(config: &Config, req: &WriteRequest<'_>) -> Result<()> {
    let csv_path = req
        .csv_path
        .canonicalize()
        .unwrap_or_else(|_| req.csv_path.to_path_buf());
    let output_root = csv_path
        .parent()
        .ok_or_else(|| anyhow!("csv_path {:?} has no parent directory", csv_path))?
        .to_path_buf();

    let orig_path = req
        .original_file
        .canonicalize()
        .unwrap_or_else(|_| req.original_file.to_path_buf());
    let relative_path = relative_to_input_dir(&orig_path, &config.input_dir);
    let txt_relative_path = relative_path.with_extension("txt");

    let processed_at = iso8601_utc_now();
    let run_id = req.run_name;

    let has_text = req.pages.iter().any(|p| !p.text.trim().is_empty());
    let mut txt_relative_str = String::new();

    if has_text {
        let doc_block = render_document_block(
            &orig_path,
            &relative_path,
            req.pages,
            req.pass_used,
            req.score,
            req.status,
            &processed_at,
        );

        let txt_path = output_root.join("txt").join(&txt_relative_path);
        match write_text_file(&txt_path, &doc_block) {
            Ok(()) => {
                txt_relative_str = txt_relative_path.to_string_lossy().into_owned();
            }
            Err(err) => {
                error!("failed to write text file for {orig_path:?}: {err:#}");
            }
        }

        if let Err(err) = append_to_combined_chunk(
            &output_root,
            req.run_name,
            &doc_block,
            config.max_combined_bytes,
        ) {
            error!("failed to append to combined text file for {orig_path:?}: {err:#}");
        }
    }

    if let Err(err) = append_catalog_row(
        &csv_path,
        &CatalogRow {
            orig_path: &orig_path,
            relative_path: &relative_path,
            txt_relative_path: &txt_relative_str,
            pages_count: req.pages.len(),
            processed_at: &processed_at,
            pass_used: req.pass_used,
            score: req.score,
            status: req.status,
            used_ocr: req.used_ocr,
            run_id,
            notes: req.notes,
        },
    ) {
        error!("failed to append catalog row for {orig_path:?}: {err:#}");
        return Err(PipelineError::WriterIo(err.to_string()).into());
    }
    Ok(())
}

fn relative_to_input_dir(orig_path: &Path, input_dir: &Path) -> PathBuf {
    let input_root = input_dir
        .canonicalize()
        .unwrap_or_else(|_| input_dir.to_path_buf());
    orig_path
        .strip_prefix(&input_root)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| {
            PathBuf::from(orig_path.file_name().unwrap_or(orig_path.as_os_str()))
        })
}

fn render_document_block(
    orig_path: &Path,
    relative_path: &Path,
    pages: &[Page],
    pass_used: &str,
    score: f64,
    status: &str,
    processed_at: &str,
) -> String {
    let mut out = String::new();
    out.push_str(&format!("# original_file: {}\n", orig_path.display()));
    out.push_str(&format!(
        "# original_name: {}\n",
        orig_path.file_name().unwrap_or_default().to_string_lossy()
    ));
    out.push_str(&format!("# relative_path: {}\n", relative_path.display()));
    out.push_str(&format!("# pages: {}\n", pages.len()));
    out.push_str(&format!("# processed_at: {processed_at}\n"));
    out.push_str(&format!("# pass_used: {pass_used}\n"));
    out.push_str(&format!("# score: {score}\n"));
    out.push_str(&format!("# status: {status}\n"));
    out.push('\n');
    for page in pages {
        out.push_str(&format!("=== [PAGE {}] ===\n\n", page.number));
        if !page.text.is_empty() {
            out.push_str(&page.text);
        }
        out.push_str("\n\n");
    }
    out
}

/// UTC timestamp formatted as `YYYY-MM-DDTHH:MM:SSZ`, computed from
/// [`SystemTime`] without pulling in a date/time crate.
fn iso8601_utc_now() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format_unix_timestamp(secs)
}

fn format_unix_timestamp(secs: u64) -> String {
    const DAYS_PER_400_YEARS: i64 = 146_097;
    let days = (secs / 86_400) as i64;
    let time_of_day = secs % 86_400;
    let (hour, minute, second) = (time_of_day / 3600, (time_of_day / 60) % 60, time_of_day % 60);

    // Civil-from-days algorithm (Howard Hinnant's public-domain chrono algorithm).
    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - DAYS_PER_400_YEARS + 1 } / DAYS_PER_400_YEARS;
    let doe = (z - era * DAYS_PER_400_YEARS) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };

    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        y, m, d, hour, minute, second
    )
}

fn write_text_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create parent dir for {path:?}"))?;
    }
    std::fs::write(path, content).with_context(|| format!("failed to write {path:?}"))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o664));
    }
    Ok(())
}

/// Pure function choosing (or creating) the combined-chunk path a document
/// of `pending_block_size` bytes should be appended to, given the sorted
/// basenames of existing `<prefix>_NNN.txt` chunks and their current sizes.
///
/// Exposed standalone (not just via [`append_to_combined_chunk`]) so tests
/// can exercise every rotation case without touching the filesystem.
pub fn pick_combined_chunk_name(
    prefix: &str,
    existing: &[(String, u64)],
    pending_block_size: u64,
    max_bytes: u64,
) -> String {
    if existing.is_empty() {
        return format!("{prefix}_001.txt");
    }
    let (current_name, current_size) = existing.last().expect("checked non-empty");
    if current_size + pending_block_size <= max_bytes {
        return current_name.clone();
    }
    let stem = current_name.trim_end_matches(".txt");
    let idx = stem
        .rsplit_once('_')
        .and_then(|(_, suffix)| suffix.parse::<u64>().ok())
        .unwrap_or(existing.len() as u64);
    format!("{prefix}_{:03}.txt", idx + 1)
}

fn append_to_combined_chunk(
    output_root: &Path,
    run_name: &str,
    doc_block: &str,
    max_bytes: u64,
) -> Result<()> {
    let prefix = format!("{run_name}_all_text");

    let mut existing: Vec<(String, u64)> = std::fs::read_dir(output_root)
        .with_context(|| format!("failed to read output root {output_root:?}"))?
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            if name.starts_with(&format!("{prefix}_")) && name.ends_with(".txt") {
                let size = e.metadata().map(|m| m.len()).unwrap_or(0);
                Some((name, size))
            } else {
                None
            }
        })
        .collect();
    existing.sort_by(|a, b| a.0.cmp(&b.0));

    let pending_size = doc_block.len() as u64;
    let target_name = pick_combined_chunk_name(&prefix, &existing, pending_size, max_bytes);
    let target_path = output_root.join(&target_name);

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&target_path)
        .with_context(|| format!("failed to open combined chunk {target_path:?}"))?;
    file.write_all(doc_block.as_bytes())
        .with_context(|| format!("failed to append to combined chunk {target_path:?}"))?;
    file.write_all(b"----- DOCUMENT BREAK -----\n\n")
        .with_context(|| format!("failed to append document break to {target_path:?}"))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        let _ = std::fs::set_permissions(&target_path, std::fs::Permissions::from_mode(0o664));
    }
    Ok(())
}

struct CatalogRow<'a> {
    orig_path: &'a Path,
    relative_path: &'a Path,
    txt_relative_path: &'a str,
    pages_count: usize,
    processed_at: &'a str,
    pass_used: &'a str,
    score: f64,
    status: &'a str,
    used_ocr: bool,
    run_id: &'a str,
    notes: &'a str,
}

/// Catalog header, exposed so callers can seed a fresh catalog file.
pub const CATALOG_HEADER: &[&str] = &[
    "original_file",
    "original_name",
    "relative_path",
    "txt_relative_path",
    "pages",
    "processed_at",
    "pass_used",
    "score",
    "status",
    "used_ocr",
    "run_id",
    "notes",
];

/// Create `csv_path` with the catalog header if it does not already exist.
pub fn ensure_catalog_header(csv_path: &Path) -> Result<()> {
    if csv_path.exists() {
        return Ok(());
    }
    if let Some(parent) = csv_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {parent:?}"))?;
    }
    let mut writer = WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .from_path(csv_path)
        .with_context(|| format!("failed to create catalog at {csv_path:?}"))?;
    writer.write_record(CATALOG_HEADER)?;
    writer.flush()?;
    Ok(())
}

fn append_catalog_row(csv_path: &Path, row: &CatalogRow<'_>) -> Result<()> {
    ensure_catalog_header(csv_path)?;
    let file = OpenOptions::new()
        .append(true)
        .open(csv_path)
        .with_context(|| format!("failed to open catalog {csv_path:?}"))?;
    let mut writer = WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .has_headers(false)
        .from_writer(file);
    writer.write_record([
        row.orig_path.display().to_string(),
        row.orig_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        row.relative_path.display().to_string(),
        row.txt_relative_path.to_owned(),
        row.pages_count.to_string(),
        row.processed_at.to_owned(),
        row.pass_used.to_owned(),
        format!("{:.2}", row.score),
        row.status.to_owned(),
        row.used_ocr.to_string(),
        row.run_id.to_owned(),
        row.notes.to_owned(),
    ])?;
    writer.flush()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        let _ = std::fs::set_permissions(csv_path, std::fs::Permissions::from_mode(0o664));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_existing_chunks_starts_at_001() {
        assert_eq!(
            pick_combined_chunk_name("run_all_text", &[], 100, 3_000_000),
            "run_all_text_001.txt"
        );
    }

    #[test]
    fn reuses_current_chunk_when_it_fits() {
        let existing = vec![("run_all_text_001.txt".to_owned(), 1_000)];
        assert_eq!(
            pick_combined_chunk_name("run_all_text", &existing, 500, 3_000_000),
            "run_all_text_001.txt"
        );
    }

    #[test]
    fn rotates_to_next_index_when_oversized() {
        let existing = vec![("run_all_text_001.txt".to_owned(), 2_999_999)];
        assert_eq!(
            pick_combined_chunk_name("run_all_text", &existing, 10, 3_000_000),
            "run_all_text_002.txt"
        );
    }

    #[test]
    fn rotates_from_highest_numbered_existing_chunk() {
        let existing = vec![
            ("run_all_text_001.txt".to_owned(), 3_000_000),
            ("run_all_text_002.txt".to_owned(), 2_999_999),
        ];
        assert_eq!(
            pick_combined_chunk_name("run_all_text", &existing, 10, 3_000_000),
            "run_all_text_003.txt"
        );
    }

    #[test]
    fn falls_back_to_count_based_index_on_unparseable_suffix() {
        let existing = vec![("run_all_text_abc.txt".to_owned(), 3_000_000)];
        assert_eq!(
            pick_combined_chunk_name("run_all_text", &existing, 10, 3_000_000),
            "run_all_text_002.txt"
        );
    }

    #[test]
    fn oversized_single_document_gets_its_own_chunk() {
        let existing = vec![("run_all_text_001.txt".to_owned(), 0)];
        // A document bigger than max_bytes still fits an empty chunk (0 + big <= max is
        // false only if max is exceeded); verify the boundary is inclusive.
        assert_eq!(
            pick_combined_chunk_name("run_all_text", &existing, 3_000_000, 3_000_000),
            "run_all_text_001.txt"
        );
    }
}
