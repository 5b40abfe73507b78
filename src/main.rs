use std::{env, str::FromStr};

use clap::Parser;
use tracing_appender::non_blocking;
use tracing_subscriber::{
    EnvFilter, filter::Directive, fmt::format::FmtSpan, layer::SubscriberExt,
    util::SubscriberInitExt as _,
};

use self::prelude::*;

mod async_utils;
mod cascade;
mod config;
mod cpu_limit;
mod errors;
mod orchestrator;
mod portfolio_unpack;
mod prelude;
mod reliability;
mod tools;
mod writer;

/// Classify and extract text from an arbitrary tree of mixed office
/// documents, escalating through a cost-ordered OCR cascade and quarantining
/// anything the pipeline can't make sense of.
#[derive(Debug, Parser)]
#[clap(
    version,
    author,
    after_help = r#"
Environment Variables:
  - INPUT_DIR: Root of the inbox tree relative-paths are computed against.
               Defaults to /data/input.
  - WORK_DIR: Scratch directory for renders and hidden portfolio parents.
  - PASS_TXT_CUTOFF, PASS_OCR_A_CUTOFF, PASS_OCR_B_CUTOFF, PASS_DOC_CUTOFF,
    PASS_DOCX_CUTOFF, DOC_IMG_OCR_CUTOFF: reliability cutoffs for each pass.
  - BIGPDF_SIZE_LIMIT_MB, BIGPDF_PAGE_LIMIT: per-page mode thresholds.
  - MAX_COMBINED_BYTES: size budget for the combined-text chunk files.
  - PUID, PGID: ownership fixup applied to output paths when run as root.

  These variables may be set in a standard `.env` file.
"#
)]
struct Opts {
    /// Directory to process. Every file under it is classified, dispatched
    /// to the matching extraction pass, and either deleted (success) or
    /// moved into `<output_dir>/Mandatory Review/` (failure).
    run_dir: PathBuf,
    /// Directory to write the run catalog, per-document text files,
    /// combined-text chunks, and the quarantine folder into.
    output_dir: PathBuf,
    /// Path to append this run's log lines to, in addition to stderr.
    run_log_path: PathBuf,
}

/// Our entry point, which can return an error. [`anyhow::Result`] will
/// automatically print a nice error message with optional backtrace.
#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from a `.env` file, if it exists.
    dotenvy::dotenv().ok();

    // Parse command-line arguments.
    let opts = Opts::parse();

    // Initialize tracing before anything else can log. Keep the guard alive
    // for the whole run: dropping it flushes the non-blocking file writer.
    let _file_guard = init_logging(&opts.run_log_path)?;

    debug!("Parsed options: {:?}", opts);
    real_main(opts).await
}

/// Install a `tracing` subscriber that mirrors every event to stderr
/// (human-readable, level-filtered by `LOG_LEVEL`/`RUST_LOG`) and to
/// `run_log_path` (append mode, ANSI-free, one line per event).
fn init_logging(run_log_path: &Path) -> Result<non_blocking::WorkerGuard> {
    // `LOG_LEVEL` is the documented knob; `RUST_LOG`, if set, still wins, so
    // the usual `tracing` filter-string escape hatch keeps working.
    let level = env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_owned());
    let directive = Directive::from_str(&level.to_ascii_lowercase())
        .unwrap_or_else(|_| Directive::from_str("info").expect("built-in directive should be valid"));
    let env_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();

    if let Some(parent) = run_log_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create log directory {parent:?}"))?;
        }
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(run_log_path)
        .with_context(|| format!("failed to open run log at {run_log_path:?}"))?;
    let (file_writer, guard) = non_blocking(log_file);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_writer(std::io::stderr);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(guard)
}

/// Our real entry point.
#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main(opts: Opts) -> Result<()> {
    let input_dir = env::var("INPUT_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/data/input"));
    let work_dir = env::var("WORK_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| env::temp_dir().join("doc-extractor-work"));
    std::fs::create_dir_all(&work_dir)
        .with_context(|| format!("failed to create work directory {work_dir:?}"))?;

    let config = config::Config::from_env(input_dir, work_dir);
    let tools = tools::Tools::real();

    info!(
        "processing run {:?} -> {:?}",
        opts.run_dir, opts.output_dir
    );
    orchestrator::run(&opts.run_dir, &opts.output_dir, &config, &tools).await?;
    info!("run complete");
    Ok(())
}
