//! The error taxonomy used inside a single file's pass. Nothing in this
//! module ever unwinds past a pass boundary: the orchestrator only ever sees
//! an accept/reject decision plus a routing outcome.

use std::fmt;

/// A failure encountered while running one pass over one input file.
///
/// Each variant carries its own routing policy, documented on the variant.
#[derive(Debug)]
pub enum PipelineError {
    /// A single render/OCR/read attempt failed transiently (e.g. a temp file
    /// couldn't be written). Callers should treat the affected unit (usually
    /// a page) as empty text with reliability `0.0` and continue.
    TransientIo(String),
    /// A required external tool is not on `PATH`. Callers should skip the
    /// affected sub-step and fall through to the next fallback, if any.
    ToolMissing(String),
    /// The document itself could not be opened or understood (corrupt PDF,
    /// unknown container). This is terminal for the current pass.
    Unparseable(String),
    /// The writer could not persist the per-document text file. The catalog
    /// row is still written, with an empty `txt_relative_path`.
    WriterIo(String),
    /// Free disk space on the work directory fell below the configured
    /// minimum before an OCR attempt. Terminal: the file is quarantined.
    LowDisk(String),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::TransientIo(msg) => write!(f, "transient I/O error: {msg}"),
            PipelineError::ToolMissing(msg) => write!(f, "required tool missing: {msg}"),
            PipelineError::Unparseable(msg) => write!(f, "could not parse document: {msg}"),
            PipelineError::WriterIo(msg) => write!(f, "writer I/O error: {msg}"),
            PipelineError::LowDisk(msg) => write!(f, "insufficient free disk space: {msg}"),
        }
    }
}

impl std::error::Error for PipelineError {}

/// The terminal disposition the orchestrator applies to an input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Pass succeeded; delete the source file.
    Accepted,
    /// Pass failed; move to quarantine and record a reason.
    Quarantined,
}
