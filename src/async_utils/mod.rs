//! Asynchronous utilities for use with Tokio.
//!
//! Based on previous Rust experience, you should be able to leave this code
//! unchanged for years.

use crate::prelude::*;

/// Report any command failures.
pub fn check_for_command_failure(
    command_name: &str,
    status: std::process::ExitStatus,
) -> Result<()> {
    if status.success() {
        Ok(())
    } else if let Some(exit_code) = status.code() {
        Err(anyhow::anyhow!(
            "{} failed with exit code {}",
            command_name,
            exit_code
        ))
    } else {
        // Not all platforms have exit codes.
        Err(anyhow::anyhow!("{} failed", command_name))
    }
}
