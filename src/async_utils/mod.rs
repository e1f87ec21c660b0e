//! Asynchronous utilities for use with Tokio.
//!
//! Everything slow in this program is either a subprocess or CPU-bound model
//! inference. This module keeps the glue for both in one place.

use std::sync::LazyLock;

use regex::Regex;

use crate::prelude::*;

/// Matches lines that external tools print when they fail but still exit
/// successfully.
pub static DEFAULT_ERROR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*Error\b").expect("failed to compile regex"));

/// Report any command failures, and include any error output.
///
/// Standard output and standard error are logged at debug level, and standard
/// error may optionally be checked against a regex to catch tools that report
/// failure without a non-zero exit code.
pub fn check_for_command_failure(
    command_name: &str,
    output: &std::process::Output,
    error_regex: Option<&Regex>,
) -> Result<()> {
    let stderr = String::from_utf8_lossy(&output.stderr);
    debug!(
        command_name = command_name,
        bytes = output.stdout.len(),
        "Standard output from command"
    );
    debug!(
        command_name = command_name,
        output = %stderr,
        "Standard error from command",
    );

    if output.status.success() {
        if let Some(regex) = error_regex {
            if regex.is_match(&stderr) {
                return Err(anyhow!(
                    "{} printed error output:\n{}",
                    command_name,
                    stderr,
                ));
            }
        }
        Ok(())
    } else if let Some(exit_code) = output.status.code() {
        Err(anyhow!(
            "{} failed with exit code {} and error output:\n{}",
            command_name,
            exit_code,
            stderr,
        ))
    } else {
        Err(anyhow!(
            "{} failed with error output:\n{}",
            command_name,
            stderr,
        ))
    }
}

/// Wrapper around [`tokio::task::spawn_blocking`] that propagates panics from
/// the background task.
pub async fn spawn_blocking_propagating_panics<F, T>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(value) => value,
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(err) => panic!("blocking task was cancelled: {err}"),
    }
}
