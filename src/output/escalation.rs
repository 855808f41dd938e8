//! Escalation file
//!
//! Items that did not complete are written one per line so the file can be
//! fed straight back in as the input of the next run.

use crate::output::traits::OutputResult;
use std::fmt::Display;
use std::fs;
use std::io::Write;
use std::path::Path;

/// Writes escalated items to `path`, one per line
///
/// The file is replaced on every run. An empty list still produces an
/// (empty) file so stale escalations from a previous run do not linger.
pub fn write_escalations<T: Display>(path: &Path, items: &[T]) -> OutputResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut file = fs::File::create(path)?;
    for item in items {
        writeln!(file, "{}", item)?;
    }
    file.flush()?;

    if !items.is_empty() {
        tracing::warn!(
            "{} item(s) escalated, written to {}",
            items.len(),
            path.display()
        );
    }
    Ok(())
}
