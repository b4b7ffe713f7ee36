//! Output discovery: find the page images pdftoppm wrote.
//!
//! pdftoppm names pages `<prefix>-<n>.<ext>`, zero-padding `n` to the width
//! of the last page number (`page-1.png` for a 9-page file, `page-01.png`
//! for a 12-page one). We glob `<prefix>-*.<ext>` and return whatever
//! matches, in filesystem enumeration order.
//!
//! Zero matches is a valid result, not an error. Stale files from an earlier
//! run in the same directory are returned too; callers own directory
//! isolation.

use crate::config::ImageFormat;
use crate::error::Pdf2PngError;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Glob pattern matching every page image for `prefix`.
///
/// Glob metacharacters in the prefix itself are escaped so a directory such
/// as `/tmp/run[1]` matches literally.
pub fn output_pattern(prefix: &Path, format: ImageFormat) -> String {
    format!(
        "{}-*.{}",
        glob::Pattern::escape(&prefix.to_string_lossy()),
        format.extension()
    )
}

/// Collect every file matching `<prefix>-*.<ext>`.
pub fn collect_outputs(prefix: &Path, format: ImageFormat) -> Result<Vec<PathBuf>, Pdf2PngError> {
    let pattern = output_pattern(prefix, format);

    let entries = glob::glob(&pattern).map_err(|e| Pdf2PngError::OutputDiscoveryFailed {
        pattern: pattern.clone(),
        detail: e.to_string(),
    })?;

    let paths = entries
        .collect::<Result<Vec<PathBuf>, glob::GlobError>>()
        .map_err(|e| Pdf2PngError::OutputDiscoveryFailed {
            pattern: pattern.clone(),
            detail: e.to_string(),
        })?;

    if paths.is_empty() {
        warn!("No output files matched '{}'", pattern);
    } else {
        debug!("Collected {} output files for '{}'", paths.len(), pattern);
    }
    Ok(paths)
}

/// Page number encoded in a pdftoppm output file name.
///
/// `page-07.png` → `Some(7)`; anything without a numeric suffix → `None`.
pub fn page_number(path: &Path) -> Option<u32> {
    let stem = path.file_stem()?.to_str()?;
    let (_, digits) = stem.rsplit_once('-')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Sort paths into page order.
///
/// Glob order is lexical at best, which puts `page-10.png` before
/// `page-2.png`. Files without a page number sort last, by name.
pub fn sort_by_page_number(paths: &mut [PathBuf]) {
    paths.sort_by(|a, b| match (page_number(a), page_number(b)) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.cmp(b),
    });
}
