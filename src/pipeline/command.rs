//! Command building: turn a [`ConversionRequest`] into pdftoppm arguments.
//!
//! The argument order is fixed:
//!
//! ```text
//! pdftoppm -png -r <dpi> -aa <yes|no> <input.pdf> <output_dir>/page
//! ```
//!
//! pdftoppm appends `-<page>.png` to the prefix for every page it writes, so
//! the prefix is what the output collector later globs for.

use crate::config::{ConversionRequest, EngineConfig, ImageFormat};
use crate::error::Pdf2PngError;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Literal file-name stem every page image starts with.
pub const OUTPUT_STEM: &str = "page";

/// A fully resolved pdftoppm invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub executable: PathBuf,
    pub args: Vec<OsString>,
    /// `<output_dir>/page`; pages land at `<prefix>-<n>.<ext>`.
    pub output_prefix: PathBuf,
    pub format: ImageFormat,
}

impl CommandSpec {
    /// Arguments as lossy UTF-8, for logging and assertions.
    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }
}

/// Prefix pdftoppm names its output files after.
pub fn output_prefix(output_dir: &Path) -> PathBuf {
    output_dir.join(OUTPUT_STEM)
}

/// Build the pdftoppm command for `request`.
///
/// Fails with [`Pdf2PngError::UnsupportedOperation`] before doing anything
/// else if the format is not `"png"`.
pub fn build_command(
    config: &EngineConfig,
    request: &ConversionRequest,
) -> Result<CommandSpec, Pdf2PngError> {
    let format = ImageFormat::parse(&request.format)?;

    let dpi = config.effective_dpi(request.dpi);
    let antialiasing = config.effective_antialiasing(request.antialiasing);
    let prefix = output_prefix(&request.output_dir);

    let args: Vec<OsString> = vec![
        format.flag().into(),
        "-r".into(),
        dpi.to_string().into(),
        "-aa".into(),
        antialiasing.as_str().into(),
        request.input_path.as_os_str().to_owned(),
        prefix.as_os_str().to_owned(),
    ];

    let spec = CommandSpec {
        executable: config.binary_path.clone(),
        args,
        output_prefix: prefix,
        format,
    };
    debug!(
        "Built command: {} {}",
        spec.executable.display(),
        spec.args_lossy().join(" ")
    );
    Ok(spec)
}
