//! Error types for the edgequake-pdf2png library.
//!
//! Every failure surfaces as a single [`Pdf2PngError`]. The variants fall into
//! two groups:
//!
//! * **Startup** — [`Pdf2PngError::MissingConfiguration`],
//!   [`Pdf2PngError::BinaryNotFound`], [`Pdf2PngError::BinaryNotExecutable`]
//!   and [`Pdf2PngError::InvalidConfig`]. Raised while provisioning the
//!   engine; the host must not continue in a degraded mode.
//!
//! * **Per call** — everything else. Returned from a single conversion and
//!   carrying enough context (the rasterizer's own stderr, the glob pattern)
//!   to diagnose the failure without re-running it.
//!
//! Nothing is retried automatically and no partial result is returned: a
//! conversion either yields every collected path or an error.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// All errors returned by the edgequake-pdf2png library.
#[derive(Debug, Error)]
pub enum Pdf2PngError {
    // ── Startup errors ────────────────────────────────────────────────────
    /// A required environment setting is absent.
    #[error("{key} environment variable is not set\nPoint it at the pdftoppm binary, e.g. {key}=/usr/bin/pdftoppm")]
    MissingConfiguration { key: String },

    /// The configured binary path does not exist on disk.
    #[error("pdftoppm binary path does not exist: '{path}'\nInstall poppler-utils or fix PDFTOPPM_BIN_PATH.")]
    BinaryNotFound { path: PathBuf },

    /// The configured path exists but cannot be executed.
    #[error("pdftoppm binary '{path}' is not an executable file")]
    BinaryNotExecutable { path: PathBuf },

    /// Builder or registry validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Request errors ────────────────────────────────────────────────────
    /// The requested output format is not implemented by this engine.
    #[error("convert PDF to '{format}' with pdftoppm: method not supported")]
    UnsupportedOperation { format: String },

    /// A conversion request carried an invalid override.
    #[error("Invalid conversion request: {0}")]
    InvalidRequest(String),

    // ── Execution errors ──────────────────────────────────────────────────
    /// The rasterizer could not be started at all.
    #[error("Failed to start '{program}': {source}")]
    SpawnFailed {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The rasterizer exited with a non-zero status.
    #[error("convert PDF to PNG with pdftoppm: exit status {status}: {stderr}")]
    ExecutionFailed { status: String, stderr: String },

    /// The caller cancelled the context before the rasterizer finished.
    #[error("pdftoppm execution cancelled; process group terminated")]
    ExecutionCancelled,

    /// The context deadline elapsed before the rasterizer finished.
    #[error("pdftoppm execution timed out after {}ms; process group terminated", .elapsed.as_millis())]
    ExecutionTimedOut { elapsed: Duration },

    // ── Output errors ─────────────────────────────────────────────────────
    /// The post-run filesystem scan itself failed.
    ///
    /// Finding zero files is *not* this error; it yields an empty result.
    #[error("find output files matching '{pattern}': {detail}")]
    OutputDiscoveryFailed { pattern: String, detail: String },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Pdf2PngError {
    /// `true` for errors that must halt engine initialisation.
    pub fn is_startup_error(&self) -> bool {
        matches!(
            self,
            Pdf2PngError::MissingConfiguration { .. }
                | Pdf2PngError::BinaryNotFound { .. }
                | Pdf2PngError::BinaryNotExecutable { .. }
                | Pdf2PngError::InvalidConfig(_)
        )
    }

    /// `true` when the call was aborted by its context (cancel or deadline).
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            Pdf2PngError::ExecutionCancelled | Pdf2PngError::ExecutionTimedOut { .. }
        )
    }
}
