//! The pdftoppm engine: PDF in, one PNG per page out.
//!
//! [`PdfToPpm`] composes the pipeline stages for a single call:
//!
//! ```text
//! ValidatingFormat ─▶ BuildingCommand ─▶ Running ─▶ CollectingOutput ─▶ Done
//!         └──────────────┴────────────────┴──────────────┴──▶ Failed
//! ```
//!
//! Nothing survives a call except the immutable [`EngineConfig`], so one
//! engine can serve any number of concurrent conversions. Each call must use
//! its own output directory: the engine neither cleans up earlier output nor
//! filters it out of the result.

use crate::config::{ConversionRequest, EngineConfig, ImageFormat};
use crate::context::ExecContext;
use crate::converter::ImageConverter;
use crate::error::Pdf2PngError;
use crate::pipeline::{collect, command, process};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Identifier the engine registers under.
pub const ENGINE_ID: &str = "pdftoppm";

/// Upper bound on `pdftoppm -v` in [`PdfToPpm::describe`].
pub const DESCRIBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-call conversion stages, reported in debug logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ValidatingFormat,
    BuildingCommand,
    Running,
    CollectingOutput,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::ValidatingFormat => "validating-format",
            Stage::BuildingCommand => "building-command",
            Stage::Running => "running",
            Stage::CollectingOutput => "collecting-output",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// PDF-to-PNG converter backed by the pdftoppm binary.
#[derive(Debug, Clone)]
pub struct PdfToPpm {
    config: EngineConfig,
}

impl PdfToPpm {
    /// Wrap an already-loaded configuration. Does not validate it.
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Load from the environment and validate the binary.
    ///
    /// Either failure is a startup error; the host should not start without
    /// a working engine.
    pub fn provision() -> Result<Self, Pdf2PngError> {
        let config = EngineConfig::from_env()?;
        Self::with_validated(config)
    }

    /// Validate `config` and wrap it.
    pub fn with_validated(config: EngineConfig) -> Result<Self, Pdf2PngError> {
        config.validate()?;
        info!("pdftoppm engine ready: {}", config.binary_path.display());
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Convert using the configured (or hard-coded) resolution and antialiasing.
    pub async fn convert(
        &self,
        ctx: &ExecContext,
        input_path: impl AsRef<Path>,
        output_dir: impl AsRef<Path>,
        format: &str,
    ) -> Result<Vec<PathBuf>, Pdf2PngError> {
        let request = ConversionRequest::builder(input_path, output_dir, format).build()?;
        self.convert_with_options(ctx, &request).await
    }

    /// Convert with explicit per-call overrides carried by `request`.
    pub async fn convert_with_options(
        &self,
        ctx: &ExecContext,
        request: &ConversionRequest,
    ) -> Result<Vec<PathBuf>, Pdf2PngError> {
        let start = Instant::now();
        let mut stage = Stage::ValidatingFormat;
        let result = self.run_stages(ctx, request, &mut stage).await;
        match &result {
            Ok(paths) => info!(
                "Converted '{}' to {} page(s) in {}ms",
                request.input_path.display(),
                paths.len(),
                start.elapsed().as_millis()
            ),
            Err(e) => debug!(
                "stage: {} (during {}) for '{}': {}",
                Stage::Failed,
                stage,
                request.input_path.display(),
                e
            ),
        }
        result
    }

    /// Drive one call through the stages, leaving `stage` at the last one
    /// entered so a failure can be attributed.
    async fn run_stages(
        &self,
        ctx: &ExecContext,
        request: &ConversionRequest,
        stage: &mut Stage,
    ) -> Result<Vec<PathBuf>, Pdf2PngError> {
        *stage = Stage::ValidatingFormat;
        debug!("stage: {}", stage);
        ImageFormat::parse(&request.format)?;
        if request.dpi == Some(0) {
            return Err(Pdf2PngError::InvalidRequest(
                "DPI must be a positive integer, got 0".into(),
            ));
        }

        *stage = Stage::BuildingCommand;
        debug!("stage: {}", stage);
        let spec = command::build_command(&self.config, request)?;

        *stage = Stage::Running;
        debug!("stage: {}", stage);
        process::run(&spec, ctx).await?;

        *stage = Stage::CollectingOutput;
        debug!("stage: {}", stage);
        let paths = collect::collect_outputs(&spec.output_prefix, spec.format)?;

        *stage = Stage::Done;
        debug!("stage: {}", stage);
        Ok(paths)
    }

    /// Blocking wrapper around [`PdfToPpm::convert_with_options`].
    ///
    /// Spins up a private runtime; do not call from inside an async context.
    pub fn convert_blocking(
        &self,
        ctx: &ExecContext,
        request: &ConversionRequest,
    ) -> Result<Vec<PathBuf>, Pdf2PngError> {
        tokio::runtime::Runtime::new()
            .map_err(|e| Pdf2PngError::Internal(format!("Failed to create tokio runtime: {}", e)))?
            .block_on(self.convert_with_options(ctx, request))
    }

    /// Query `pdftoppm -v` for diagnostics.
    ///
    /// Always returns a map with a `"version"` key; if the query fails, the
    /// error text is the value. Blocks the calling thread for at most
    /// [`DESCRIBE_TIMEOUT`].
    pub fn describe(&self) -> BTreeMap<String, String> {
        self.describe_within(DESCRIBE_TIMEOUT)
    }

    /// [`PdfToPpm::describe`] with an explicit bound on the version query.
    pub fn describe_within(&self, limit: Duration) -> BTreeMap<String, String> {
        let mut debug = BTreeMap::new();
        debug.insert("binary".to_string(), self.config.binary_path.display().to_string());
        debug.insert(
            "dpi".to_string(),
            self.config.effective_dpi(None).to_string(),
        );
        debug.insert(
            "antialiasing".to_string(),
            self.config.effective_antialiasing(None).to_string(),
        );
        debug.insert("version".to_string(), self.version(limit));
        debug
    }

    /// Run `<bin> -v` in its own process group, killing the group if it
    /// outlives `limit`.
    fn version(&self, limit: Duration) -> String {
        use std::process::{Command, Stdio};

        let mut cmd = Command::new(&self.config.binary_path);
        cmd.arg("-v")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return e.to_string(),
        };
        let pid = child.id();

        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let _ = tx.send(child.wait_with_output());
        });

        match rx.recv_timeout(limit) {
            Ok(Ok(out)) if out.status.success() => {
                // pdftoppm prints its banner on stderr.
                let stdout = String::from_utf8_lossy(&out.stdout);
                if stdout.trim().is_empty() {
                    String::from_utf8_lossy(&out.stderr).trim().to_string()
                } else {
                    stdout.trim().to_string()
                }
            }
            Ok(Ok(out)) => format!(
                "exit status {}: {}",
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            ),
            Ok(Err(e)) => e.to_string(),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!(
                    "'{} -v' did not finish in {}ms; killing it",
                    self.config.binary_path.display(),
                    limit.as_millis()
                );
                // The waiter thread reaps the leader once the group is gone.
                process::kill_process_group(pid);
                format!("timed out after {}ms", limit.as_millis())
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                "version query thread exited without a result".to_string()
            }
        }
    }
}

#[async_trait]
impl ImageConverter for PdfToPpm {
    fn id(&self) -> &str {
        ENGINE_ID
    }

    async fn convert(
        &self,
        ctx: &ExecContext,
        request: &ConversionRequest,
    ) -> Result<Vec<PathBuf>, Pdf2PngError> {
        self.convert_with_options(ctx, request).await
    }

    fn describe(&self) -> BTreeMap<String, String> {
        PdfToPpm::describe(self)
    }
}
