//! Engine configuration and per-call conversion requests.
//!
//! [`EngineConfig`] is read **once** at startup, either from the process
//! environment ([`EngineConfig::from_env`]) or through its builder, and then
//! handed to [`crate::engine::PdfToPpm`]. Per-call code never consults the
//! environment again, which keeps conversions deterministic and testable.
//!
//! [`ConversionRequest`] carries everything that varies between calls: the
//! input PDF, the output directory, the requested format and optional
//! resolution / antialiasing overrides.
//!
//! # Environment
//!
//! | Variable | Required | Meaning |
//! |----------|----------|---------|
//! | `PDFTOPPM_BIN_PATH` | yes | Path to the pdftoppm binary |
//! | `PDFTOPPM_DPI` | no | Default resolution, positive integer (203 if unset or unparseable) |
//! | `PDFTOPPM_ANTIALIASING` | no | Default antialiasing, `yes` or `no` (`no` if unset or unrecognised) |

use crate::error::Pdf2PngError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

/// Environment variable holding the pdftoppm binary path.
pub const ENV_BIN_PATH: &str = "PDFTOPPM_BIN_PATH";
/// Environment variable holding the default resolution.
pub const ENV_DPI: &str = "PDFTOPPM_DPI";
/// Environment variable holding the default antialiasing mode.
pub const ENV_ANTIALIASING: &str = "PDFTOPPM_ANTIALIASING";

/// Resolution used when neither the request nor the environment sets one.
///
/// Tuned for 203-DPI thermal/label printers downstream.
pub const DEFAULT_DPI: u32 = 203;

/// Antialiasing mode for pdftoppm's `-aa` flag.
///
/// Disabled by default: aliased output rasterises faster and is
/// byte-for-byte deterministic, which matters more than smooth edges for
/// document throughput.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Antialiasing {
    Yes,
    #[default]
    No,
}

impl Antialiasing {
    /// The literal passed after `-aa`.
    pub fn as_str(self) -> &'static str {
        match self {
            Antialiasing::Yes => "yes",
            Antialiasing::No => "no",
        }
    }
}

impl fmt::Display for Antialiasing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Antialiasing {
    type Err = Pdf2PngError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yes" => Ok(Antialiasing::Yes),
            "no" => Ok(Antialiasing::No),
            other => Err(Pdf2PngError::InvalidConfig(format!(
                "antialiasing must be 'yes' or 'no', got '{other}'"
            ))),
        }
    }
}

/// Output image formats the engine knows how to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
}

impl ImageFormat {
    /// Parse a caller-supplied format identifier.
    ///
    /// Matching is exact: `"png"` is supported, `"PNG"` and `"jpeg"` are not.
    pub fn parse(format: &str) -> Result<Self, Pdf2PngError> {
        match format {
            "png" => Ok(ImageFormat::Png),
            other => Err(Pdf2PngError::UnsupportedOperation {
                format: other.to_string(),
            }),
        }
    }

    /// File extension pdftoppm appends to every page.
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
        }
    }

    /// Command-line flag selecting this format.
    pub fn flag(self) -> &'static str {
        match self {
            ImageFormat::Png => "-png",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

// ── EngineConfig ─────────────────────────────────────────────────────────

/// Startup configuration of the pdftoppm engine.
///
/// Immutable once built; shared read-only by every concurrent conversion.
///
/// # Example
/// ```rust
/// use edgequake_pdf2png::{Antialiasing, EngineConfig};
///
/// let config = EngineConfig::builder("/usr/bin/pdftoppm")
///     .default_dpi(300)
///     .default_antialiasing(Antialiasing::Yes)
///     .build()
///     .unwrap();
/// assert_eq!(config.effective_dpi(None), 300);
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path to the pdftoppm executable.
    pub binary_path: PathBuf,

    /// Default resolution when a request carries none. `None` means 203.
    pub default_dpi: Option<u32>,

    /// Default antialiasing when a request carries none. `None` means `no`.
    pub default_antialiasing: Option<Antialiasing>,
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("binary_path", &self.binary_path.display())
            .field("dpi", &self.effective_dpi(None))
            .field("antialiasing", &self.effective_antialiasing(None))
            .finish()
    }
}

impl EngineConfig {
    /// Create a new builder for `EngineConfig`.
    pub fn builder(binary_path: impl Into<PathBuf>) -> EngineConfigBuilder {
        EngineConfigBuilder {
            config: EngineConfig {
                binary_path: binary_path.into(),
                default_dpi: None,
                default_antialiasing: None,
            },
        }
    }

    /// Load the configuration from the process environment.
    pub fn from_env() -> Result<Self, Pdf2PngError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load the configuration through an arbitrary key lookup.
    ///
    /// The binary path is mandatory. Optional settings that fail to parse are
    /// logged and dropped so the hard-coded defaults apply.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Pdf2PngError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let binary_path = lookup(ENV_BIN_PATH)
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| Pdf2PngError::MissingConfiguration {
                key: ENV_BIN_PATH.to_string(),
            })?;

        let default_dpi = lookup(ENV_DPI)
            .filter(|v| !v.trim().is_empty())
            .and_then(|raw| match raw.trim().parse::<u32>() {
                Ok(dpi) if dpi > 0 => Some(dpi),
                _ => {
                    warn!("Ignoring {}={:?}: not a positive integer, using {}", ENV_DPI, raw, DEFAULT_DPI);
                    None
                }
            });

        let default_antialiasing = lookup(ENV_ANTIALIASING)
            .filter(|v| !v.trim().is_empty())
            .and_then(|raw| match raw.parse::<Antialiasing>() {
                Ok(aa) => Some(aa),
                Err(_) => {
                    warn!("Ignoring {}={:?}: expected 'yes' or 'no', using 'no'", ENV_ANTIALIASING, raw);
                    None
                }
            });

        let config = EngineConfig {
            binary_path,
            default_dpi,
            default_antialiasing,
        };
        debug!("Loaded engine config: {:?}", config);
        Ok(config)
    }

    /// Check that the configured binary exists and is executable.
    ///
    /// Run once at startup; conversions do not re-check.
    pub fn validate(&self) -> Result<(), Pdf2PngError> {
        let meta = match std::fs::metadata(&self.binary_path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Pdf2PngError::BinaryNotFound {
                    path: self.binary_path.clone(),
                });
            }
            Err(e) => {
                return Err(Pdf2PngError::InvalidConfig(format!(
                    "cannot stat '{}': {}",
                    self.binary_path.display(),
                    e
                )));
            }
        };

        if !meta.is_file() || !is_executable(&meta) {
            return Err(Pdf2PngError::BinaryNotExecutable {
                path: self.binary_path.clone(),
            });
        }
        Ok(())
    }

    /// Resolution for a call: explicit override, then configured default, then 203.
    pub fn effective_dpi(&self, requested: Option<u32>) -> u32 {
        requested.or(self.default_dpi).unwrap_or(DEFAULT_DPI)
    }

    /// Antialiasing for a call: explicit override, then configured default, then `no`.
    pub fn effective_antialiasing(&self, requested: Option<Antialiasing>) -> Antialiasing {
        requested
            .or(self.default_antialiasing)
            .unwrap_or_default()
    }
}

#[cfg(unix)]
fn is_executable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &std::fs::Metadata) -> bool {
    true
}

/// Builder for [`EngineConfig`].
#[derive(Debug)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn default_dpi(mut self, dpi: u32) -> Self {
        self.config.default_dpi = Some(dpi);
        self
    }

    pub fn default_antialiasing(mut self, aa: Antialiasing) -> Self {
        self.config.default_antialiasing = Some(aa);
        self
    }

    /// Build the configuration, validating constraints.
    ///
    /// Does not touch the filesystem; call [`EngineConfig::validate`] for that.
    pub fn build(self) -> Result<EngineConfig, Pdf2PngError> {
        let c = &self.config;
        if c.binary_path.as_os_str().is_empty() {
            return Err(Pdf2PngError::InvalidConfig(
                "binary path must not be empty".into(),
            ));
        }
        if c.default_dpi == Some(0) {
            return Err(Pdf2PngError::InvalidConfig(
                "default DPI must be a positive integer".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── ConversionRequest ────────────────────────────────────────────────────

/// One conversion call's parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionRequest {
    /// The PDF to rasterise.
    pub input_path: PathBuf,
    /// Directory pdftoppm writes `page-N.png` files into.
    pub output_dir: PathBuf,
    /// Requested format identifier; only `"png"` is supported.
    pub format: String,
    /// Resolution override.
    pub dpi: Option<u32>,
    /// Antialiasing override.
    pub antialiasing: Option<Antialiasing>,
}

impl ConversionRequest {
    /// Start a request for `input_path` → `output_dir` in `format`.
    pub fn builder(
        input_path: impl AsRef<Path>,
        output_dir: impl AsRef<Path>,
        format: impl Into<String>,
    ) -> ConversionRequestBuilder {
        ConversionRequestBuilder {
            request: ConversionRequest {
                input_path: input_path.as_ref().to_path_buf(),
                output_dir: output_dir.as_ref().to_path_buf(),
                format: format.into(),
                dpi: None,
                antialiasing: None,
            },
        }
    }
}

/// Builder for [`ConversionRequest`].
#[derive(Debug)]
pub struct ConversionRequestBuilder {
    request: ConversionRequest,
}

impl ConversionRequestBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.request.dpi = Some(dpi);
        self
    }

    pub fn antialiasing(mut self, aa: Antialiasing) -> Self {
        self.request.antialiasing = Some(aa);
        self
    }

    pub fn build(self) -> Result<ConversionRequest, Pdf2PngError> {
        if self.request.dpi == Some(0) {
            return Err(Pdf2PngError::InvalidRequest(
                "DPI must be a positive integer, got 0".into(),
            ));
        }
        Ok(self.request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn missing_binary_path_is_fatal() {
        let err = EngineConfig::from_lookup(lookup(&[(ENV_DPI, "300")])).unwrap_err();
        assert!(matches!(err, Pdf2PngError::MissingConfiguration { ref key } if key == ENV_BIN_PATH));
    }

    #[test]
    fn empty_binary_path_is_missing() {
        let err = EngineConfig::from_lookup(lookup(&[(ENV_BIN_PATH, "  ")])).unwrap_err();
        assert!(matches!(err, Pdf2PngError::MissingConfiguration { .. }));
    }

    #[test]
    fn defaults_apply_when_unset() {
        let c = EngineConfig::from_lookup(lookup(&[(ENV_BIN_PATH, "/usr/bin/pdftoppm")])).unwrap();
        assert_eq!(c.binary_path, PathBuf::from("/usr/bin/pdftoppm"));
        assert_eq!(c.effective_dpi(None), 203);
        assert_eq!(c.effective_antialiasing(None), Antialiasing::No);
    }

    #[test]
    fn environment_defaults_are_read() {
        let c = EngineConfig::from_lookup(lookup(&[
            (ENV_BIN_PATH, "/opt/pdftoppm"),
            (ENV_DPI, "150"),
            (ENV_ANTIALIASING, "yes"),
        ]))
        .unwrap();
        assert_eq!(c.default_dpi, Some(150));
        assert_eq!(c.default_antialiasing, Some(Antialiasing::Yes));
    }

    #[test]
    fn unparseable_dpi_falls_back_to_203() {
        for bad in ["abc", "-5", "0", "12.5"] {
            let c = EngineConfig::from_lookup(lookup(&[
                (ENV_BIN_PATH, "/opt/pdftoppm"),
                (ENV_DPI, bad),
            ]))
            .unwrap();
            assert_eq!(c.default_dpi, None, "input {bad:?}");
            assert_eq!(c.effective_dpi(None), DEFAULT_DPI);
        }
    }

    #[test]
    fn unrecognised_antialiasing_falls_back_to_no() {
        let c = EngineConfig::from_lookup(lookup(&[
            (ENV_BIN_PATH, "/opt/pdftoppm"),
            (ENV_ANTIALIASING, "maybe"),
        ]))
        .unwrap();
        assert_eq!(c.effective_antialiasing(None), Antialiasing::No);
    }

    #[test]
    fn explicit_values_override_defaults() {
        let c = EngineConfig::builder("/opt/pdftoppm")
            .default_dpi(150)
            .default_antialiasing(Antialiasing::Yes)
            .build()
            .unwrap();
        assert_eq!(c.effective_dpi(Some(300)), 300);
        assert_eq!(c.effective_antialiasing(Some(Antialiasing::No)), Antialiasing::No);
        assert_eq!(c.effective_dpi(None), 150);
    }

    #[test]
    fn builder_rejects_zero_dpi() {
        let err = EngineConfig::builder("/opt/pdftoppm").default_dpi(0).build().unwrap_err();
        assert!(matches!(err, Pdf2PngError::InvalidConfig(_)));
    }

    #[test]
    fn validate_reports_missing_binary() {
        let dir = tempfile::tempdir().unwrap();
        let c = EngineConfig::builder(dir.path().join("pdftoppm")).build().unwrap();
        assert!(matches!(c.validate(), Err(Pdf2PngError::BinaryNotFound { .. })));
    }

    #[test]
    fn validate_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        let c = EngineConfig::builder(dir.path()).build().unwrap();
        assert!(matches!(c.validate(), Err(Pdf2PngError::BinaryNotExecutable { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn validate_checks_execute_bit() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("pdftoppm");
        std::fs::write(&bin, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o644)).unwrap();
        let c = EngineConfig::builder(&bin).build().unwrap();
        assert!(matches!(c.validate(), Err(Pdf2PngError::BinaryNotExecutable { .. })));

        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert!(c.validate().is_ok());
    }

    #[test]
    fn image_format_is_exact() {
        assert_eq!(ImageFormat::parse("png").unwrap(), ImageFormat::Png);
        for f in ["PNG", "jpeg", "tiff", ""] {
            assert!(matches!(
                ImageFormat::parse(f),
                Err(Pdf2PngError::UnsupportedOperation { .. })
            ));
        }
    }

    #[test]
    fn antialiasing_parses_case_insensitively() {
        assert_eq!("YES".parse::<Antialiasing>().unwrap(), Antialiasing::Yes);
        assert_eq!(" no ".parse::<Antialiasing>().unwrap(), Antialiasing::No);
        assert!("on".parse::<Antialiasing>().is_err());
    }

    #[test]
    fn request_rejects_zero_dpi() {
        let err = ConversionRequest::builder("a.pdf", "out", "png")
            .dpi(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, Pdf2PngError::InvalidRequest(_)));
    }

    #[test]
    fn config_serialises_lowercase_antialiasing() {
        let c = EngineConfig::builder("/opt/pdftoppm")
            .default_antialiasing(Antialiasing::Yes)
            .build()
            .unwrap();
        let json = serde_json::to_string(&c).unwrap();
        assert!(json.contains("\"yes\""), "got: {json}");
    }
}
