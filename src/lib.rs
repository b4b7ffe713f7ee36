//! # edgequake-pdf2png
//!
//! Rasterise PDF documents into one PNG per page with poppler's `pdftoppm`.
//!
//! ## Why shell out?
//!
//! pdftoppm is fast, battle-tested and already installed on most document
//! servers. Driving it as a subprocess keeps PDF parsing out of our address
//! space; the crate only builds the command line, supervises the process
//! (with cancellation that reaches every descendant) and collects the files
//! it writes.
//!
//! ## Pipeline Overview
//!
//! ```text
//! ConversionRequest
//!  │
//!  ├─ 1. Format   only "png" is supported; anything else fails before spawning
//!  ├─ 2. Command  pdftoppm -png -r <dpi> -aa <yes|no> <input> <dir>/page
//!  ├─ 3. Run      own process group, killed on cancel / deadline
//!  └─ 4. Collect  glob <dir>/page-*.png
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdf2png::{ExecContext, PdfToPpm};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Reads PDFTOPPM_BIN_PATH, PDFTOPPM_DPI, PDFTOPPM_ANTIALIASING once.
//!     let engine = PdfToPpm::provision()?;
//!     let ctx = ExecContext::new().with_timeout(Duration::from_secs(60));
//!     let mut pages = engine.convert(&ctx, "document.pdf", "out/", "png").await?;
//!     edgequake_pdf2png::sort_by_page_number(&mut pages);
//!     for page in pages {
//!         println!("{}", page.display());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Defaults
//!
//! | Setting | Default | Override |
//! |---------|---------|----------|
//! | Resolution | 203 DPI | `PDFTOPPM_DPI`, [`ConversionRequestBuilder::dpi`] |
//! | Antialiasing | `no` | `PDFTOPPM_ANTIALIASING`, [`ConversionRequestBuilder::antialiasing`] |
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2png` binary (clap + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod context;
pub mod converter;
pub mod engine;
pub mod error;
pub mod pipeline;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    Antialiasing, ConversionRequest, ConversionRequestBuilder, EngineConfig, EngineConfigBuilder,
    ImageFormat, DEFAULT_DPI,
};
pub use context::ExecContext;
pub use converter::{ConverterRegistry, ImageConverter};
pub use engine::{PdfToPpm, ENGINE_ID};
pub use error::Pdf2PngError;
pub use pipeline::collect::{page_number, sort_by_page_number};
pub use pipeline::command::{build_command, CommandSpec};
