//! CLI binary for edgequake-pdf2png.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `EngineConfig` / `ConversionRequest` and prints the produced page paths.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_pdf2png::config::{ENV_ANTIALIASING, ENV_BIN_PATH, ENV_DPI};
use edgequake_pdf2png::{
    sort_by_page_number, Antialiasing, ConversionRequest, EngineConfig, ExecContext, PdfToPpm,
};
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::warn;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # One PDF into ./out (page-1.png, page-2.png, …)
  pdf2png document.pdf -o out

  # Higher resolution with antialiasing
  pdf2png --dpi 300 --antialiasing yes document.pdf -o out

  # Several PDFs at once; each gets out/<file-stem>/
  pdf2png a.pdf b.pdf c.pdf -o out --concurrency 4

  # Give up after 30 seconds per document
  pdf2png --timeout 30 big.pdf -o out

  # Show which pdftoppm will be used
  pdf2png --describe

ENVIRONMENT VARIABLES:
  PDFTOPPM_BIN_PATH       Path to the pdftoppm binary (required)
  PDFTOPPM_DPI            Default resolution (203 if unset or invalid)
  PDFTOPPM_ANTIALIASING   Default antialiasing, yes or no (no if unset)
  RUST_LOG                Override log filtering (e.g. edgequake_pdf2png=debug)
"#;

/// Rasterise PDF files to PNG pages with pdftoppm.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2png",
    version,
    about = "Rasterise PDF files to PNG pages with pdftoppm",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF files to convert.
    #[arg(required_unless_present = "describe")]
    inputs: Vec<PathBuf>,

    /// Directory to write page images into.
    #[arg(short, long, env = "PDF2PNG_OUTPUT_DIR", default_value = ".")]
    output_dir: PathBuf,

    /// pdftoppm binary (overrides PDFTOPPM_BIN_PATH).
    #[arg(long = "bin")]
    binary: Option<PathBuf>,

    /// Rendering resolution in DPI (overrides PDFTOPPM_DPI).
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    dpi: Option<u32>,

    /// Antialiasing (overrides PDFTOPPM_ANTIALIASING).
    #[arg(long, value_enum)]
    antialiasing: Option<AntialiasingArg>,

    /// Per-document timeout in seconds.
    #[arg(long, env = "PDF2PNG_TIMEOUT")]
    timeout: Option<u64>,

    /// Number of documents converted at once.
    #[arg(short, long, env = "PDF2PNG_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Print pages in page-number order instead of filesystem order.
    #[arg(long)]
    sort: bool,

    /// Output a JSON report instead of one path per line.
    #[arg(long)]
    json: bool,

    /// Print engine diagnostics (binary, defaults, version) and exit.
    #[arg(long)]
    describe: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF2PNG_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2PNG_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2PNG_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum AntialiasingArg {
    Yes,
    No,
}

impl From<AntialiasingArg> for Antialiasing {
    fn from(v: AntialiasingArg) -> Self {
        match v {
            AntialiasingArg::Yes => Antialiasing::Yes,
            AntialiasingArg::No => Antialiasing::No,
        }
    }
}

/// One line of the `--json` report.
#[derive(Debug, Serialize)]
struct DocumentReport {
    input: PathBuf,
    output_dir: PathBuf,
    pages: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    duration_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.describe;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Engine ───────────────────────────────────────────────────────────
    let config = load_config(&cli).context("Failed to configure pdftoppm")?;

    if cli.describe {
        let engine = PdfToPpm::new(config);
        let info = engine.describe();
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&info).context("Failed to serialise diagnostics")?
            );
        } else {
            for (key, value) in &info {
                println!("{:<13} {}", format!("{key}:"), value);
            }
        }
        return Ok(());
    }

    let engine = PdfToPpm::with_validated(config).context("pdftoppm is not usable")?;

    // ── Cancellation ─────────────────────────────────────────────────────
    let root = ExecContext::new();
    {
        let root = root.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted; cancelling running conversions");
                root.cancel();
            }
        });
    }

    // ── Plan ─────────────────────────────────────────────────────────────
    let jobs = plan_jobs(&cli)?;
    for (_, dir) in &jobs {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create output directory {:?}", dir))?;
    }

    let bar = if show_progress {
        let bar = ProgressBar::new(jobs.len() as u64);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} files  ⏱ {elapsed_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
        );
        bar.set_prefix("Rasterising");
        bar.enable_steady_tick(Duration::from_millis(80));
        Some(bar)
    } else {
        None
    };

    // ── Run ──────────────────────────────────────────────────────────────
    let engine = &engine;
    let cli_ref = &cli;
    let bar_ref = bar.as_ref();
    let mut reports: Vec<DocumentReport> = stream::iter(jobs)
        .map(|(input, output_dir)| {
            let ctx = match cli_ref.timeout {
                Some(secs) => root.child().with_timeout(Duration::from_secs(secs)),
                None => root.child(),
            };
            async move {
                let report = run_job(engine, cli_ref, &ctx, input, output_dir).await;
                if let Some(bar) = bar_ref {
                    bar.inc(1);
                }
                report
            }
        })
        .buffer_unordered(cli.concurrency.max(1))
        .collect()
        .await;

    if let Some(bar) = bar {
        bar.finish_and_clear();
    }

    // Keep the report in the order the inputs were given.
    let order: Vec<PathBuf> = cli.inputs.clone();
    reports.sort_by_key(|r| order.iter().position(|p| p == &r.input));

    // ── Print ────────────────────────────────────────────────────────────
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&reports).context("Failed to serialise report")?
        );
    } else {
        for report in &reports {
            for page in &report.pages {
                println!("{}", page.display());
            }
        }
    }

    let failed = reports.iter().filter(|r| r.error.is_some()).count();
    if !cli.quiet && !cli.json {
        for report in reports.iter().filter(|r| r.error.is_some()) {
            eprintln!(
                "{} {}  {}",
                red("✘"),
                bold(&report.input.display().to_string()),
                report.error.as_deref().unwrap_or_default()
            );
        }
        let pages: usize = reports.iter().map(|r| r.pages.len()).sum();
        eprintln!(
            "{} {}/{} files, {} pages",
            if failed == 0 { green("✔") } else { red("✘") },
            reports.len() - failed,
            reports.len(),
            bold(&pages.to_string()),
        );
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} conversions failed", reports.len());
    }
    Ok(())
}

/// Read the environment once, letting `--bin` replace the binary path.
fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let binary = cli.binary.clone();
    let config = EngineConfig::from_lookup(|key| match (key, &binary) {
        (ENV_BIN_PATH, Some(path)) => Some(path.display().to_string()),
        (ENV_BIN_PATH | ENV_DPI | ENV_ANTIALIASING, _) => std::env::var(key).ok(),
        _ => None,
    })?;
    Ok(config)
}

/// Pair every input with its output directory.
///
/// A single input writes straight into `--output-dir`; several inputs each
/// get a sub-directory named after the file stem so their globs never mix.
fn plan_jobs(cli: &Cli) -> Result<Vec<(PathBuf, PathBuf)>> {
    if cli.inputs.len() == 1 {
        return Ok(vec![(cli.inputs[0].clone(), cli.output_dir.clone())]);
    }

    let mut jobs = Vec::with_capacity(cli.inputs.len());
    let mut seen = std::collections::HashSet::new();
    for input in &cli.inputs {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .with_context(|| format!("Input {:?} has no file name", input))?;
        if !seen.insert(stem.clone()) {
            anyhow::bail!(
                "Two inputs share the name '{}'; convert them separately to keep their pages apart",
                stem
            );
        }
        jobs.push((input.clone(), cli.output_dir.join(stem)));
    }
    Ok(jobs)
}

async fn run_job(
    engine: &PdfToPpm,
    cli: &Cli,
    ctx: &ExecContext,
    input: PathBuf,
    output_dir: PathBuf,
) -> DocumentReport {
    let start = Instant::now();
    let result = build_request(cli, &input, &output_dir);
    let result = match result {
        Ok(request) => engine.convert_with_options(ctx, &request).await.map_err(|e| e.to_string()),
        Err(e) => Err(format!("{e:#}")),
    };

    let (pages, error) = match result {
        Ok(mut pages) => {
            if cli.sort {
                sort_by_page_number(&mut pages);
            }
            if pages.is_empty() && !cli.quiet {
                eprintln!(
                    "{} {} produced no pages",
                    dim("!"),
                    input.display()
                );
            }
            (pages, None)
        }
        Err(e) => (Vec::new(), Some(e)),
    };

    DocumentReport {
        input,
        output_dir,
        pages,
        error,
        duration_ms: start.elapsed().as_millis() as u64,
    }
}

fn build_request(cli: &Cli, input: &Path, output_dir: &Path) -> Result<ConversionRequest> {
    let mut builder = ConversionRequest::builder(input, output_dir, "png");
    if let Some(dpi) = cli.dpi {
        builder = builder.dpi(dpi);
    }
    if let Some(aa) = cli.antialiasing {
        builder = builder.antialiasing(aa.into());
    }
    builder.build().context("Invalid conversion request")
}
