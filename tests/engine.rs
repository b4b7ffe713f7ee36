//! Integration tests for the pdftoppm engine.
//!
//! These run against a small shell script standing in for pdftoppm, so they
//! need no poppler install. The script reads the first line of the "PDF" it
//! is given to decide what to do:
//!
//! | Input line | Behaviour |
//! |------------|-----------|
//! | `pages N`  | write `<prefix>-1.png` … `<prefix>-N.png`, exit 0 |
//! | `fail`     | print a poppler-style error on stderr, exit 1 |
//! | `hang`     | fork a child that would write `<dir>/survivor` after 2s, then wait forever |
//! | `orphan`   | write `<prefix>-1.png`, fork the same child, exit 0 at once |
//! | `detached` | like `hang`, but the child closes its inherited stdio |
//! | `empty`    | write nothing, exit 0 |
//!
//! It also records its argv, one per line, in `<dir>/argv.txt`.
//!
//! Run with:
//!   cargo test --test engine -- --nocapture
#![cfg(unix)]

use edgequake_pdf2png::{
    sort_by_page_number, Antialiasing, ConversionRequest, ConverterRegistry, EngineConfig,
    ExecContext, ImageConverter, Pdf2PngError, PdfToPpm,
};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tempfile::TempDir;

// ── Test helpers ─────────────────────────────────────────────────────────────

const FAKE_PDFTOPPM: &str = r#"#!/bin/sh
if [ "$1" = "-v" ]; then
  echo "pdftoppm version 24.02.0" 1>&2
  exit 0
fi
input="$6"
prefix="$7"
dir=$(dirname "$prefix")
printf '%s\n' "$@" > "$dir/argv.txt"
mode=$(head -n 1 "$input")
case "$mode" in
  pages*)
    n=${mode#pages }
    i=1
    while [ "$i" -le "$n" ]; do
      printf 'png' > "$prefix-$i.png"
      i=$((i + 1))
    done
    ;;
  fail)
    echo "Syntax Error: Couldn't read xref table" 1>&2
    exit 1
    ;;
  hang)
    (sleep 2; touch "$dir/survivor") &
    sleep 60
    ;;
  orphan)
    printf 'png' > "$prefix-1.png"
    (sleep 2; touch "$dir/survivor") &
    exit 0
    ;;
  detached)
    (sleep 2; touch "$dir/survivor") </dev/null >/dev/null 2>&1 &
    sleep 60
    ;;
  empty)
    ;;
esac
exit 0
"#;

/// A pdftoppm that never answers, not even `-v`.
const STUCK_PDFTOPPM: &str = "#!/bin/sh\nsleep 30\n";

struct FakeBins {
    _dir: TempDir,
    pdftoppm: PathBuf,
    stuck: PathBuf,
}

/// Written once per test binary: writing an executable while other test
/// threads fork can make exec fail with ETXTBSY.
fn fake_bins() -> &'static FakeBins {
    static BINS: OnceLock<FakeBins> = OnceLock::new();
    BINS.get_or_init(|| {
        let dir = tempfile::tempdir().expect("tempdir");
        let write = |name: &str, script: &str| {
            let path = dir.path().join(name);
            std::fs::write(&path, script).expect("write fake binary");
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .expect("chmod fake binary");
            path
        };
        let pdftoppm = write("pdftoppm", FAKE_PDFTOPPM);
        let stuck = write("pdftoppm-stuck", STUCK_PDFTOPPM);
        FakeBins {
            _dir: dir,
            pdftoppm,
            stuck,
        }
    })
}

fn fake_bin() -> &'static Path {
    &fake_bins().pdftoppm
}

fn engine() -> PdfToPpm {
    let config = EngineConfig::builder(fake_bin()).build().unwrap();
    PdfToPpm::with_validated(config).expect("fake binary validates")
}

/// Scratch dir with an input "PDF" whose first line is `mode`.
fn scratch(mode: &str) -> (TempDir, PathBuf, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.pdf");
    std::fs::write(&input, format!("{mode}\n")).unwrap();
    let out = dir.path().join("out");
    std::fs::create_dir(&out).unwrap();
    (dir, input, out)
}

fn recorded_argv(out: &Path) -> Vec<String> {
    std::fs::read_to_string(out.join("argv.txt"))
        .expect("fake pdftoppm recorded its argv")
        .lines()
        .map(str::to_string)
        .collect()
}

// ── Conversion ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn single_page_yields_page_1() {
    let (_dir, input, out) = scratch("pages 1");
    let pages = engine()
        .convert(&ExecContext::new(), &input, &out, "png")
        .await
        .expect("conversion succeeds");
    assert_eq!(pages, vec![out.join("page-1.png")]);
}

#[tokio::test]
async fn multi_page_yields_one_path_per_page() {
    let (_dir, input, out) = scratch("pages 12");
    let mut pages = engine()
        .convert(&ExecContext::new(), &input, &out, "png")
        .await
        .unwrap();
    assert_eq!(pages.len(), 12);

    sort_by_page_number(&mut pages);
    let expected: Vec<PathBuf> = (1..=12).map(|i| out.join(format!("page-{i}.png"))).collect();
    assert_eq!(pages, expected);
}

#[tokio::test]
async fn defaults_are_203_dpi_without_antialiasing() {
    let (_dir, input, out) = scratch("pages 1");
    engine()
        .convert(&ExecContext::new(), &input, &out, "png")
        .await
        .unwrap();

    let argv = recorded_argv(&out);
    assert_eq!(
        argv,
        vec![
            "-png".to_string(),
            "-r".into(),
            "203".into(),
            "-aa".into(),
            "no".into(),
            input.display().to_string(),
            out.join("page").display().to_string(),
        ]
    );
}

#[tokio::test]
async fn explicit_options_override_configured_defaults() {
    let (_dir, input, out) = scratch("pages 1");
    let config = EngineConfig::builder(fake_bin())
        .default_dpi(96)
        .default_antialiasing(Antialiasing::No)
        .build()
        .unwrap();
    let engine = PdfToPpm::new(config);
    let request = ConversionRequest::builder(&input, &out, "png")
        .dpi(300)
        .antialiasing(Antialiasing::Yes)
        .build()
        .unwrap();

    engine
        .convert_with_options(&ExecContext::new(), &request)
        .await
        .unwrap();

    let argv = recorded_argv(&out);
    assert_eq!(&argv[1..5], &["-r", "300", "-aa", "yes"]);
}

#[tokio::test]
async fn unsupported_format_spawns_no_process() {
    let (_dir, input, out) = scratch("pages 3");
    let err = engine()
        .convert(&ExecContext::new(), &input, &out, "jpeg")
        .await
        .unwrap_err();

    assert!(matches!(err, Pdf2PngError::UnsupportedOperation { ref format } if format == "jpeg"));
    // The fake would have written argv.txt had it been started.
    assert_eq!(std::fs::read_dir(&out).unwrap().count(), 0);
}

#[tokio::test]
async fn non_zero_exit_carries_stderr() {
    let (_dir, input, out) = scratch("fail");
    let err = engine()
        .convert(&ExecContext::new(), &input, &out, "png")
        .await
        .unwrap_err();

    match err {
        Pdf2PngError::ExecutionFailed { status, stderr } => {
            assert_eq!(status, "1");
            assert!(stderr.contains("Couldn't read xref table"), "got: {stderr}");
        }
        other => panic!("expected ExecutionFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn zero_pages_is_empty_not_error() {
    let (_dir, input, out) = scratch("empty");
    let pages = engine()
        .convert(&ExecContext::new(), &input, &out, "png")
        .await
        .unwrap();
    assert!(pages.is_empty());
}

#[tokio::test]
async fn stale_outputs_are_included() {
    let (_dir, input, out) = scratch("pages 1");
    std::fs::write(out.join("page-7.png"), b"stale").unwrap();

    let mut pages = engine()
        .convert(&ExecContext::new(), &input, &out, "png")
        .await
        .unwrap();
    sort_by_page_number(&mut pages);
    assert_eq!(pages, vec![out.join("page-1.png"), out.join("page-7.png")]);
}

// ── Cancellation ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn cancellation_kills_the_process_group() {
    let (_dir, input, out) = scratch("hang");
    let ctx = ExecContext::new();
    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let err = engine()
        .convert(&ctx, &input, &out, "png")
        .await
        .unwrap_err();
    assert!(matches!(err, Pdf2PngError::ExecutionCancelled), "got {err:?}");
    assert!(started.elapsed() < Duration::from_secs(5));

    // The forked grandchild would create this file 2s after starting.
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!out.join("survivor").exists(), "grandchild outlived cancellation");
}

#[tokio::test]
async fn deadline_times_out_and_kills_the_process_group() {
    let (_dir, input, out) = scratch("hang");
    let ctx = ExecContext::new().with_timeout(Duration::from_millis(300));

    let err = engine()
        .convert(&ctx, &input, &out, "png")
        .await
        .unwrap_err();
    assert!(matches!(err, Pdf2PngError::ExecutionTimedOut { .. }), "got {err:?}");

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!out.join("survivor").exists(), "grandchild outlived the deadline");
}

#[tokio::test]
async fn leftover_children_are_killed_when_pdftoppm_exits() {
    let (_dir, input, out) = scratch("orphan");

    let started = Instant::now();
    let pages = engine()
        .convert(&ExecContext::new(), &input, &out, "png")
        .await
        .expect("conversion succeeds");
    assert_eq!(pages, vec![out.join("page-1.png")]);
    // The forked child keeps our stdout pipe open; we must not wait on it.
    assert!(
        started.elapsed() < Duration::from_millis(1500),
        "waited {:?} for the leftover child",
        started.elapsed()
    );

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!out.join("survivor").exists(), "child outlived its parent pdftoppm");
}

#[tokio::test]
async fn dropping_the_conversion_kills_the_process_group() {
    let (_dir, input, out) = scratch("detached");
    let engine = engine();
    let ctx = ExecContext::new();

    let res = tokio::time::timeout(
        Duration::from_millis(300),
        engine.convert(&ctx, &input, &out, "png"),
    )
    .await;
    assert!(res.is_err(), "conversion should still be running when dropped");

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!out.join("survivor").exists(), "child outlived the dropped conversion");
}

#[tokio::test]
async fn concurrent_calls_are_independent() {
    let engine = Arc::new(engine());
    let mut handles = Vec::new();
    for n in 1..=4usize {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            let (dir, input, out) = scratch(&format!("pages {n}"));
            let pages = engine
                .convert(&ExecContext::new(), &input, &out, "png")
                .await
                .unwrap();
            drop(dir);
            (n, pages.len())
        }));
    }
    for handle in handles {
        let (n, count) = handle.await.unwrap();
        assert_eq!(n, count);
    }
}

// ── Diagnostics and registry ─────────────────────────────────────────────────

#[test]
fn describe_reads_version_from_stderr() {
    let info = engine().describe();
    assert_eq!(
        info.get("version").map(String::as_str),
        Some("pdftoppm version 24.02.0")
    );
}

#[test]
fn describe_gives_up_on_a_stuck_binary() {
    let config = EngineConfig::builder(&fake_bins().stuck).build().unwrap();
    let engine = PdfToPpm::with_validated(config).unwrap();

    let started = Instant::now();
    let info = engine.describe_within(Duration::from_millis(300));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(
        info.get("version").map(String::as_str),
        Some("timed out after 300ms")
    );
}

#[tokio::test]
async fn registry_dispatches_to_pdftoppm() {
    let mut registry = ConverterRegistry::new();
    registry.register(Arc::new(engine())).unwrap();
    let converter = registry.get("pdftoppm").expect("pdftoppm registered");

    let (_dir, input, out) = scratch("pages 2");
    let request = ConversionRequest::builder(&input, &out, "png").build().unwrap();
    let pages = converter.convert(&ExecContext::new(), &request).await.unwrap();
    assert_eq!(pages.len(), 2);
}
