//! CLI binary for edgequake-pdfdetect.
//!
//! A thin shim over the library crate: maps CLI flags to `DetectionConfig`,
//! loads the ONNX model and writes the annotated PDF plus the JSON report.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_pdfdetect::{
    detect_to_files, inspect, DetectionConfig, DetectionProgressCallback, Detector, OnnxDetector,
    OnnxDetectorConfig, OutputPaths, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar with one log line per finished page. Pages may finish
/// out of order when `--page-concurrency` > 1.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    /// Pages that reported at least one recovered error.
    flagged: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_document_start` tells us the page count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Rendering PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            flagged: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Detecting");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut times| times.remove(&page_num))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl DetectionProgressCallback for CliProgressCallback {
    fn on_document_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Scanning {total_pages} pages…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        if let Ok(mut times) = self.start_times.lock() {
            times.insert(page_num, Instant::now());
        }
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, detections: usize) {
        let elapsed = self.elapsed_secs(page_num);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<16}  {}",
            green("✓"),
            page_num,
            total,
            dim(&format!("{detections:>3} detections")),
            dim(&format!("{elapsed:.1}s")),
        ));
        self.bar.inc(1);
    }

    // Recovered failures: the page still completes, so no `inc` here.
    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        self.flagged.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(std::iter::once('…')).collect()
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}",
            yellow("⚠"),
            page_num,
            total,
            yellow(&msg),
        ));
    }

    fn on_document_complete(&self, total_pages: usize, total_detections: usize) {
        self.bar.finish_and_clear();
        let flagged = self.flagged.load(Ordering::SeqCst);
        if flagged == 0 {
            eprintln!(
                "{} {} detections on {} pages",
                green("✔"),
                bold(&total_detections.to_string()),
                total_pages
            );
        } else {
            eprintln!(
                "{} {} detections on {} pages  ({} warnings)",
                cyan("⚠"),
                bold(&total_detections.to_string()),
                total_pages,
                yellow(&flagged.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Annotate a scan (writes contract.annotated.pdf next to the input)
  pdfdetect --model models/yolov8s.onnx contract.pdf

  # Choose output paths and keep the JSON report
  pdfdetect --model yolov8s.onnx invoice.pdf -o out/invoice.pdf --report out/invoice.json

  # Two-pass mode: denoise + adaptive threshold, corner QR pass
  pdfdetect --model yolov8s.onnx --denoise --threshold scan.pdf

  # Also write a side-by-side preprocessing preview
  pdfdetect --model yolov8s.onnx --clahe --preview preview.pdf scan.pdf

  # From a URL, report on stdout
  pdfdetect --model yolov8s.onnx --json https://example.com/form.pdf

  # Inspect PDF metadata (no model needed)
  pdfdetect --inspect document.pdf

CLASSES:
  0  signature   red boxes
  1  stamp       green boxes
  2  qr_code     blue boxes

ENVIRONMENT VARIABLES:
  PDFDETECT_MODEL     Path to the YOLOv8 ONNX model
  PDFIUM_LIB_PATH     Path to libpdfium (file or directory)
  RUST_LOG            Override log filter (e.g. edgequake_pdfdetect=debug)
"#;

/// Locate signatures, stamps and QR codes in PDF documents.
#[derive(Parser, Debug)]
#[command(
    name = "pdfdetect",
    version,
    about = "Locate signatures, stamps and QR codes in PDF documents",
    long_about = "Rasterise each page of a PDF (local file or URL), run a YOLOv8 ONNX detector \
over it, and write an annotated copy of the document plus a JSON report. Enabling any \
preprocessing flag adds a second pass over the enhanced bottom-right corner to recover small \
QR codes.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Annotated PDF path. Default: `<input>.annotated.pdf`.
    #[arg(short, long, env = "PDFDETECT_OUTPUT")]
    output: Option<PathBuf>,

    /// Write the JSON report to this file.
    #[arg(long, env = "PDFDETECT_REPORT")]
    report: Option<PathBuf>,

    /// Print the JSON report to stdout.
    #[arg(long, env = "PDFDETECT_JSON")]
    json: bool,

    /// YOLOv8 ONNX model (classes: signature, stamp, qr_code).
    #[arg(long, env = "PDFDETECT_MODEL", required_unless_present = "inspect")]
    model: Option<PathBuf>,

    /// Minimum detection confidence, exclusive range (0, 1).
    #[arg(long, env = "PDFDETECT_CONFIDENCE", default_value_t = 0.5)]
    confidence: f32,

    /// IOU above which same-class boxes are duplicates, range (0, 1).
    #[arg(long, env = "PDFDETECT_IOU", default_value_t = 0.45)]
    iou: f32,

    /// Maximum detections per pass (1–1000).
    #[arg(long, env = "PDFDETECT_MAX_DETECTIONS", default_value_t = 100,
          value_parser = clap::value_parser!(u32).range(1..=1000))]
    max_detections: u32,

    /// Contrast-limited histogram equalisation on luminance.
    #[arg(long, env = "PDFDETECT_CLAHE")]
    clahe: bool,

    /// Edge-preserving bilateral denoise.
    #[arg(long, env = "PDFDETECT_DENOISE")]
    denoise: bool,

    /// Adaptive Gaussian binarisation.
    #[arg(long, env = "PDFDETECT_THRESHOLD")]
    threshold: bool,

    /// Rendering DPI (72–400).
    #[arg(long, env = "PDFDETECT_DPI", default_value_t = 144,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Corner crop size as a fraction of page width and height, (0, 1].
    #[arg(long, env = "PDFDETECT_CORNER_FRACTION", default_value_t = 0.10)]
    corner_fraction: f32,

    /// Pages processed concurrently.
    #[arg(short = 'c', long, env = "PDFDETECT_PAGE_CONCURRENCY", default_value_t = 4)]
    page_concurrency: usize,

    /// Whole-request timeout in seconds.
    #[arg(long, env = "PDFDETECT_TIMEOUT")]
    timeout: Option<u64>,

    /// Write a side-by-side original/enhanced preview PDF here.
    #[arg(long, env = "PDFDETECT_PREVIEW")]
    preview: Option<PathBuf>,

    /// TrueType font for box labels.
    #[arg(long, env = "PDFDETECT_FONT")]
    font: Option<PathBuf>,

    /// Print PDF metadata only, no detection.
    #[arg(long)]
    inspect: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDFDETECT_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Disable progress bar.
    #[arg(long, env = "PDFDETECT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDFDETECT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDFDETECT_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs unless --verbose asks for them.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    // ── Inspect mode ─────────────────────────────────────────────────────
    if cli.inspect {
        let meta = inspect(&cli.input).await.context("Failed to inspect PDF")?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&meta).context("Failed to serialize metadata")?
            );
        } else {
            println!("File:         {}", cli.input);
            if let Some(ref t) = meta.title {
                println!("Title:        {t}");
            }
            if let Some(ref a) = meta.author {
                println!("Author:       {a}");
            }
            if let Some(ref s) = meta.subject {
                println!("Subject:      {s}");
            }
            println!("Pages:        {}", meta.page_count);
            println!("PDF Version:  {}", meta.pdf_version);
            if let Some(ref p) = meta.producer {
                println!("Producer:     {p}");
            }
            if let Some(ref c) = meta.creator {
                println!("Creator:      {c}");
            }
        }
        return Ok(());
    }

    // ── Model ────────────────────────────────────────────────────────────
    let model_path = cli.model.as_ref().context("--model is required")?;
    let detector = tokio::task::block_in_place(|| OnnxDetector::new(model_path, OnnxDetectorConfig::default()))
        .with_context(|| format!("Failed to load model {}", model_path.display()))?;
    let detector: Arc<dyn Detector> = Arc::new(detector);

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new_dynamic() as Arc<dyn DetectionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    let outputs = OutputPaths {
        pdf: cli.output.clone().unwrap_or_else(|| default_output_path(&cli.input)),
        report: cli.report.clone(),
        preview: cli.preview.clone(),
    };

    // ── Run detection ────────────────────────────────────────────────────
    let output = detect_to_files(&cli.input, &outputs, detector, &config)
        .await
        .context("Detection failed")?;

    if cli.json {
        println!("{}", output.report.to_json().context("Failed to serialise report")?);
    }

    if !cli.quiet {
        let flagged = output
            .report
            .page_stats
            .iter()
            .filter(|p| p.render_failed || p.detector_failed)
            .count();
        eprintln!(
            "{}  {} pages  {}ms  →  {}",
            if flagged == 0 { green("✔") } else { cyan("⚠") },
            output.report.total_pages,
            output.stats.total_duration_ms,
            bold(&outputs.pdf.display().to_string()),
        );
        let per_class: Vec<String> = output
            .report
            .detections_per_class
            .iter()
            .map(|(class, n)| format!("{class}: {n}"))
            .collect();
        eprintln!("   {}", dim(&per_class.join("  ")));
        if let Some(ref path) = outputs.report {
            eprintln!("   report  →  {}", path.display());
        }
        match (&outputs.preview, &output.preview_pdf) {
            (Some(path), Some(_)) => eprintln!("   preview →  {}", path.display()),
            (Some(_), None) => eprintln!(
                "   {}",
                yellow("preview skipped: enable --clahe, --denoise or --threshold")
            ),
            _ => {}
        }
    }

    Ok(())
}

/// Map CLI args to `DetectionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<DetectionConfig> {
    let mut builder = DetectionConfig::builder()
        .confidence_threshold(cli.confidence)
        .iou_threshold(cli.iou)
        .max_detections(cli.max_detections as usize)
        .use_clahe(cli.clahe)
        .use_denoise(cli.denoise)
        .use_threshold(cli.threshold)
        .dpi(cli.dpi)
        .corner_fraction(cli.corner_fraction)
        .page_concurrency(cli.page_concurrency)
        .preview_preprocessing(cli.preview.is_some())
        .download_timeout_secs(cli.download_timeout);

    if let Some(secs) = cli.timeout {
        builder = builder.timeout_secs(secs);
    }
    if let Some(ref font) = cli.font {
        builder = builder.label_font(font.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// `scan.pdf` → `scan.annotated.pdf`; URLs land in the working directory.
fn default_output_path(input: &str) -> PathBuf {
    let stem = if input.starts_with("http://") || input.starts_with("https://") {
        input
            .rsplit('/')
            .find(|s| !s.is_empty())
            .map(|s| s.trim_end_matches(".pdf").to_string())
            .unwrap_or_else(|| "document".to_string())
    } else {
        Path::new(input)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string())
    };
    let name = format!("{stem}.annotated.pdf");
    if input.starts_with("http://") || input.starts_with("https://") {
        PathBuf::from(name)
    } else {
        Path::new(input).with_file_name(name)
    }
}
