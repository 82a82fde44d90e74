//! CLI binary for license-scan.
//!
//! A thin shim over the library crate that maps CLI flags to `ScanConfig`,
//! runs a one-shot scan and prints the decoded fields.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use license_scan::{
    load_image, output, scan_with_crops, AttemptError, AttemptStage, Dimensions, OutputFormat,
    Pdf417Decoder, ProgressCallback, ScanConfig, ScanProgressCallback, ScanReport,
};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a spinner naming the current attempt plus one
/// log line per finished attempt.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Start of the attempt currently running.
    attempt_started: Mutex<Option<Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(style);
        bar.set_prefix("Scanning");
        bar.set_message("Loading image…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            attempt_started: Mutex::new(None),
        })
    }

    fn elapsed(&self) -> String {
        let secs = self
            .attempt_started
            .lock()
            .ok()
            .and_then(|mut started| started.take())
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        dim(&format!("{secs:.1}s"))
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ScanProgressCallback for CliProgressCallback {
    fn on_session_start(&self, image_bytes: usize) {
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Scanning back image ({} KB)…", image_bytes.div_ceil(1024)))
        ));
    }

    fn on_attempt_start(&self, stage: AttemptStage) {
        if let Ok(mut started) = self.attempt_started.lock() {
            *started = Some(Instant::now());
        }
        self.bar.set_message(stage.to_string());
    }

    fn on_attempt_failed(&self, stage: AttemptStage, error: &AttemptError) {
        let msg = error.to_string();
        let msg = if msg.chars().count() > 80 {
            format!("{}\u{2026}", msg.chars().take(79).collect::<String>())
        } else {
            msg
        };
        self.bar.println(format!(
            "  {} {:<20}  {}  {}",
            red("✗"),
            stage.to_string(),
            dim(&msg),
            self.elapsed(),
        ));
    }

    fn on_crop_required(&self, attempt_index: u32, target: Dimensions) {
        self.bar.println(format!(
            "  {} manual crop required  {}",
            cyan("◆"),
            dim(&format!("attempt {} · canvas {}", attempt_index + 1, target)),
        ));
        self.bar.set_message("waiting for crop");
    }

    fn on_decoded(&self, field_count: usize) {
        let elapsed = self.elapsed();
        self.finish();
        eprintln!(
            "{} {} fields decoded  {}",
            green("✔"),
            bold(&field_count.to_string()),
            elapsed
        );
    }

    fn on_exhausted(&self, attempts: u32) {
        self.finish();
        eprintln!("{} gave up after {} crop attempts", red("✘"), attempts);
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Scan a photo of a license back
  license-scan back.jpg

  # Supply pre-cropped regions for the manual-crop retries
  license-scan back.jpg --crop crop1.png --crop crop2.png

  # Save the image to crop when automatic decoding fails
  license-scan back.jpg --save-normalized to-crop.jpg

  # Full result (fields, raw text, attempt log) as JSON
  license-scan --json back.jpg > result.json

  # Field map to a file
  license-scan back.jpg -o fields.json

ESCALATION:
  1. decode the image as-is
  2. orient + stretch to --upscale-size, decode again
  3. for each --crop: stretch to the current canvas and decode;
     the canvas grows by --growth-step after every failure,
     up to --max-attempts crops

EXIT STATUS:
  0  fields decoded
  1  error (bad input, all attempts failed)
  2  a manual crop is needed and no --crop was left

ENVIRONMENT VARIABLES:
  RUST_LOG                       Override log filter (e.g. license_scan=debug)
  LICENSE_SCAN_MAX_ATTEMPTS      Same as --max-attempts
  LICENSE_SCAN_UPSCALE_SIZE      Same as --upscale-size
  LICENSE_SCAN_FORMAT            Same as --format
"#;

/// Read the PDF417 barcode on a driver's license back and print its fields.
#[derive(Parser, Debug)]
#[command(
    name = "license-scan",
    version,
    about = "Read a driver's license PDF417 barcode and print the AAMVA fields",
    long_about = "Decode the PDF417 barcode on the back of a driver's license and parse its \
AAMVA payload into named fields. Falls back to upscaling and to caller-supplied crops when the \
barcode cannot be read directly.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// JPEG or PNG photo of the license back.
    back_image: PathBuf,

    /// Cropped region around the barcode, used in order for manual-crop retries.
    #[arg(long = "crop", value_name = "FILE")]
    crops: Vec<PathBuf>,

    /// Write the field map as JSON to this file.
    #[arg(short, long, env = "LICENSE_SCAN_OUTPUT")]
    output: Option<PathBuf>,

    /// Print the full result (fields, raw text, attempts) as JSON.
    #[arg(long, env = "LICENSE_SCAN_JSON")]
    json: bool,

    /// When a crop is needed, save the image to crop from here.
    #[arg(long, value_name = "FILE", env = "LICENSE_SCAN_SAVE_NORMALIZED")]
    save_normalized: Option<PathBuf>,

    /// Manual-crop attempts before giving up.
    #[arg(long, env = "LICENSE_SCAN_MAX_ATTEMPTS", default_value_t = 3,
          value_parser = clap::value_parser!(u32).range(1..))]
    max_attempts: u32,

    /// Starting canvas, WIDTHxHEIGHT.
    #[arg(long, env = "LICENSE_SCAN_INITIAL_SIZE", default_value = "1920x1920",
          value_parser = parse_size)]
    initial_size: Dimensions,

    /// Canvas for the automatic upscale retry, WIDTHxHEIGHT.
    #[arg(long, env = "LICENSE_SCAN_UPSCALE_SIZE", default_value = "3000x3000",
          value_parser = parse_size)]
    upscale_size: Dimensions,

    /// Pixels added to both axes after each failed crop.
    #[arg(long, env = "LICENSE_SCAN_GROWTH_STEP", default_value_t = 500,
          value_parser = clap::value_parser!(u32).range(1..))]
    growth_step: u32,

    /// Encoding of normalised images.
    #[arg(long, env = "LICENSE_SCAN_FORMAT", value_enum, default_value = "jpeg")]
    format: FormatArg,

    /// JPEG quality (1–100).
    #[arg(long, env = "LICENSE_SCAN_QUALITY", default_value_t = 90,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: u8,

    /// Largest accepted image, in MiB.
    #[arg(long, env = "LICENSE_SCAN_MAX_INPUT_MB", default_value_t = 100)]
    max_input_mb: usize,

    /// Skip the decoder's slower exhaustive search.
    #[arg(long, env = "LICENSE_SCAN_NO_TRY_HARDER")]
    no_try_harder: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "LICENSE_SCAN_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "LICENSE_SCAN_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and results.
    #[arg(short, long, env = "LICENSE_SCAN_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Jpeg,
    Png,
}

fn parse_size(s: &str) -> Result<Dimensions, String> {
    let (w, h) = s
        .trim()
        .to_ascii_lowercase()
        .split_once('x')
        .map(|(w, h)| (w.trim().to_string(), h.trim().to_string()))
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{s}'"))?;
    let w: u32 = w.parse().map_err(|_| format!("invalid width '{w}'"))?;
    let h: u32 = h.parse().map_err(|_| format!("invalid height '{h}'"))?;
    if w == 0 || h == 0 {
        return Err(format!("size must be at least 1x1, got '{s}'"));
    }
    Ok(Dimensions::new(w, h))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner carries the per-attempt feedback, so library INFO logs are
    // suppressed while it is shown.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
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

    // ── Build config ─────────────────────────────────────────────────────
    let progress = show_progress.then(CliProgressCallback::new);
    let config = build_config(
        &cli,
        progress.clone().map(|cb| cb as Arc<dyn ScanProgressCallback>),
    )?;

    // ── Load images ──────────────────────────────────────────────────────
    let back = load_image(&cli.back_image)
        .with_context(|| format!("Failed to load {}", cli.back_image.display()))?;
    let crops = cli
        .crops
        .iter()
        .map(|p| load_image(p).with_context(|| format!("Failed to load crop {}", p.display())))
        .collect::<Result<Vec<_>>>()?;

    // ── Run scan ─────────────────────────────────────────────────────────
    let decoder = Arc::new(Pdf417Decoder::new(config.try_harder));
    let report = scan_with_crops(back, crops, &config, decoder).await;
    if let Some(cb) = &progress {
        cb.finish();
    }

    match report.context("Scan failed")? {
        ScanReport::Decoded(result) => {
            if let Some(ref path) = cli.output {
                output::write_json(path, &result.fields)
                    .await
                    .context("Failed to write field map")?;
                if !cli.quiet {
                    eprintln!("{}  →  {}", green("✔"), bold(&path.display().to_string()));
                }
            }

            if cli.json {
                let json =
                    serde_json::to_string_pretty(&result).context("Failed to serialise result")?;
                println!("{json}");
            } else if cli.output.is_none() {
                let width = result
                    .fields
                    .iter()
                    .map(|(field, _)| field.name().len())
                    .max()
                    .unwrap_or(0);
                for (field, value) in &result.fields {
                    println!("{:<width$}  {}", format!("{field}:"), value, width = width + 1);
                }
            }

            if !cli.quiet && !result.unmapped_tags.is_empty() {
                eprintln!(
                    "   {}",
                    dim(&format!("unmapped tags: {}", result.unmapped_tags.join(", ")))
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        ScanReport::NeedsCrop(request) => {
            if let Some(ref path) = cli.save_normalized {
                tokio::fs::write(path, request.base.image().bytes())
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?;
            }
            eprintln!(
                "{} The barcode could not be read automatically.",
                cyan("⚠")
            );
            eprintln!(
                "   Crop tightly around the barcode and pass it with --crop ({} attempts left, canvas {}).",
                request.remaining_attempts, request.target
            );
            if let Some(ref path) = cli.save_normalized {
                eprintln!("   Image to crop saved to {}", bold(&path.display().to_string()));
            }
            Ok(ExitCode::from(2))
        }
    }
}

/// Map CLI args to `ScanConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ScanConfig> {
    let output_format = match cli.format {
        FormatArg::Jpeg => OutputFormat::Jpeg {
            quality: cli.quality,
        },
        FormatArg::Png => OutputFormat::Png,
    };

    let mut builder = ScanConfig::builder()
        .initial_size(cli.initial_size.width, cli.initial_size.height)
        .upscale_size(cli.upscale_size.width, cli.upscale_size.height)
        .growth_step(cli.growth_step)
        .max_attempts(cli.max_attempts)
        .max_input_bytes(cli.max_input_mb.saturating_mul(1024 * 1024))
        .output_format(output_format)
        .try_harder(!cli.no_try_harder);

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_size_accepts_width_x_height() {
        assert_eq!(parse_size("3000x2000"), Ok(Dimensions::new(3000, 2000)));
        assert_eq!(parse_size(" 640 X 480 "), Ok(Dimensions::new(640, 480)));
    }

    #[test]
    fn parse_size_rejects_malformed_and_zero() {
        assert!(parse_size("3000").is_err());
        assert!(parse_size("axb").is_err());
        assert!(parse_size("0x100").is_err());
    }

    #[test]
    fn flags_map_onto_scan_config() {
        let cli = Cli::try_parse_from([
            "license-scan",
            "back.jpg",
            "--crop",
            "a.png",
            "--crop",
            "b.png",
            "--upscale-size",
            "4000x3500",
            "--growth-step",
            "250",
            "--format",
            "png",
            "--max-input-mb",
            "2",
        ])
        .unwrap();
        assert_eq!(cli.crops.len(), 2);

        let config = build_config(&cli, None).unwrap();
        assert_eq!(config.upscale_size, Dimensions::new(4000, 3500));
        assert_eq!(config.growth_step, 250);
        assert_eq!(config.output_format, OutputFormat::Png);
        assert_eq!(config.max_input_bytes, 2 * 1024 * 1024);
        assert!(config.try_harder);
    }
}
