//! CLI binary for share-image.
//!
//! A thin shim over the library crate: maps flags to `PipelineConfig`,
//! `GenerationOptions` and `StyleSnapshot`, renders through the block
//! rasterizer, and exposes the persisted history.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use share_image::{
    BlockRasterizer, CaptureRequest, DomTarget, Event, FileStore, GenerationOptions, Generator,
    HistoryEntry, ImageFormat, Notifier, PipelineConfig, SharedNotifier, Storage, StyleSnapshot,
};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress sink using indicatif ────────────────────────────────────────

/// Terminal notifier: a spinner while a single capture runs, a page bar
/// once a batch announces its size, and one log line per degraded path.
struct CliNotifier {
    bar: ProgressBar,
}

impl CliNotifier {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Rendering");
        bar.set_message("preparing card…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn activate_bar(&self, total: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Exporting");
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Notifier for CliNotifier {
    fn notify(&self, event: &Event) {
        match event {
            Event::BatchStart { total } => {
                self.activate_bar(*total);
                self.bar.println(format!(
                    "{} {}",
                    cyan("◆"),
                    bold(&format!("Exporting {total} pages…"))
                ));
            }
            Event::Rendering { page, scale } => {
                self.bar.set_message(format!("page {page} @ {scale}x"));
            }
            Event::CaptureSuccess {
                page,
                width,
                height,
                bytes,
            } => {
                self.bar.println(format!(
                    "  {} Page {:>3}  {}  {}",
                    green("✓"),
                    page,
                    dim(&format!("{width}×{height}")),
                    dim(&format!("{:.1} KiB", *bytes as f64 / 1024.0)),
                ));
            }
            Event::CaptureError { page, message } => {
                let msg = if message.chars().count() > 80 {
                    let cut: String = message.chars().take(79).collect();
                    format!("{cut}\u{2026}")
                } else {
                    message.clone()
                };
                self.bar
                    .println(format!("  {} Page {:>3}  {}", red("✗"), page, red(&msg)));
            }
            Event::ContentRepaired { page } => {
                self.bar
                    .println(dim(&format!("    page {page}: stale preview re-rendered")));
            }
            Event::RasterFallback { page, scale } => {
                self.bar.println(dim(&format!(
                    "    page {page}: empty raster, retried at {scale}x"
                )));
            }
            Event::Downscaled { ratio, width, height } => {
                self.bar.println(dim(&format!(
                    "    downscaled by {ratio} to {width}×{height} to fit the encoder"
                )));
            }
            Event::BatchProgress { .. } => self.bar.inc(1),
            Event::BatchComplete { succeeded, failed } => {
                self.bar.finish_and_clear();
                let total = succeeded + failed;
                if *failed == 0 {
                    eprintln!(
                        "{} {} pages exported successfully",
                        green("✔"),
                        bold(&succeeded.to_string())
                    );
                } else {
                    eprintln!(
                        "{} {}/{} pages exported  ({} failed)",
                        if *succeeded == 0 { red("✘") } else { cyan("⚠") },
                        bold(&succeeded.to_string()),
                        total,
                        red(&failed.to_string()),
                    );
                }
            }
            _ => {}
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Render a quote as a PNG card in the current directory
  echo "Stay hungry, stay foolish." | share-image render

  # Render a file at 2x as JPEG into ./out
  share-image render notes.txt --scale 2 --format jpeg -o out

  # Split long text into pages and export a zip
  share-image render essay.txt --multi-page --max-chars 600 -o out

  # Browse and search the generation history
  share-image history list
  share-image history search "hungry"

  # Back up and restore history
  share-image history export -o backups
  share-image history import backups/history-export-1700000000000.json

ENVIRONMENT VARIABLES:
  SHARE_IMAGE_STORE     JSON file holding config and history
  SHARE_IMAGE_TEMPLATE  Default template id
  SHARE_IMAGE_OUT_DIR   Default output directory
  RUST_LOG              Override the log filter (e.g. share_image=debug)
"#;

/// Turn text into styled share images.
#[derive(Parser, Debug)]
#[command(
    name = "share-image",
    version,
    about = "Turn text into styled share images",
    long_about = "Render text as styled image cards (PNG, JPEG or WebP), split long text into \
pages and export them as a zip, and keep a searchable history of everything generated.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// JSON file holding config and history.
    #[arg(long, global = true, env = "SHARE_IMAGE_STORE", default_value = "share-image.json")]
    store: PathBuf,

    /// Disable progress output.
    #[arg(long, global = true, env = "SHARE_IMAGE_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "SHARE_IMAGE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "SHARE_IMAGE_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render text into one image, or a zip of pages with --multi-page.
    Render(RenderArgs),
    /// Inspect and manage the generation history.
    #[command(subcommand)]
    History(HistoryCommand),
    /// Print the effective configuration as JSON.
    Config,
}

#[derive(Args, Debug)]
struct RenderArgs {
    /// Text file to render; reads stdin when omitted or "-".
    input: Option<PathBuf>,

    /// Template id recorded in history and used in the file name.
    #[arg(short, long, env = "SHARE_IMAGE_TEMPLATE", default_value = "template-minimal")]
    template: String,

    /// Device pixel ratio (defaults to the configured scale).
    #[arg(long, env = "SHARE_IMAGE_SCALE")]
    scale: Option<f32>,

    /// Output format.
    #[arg(long, env = "SHARE_IMAGE_FORMAT", value_enum, default_value = "png")]
    format: FormatArg,

    /// JPEG quality (0.0–1.0).
    #[arg(long, env = "SHARE_IMAGE_QUALITY", default_value_t = 0.9)]
    quality: f32,

    /// Directory for the image or archive.
    #[arg(short, long, env = "SHARE_IMAGE_OUT_DIR", default_value = ".")]
    out_dir: PathBuf,

    /// Split text into pages and export a zip.
    #[arg(long)]
    multi_page: bool,

    /// Page bound in characters for --multi-page.
    #[arg(long, env = "SHARE_IMAGE_MAX_CHARS")]
    max_chars: Option<usize>,

    #[command(flatten)]
    style: StyleArgs,

    /// Also copy the image to the system clipboard.
    #[cfg(feature = "clipboard")]
    #[arg(long)]
    copy: bool,
}

#[derive(Args, Debug)]
struct StyleArgs {
    /// Font size in pixels.
    #[arg(long)]
    font_size: Option<f32>,

    /// Text colour (#rgb or #rrggbb).
    #[arg(long)]
    text_color: Option<String>,

    /// Background colour (#rgb or #rrggbb).
    #[arg(long)]
    bg_color: Option<String>,

    /// Card width in pixels.
    #[arg(long)]
    card_width: Option<u32>,
}

impl StyleArgs {
    fn apply(&self, mut style: StyleSnapshot) -> StyleSnapshot {
        if let Some(size) = self.font_size {
            style.font_size = size;
        }
        if let Some(ref c) = self.text_color {
            style.text_color = c.clone();
        }
        if let Some(ref c) = self.bg_color {
            style.bg_color = c.clone();
        }
        if let Some(w) = self.card_width {
            style.card_width = w;
        }
        style
    }
}

#[derive(Subcommand, Debug)]
enum HistoryCommand {
    /// List entries grouped by day, newest first.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Case-insensitive search over content and template.
    Search { query: String },
    /// Print one entry as JSON.
    Show { id: String },
    /// Print an entry's content so it can be edited again.
    Restore { id: String },
    /// Delete one entry.
    Remove { id: String },
    /// Delete every entry.
    Clear,
    /// Write a JSON backup into a directory.
    Export {
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Merge a JSON backup into the history.
    Import { file: PathBuf },
    /// Totals per template and format.
    Stats,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Png,
    Jpeg,
    Webp,
}

impl From<FormatArg> for ImageFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Png => ImageFormat::Png,
            FormatArg::Jpeg => ImageFormat::Jpeg,
            FormatArg::Webp => ImageFormat::Webp,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress =
        !cli.quiet && !cli.no_progress && matches!(cli.command, Command::Render(_));
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

    // ── Open store and config ────────────────────────────────────────────
    let backend = FileStore::open(&cli.store)
        .with_context(|| format!("Failed to open store {}", cli.store.display()))?;
    let storage = Storage::new(Arc::new(backend), PipelineConfig::default().storage_prefix);
    let config = PipelineConfig::load(&storage).context("Failed to load configuration")?;

    match cli.command {
        Command::Render(ref args) => render(&cli, args, storage, config, show_progress).await,
        Command::History(ref cmd) => history(&cli, cmd, storage, config),
        Command::Config => {
            println!(
                "{}",
                serde_json::to_string_pretty(&config).context("Failed to serialize config")?
            );
            Ok(())
        }
    }
}

async fn render(
    cli: &Cli,
    args: &RenderArgs,
    storage: Storage,
    mut config: PipelineConfig,
    show_progress: bool,
) -> Result<()> {
    let text = read_input(args.input.as_deref()).await?;
    if text.trim().is_empty() {
        bail!("Nothing to render: input is empty");
    }

    config.multi_page |= args.multi_page;
    if let Some(n) = args.max_chars {
        config.max_chars_per_page = n;
    }

    let progress = show_progress.then(CliNotifier::new);
    let notifier: SharedNotifier = match progress {
        Some(ref p) => Arc::clone(p) as SharedNotifier,
        None => share_image::noop(),
    };

    let generator = Generator::new(Arc::new(BlockRasterizer), storage, config, notifier)
        .context("Invalid configuration")?;

    let options = GenerationOptions::from_config(generator.config())
        .with_scale(args.scale.unwrap_or(generator.config().default_scale))
        .with_format(args.format.into())
        .with_quality(args.quality);
    let request = CaptureRequest::new(text, args.template.clone())
        .with_style(args.style.apply(StyleSnapshot::default()))
        .with_options(options);

    tokio::fs::create_dir_all(&args.out_dir)
        .await
        .with_context(|| format!("Failed to create {}", args.out_dir.display()))?;

    let target = DomTarget::card("");
    let pages = generator.pages(&request.content)?;

    // ── Batch export ─────────────────────────────────────────────────────
    if pages.len() > 1 {
        let out = generator
            .export_pages(&target, &request)
            .await
            .context("Batch export failed")?;
        let path = out
            .archive
            .write_to(&args.out_dir)
            .await
            .context("Failed to write archive")?;
        if !cli.quiet {
            for failure in out.failures() {
                eprintln!("{} {}", red("✗"), failure);
            }
            eprintln!(
                "{} {}  {}",
                green("✔"),
                path.display(),
                dim(&format!("{} entries, {} bytes", out.archive.entries.len(), out.stats.archive_bytes))
            );
        }
        return Ok(());
    }

    // ── Single image ─────────────────────────────────────────────────────
    let result = generator.generate(&target, &request).await;
    if let Some(ref p) = progress {
        p.finish();
    }
    let result = result.context("Capture failed")?;
    let path = generator
        .download(&result, &request.template_id, &args.out_dir)
        .await
        .context("Failed to save image")?;

    #[cfg(feature = "clipboard")]
    if args.copy {
        generator
            .copy_to_clipboard(&result)
            .context("Failed to copy image to clipboard")?;
    }

    if !cli.quiet {
        eprintln!(
            "{} {}  {}",
            green("✔"),
            path.display(),
            dim(&format!(
                "{}×{} @ {}x, {} bytes",
                result.width,
                result.height,
                result.scale,
                result.byte_len()
            ))
        );
    }
    Ok(())
}

async fn read_input(input: Option<&Path>) -> Result<String> {
    match input {
        Some(path) if path.as_os_str() != "-" => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display())),
        _ => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read stdin")?;
            Ok(buf)
        }
    }
}

fn history(cli: &Cli, cmd: &HistoryCommand, storage: Storage, config: PipelineConfig) -> Result<()> {
    let generator = Generator::new(Arc::new(BlockRasterizer), storage, config, share_image::noop())
        .context("Invalid configuration")?;
    let store = generator.history();

    match cmd {
        HistoryCommand::List { json } => {
            if *json {
                let entries = store.list()?;
                println!("{}", serde_json::to_string_pretty(&entries)?);
                return Ok(());
            }
            let groups = store.group_by_date()?;
            if groups.is_empty() && !cli.quiet {
                eprintln!("{}", dim("History is empty"));
            }
            for (date, entries) in groups {
                println!("{}", bold(&date.format("%Y-%m-%d").to_string()));
                for entry in &entries {
                    print_entry(entry);
                }
            }
        }
        HistoryCommand::Search { query } => {
            for entry in &store.search(query)? {
                print_entry(entry);
            }
        }
        HistoryCommand::Show { id } => {
            let entry = store
                .get(id)?
                .with_context(|| format!("No history entry with id {id}"))?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }
        HistoryCommand::Restore { id } => {
            let state = store.restore(id)?;
            println!("{}", state.content);
        }
        HistoryCommand::Remove { id } => {
            if !store.remove(id)? {
                bail!("No history entry with id {id}");
            }
            if !cli.quiet {
                eprintln!("{} removed {}", green("✔"), id);
            }
        }
        HistoryCommand::Clear => {
            let n = store.clear()?;
            if !cli.quiet {
                eprintln!("{} cleared {} entries", green("✔"), n);
            }
        }
        HistoryCommand::Export { out_dir } => {
            std::fs::create_dir_all(out_dir)
                .with_context(|| format!("Failed to create {}", out_dir.display()))?;
            let path = store.export_to_dir(out_dir)?;
            if !cli.quiet {
                eprintln!("{} {}", green("✔"), path.display());
            }
        }
        HistoryCommand::Import { file } => {
            let json = std::fs::read_to_string(file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let n = store.import(&json).context("Import failed")?;
            if !cli.quiet {
                eprintln!("{} imported {} entries", green("✔"), n);
            }
        }
        HistoryCommand::Stats => {
            let stats = store.stats()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }
    Ok(())
}

fn print_entry(entry: &HistoryEntry) {
    let preview: String = entry.content.lines().next().unwrap_or("").chars().take(48).collect();
    println!(
        "  {}  {:<20}  {:<10}  {}",
        cyan(&entry.id),
        entry.template_id,
        dim(&format!(
            "{}×{} {}",
            entry.output_meta.width, entry.output_meta.height, entry.output_meta.format
        )),
        preview
    );
}
