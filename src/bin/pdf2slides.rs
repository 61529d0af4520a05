//! CLI binary for edgequake-pdf2slides.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, opens the object and slide stores, and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_pdf2slides::{
    inspect, ContentFallback, DocumentName, ExtractionFailurePolicy, LocalObjectStore,
    MemorySlideStore, Pipeline, PipelineConfig, ProgressCallback, RunProgressCallback, RunResult,
    SlideKind, SlideSetReplacer, SlideStore,
};
use edgequake_pdf2slides::prompts::classification_values;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live bar plus one log line per installed or
/// failed page.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Per-page wall-clock start times for elapsed reporting.
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    /// Spinner until `on_run_start` tells us the page count.
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
        self.bar.set_prefix("Installing");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&page_num)
            .map(|t| t.elapsed().as_millis() as f64 / 1000.0)
            .unwrap_or(0.0)
    }
}

impl RunProgressCallback for CliProgressCallback {
    fn on_run_start(&self, document: &str, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Materialising '{document}' ({total_pages} pages)…"))
        ));
    }

    fn on_retired(&self, retired_slides: usize) {
        if retired_slides > 0 {
            self.bar.println(format!(
                "  {} retired {} previous slides",
                dim("↺"),
                retired_slides
            ));
        }
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        self.start_times
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(page_num, Instant::now());
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, slide_id: i64) {
        let secs = self.elapsed_secs(page_num);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<12}  {}",
            green("✓"),
            page_num,
            total,
            dim(&format!("slide {slide_id}")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: String) {
        let secs = self.elapsed_secs(page_num);
        // Keep one line per page.
        let msg = match error.char_indices().nth(79) {
            Some((idx, _)) => format!("{}\u{2026}", &error[..idx]),
            None => error,
        };
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, total_pages: usize, succeeded: usize) {
        let failed = total_pages.saturating_sub(succeeded);
        self.bar.finish_and_clear();
        if failed == 0 {
            eprintln!(
                "{} {} slides installed",
                green("✔"),
                bold(&succeeded.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} slides installed  ({} failed)",
                if failed == total_pages {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&succeeded.to_string()),
                total_pages,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Materialise a deck into module 42 (slides replace any previous run)
  pdf2slides run deck.pdf --module 42

  # From a URL, with an explicit document name
  pdf2slides run https://example.com/files/intro.pdf --module 42 --name intro

  # How many slides does 'deck' currently have in module 42?
  pdf2slides count --module 42 --document deck

  # Page count and derived document name (no API key needed)
  pdf2slides inspect deck.pdf

  # Modules of course 7, and the slides of one module
  pdf2slides modules --course 7
  pdf2slides slides --module 42 --json

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY            OpenAI API key
  ANTHROPIC_API_KEY         Anthropic API key
  GEMINI_API_KEY            Google Gemini API key
  EDGEQUAKE_PROVIDER        Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL           Override model ID
  DATABASE_URL              Postgres connection string (requires the `postgres` feature)
  PDF2SLIDES_STORAGE_DIR    Directory page images are written to
  PDF2SLIDES_BASE_URL       Public base URL of that directory
  PDFIUM_LIB_PATH           Path to an existing libpdfium

Without DATABASE_URL the slide store is in-memory: a run is a dry run whose
images are still written to the storage directory.
"#;

/// Materialise PDF decks into ordered slide records using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2slides",
    version,
    about = "Materialise PDF decks into ordered slide records using Vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Postgres connection string for the slide store.
    #[arg(long, global = true, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    /// Maximum Postgres connections.
    #[arg(long, global = true, env = "PDF2SLIDES_DB_MAX_CONNECTIONS", default_value_t = 5)]
    db_max_connections: u32,

    /// Output structured JSON instead of human-readable text.
    #[arg(long, global = true, env = "PDF2SLIDES_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, global = true, env = "PDF2SLIDES_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PDF2SLIDES_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PDF2SLIDES_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replace a document's slides in a module with one slide per PDF page.
    Run(RunArgs),
    /// Number of slides a document currently has in a module.
    Count {
        #[arg(long)]
        module: i64,
        /// Document name (the upload's file stem).
        #[arg(long)]
        document: String,
    },
    /// Page count and derived document name of a PDF.
    Inspect {
        /// Local PDF file path or HTTP/HTTPS URL.
        input: String,
        /// HTTP download timeout in seconds.
        #[arg(long, env = "PDF2SLIDES_DOWNLOAD_TIMEOUT", default_value_t = 120)]
        download_timeout: u64,
    },
    /// List modules, optionally of one course.
    Modules {
        #[arg(long)]
        course: Option<i64>,
    },
    /// List a module's slides in order.
    Slides {
        #[arg(long)]
        module: i64,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Target module id.
    #[arg(long, env = "PDF2SLIDES_MODULE")]
    module: i64,

    /// Document name; defaults to the input's file stem.
    #[arg(long)]
    name: Option<String>,

    /// Directory page images are written to.
    #[arg(long, env = "PDF2SLIDES_STORAGE_DIR", default_value = "./media")]
    storage_dir: PathBuf,

    /// Public base URL the storage directory is served under.
    #[arg(long, env = "PDF2SLIDES_BASE_URL", default_value = "http://localhost:3000/media")]
    base_url: String,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Rendering DPI (72–400).
    #[arg(long, env = "PDF2SLIDES_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Pages classified ahead of the install cursor.
    #[arg(short, long, env = "PDF2SLIDES_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// JPEG quality of page images (1–100).
    #[arg(long, env = "PDF2SLIDES_JPEG_QUALITY", default_value_t = 85)]
    jpeg_quality: u8,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF2SLIDES_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Path to a text file containing a custom classifier prompt.
    #[arg(long, env = "PDF2SLIDES_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Max LLM output tokens per page.
    #[arg(long, env = "PDF2SLIDES_MAX_TOKENS", default_value_t = 2048)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "PDF2SLIDES_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Retries per page on transient LLM failure.
    #[arg(long, env = "PDF2SLIDES_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Per-page LLM call timeout in seconds.
    #[arg(long, env = "PDF2SLIDES_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDF2SLIDES_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// What to do with a page whose classification failed.
    #[arg(long, env = "PDF2SLIDES_ON_EXTRACTION_FAILURE", value_enum, default_value = "fail-page")]
    on_extraction_failure: FailureArg,

    /// Slide type stored when the classifier answers outside the known set.
    #[arg(long, env = "PDF2SLIDES_UNKNOWN_TYPE", default_value = "regular", value_parser = parse_kind)]
    unknown_type: SlideKind,

    /// Content stored when a page has no text; defaults to the slide title.
    #[arg(long, env = "PDF2SLIDES_EMPTY_CONTENT")]
    empty_content: Option<String>,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FailureArg {
    FailPage,
    InstallSentinel,
}

impl From<FailureArg> for ExtractionFailurePolicy {
    fn from(v: FailureArg) -> Self {
        match v {
            FailureArg::FailPage => ExtractionFailurePolicy::FailPage,
            FailureArg::InstallSentinel => ExtractionFailurePolicy::InstallSentinel,
        }
    }
}

fn parse_kind(s: &str) -> Result<SlideKind, String> {
    SlideKind::parse(s).ok_or_else(|| {
        format!(
            "unknown slide type '{s}' (expected one of: {})",
            classification_values()
        )
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs during a run.
    let is_run = matches!(cli.command, Command::Run(_));
    let show_progress = is_run && !cli.quiet && !cli.no_progress && !cli.json;
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

    match &cli.command {
        Command::Run(args) => run(&cli, args, show_progress).await,
        Command::Count { module, document } => {
            let store = open_store(&cli).await?;
            let document = DocumentName::new(document.as_str())?;
            let count = SlideSetReplacer::new(store)
                .page_count(*module, &document)
                .await
                .context("Failed to count slides")?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({ "module_id": module, "document": document, "page_count": count })
                );
            } else {
                println!("{count}");
            }
            Ok(())
        }
        Command::Inspect {
            input,
            download_timeout,
        } => {
            let config = PipelineConfig::builder()
                .download_timeout_secs(*download_timeout)
                .build()?;
            let summary = inspect(input, &config).await.context("Failed to inspect PDF")?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("File:         {}", summary.filename);
                println!("Document:     {}", summary.document);
                println!("Pages:        {}", summary.page_count);
                println!("Size:         {} bytes", summary.size_bytes);
            }
            Ok(())
        }
        Command::Modules { course } => {
            let store = open_store(&cli).await?;
            let modules = store.modules(*course).await.context("Failed to list modules")?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&modules)?);
            } else {
                for m in modules {
                    println!("{:>6}  {}", m.id, m.title);
                }
            }
            Ok(())
        }
        Command::Slides { module } => {
            let store = open_store(&cli).await?;
            let slides = store
                .module_slides(*module)
                .await
                .context("Failed to list slides")?;
            if cli.json {
                let rows: Vec<_> = slides
                    .iter()
                    .map(|(link, slide)| serde_json::json!({ "order": link.order, "slide": slide }))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                for (link, slide) in slides {
                    println!(
                        "{:>4}  {:<10} {:>6}  {}",
                        link.order,
                        slide.kind.as_str(),
                        slide.id,
                        slide.title
                    );
                    for url in &slide.links {
                        println!("{:>24}{}", "", url);
                    }
                }
            }
            Ok(())
        }
    }
}

async fn run(cli: &Cli, args: &RunArgs, show_progress: bool) -> Result<()> {
    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new_dynamic() as Arc<dyn RunProgressCallback>)
    } else {
        None
    };
    let config = build_config(args, progress).await?;

    let objects = LocalObjectStore::new(&args.storage_dir, args.base_url.as_str())
        .await
        .with_context(|| format!("Failed to open storage directory {:?}", args.storage_dir))?;
    let store = open_store(cli).await?;
    let pipeline = Pipeline::from_config(config, Arc::new(objects), store)?;

    let result = pipeline
        .materialize_input(&args.input, args.module, args.name.as_deref())
        .await
        .context("Run failed")?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if !cli.quiet {
        print_summary(&result, show_progress);
    }
    Ok(())
}

fn print_summary(result: &RunResult, show_progress: bool) {
    if !show_progress {
        eprintln!(
            "Installed {}/{} pages of '{}' into module {}",
            result.succeeded(),
            result.total_pages,
            result.document,
            result.module_id
        );
        for e in result.errors() {
            eprintln!("  {} {}", red("✗"), e);
        }
    }
    eprintln!(
        "   {} retired  —  {}ms total",
        dim(&result.retired_slides.to_string()),
        result.duration_ms,
    );
}

/// Open the slide store: Postgres when configured, otherwise in-memory.
async fn open_store(cli: &Cli) -> Result<Arc<dyn SlideStore>> {
    #[cfg(feature = "postgres")]
    if let Some(ref url) = cli.database_url {
        let store = edgequake_pdf2slides::PgSlideStore::connect(url, cli.db_max_connections)
            .await
            .context("Failed to connect to Postgres")?;
        store.migrate().await.context("Failed to apply migrations")?;
        return Ok(Arc::new(store));
    }

    #[cfg(not(feature = "postgres"))]
    if cli.database_url.is_some() {
        warn!(
            "DATABASE_URL is set but this binary was built without the `postgres` feature \
             (max connections {} ignored)",
            cli.db_max_connections
        );
    }

    warn!("No database configured; using an in-memory slide store (dry run)");
    Ok(Arc::new(MemorySlideStore::new()))
}

/// Map CLI args to `PipelineConfig`.
async fn build_config(args: &RunArgs, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let system_prompt = if let Some(ref path) = args.system_prompt {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {:?}", path))?,
        )
    } else {
        None
    };

    let fallback = match args.empty_content {
        Some(ref s) => ContentFallback::Fixed(s.clone()),
        None => ContentFallback::Title,
    };

    let mut builder = PipelineConfig::builder()
        .dpi(args.dpi)
        .concurrency(args.concurrency)
        .jpeg_quality(args.jpeg_quality)
        .max_tokens(args.max_tokens)
        .temperature(args.temperature)
        .max_retries(args.max_retries)
        .api_timeout_secs(args.api_timeout)
        .download_timeout_secs(args.download_timeout)
        .extraction_failure(args.on_extraction_failure.into())
        .unknown_classification(args.unknown_type)
        .content_fallback(fallback);

    if let Some(ref model) = args.model {
        builder = builder.model(model.as_str());
    }
    if let Some(ref provider) = args.provider {
        builder = builder.provider_name(provider.as_str());
    }
    if let Some(ref password) = args.password {
        builder = builder.password(password.as_str());
    }
    if let Some(prompt) = system_prompt {
        builder = builder.system_prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
