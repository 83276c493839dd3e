//! CLI binary for pdf2album.
//!
//! A thin shim over the library crate: maps CLI flags to `DeliveryConfig`,
//! wires the Telegram adapter and the sources together, and either runs one
//! delivery (`run`) or answers chat commands (`serve`).

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use pdf2album::{
    BotController, ChatTarget, Collaborators, DeliveryConfig, DeliveryProgressCallback,
    PdfiumRenderer, ProgressCallback, RunOrchestrator, SendError, SourceRegistry, SourceRouter,
    TelegramBot,
};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
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

/// One bar per document, reset as each document starts; finished documents
/// leave a log line above it.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>4}/{len} pages  ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        bar.set_style(style);
        bar.set_prefix("Listing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl DeliveryProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_documents: usize) {
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Delivering {total_documents} PDF files…"))
        ));
    }

    fn on_document_start(&self, index: usize, total_documents: usize, name: &str) {
        self.bar.reset();
        self.bar.set_length(0);
        self.bar.set_prefix(format!("{index}/{total_documents}"));
        self.bar.set_message(name.to_string());
    }

    fn on_pages_confirmed(&self, _name: &str, confirmed: u64, total_pages: usize, _batch: usize) {
        self.bar.set_length(total_pages as u64);
        self.bar.set_position(confirmed);
    }

    fn on_document_skipped(&self, name: &str, total_pages: usize) {
        self.bar.println(format!(
            "  {} {}  {}",
            dim("↷"),
            name,
            dim(&format!("already sent ({total_pages} pages)"))
        ));
    }

    fn on_document_complete(&self, name: &str, total_pages: usize) {
        self.bar.println(format!(
            "  {} {}  {}",
            green("✓"),
            name,
            dim(&format!("{total_pages} pages"))
        ));
    }

    fn on_document_error(&self, name: &str, error: &str) {
        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!("  {} {}  {}", red("✗"), name, red(&msg)));
    }

    fn on_run_complete(&self, delivered: usize, skipped: usize, failed: usize) {
        self.bar.finish_and_clear();
        let mark = if failed == 0 { green("✔") } else { cyan("⚠") };
        eprintln!(
            "{} {} delivered, {} skipped, {} failed",
            mark,
            bold(&delivered.to_string()),
            skipped,
            if failed == 0 {
                failed.to_string()
            } else {
                red(&failed.to_string())
            },
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Send every PDF in a directory to a channel
  pdf2album run --source ./pdfs --chat -1001234567890

  # Sources can also be JSON manifests, local or remote
  pdf2album run --source https://example.org/pdfs.json --chat 123456

  # Answer /start, /setsource and /download in any chat the bot is in
  pdf2album serve --source ./pdfs

  # Smaller albums, slower pacing
  pdf2album --album-size 5 --album-pause 3 run --source ./pdfs --chat 123456

RESUMING:
  Progress is kept in <work-dir>/.progress.json. Stopping with Ctrl-C and
  running the same command again continues after the last confirmed album.

ENVIRONMENT VARIABLES:
  TELEGRAM_BOT_TOKEN      Bot API token (required)
  PDF2ALBUM_WORK_DIR      Work directory (default: workdir)
  PDF2ALBUM_SOURCE        Source directory or manifest
  PDF2ALBUM_CHAT          Target chat id for `run`
  PDFIUM_LIB_PATH         Directory containing libpdfium
"#;

#[derive(Parser, Debug)]
#[command(
    name = "pdf2album",
    version,
    about = "Send every page of every PDF in a source to a Telegram chat as image albums",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    opts: GlobalOpts,

    #[command(subcommand)]
    command: Mode,
}

#[derive(Args, Debug)]
struct GlobalOpts {
    /// Telegram Bot API token.
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    token: String,

    /// Bot API base URL, for self-hosted API servers.
    #[arg(long, env = "PDF2ALBUM_API_BASE", default_value = pdf2album::telegram::DEFAULT_API_BASE)]
    api_base: String,

    #[arg(long, env = "PDF2ALBUM_WORK_DIR", default_value = "workdir")]
    work_dir: PathBuf,

    #[arg(long, env = "PDF2ALBUM_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    #[arg(long, env = "PDF2ALBUM_QUALITY", default_value_t = 85,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: u8,

    /// Pages per album (1–10).
    #[arg(long, env = "PDF2ALBUM_ALBUM_SIZE", default_value_t = 10)]
    album_size: usize,

    /// Seconds to wait after each album and each document.
    #[arg(long, env = "PDF2ALBUM_ALBUM_PAUSE", default_value_t = 1.0)]
    album_pause: f64,

    /// Seconds to wait per page while an album is assembled.
    #[arg(long, env = "PDF2ALBUM_PAGE_PAUSE", default_value_t = 0.0)]
    page_pause: f64,

    /// Message sent after each document; empty disables it.
    #[arg(long, env = "PDF2ALBUM_SEPARATOR")]
    separator: Option<String>,

    /// Give up on an album after this many failed attempts (default: never).
    #[arg(long, env = "PDF2ALBUM_MAX_RETRIES")]
    max_retries: Option<u32>,

    /// Bound, in seconds, on each album's and each fetch's retry loop.
    #[arg(long, env = "PDF2ALBUM_OPERATION_TIMEOUT")]
    operation_timeout: Option<u64>,

    #[arg(long, env = "PDF2ALBUM_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    #[arg(long, env = "PDF2ALBUM_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib_path: Option<PathBuf>,

    #[arg(long, env = "PDF2ALBUM_NO_PROGRESS")]
    no_progress: bool,

    #[arg(short, long, env = "PDF2ALBUM_VERBOSE")]
    verbose: bool,

    #[arg(short, long, env = "PDF2ALBUM_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Deliver one source to one chat, then exit.
    Run {
        /// Directory, manifest path, or manifest URL.
        #[arg(long, env = "PDF2ALBUM_SOURCE")]
        source: String,

        #[arg(long, env = "PDF2ALBUM_CHAT", allow_hyphen_values = true)]
        chat: i64,
    },
    /// Long-poll for chat commands.
    Serve {
        /// Source used by /download until a chat picks its own.
        #[arg(long, env = "PDF2ALBUM_SOURCE")]
        source: Option<String>,

        /// Long-poll timeout in seconds.
        #[arg(long, default_value_t = 30)]
        poll_timeout: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let opts = &cli.opts;

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs in one-shot mode.
    let show_progress =
        matches!(cli.command, Mode::Run { .. }) && !opts.quiet && !opts.no_progress;
    let filter = if opts.verbose {
        "debug"
    } else if opts.quiet || show_progress {
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

    let config = build_config(opts)?;
    let bot = Arc::new(
        TelegramBot::with_api_base(&opts.api_base, &opts.token, Duration::from_secs(opts.api_timeout))
            .context("Failed to create Telegram client")?,
    );
    let source = Arc::new(SourceRouter::from_config(&config).context("Failed to create HTTP client")?);
    let parts = Collaborators {
        lister: source.clone(),
        fetcher: source,
        renderer: Arc::new(PdfiumRenderer::new(config.pdfium_lib_path.clone())),
        sender: bot.clone(),
        notifier: bot.clone(),
    };

    // ── Ctrl-C ───────────────────────────────────────────────────────────
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("{} stopping after the album in flight…", cyan("◆"));
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Mode::Run { source, chat } => {
            let mut orchestrator = RunOrchestrator::new(config, parts);
            if show_progress {
                let cb: ProgressCallback = CliProgressCallback::new();
                orchestrator = orchestrator.with_progress(cb);
            }
            let report = orchestrator
                .run(&source, ChatTarget(chat), cancel)
                .await
                .context("Delivery failed")?;

            if !opts.quiet {
                for failure in &report.failed {
                    eprintln!(
                        "  {} PDF {} ({}): {}",
                        red("✗"),
                        failure.id,
                        failure.name,
                        dim(&failure.error)
                    );
                }
                if report.cancelled {
                    eprintln!("{} cancelled; run again to resume", cyan("⚠"));
                }
            }
            if !report.failed.is_empty() {
                std::process::exit(1);
            }
        }
        Mode::Serve {
            source,
            poll_timeout,
        } => {
            let orchestrator = Arc::new(RunOrchestrator::new(config, parts));
            let registry = Arc::new(SourceRegistry::new(source));
            let controller = Arc::new(BotController::new(registry, orchestrator, cancel.clone()));
            serve(&bot, controller, Duration::from_secs(poll_timeout), cancel).await?;
        }
    }

    Ok(())
}

/// Long-poll loop: every command message is handled on its own task, so a
/// `/start` is answered while a delivery is running.
async fn serve(
    bot: &TelegramBot,
    controller: Arc<BotController>,
    poll: Duration,
    cancel: CancellationToken,
) -> Result<()> {
    let me = bot.get_me().await.context("Bot token rejected by Telegram")?;
    info!(
        "Serving as @{} (id {})",
        me.username.as_deref().unwrap_or("unknown"),
        me.id
    );

    let mut offset = 0i64;
    loop {
        let updates = tokio::select! {
            _ = cancel.cancelled() => break,
            res = bot.get_updates(offset, poll) => res,
        };

        match updates {
            Ok(updates) => {
                for update in updates {
                    offset = offset.max(update.update_id + 1);
                    let Some(message) = update.message else { continue };
                    let Some(text) = message.text else { continue };
                    let chat = message.chat.id;
                    // Sources are chosen per user; albums go to the chat the command came from.
                    let session = message.from.as_ref().map_or(chat, |u| u.id);
                    let controller = controller.clone();
                    tokio::spawn(async move {
                        if let Some(report) = controller.handle(session, ChatTarget(chat), &text).await {
                            info!(
                                "Chat {}: {} delivered, {} skipped, {} failed",
                                chat,
                                report.delivered,
                                report.skipped,
                                report.failed.len()
                            );
                        }
                    });
                }
            }
            Err(SendError::RateLimited { wait }) => {
                warn!("getUpdates rate limited, waiting {}s", wait.as_secs());
                tokio::time::sleep(wait).await;
            }
            Err(SendError::Fatal(e)) => {
                anyhow::bail!("getUpdates failed: {e}");
            }
            Err(e) => {
                warn!("getUpdates failed: {}; retrying", e);
                tokio::time::sleep(Duration::from_secs(3)).await;
            }
        }
    }

    info!("Shutting down");
    Ok(())
}

/// Map CLI flags onto `DeliveryConfig`.
fn build_config(opts: &GlobalOpts) -> Result<DeliveryConfig> {
    let mut builder = DeliveryConfig::builder()
        .work_dir(&opts.work_dir)
        .dpi(opts.dpi)
        .jpeg_quality(opts.quality)
        .album_batch_size(opts.album_size)
        .pause_between_albums(seconds(opts.album_pause, "--album-pause")?)
        .pause_between_pages(seconds(opts.page_pause, "--page-pause")?)
        .max_send_retries(opts.max_retries)
        .operation_timeout(opts.operation_timeout.map(Duration::from_secs))
        .download_timeout(Duration::from_secs(opts.download_timeout));

    if let Some(ref separator) = opts.separator {
        builder = builder.separator_text(separator.clone());
    }
    if let Some(ref path) = opts.pdfium_lib_path {
        builder = builder.pdfium_lib_path(path);
    }

    builder.build().context("Invalid configuration")
}

fn seconds(value: f64, flag: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(value).with_context(|| format!("{flag} must be a non-negative number of seconds"))
}
