//! # pdf2album
//!
//! Deliver every page of every PDF in a source into a chat as image albums,
//! resumably and within the platform's rate limits.
//!
//! ## Pipeline Overview
//!
//! ```text
//! source
//!  │
//!  ├─ 1. List     directory, JSON manifest, or any DocumentLister
//!  ├─ 2. Fetch    bounded retry, cached under <work_dir>/pdfs
//!  ├─ 3. Render   pdfium → page_00001.jpg … (spawn_blocking, idempotent)
//!  ├─ 4. Resume   skip pages the progress file marks as confirmed
//!  ├─ 5. Send     albums of ≤10, retried until the platform confirms
//!  └─ 6. Persist  cursor advanced after every confirmed album
//! ```
//!
//! A run interrupted at any point and started again sends each page exactly
//! once, except possibly the album that was in flight.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf2album::{
//!     ChatTarget, Collaborators, DeliveryConfig, PdfiumRenderer, RunOrchestrator, SourceRouter,
//!     TelegramBot,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DeliveryConfig::builder().work_dir("workdir").build()?;
//!     let bot = Arc::new(TelegramBot::new(&std::env::var("TELEGRAM_BOT_TOKEN")?, Duration::from_secs(120))?);
//!     let source = Arc::new(SourceRouter::from_config(&config)?);
//!     let orchestrator = RunOrchestrator::new(
//!         config,
//!         Collaborators {
//!             lister: source.clone(),
//!             fetcher: source,
//!             renderer: Arc::new(PdfiumRenderer::new(None)),
//!             sender: bot.clone(),
//!             notifier: bot,
//!         },
//!     );
//!     let report = orchestrator
//!         .run("./pdfs", ChatTarget(-1001234567890), CancellationToken::new())
//!         .await?;
//!     eprintln!("{} delivered, {} failed", report.delivered, report.failed.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2album` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pdf2album = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod bot;
pub mod config;
pub mod error;
pub mod naming;
pub mod notices;
pub mod pipeline;
pub mod progress;
pub mod run;
pub mod session;
pub mod source;
pub mod telegram;
pub mod transport;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use bot::{parse_command, BotController, Command};
pub use config::{DeliveryConfig, DeliveryConfigBuilder, RenderSettings, MAX_ALBUM_SIZE};
pub use error::{DeliveryError, FetchError, RenderError, SendError};
pub use pipeline::render::{PageImage, PageRenderer, PdfiumRenderer};
pub use pipeline::store::ProgressStore;
pub use progress::{DeliveryProgressCallback, NoopProgressCallback, ProgressCallback};
pub use run::{Collaborators, DocumentFailure, RunOrchestrator, RunReport};
pub use session::SourceRegistry;
pub use source::{DirectorySource, ManifestSource, SourceRouter};
pub use telegram::TelegramBot;
pub use transport::{BatchSender, ChatTarget, DocumentFetcher, DocumentLister, DocumentRef, Notifier};
