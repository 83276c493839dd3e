//! Per-document delivery: render → resume → dispatch → separator.
//!
//! ```text
//! Fetched ──▶ Rendered ──▶ Resuming ──▶ Dispatching ──▶ Completed
//!                             │
//!                             └──▶ Skipped (cursor covers every page)
//! any stage ──▶ Failed
//! ```
//!
//! The pipeline is the only writer of the progress store. The cursor moves
//! after each confirmed album, before the next one is sent, so a crash costs
//! at most the album that was in flight.

use crate::config::DeliveryConfig;
use crate::error::DeliveryError;
use crate::notices;
use crate::pipeline::dispatch::{BatchDispatcher, DispatchObserver, GroupReceipt};
use crate::pipeline::render::PageRenderer;
use crate::pipeline::store::ProgressStore;
use crate::progress::ProgressCallback;
use crate::transport::{ChatTarget, Notifier};
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// A document whose bytes are on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedDocument {
    /// Progress key and image directory name.
    pub id: String,
    /// Sanitised file name, shown to the user.
    pub file_name: String,
    pub path: PathBuf,
}

/// Where a document is in its delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentStage {
    Fetched,
    Rendered,
    Resuming,
    Dispatching,
    Completed,
    Skipped,
    Failed,
}

impl fmt::Display for DocumentStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DocumentStage::Fetched => "fetched",
            DocumentStage::Rendered => "rendered",
            DocumentStage::Resuming => "resuming",
            DocumentStage::Dispatching => "dispatching",
            DocumentStage::Completed => "completed",
            DocumentStage::Skipped => "skipped",
            DocumentStage::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// How a document ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentOutcome {
    /// `sent` pages went out in this run; `total_pages` are now confirmed.
    Delivered { total_pages: usize, sent: usize },
    /// Every page had been confirmed by an earlier run.
    Skipped { total_pages: usize },
}

/// Post a notice; a failed notice is logged and otherwise ignored.
pub(crate) async fn announce(notifier: &dyn Notifier, target: ChatTarget, text: &str) {
    if let Err(e) = notifier.notify(target, text).await {
        warn!("Could not post notice to {}: {}", target, e);
    }
}

/// Drives one document through the stages above.
pub struct DocumentPipeline<'a> {
    pub config: &'a DeliveryConfig,
    pub renderer: &'a dyn PageRenderer,
    pub dispatcher: &'a BatchDispatcher,
    pub notifier: &'a dyn Notifier,
    pub store: &'a ProgressStore,
    pub progress: Option<&'a ProgressCallback>,
}

impl DocumentPipeline<'_> {
    pub async fn deliver(
        &self,
        target: ChatTarget,
        document: &FetchedDocument,
    ) -> Result<DocumentOutcome, DeliveryError> {
        let mut stage = DocumentStage::Fetched;
        let result = self.run_stages(target, document, &mut stage).await;
        match &result {
            Ok(_) => debug!("{}: {}", document.file_name, stage),
            Err(e) => warn!(
                "{}: {} while {}: {}",
                document.file_name,
                DocumentStage::Failed,
                stage,
                e
            ),
        }
        result
    }

    async fn run_stages(
        &self,
        target: ChatTarget,
        document: &FetchedDocument,
        stage: &mut DocumentStage,
    ) -> Result<DocumentOutcome, DeliveryError> {
        let name = document.file_name.as_str();

        // ── Render ───────────────────────────────────────────────────────
        let pages = self
            .renderer
            .render(
                &document.path,
                &self.config.image_dir(&document.id),
                self.config.render,
            )
            .await?;
        let total_pages = pages.len();
        *stage = DocumentStage::Rendered;

        // ── Resume ───────────────────────────────────────────────────────
        *stage = DocumentStage::Resuming;
        let stored = self.store.cursor(&document.id);
        let cursor = usize::try_from(stored).unwrap_or(usize::MAX).min(total_pages);
        if cursor as u64 != stored {
            warn!(
                "{}: stored cursor {} exceeds {} rendered pages",
                name, stored, total_pages
            );
        }
        let remaining = &pages[cursor..];

        if remaining.is_empty() {
            *stage = DocumentStage::Skipped;
            info!("{}: all {} pages already sent", name, total_pages);
            announce(self.notifier, target, &notices::already_sent(name, total_pages)).await;
            if let Some(cb) = self.progress {
                cb.on_document_skipped(name, total_pages);
            }
            return Ok(DocumentOutcome::Skipped { total_pages });
        }

        // ── Dispatch ─────────────────────────────────────────────────────
        *stage = DocumentStage::Dispatching;
        info!(
            "{}: sending pages {}..={} of {}",
            name,
            cursor + 1,
            total_pages,
            total_pages
        );
        announce(
            self.notifier,
            target,
            &notices::document_started(name, total_pages, remaining.len()),
        )
        .await;

        // The caption marks a document's first page, so a resumed document gets none.
        let caption = (cursor == 0).then(|| notices::caption(name, total_pages));

        let mut advance = CursorAdvance {
            store: self.store,
            notifier: self.notifier,
            progress: self.progress,
            target,
            document_id: &document.id,
            name,
            base: cursor as u64,
            total_pages,
        };
        let sent = self
            .dispatcher
            .dispatch(target, remaining, caption.as_deref(), &mut advance)
            .await?;

        // ── Complete ─────────────────────────────────────────────────────
        if let Some(separator) = &self.config.separator_text {
            announce(self.notifier, target, separator).await;
        }
        *stage = DocumentStage::Completed;
        if let Some(cb) = self.progress {
            cb.on_document_complete(name, total_pages);
        }
        Ok(DocumentOutcome::Delivered { total_pages, sent })
    }
}

/// Persists the cursor and reports progress after every confirmed album.
struct CursorAdvance<'a> {
    store: &'a ProgressStore,
    notifier: &'a dyn Notifier,
    progress: Option<&'a ProgressCallback>,
    target: ChatTarget,
    document_id: &'a str,
    name: &'a str,
    base: u64,
    total_pages: usize,
}

#[async_trait]
impl<'a> DispatchObserver for CursorAdvance<'a> {
    async fn on_confirmed(&mut self, receipt: GroupReceipt) -> Result<(), DeliveryError> {
        let confirmed = self
            .store
            .commit(self.document_id, self.base + receipt.confirmed as u64)?;
        if let Some(cb) = self.progress {
            cb.on_pages_confirmed(self.name, confirmed, self.total_pages, receipt.size);
        }
        announce(
            self.notifier,
            self.target,
            &notices::document_progress(self.name, confirmed, self.total_pages),
        )
        .await;
        Ok(())
    }
}
