//! Run orchestration: list a source, then fetch and deliver every PDF in it.
//!
//! ```text
//! list ──▶ filter application/pdf ──▶ sort by id
//!   │
//!   └─ for each document:  fetch ──▶ DocumentPipeline ──▶ pause
//!                            └─ any error: report it, move on
//! ```
//!
//! One document never aborts the run. Cancellation is the exception: it ends
//! the run after the album (or sleep) in flight, leaving the cursor where the
//! last confirmed album put it.

use crate::config::DeliveryConfig;
use crate::error::DeliveryError;
use crate::naming::{document_filename, document_id};
use crate::notices;
use crate::pipeline::dispatch::{BatchDispatcher, DispatchPolicy};
use crate::pipeline::document::{announce, DocumentOutcome, DocumentPipeline, FetchedDocument};
use crate::pipeline::fetch::{fetch_document, FetchOutcome, FetchPolicy};
use crate::pipeline::render::PageRenderer;
use crate::pipeline::store::ProgressStore;
use crate::progress::ProgressCallback;
use crate::transport::{BatchSender, ChatTarget, DocumentFetcher, DocumentLister, DocumentRef, Notifier};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The capabilities a run is assembled from.
#[derive(Clone)]
pub struct Collaborators {
    pub lister: Arc<dyn DocumentLister>,
    pub fetcher: Arc<dyn DocumentFetcher>,
    pub renderer: Arc<dyn PageRenderer>,
    pub sender: Arc<dyn BatchSender>,
    pub notifier: Arc<dyn Notifier>,
}

/// A document that did not make it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentFailure {
    pub id: u64,
    pub name: String,
    pub error: String,
}

/// Summary of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// PDF documents found in the source.
    pub listed: usize,
    /// Documents that had pages sent in this run.
    pub delivered: usize,
    /// Documents whose pages had all been sent before.
    pub skipped: usize,
    pub failed: Vec<DocumentFailure>,
    /// The run stopped early on cancellation.
    pub cancelled: bool,
}

impl RunReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && !self.cancelled
    }
}

/// Runs delivery for a source into a chat.
///
/// Runs on one orchestrator are serialized: a second trigger waits until the
/// first run finishes, then resumes from the cursor it left behind.
pub struct RunOrchestrator {
    config: DeliveryConfig,
    parts: Collaborators,
    store: ProgressStore,
    progress: Option<ProgressCallback>,
    gate: Mutex<()>,
}

impl RunOrchestrator {
    pub fn new(config: DeliveryConfig, parts: Collaborators) -> Self {
        let store = ProgressStore::new(config.progress_file());
        Self {
            config,
            parts,
            store,
            progress: None,
            gate: Mutex::new(()),
        }
    }

    /// Attach a local progress observer.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// The notifier this orchestrator reports through.
    pub fn notifier(&self) -> Arc<dyn Notifier> {
        self.parts.notifier.clone()
    }

    /// Deliver every PDF in `source` to `target`.
    ///
    /// # Errors
    /// Only a failure to list the source is returned as `Err`. Per-document
    /// failures are collected in [`RunReport::failed`].
    pub async fn run(
        &self,
        source: &str,
        target: ChatTarget,
        cancel: CancellationToken,
    ) -> Result<RunReport, DeliveryError> {
        if self.gate.try_lock().is_err() {
            info!("A run is already in progress; waiting for it to finish");
        }
        let _running = self.gate.lock().await;

        let start = Instant::now();
        info!("Starting run: source={} chat={}", source, target);

        let documents = self.list_documents(source).await?;
        let notifier = self.parts.notifier.as_ref();
        let mut report = RunReport {
            listed: documents.len(),
            ..RunReport::default()
        };

        if documents.is_empty() {
            info!("No PDF documents in {}", source);
            announce(notifier, target, notices::NO_DOCUMENTS).await;
            return Ok(report);
        }

        announce(notifier, target, &notices::run_started(documents.len())).await;
        if let Some(cb) = &self.progress {
            cb.on_run_start(documents.len());
        }

        let dispatcher = BatchDispatcher::new(
            self.parts.sender.clone(),
            DispatchPolicy::from(&self.config),
            cancel.clone(),
        );
        let pipeline = DocumentPipeline {
            config: &self.config,
            renderer: self.parts.renderer.as_ref(),
            dispatcher: &dispatcher,
            notifier,
            store: &self.store,
            progress: self.progress.as_ref(),
        };
        let fetch_policy = FetchPolicy::from(&self.config);
        let pdf_dir = self.config.pdf_dir();

        for (i, doc) in documents.iter().enumerate() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let file_name = document_filename(doc);
            if let Some(cb) = &self.progress {
                cb.on_document_start(i + 1, documents.len(), &file_name);
            }
            debug!("[{}/{}] {} (id={})", i + 1, documents.len(), file_name, doc.id);

            let fetched = FetchedDocument {
                id: document_id(&file_name),
                path: pdf_dir.join(&file_name),
                file_name,
            };
            let result = match fetch_document(
                self.parts.fetcher.as_ref(),
                doc,
                &fetched.path,
                &fetch_policy,
                &cancel,
            )
            .await
            {
                Ok(outcome) => {
                    if outcome == FetchOutcome::Cached {
                        debug!("{}: already on disk", fetched.file_name);
                    }
                    pipeline.deliver(target, &fetched).await
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(DocumentOutcome::Delivered { .. }) => report.delivered += 1,
                Ok(DocumentOutcome::Skipped { .. }) => report.skipped += 1,
                Err(DeliveryError::Cancelled) => {
                    report.cancelled = true;
                    break;
                }
                Err(e) => self.record_failure(&mut report, target, doc, &fetched, &e).await,
            }

            if let Err(DeliveryError::Cancelled) = dispatcher.settle().await {
                report.cancelled = true;
                break;
            }
        }

        if report.cancelled {
            info!("Run cancelled after {:.1}s", start.elapsed().as_secs_f64());
            announce(notifier, target, notices::RUN_CANCELLED).await;
        } else {
            info!(
                "Run finished in {:.1}s: {} delivered, {} skipped, {} failed",
                start.elapsed().as_secs_f64(),
                report.delivered,
                report.skipped,
                report.failed.len()
            );
            announce(notifier, target, notices::RUN_FINISHED).await;
        }
        if let Some(cb) = &self.progress {
            cb.on_run_complete(report.delivered, report.skipped, report.failed.len());
        }
        Ok(report)
    }

    async fn list_documents(&self, source: &str) -> Result<Vec<DocumentRef>, DeliveryError> {
        let listed = self
            .parts
            .lister
            .list(source)
            .await
            .map_err(|e| DeliveryError::ListFailed {
                source_id: source.to_string(),
                detail: e.to_string(),
            })?;
        let total = listed.len();
        let mut documents: Vec<DocumentRef> = listed.into_iter().filter(DocumentRef::is_pdf).collect();
        documents.sort_by_key(|d| d.id);
        if documents.len() < total {
            debug!("Ignoring {} non-PDF entries", total - documents.len());
        }
        Ok(documents)
    }

    async fn record_failure(
        &self,
        report: &mut RunReport,
        target: ChatTarget,
        doc: &DocumentRef,
        fetched: &FetchedDocument,
        error: &DeliveryError,
    ) {
        let message = error.to_string();
        warn!("PDF {} ({}) failed: {}", doc.id, fetched.file_name, message);
        announce(
            self.parts.notifier.as_ref(),
            target,
            &notices::document_failed(doc.id, &fetched.file_name, &message),
        )
        .await;
        if let Some(cb) = &self.progress {
            cb.on_document_error(&fetched.file_name, &message);
        }
        report.failed.push(DocumentFailure {
            id: doc.id,
            name: fetched.file_name.clone(),
            error: message,
        });
    }
}
