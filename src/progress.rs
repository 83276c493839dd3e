//! Progress-callback trait for run and document events.
//!
//! Inject an [`Arc<dyn DeliveryProgressCallback>`] via
//! [`crate::run::RunOrchestrator::with_progress`] to follow a run locally
//! (the CLI draws an `indicatif` bar with it). Chat notices are separate:
//! they go through [`crate::transport::Notifier`].
//!
//! # Example
//!
//! ```rust
//! use pdf2album::DeliveryProgressCallback;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct PageCounter(AtomicUsize);
//!
//! impl DeliveryProgressCallback for PageCounter {
//!     fn on_pages_confirmed(&self, _name: &str, _confirmed: u64, _total: usize, batch: usize) {
//!         self.0.fetch_add(batch, Ordering::SeqCst);
//!     }
//! }
//! ```

use std::sync::Arc;

/// Called by the orchestrator and the document pipeline as a run advances.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Events arrive from a single task, in order.
pub trait DeliveryProgressCallback: Send + Sync {
    /// Called once after the source has been listed.
    fn on_run_start(&self, total_documents: usize) {
        let _ = total_documents;
    }

    /// Called before a document is fetched.
    ///
    /// # Arguments
    /// * `index`: 1-based position in the run
    fn on_document_start(&self, index: usize, total_documents: usize, name: &str) {
        let _ = (index, total_documents, name);
    }

    /// Called after each confirmed album.
    ///
    /// # Arguments
    /// * `confirmed`: cursor after this album
    /// * `batch`: pages in this album
    fn on_pages_confirmed(&self, name: &str, confirmed: u64, total_pages: usize, batch: usize) {
        let _ = (name, confirmed, total_pages, batch);
    }

    /// Called when the cursor already covered every page.
    fn on_document_skipped(&self, name: &str, total_pages: usize) {
        let _ = (name, total_pages);
    }

    /// Called after the last album of a document.
    fn on_document_complete(&self, name: &str, total_pages: usize) {
        let _ = (name, total_pages);
    }

    /// Called when a document fails; the run continues.
    fn on_document_error(&self, name: &str, error: &str) {
        let _ = (name, error);
    }

    /// Called once at the end of the run.
    fn on_run_complete(&self, delivered: usize, skipped: usize, failed: usize) {
        let _ = (delivered, skipped, failed);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl DeliveryProgressCallback for NoopProgressCallback {}

/// Convenience alias for the shared callback handle.
pub type ProgressCallback = Arc<dyn DeliveryProgressCallback>;
